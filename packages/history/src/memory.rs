use std::{cell::RefCell, sync::Arc};

use crate::{History, Location, LocationError};

struct MemoryHistoryState {
    current: Location,
    history: Vec<Location>,
    future: Vec<Location>,
}

/// A [`History`] provider that stores all navigation information in memory.
///
/// Going back or forward counts as navigation coming from outside the router, so it notifies the
/// registered [`updater`](History::updater), just like a browser fires `popstate`. Pushing and
/// replacing do not.
pub struct MemoryHistory {
    state: RefCell<MemoryHistoryState>,
    base_path: Option<String>,
    updater: RefCell<Option<Arc<dyn Fn() + Send + Sync>>>,
}

impl Default for MemoryHistory {
    fn default() -> Self {
        Self::with_location(Location::default())
    }
}

impl MemoryHistory {
    /// Create a [`MemoryHistory`] starting at `path`.
    ///
    /// ```rust
    /// # use waymark_history::{History, MemoryHistory};
    /// let history = MemoryHistory::with_initial_path("/users/42").unwrap();
    /// assert_eq!(history.current_location().pathname, "/users/42");
    /// assert_eq!(history.can_go_back(), false);
    /// ```
    pub fn with_initial_path(path: &str) -> Result<Self, LocationError> {
        Ok(Self::with_location(Location::parse(path)?))
    }

    /// Create a [`MemoryHistory`] starting at `location`.
    pub fn with_location(location: Location) -> Self {
        Self {
            state: RefCell::new(MemoryHistoryState {
                current: location,
                history: Vec::new(),
                future: Vec::new(),
            }),
            base_path: None,
            updater: RefCell::new(None),
        }
    }

    /// Set the base path for the history.
    ///
    /// ```rust
    /// # use waymark_history::*;
    /// let history = MemoryHistory::default().with_prefix("/my-app");
    /// assert_eq!(history.current_prefix(), Some("/my-app".to_string()));
    /// ```
    pub fn with_prefix(mut self, prefix: impl ToString) -> Self {
        self.base_path = Some(prefix.to_string());
        self
    }

    /// The number of entries behind the current one.
    pub fn back_len(&self) -> usize {
        self.state.borrow().history.len()
    }

    /// The number of entries ahead of the current one.
    pub fn forward_len(&self) -> usize {
        self.state.borrow().future.len()
    }

    fn notify(&self) {
        // clone out of the cell so the callback may touch the history again
        let updater = self.updater.borrow().clone();
        if let Some(updater) = updater {
            updater();
        }
    }
}

impl History for MemoryHistory {
    fn current_location(&self) -> Location {
        self.state.borrow().current.clone()
    }

    fn current_prefix(&self) -> Option<String> {
        self.base_path.clone()
    }

    fn can_go_back(&self) -> bool {
        !self.state.borrow().history.is_empty()
    }

    fn go_back(&self) {
        let moved = {
            let mut write = self.state.borrow_mut();
            match write.history.pop() {
                Some(last) => {
                    let old = std::mem::replace(&mut write.current, last);
                    write.future.push(old);
                    true
                }
                None => false,
            }
        };

        if moved {
            self.notify();
        }
    }

    fn can_go_forward(&self) -> bool {
        !self.state.borrow().future.is_empty()
    }

    fn go_forward(&self) {
        let moved = {
            let mut write = self.state.borrow_mut();
            match write.future.pop() {
                Some(next) => {
                    let old = std::mem::replace(&mut write.current, next);
                    write.history.push(old);
                    true
                }
                None => false,
            }
        };

        if moved {
            self.notify();
        }
    }

    fn push(&self, location: Location) {
        let mut write = self.state.borrow_mut();
        // don't push the same entry twice
        if write.current.key == location.key {
            tracing::trace!(%location, "ignoring push of the current entry");
            return;
        }
        let old = std::mem::replace(&mut write.current, location);
        write.history.push(old);
        write.future.clear();
    }

    fn replace(&self, location: Location) {
        self.state.borrow_mut().current = location;
    }

    fn updater(&self, callback: Arc<dyn Fn() + Send + Sync>) {
        *self.updater.borrow_mut() = Some(callback);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use pretty_assertions::assert_eq;

    fn loc(path: &str) -> Location {
        Location::parse(path).unwrap()
    }

    #[test]
    fn starts_at_root() {
        let history = MemoryHistory::default();
        assert_eq!(history.current_location().pathname, "/");
        assert!(!history.can_go_back());
        assert!(!history.can_go_forward());
    }

    #[test]
    fn push_back_forward() {
        let history = MemoryHistory::default();
        history.push(loc("/a"));
        history.push(loc("/b"));
        assert_eq!(history.back_len(), 2);

        history.go_back();
        assert_eq!(history.current_location().pathname, "/a");
        assert!(history.can_go_forward());

        history.go_forward();
        assert_eq!(history.current_location().pathname, "/b");
        assert!(!history.can_go_forward());
    }

    #[test]
    fn push_clears_future() {
        let history = MemoryHistory::default();
        history.push(loc("/a"));
        history.go_back();
        history.push(loc("/b"));
        assert_eq!(history.forward_len(), 0);
        assert_eq!(history.current_location().pathname, "/b");
    }

    #[test]
    fn replace_keeps_history() {
        let history = MemoryHistory::default();
        history.push(loc("/a"));
        history.replace(loc("/login"));
        assert_eq!(history.current_location().pathname, "/login");
        assert_eq!(history.back_len(), 1);

        history.go_back();
        assert_eq!(history.current_location().pathname, "/");
    }

    #[test]
    fn pushing_the_current_entry_is_ignored() {
        let history = MemoryHistory::default();
        let a = loc("/a");
        history.push(a.clone());
        history.push(a);
        assert_eq!(history.back_len(), 1);
    }

    #[test]
    fn back_and_forward_notify_updater() {
        let calls = Arc::new(AtomicUsize::new(0));
        let history = MemoryHistory::default();
        let counter = calls.clone();
        history.updater(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        history.push(loc("/a"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        history.go_back();
        history.go_forward();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // nothing to go forward to, so no notification
        history.go_forward();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
