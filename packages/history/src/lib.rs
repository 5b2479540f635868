//! History Integration
//!
//! The router relies on [`History`] providers to store the current [`Location`], and possibly a
//! history (i.e. a browsers back button) and future (i.e. a browsers forward button).
//!
//! To integrate the router with any kind of platform history, implement the [`History`] trait.
//! [`MemoryHistory`] is the default implementation and is what tests and servers use.

#![deny(missing_docs)]

use std::sync::Arc;

mod location;
pub use location::*;

mod memory;
pub use memory::*;

/// An integration with some kind of navigation history.
///
/// Depending on your use case, your implementation may deviate from the described procedure. This
/// is fine, as long as `current_location` always returns a location whose pathname starts with
/// `/`. The pathname may include the prefix, the router strips it before matching.
///
/// The described behaviors are designed to mimic a web browser, which most users should already
/// know. Deviations might confuse them.
pub trait History {
    /// Get the current [`Location`].
    ///
    /// ```rust
    /// # use waymark_history::{History, Location, MemoryHistory};
    /// let history = MemoryHistory::default();
    /// assert_eq!(history.current_location().pathname, "/");
    ///
    /// history.push(Location::parse("/path").unwrap());
    /// assert_eq!(history.current_location().pathname, "/path");
    /// ```
    #[must_use]
    fn current_location(&self) -> Location;

    /// Get the current path prefix of the URL.
    ///
    /// Not all [`History`]s need a prefix feature. It is meant for environments where the routed
    /// application is not running on `/`. Locations outside the prefix match nothing.
    fn current_prefix(&self) -> Option<String> {
        None
    }

    /// Check whether there is a previous page to navigate back to.
    ///
    /// If a [`History`] cannot know this, it should return [`true`].
    #[must_use]
    fn can_go_back(&self) -> bool {
        true
    }

    /// Go back to a previous page.
    ///
    /// If a [`History`] cannot go to a previous page, it should do nothing. This method might be
    /// called, even if `can_go_back` returns [`false`].
    fn go_back(&self);

    /// Check whether there is a future page to navigate forward to.
    ///
    /// If a [`History`] cannot know this, it should return [`true`].
    #[must_use]
    fn can_go_forward(&self) -> bool {
        true
    }

    /// Go forward to a future page.
    ///
    /// If a [`History`] cannot go to a future page, it should do nothing.
    fn go_forward(&self);

    /// Go to another page.
    ///
    /// This should do three things:
    /// 1. Make `location` the current location.
    /// 2. Add the previous location to the navigation history.
    /// 3. Clear the navigation future.
    fn push(&self, location: Location);

    /// Replace the current page with another one.
    ///
    /// In contrast to [`History::push`], the navigation history and future stay untouched.
    fn replace(&self, location: Location);

    /// Provide the [`History`] with an update callback.
    ///
    /// Some [`History`]s receive location updates from outside the router (a user pressing the
    /// browsers back button). When such updates are received, they should call `callback`, which
    /// will cause the router to observe the new location.
    #[allow(unused_variables)]
    fn updater(&self, callback: Arc<dyn Fn() + Send + Sync>) {}
}
