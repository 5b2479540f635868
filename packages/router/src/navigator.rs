//! The handle applications navigate with.

use std::{
    fmt,
    pin::Pin,
    rc::Rc,
    sync::Arc,
    task::{Context, Poll},
};

use futures_channel::mpsc::{unbounded, UnboundedReceiver};
use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use waymark_history::Location;

use crate::{
    error::NavigationError,
    navigation::NavigateOptions,
    outlet::{Composer, Outlet},
    route_definition::RouteTree,
    router_cfg::RouterConfig,
    service::{NavigationAttempt, RouterMessage, RouterShared, Subscriber},
    state::{NavigationState, Phase},
};

/// A handle to a running [`RouterService`](crate::RouterService).
///
/// Cheap to clone. All clones control the same router.
pub struct Navigator<V> {
    pub(crate) shared: Rc<RouterShared<V>>,
}

impl<V> Clone for Navigator<V> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<V: 'static> Navigator<V> {
    pub(crate) fn from_shared(shared: Rc<RouterShared<V>>) -> Self {
        Self { shared }
    }

    /// Push a new location.
    ///
    /// `to` is resolved against the current location, so relative paths work like links do.
    pub fn push(&self, to: &str) -> Result<(), NavigationError> {
        self.navigate(to, NavigateOptions::default())
    }

    /// Replace the current location.
    pub fn replace(&self, to: &str) -> Result<(), NavigationError> {
        self.navigate(to, NavigateOptions::default().replace())
    }

    /// Navigate to `to`.
    ///
    /// The history is written right away and a new attempt starts, superseding any attempt still
    /// in flight. Invalid locations are rejected without touching anything.
    pub fn navigate(&self, to: &str, options: NavigateOptions) -> Result<(), NavigationError> {
        if self.shared.tx.is_closed() {
            return Err(NavigationError::ServiceStopped);
        }

        let current = self.shared.history.current_location();
        let NavigateOptions {
            replace,
            state,
            prevent_scroll_reset,
        } = options;

        let location = current
            .resolve(to)
            .map_err(|reason| {
                warn!(%to, %reason, "navigation aborted");
                NavigationError::Aborted {
                    to: to.to_string(),
                    reason,
                }
            })?
            .with_state(state);

        self.shared.prevent_scroll_reset.set(prevent_scroll_reset);
        match replace {
            true => self.shared.history.replace(location.clone()),
            false => self.shared.history.push(location.clone()),
        }

        self.begin(location, 0);
        Ok(())
    }

    /// Go back to the previous location.
    ///
    /// Does nothing if there is none.
    pub fn back(&self) {
        self.shared.history.go_back();
        self.observe_location();
    }

    /// Go forward to the next location.
    ///
    /// Does nothing if there is none.
    pub fn forward(&self) {
        self.shared.history.go_forward();
        self.observe_location();
    }

    /// Start resolving the current location of the history, unless it is already being resolved.
    ///
    /// [`History`](waymark_history::History)s that notify their updater don't need this. Others
    /// can call it after the location changed behind the routers back.
    pub fn observe_location(&self) {
        let location = self.shared.history.current_location();

        let known = self.shared.latest_key.borrow().as_ref() == Some(&location.key);
        if known {
            trace!(%location, "location already observed");
            return;
        }

        self.shared.prevent_scroll_reset.set(false);
        self.begin(location, 0);
    }

    /// Mint a new generation for `location` and queue it for resolution.
    pub(crate) fn begin(&self, location: Location, hops: usize) {
        let shared = &self.shared;

        let generation = shared.generation.get() + 1;
        shared.generation.set(generation);

        let token = CancellationToken::new();
        shared.token.replace(token.clone()).cancel();
        *shared.latest_key.borrow_mut() = Some(location.key.clone());

        debug!(generation, %location, hops, "attempt started");
        shared.update_state(|state| {
            state.is_resolving = true;
            state.phase = Phase::Resolving;
        });

        let attempt = NavigationAttempt {
            generation,
            location,
            token,
            hops,
        };
        if shared
            .tx
            .unbounded_send(RouterMessage::Resolve(attempt))
            .is_err()
        {
            warn!(generation, "router service stopped, attempt dropped");
        }
    }

    /// The current [`NavigationState`].
    pub fn current_state(&self) -> Arc<NavigationState<V>> {
        self.shared.current_state()
    }

    /// Call `callback` with the current state now, and with every new state until the returned
    /// [`Subscription`] is dropped.
    ///
    /// `callback` may navigate. The navigation starts right away, but the states it produces are
    /// only handed out once every subscriber has seen the current one.
    #[must_use = "dropping the subscription unsubscribes"]
    pub fn subscribe(
        &self,
        callback: impl Fn(&Arc<NavigationState<V>>) + 'static,
    ) -> Subscription<V> {
        let callback: Rc<Subscriber<V>> = Rc::new(callback);
        self.shared.subscribe(&callback);
        callback(&self.current_state());
        Subscription { _callback: callback }
    }

    /// A [`Stream`] of states, starting with the current one.
    pub fn watch(&self) -> StateStream<V> {
        let (tx, rx) = unbounded();
        let subscription = self.subscribe(move |state| {
            tx.unbounded_send(state.clone()).ok();
        });
        StateStream {
            rx,
            _subscription: subscription,
        }
    }

    /// The nested views of the current state.
    pub fn outlet(&self) -> Option<Outlet<V>> {
        self.composer().compose(&self.current_state())
    }

    /// A [`Composer`] for the current state that values can be provided to.
    pub fn composer(&self) -> Composer<V> {
        Composer::new(&self.shared.config)
    }

    /// The routes this navigator resolves against.
    pub fn tree(&self) -> &RouteTree<V> {
        &self.shared.tree
    }

    /// The configuration of the router.
    pub fn config(&self) -> &RouterConfig<V> {
        &self.shared.config
    }

    /// Whether the [`RouterService`](crate::RouterService) is still running.
    pub fn is_running(&self) -> bool {
        !self.shared.tx.is_closed()
    }
}

impl<V> fmt::Debug for Navigator<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Navigator")
            .field("generation", &self.shared.generation.get())
            .field("state", &self.shared.state.borrow())
            .finish_non_exhaustive()
    }
}

/// Keeps a subscription alive. Dropping it unsubscribes.
pub struct Subscription<V> {
    _callback: Rc<Subscriber<V>>,
}

impl<V> fmt::Debug for Subscription<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// The states of a router as a [`Stream`]. Created by [`Navigator::watch`].
pub struct StateStream<V> {
    rx: UnboundedReceiver<Arc<NavigationState<V>>>,
    _subscription: Subscription<V>,
}

impl<V> Stream for StateStream<V> {
    type Item = Arc<NavigationState<V>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_next_unpin(cx)
    }
}

impl<V> fmt::Debug for StateStream<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateStream").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::{route_definition::RouteDef, service::RouterService};
    use pretty_assertions::assert_eq;

    fn navigator() -> (RouterService<&'static str>, Navigator<&'static str>) {
        let tree = RouteTree::new(vec![
            RouteDef::new("/").view("home"),
            RouteDef::new("/users/:id").view("user"),
        ])
        .unwrap();
        RouterService::new(tree, RouterConfig::default())
    }

    #[test]
    fn invalid_locations_are_rejected() {
        let (_service, navigator) = navigator();
        let generation = navigator.shared.generation.get();

        assert!(matches!(
            navigator.push("//evil.com"),
            Err(NavigationError::Aborted { .. })
        ));
        assert!(matches!(
            navigator.push(""),
            Err(NavigationError::Aborted { .. })
        ));
        assert_eq!(navigator.shared.generation.get(), generation);
        assert_eq!(navigator.shared.history.current_location().pathname, "/");
    }

    #[test]
    fn navigating_writes_history_and_starts_resolving() {
        let (_service, navigator) = navigator();

        navigator.push("/users/1").unwrap();

        assert_eq!(
            navigator.shared.history.current_location().pathname,
            "/users/1"
        );
        let state = navigator.current_state();
        assert!(state.is_resolving);
        assert_eq!(state.phase, Phase::Resolving);
        assert_eq!(navigator.shared.generation.get(), 1);
    }

    #[test]
    fn new_attempts_cancel_the_previous_token() {
        let (_service, navigator) = navigator();

        navigator.push("/users/1").unwrap();
        let first = navigator.shared.token.borrow().clone();
        navigator.push("/users/2").unwrap();

        assert!(first.is_cancelled());
        assert!(!navigator.shared.token.borrow().is_cancelled());
        assert_eq!(navigator.shared.generation.get(), 2);
    }

    #[test]
    fn observing_the_same_location_twice_is_ignored() {
        let (_service, navigator) = navigator();

        navigator.observe_location();
        navigator.observe_location();

        assert_eq!(navigator.shared.generation.get(), 1);
    }

    #[test]
    fn subscribers_get_the_current_state_right_away() {
        let (_service, navigator) = navigator();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let subscription = navigator.subscribe({
            let seen = seen.clone();
            move |state| seen.borrow_mut().push(state.phase)
        });
        navigator.push("/users/1").unwrap();
        drop(subscription);
        navigator.push("/users/2").unwrap();

        assert_eq!(*seen.borrow(), [Phase::Idle, Phase::Resolving]);
    }

    #[test]
    fn stopped_service_rejects_navigation() {
        let (service, navigator) = navigator();
        drop(service);

        assert!(!navigator.is_running());
        assert_eq!(
            navigator.push("/users/1"),
            Err(NavigationError::ServiceStopped)
        );
    }
}
