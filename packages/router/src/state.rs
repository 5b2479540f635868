//! The committed, observable result of navigating.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{self, Debug},
    sync::Arc,
};

use serde_json::Value;
use waymark_history::Location;

use crate::{
    error::{ResolveError, StepError},
    matcher::MatchResult,
    route_definition::RouteId,
};

/// Where the navigation state machine currently is.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Nothing has been resolved yet.
    #[default]
    Idle,
    /// An attempt is in flight.
    Resolving,
    /// The last attempt was committed, either matching or resolving to a not-found fallback.
    /// Loaders may still be running.
    Committed,
    /// A step redirected, the target is being resolved.
    Redirecting,
    /// The last attempt was blocked and a fallback is shown.
    Blocked,
}

/// The response status equivalent of a resolved location.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Status {
    /// A route matched and nothing blocked it.
    #[default]
    Ok,
    /// A step or redirect route asked to go elsewhere.
    Redirect,
    /// Nothing matched, or the navigation was blocked.
    NotFound,
}

impl Status {
    /// The HTTP status code for this status.
    ///
    /// ```rust
    /// # use waymark_router::prelude::*;
    /// assert_eq!(Status::Ok.code(), 200);
    /// assert_eq!(Status::Redirect.code(), 302);
    /// assert_eq!(Status::NotFound.code(), 404);
    /// ```
    pub fn code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::Redirect => 302,
            Self::NotFound => 404,
        }
    }
}

/// The committed routing information.
///
/// Snapshots are immutable. Observers get an [`Arc`] of one, and a new snapshot replaces it on every
/// transition.
pub struct NavigationState<V> {
    /// The location this state belongs to.
    pub location: Location,

    /// The match chain, root first. Truncated before the blocking route if a step blocked.
    pub matches: Vec<MatchResult<V>>,

    /// The parameters of the whole chain. On collisions the deepest route wins.
    pub params: BTreeMap<String, String>,

    /// The resolved target of a redirect that has not been committed yet.
    pub redirect_pending: Option<String>,

    /// Whether a step blocked the last attempt.
    pub blocked: bool,

    /// The view to render in place of the (remaining) chain: a route fallback, a not-found route
    /// or the configured not-found view.
    pub fallback: Option<Arc<V>>,

    /// The data produced by each route's loader, keyed by route id.
    pub loader_data: BTreeMap<RouteId, Value>,

    /// The errors of failed loaders, keyed by route id.
    pub loader_errors: BTreeMap<RouteId, StepError>,

    /// Routes whose loader has not settled yet.
    pub pending_loaders: BTreeSet<RouteId>,

    /// The most recent error recorded while resolving.
    pub last_error: Option<ResolveError>,

    /// Whether an attempt is in flight. The rest of the snapshot still describes the last
    /// committed attempt.
    pub is_resolving: bool,

    /// Where the state machine is.
    pub phase: Phase,

    /// The response status equivalent.
    pub status: Status,

    /// The generation of the attempt that produced this state.
    pub generation: u64,

    /// Whether there is a prior location to go back to.
    ///
    /// This might be [`true`] even if there isn't.
    pub can_go_back: bool,

    /// Whether there is a later location to go forward to.
    ///
    /// This might be [`true`] even if there isn't.
    pub can_go_forward: bool,

    /// Whether the navigation asked to keep the scroll position.
    pub prevent_scroll_reset: bool,
}

impl<V> Default for NavigationState<V> {
    fn default() -> Self {
        Self {
            location: Location::default(),
            matches: Vec::new(),
            params: BTreeMap::new(),
            redirect_pending: None,
            blocked: false,
            fallback: None,
            loader_data: BTreeMap::new(),
            loader_errors: BTreeMap::new(),
            pending_loaders: BTreeSet::new(),
            last_error: None,
            is_resolving: false,
            phase: Phase::Idle,
            status: Status::Ok,
            generation: 0,
            can_go_back: false,
            can_go_forward: false,
            prevent_scroll_reset: false,
        }
    }
}

impl<V> Clone for NavigationState<V> {
    fn clone(&self) -> Self {
        Self {
            location: self.location.clone(),
            matches: self.matches.clone(),
            params: self.params.clone(),
            redirect_pending: self.redirect_pending.clone(),
            blocked: self.blocked,
            fallback: self.fallback.clone(),
            loader_data: self.loader_data.clone(),
            loader_errors: self.loader_errors.clone(),
            pending_loaders: self.pending_loaders.clone(),
            last_error: self.last_error.clone(),
            is_resolving: self.is_resolving,
            phase: self.phase,
            status: self.status,
            generation: self.generation,
            can_go_back: self.can_go_back,
            can_go_forward: self.can_go_forward,
            prevent_scroll_reset: self.prevent_scroll_reset,
        }
    }
}

impl<V> NavigationState<V> {
    /// The ids of the matched routes, root first.
    pub fn route_ids(&self) -> impl Iterator<Item = &RouteId> {
        self.matches.iter().map(|m| m.route.id())
    }

    /// The view of every matched route, root first. Routes without a view are skipped.
    pub fn views(&self) -> impl Iterator<Item = &Arc<V>> {
        self.matches.iter().filter_map(|m| m.route.view())
    }

    /// The data of the route with the given id, once its loader succeeded.
    pub fn loader_data(&self, route: &str) -> Option<&Value> {
        self.loader_data.get(route)
    }

    /// Whether all loaders of the committed chain have settled.
    pub fn loaders_settled(&self) -> bool {
        self.pending_loaders.is_empty()
    }

    /// Checks if `path` is currently active.
    ///
    /// If `exact` is [`true`], the current pathname must equal `path`.
    ///
    /// If `exact` is [`false`] and `path` is absolute (starts with `/`), the current pathname must
    /// start with `path`, ending on a segment boundary.
    ///
    /// Otherwise, the last segment of the current pathname must equal `path`.
    ///
    /// The query and fragment are ignored.
    #[must_use]
    pub fn is_active(&self, path: &str, exact: bool) -> bool {
        let current = self.location.pathname.as_str();

        if exact {
            return current == path;
        }

        // absolute path
        if path.starts_with('/') {
            let prefix = path.trim_end_matches('/');
            return match current.strip_prefix(prefix) {
                Some(rest) => rest.is_empty() || rest.starts_with('/'),
                None => false,
            };
        }

        // relative path
        current
            .split('/')
            .filter(|s| !s.is_empty())
            .last()
            .is_some_and(|segment| segment == path)
    }

    /// Checks if the route with the given id is part of the match chain.
    #[must_use]
    pub fn is_route_active(&self, route: &str) -> bool {
        self.matches.iter().any(|m| m.route.id().as_str() == route)
    }
}

// `V` is opaque and doesn't have to implement [`Debug`]
impl<V> Debug for NavigationState<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NavigationState")
            .field("location", &self.location)
            .field("matches", &self.matches)
            .field("params", &self.params)
            .field("redirect_pending", &self.redirect_pending)
            .field("blocked", &self.blocked)
            .field("fallback", &self.fallback.is_some())
            .field("loader_data", &self.loader_data)
            .field("loader_errors", &self.loader_errors)
            .field("pending_loaders", &self.pending_loaders)
            .field("last_error", &self.last_error)
            .field("is_resolving", &self.is_resolving)
            .field("phase", &self.phase)
            .field("status", &self.status)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}
