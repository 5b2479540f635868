//! Errors produced while building route trees, navigating, and resolving.

use std::{error::Error as StdError, fmt, sync::Arc};

use waymark_history::LocationError;

use crate::route_definition::RouteId;

/// A structural problem with a route tree, reported while it is normalized.
///
/// These are programming errors in the route declarations, so they surface eagerly from
/// [`RouteTree::new`](crate::route_definition::RouteTree::new) instead of at match time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    /// A path pattern cannot be parsed.
    #[error("malformed pattern {pattern:?}: {reason}")]
    MalformedPattern {
        /// The offending pattern.
        pattern: String,
        /// What is wrong with it.
        reason: String,
    },
    /// Two routes share an id.
    #[error("duplicate route id: {0}")]
    DuplicateRouteId(RouteId),
    /// More than one not-found fallback in the same sibling list.
    #[error("more than one not-found fallback below {parent}")]
    DuplicateNotFound {
        /// The parent route, or `root` for the top level.
        parent: String,
    },
    /// Two sibling routes declare the same catch-all pattern, so the later one could never match.
    #[error("duplicate catch-all pattern among siblings: {pattern}")]
    DuplicateCatchAll {
        /// The repeated pattern.
        pattern: String,
    },
    /// An index route was declared with something only regular routes may have.
    #[error("invalid index route: {reason}")]
    InvalidIndexRoute {
        /// What the index route must not have.
        reason: String,
    },
}

/// An error reported synchronously to the caller of [`Navigator::navigate`].
///
/// [`Navigator::navigate`]: crate::Navigator::navigate
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NavigationError {
    /// The target is not a well-formed, internal location. No state transition happened.
    #[error("navigation to {to:?} aborted: {reason}")]
    Aborted {
        /// The rejected target.
        to: String,
        /// Why the location was rejected.
        reason: LocationError,
    },
    /// The [`RouterService`](crate::RouterService) driving this navigator was dropped.
    #[error("the router service is no longer running")]
    ServiceStopped,
}

/// The error a guard, middleware step or loader reports.
///
/// Cheap to clone, so it can live inside immutable state snapshots.
#[derive(Clone)]
pub struct StepError {
    message: String,
    source: Option<Arc<dyn StdError + Send + Sync>>,
}

impl StepError {
    /// Create an error from a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap another error.
    pub fn new(source: impl StdError + Send + Sync + 'static) -> Self {
        Self {
            message: source.to_string(),
            source: Some(Arc::new(source)),
        }
    }

    /// The human readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Build an error from a caught panic payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            String::from("unknown panic")
        };
        Self::msg(format!("panicked: {message}"))
    }
}

impl fmt::Debug for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepError")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for StepError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|err| err as &(dyn StdError + 'static))
    }
}

impl PartialEq for StepError {
    fn eq(&self, other: &Self) -> bool {
        self.message == other.message
    }
}

impl From<String> for StepError {
    fn from(message: String) -> Self {
        Self::msg(message)
    }
}

impl From<&str> for StepError {
    fn from(message: &str) -> Self {
        Self::msg(message)
    }
}

/// An error recorded into [`NavigationState`](crate::state::NavigationState) while resolving.
///
/// These never propagate to the caller; they are state.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolveError {
    /// A guard failed (returned an error or panicked). Treated as a block.
    #[error("guard of route {route} failed: {error}")]
    GuardFailure {
        /// The route whose guard failed.
        route: RouteId,
        /// What the guard reported.
        error: StepError,
    },
    /// A middleware step failed. Treated as a block.
    #[error("middleware of route {route} failed: {error}")]
    MiddlewareFailure {
        /// The route whose middleware failed.
        route: RouteId,
        /// What the step reported.
        error: StepError,
    },
    /// A loader failed. Recorded for that route only.
    #[error("loader of route {route} failed: {error}")]
    LoaderFailure {
        /// The route whose loader failed.
        route: RouteId,
        /// What the loader reported.
        error: StepError,
    },
    /// Redirects kept going in a circle or exceeded the configured limit.
    #[error("redirect loop detected at {target} after {hops} redirects")]
    RedirectLoop {
        /// The redirect that was refused.
        target: String,
        /// How many redirects were followed before giving up.
        hops: usize,
    },
    /// A step or redirect route pointed at something that is not an internal location.
    #[error("cannot redirect to {target:?}: {reason}")]
    InvalidRedirect {
        /// The rejected target.
        target: String,
        /// Why it was rejected.
        reason: LocationError,
    },
}

impl ResolveError {
    /// The route the error is attached to, if any.
    pub fn route(&self) -> Option<&RouteId> {
        match self {
            Self::GuardFailure { route, .. }
            | Self::MiddlewareFailure { route, .. }
            | Self::LoaderFailure { route, .. } => Some(route),
            Self::RedirectLoop { .. } | Self::InvalidRedirect { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("database unavailable")]
    struct DbDown;

    #[test]
    fn step_error_keeps_source() {
        let err = StepError::new(DbDown);
        assert_eq!(err.message(), "database unavailable");
        assert!(err.source().is_some());
        assert_eq!(err.clone(), err);
    }

    #[test]
    fn step_error_from_panic_payloads() {
        let err = StepError::from_panic(Box::new("boom"));
        assert_eq!(err.message(), "panicked: boom");

        let err = StepError::from_panic(Box::new(String::from("bang")));
        assert_eq!(err.message(), "panicked: bang");

        let err = StepError::from_panic(Box::new(42_u8));
        assert_eq!(err.message(), "panicked: unknown panic");
    }

    #[test]
    fn resolve_error_route() {
        let route = RouteId::from("users");
        let err = ResolveError::GuardFailure {
            route: route.clone(),
            error: StepError::msg("denied"),
        };
        assert_eq!(err.route(), Some(&route));
        assert_eq!(err.to_string(), "guard of route users failed: denied");

        let err = ResolveError::RedirectLoop {
            target: String::from("/a"),
            hops: 8,
        };
        assert_eq!(err.route(), None);
    }
}
