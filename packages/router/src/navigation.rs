//! Types relating to navigation.

use futures_channel::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use waymark_history::Location;

use crate::{error::NavigationError, service::RouterMessage};

/// How a navigation should be performed.
///
/// ```rust
/// # use waymark_router::prelude::*;
/// let options = NavigateOptions::default()
///     .replace()
///     .state(serde_json::json!({ "from": "login" }));
/// assert!(options.replace);
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NavigateOptions {
    /// Replace the current history entry instead of pushing a new one.
    pub replace: bool,
    /// Opaque state to attach to the new [`Location`].
    pub state: Option<serde_json::Value>,
    /// Ask the rendering layer not to reset the scroll position.
    pub prevent_scroll_reset: bool,
}

impl NavigateOptions {
    /// Replace the current history entry.
    pub fn replace(self) -> Self {
        Self {
            replace: true,
            ..self
        }
    }

    /// Attach opaque state.
    pub fn state(self, state: serde_json::Value) -> Self {
        Self {
            state: Some(state),
            ..self
        }
    }

    /// Keep the scroll position.
    pub fn prevent_scroll_reset(self) -> Self {
        Self {
            prevent_scroll_reset: true,
            ..self
        }
    }
}

/// Lets steps and loaders start a navigation while an attempt is in flight.
///
/// The request is validated right away and queued, so the new navigation starts once the event
/// loop gets to it. The attempt that asked for it is cancelled at once and never commits.
#[derive(Clone, Default)]
pub(crate) struct NavigationRequester {
    tx: Option<UnboundedSender<RouterMessage>>,
    attempt: Option<CancellationToken>,
}

impl NavigationRequester {
    pub(crate) fn new(tx: UnboundedSender<RouterMessage>, attempt: CancellationToken) -> Self {
        Self {
            tx: Some(tx),
            attempt: Some(attempt),
        }
    }

    /// A requester that belongs to no router, e.g. while resolving once on a server.
    pub(crate) fn detached() -> Self {
        Self::default()
    }

    pub(crate) fn request(
        &self,
        from: &Location,
        to: &str,
        options: NavigateOptions,
    ) -> Result<(), NavigationError> {
        let target = from.resolve(to).map_err(|reason| NavigationError::Aborted {
            to: to.to_string(),
            reason,
        })?;

        let tx = self.tx.as_ref().ok_or(NavigationError::ServiceStopped)?;
        tx.unbounded_send(RouterMessage::Navigate {
            to: target.href(),
            options,
        })
        .map_err(|_| NavigationError::ServiceStopped)?;

        if let Some(attempt) = &self.attempt {
            attempt.cancel();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures_channel::mpsc::unbounded;
    use futures_util::StreamExt;
    use waymark_history::LocationError;

    use super::*;

    #[test]
    fn builder() {
        let options = NavigateOptions::default().replace().prevent_scroll_reset();
        assert!(options.replace);
        assert!(options.prevent_scroll_reset);
        assert_eq!(options.state, None);
    }

    #[test]
    fn request_is_resolved_against_the_current_location() {
        let (tx, mut rx) = unbounded();
        let attempt = CancellationToken::new();
        let requester = NavigationRequester::new(tx, attempt.clone());
        let here = Location::parse("/users/42").unwrap();

        requester
            .request(&here, "7", NavigateOptions::default())
            .unwrap();
        assert!(attempt.is_cancelled());

        match futures_util::FutureExt::now_or_never(rx.next()) {
            Some(Some(RouterMessage::Navigate { to, .. })) => assert_eq!(to, "/users/7"),
            _ => panic!("expected a navigate message"),
        }
    }

    #[test]
    fn invalid_request_is_aborted() {
        let requester = NavigationRequester::detached();
        let here = Location::default();
        assert_eq!(
            requester.request(&here, "", NavigateOptions::default()),
            Err(NavigationError::Aborted {
                to: String::new(),
                reason: LocationError::Empty
            })
        );
    }

    #[test]
    fn detached_requester_has_no_service() {
        let requester = NavigationRequester::detached();
        assert_eq!(
            requester.request(&Location::default(), "/a", NavigateOptions::default()),
            Err(NavigationError::ServiceStopped)
        );
    }
}
