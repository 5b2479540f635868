//! Data loaders.
//!
//! A route may carry a [`Loader`], which prepares data once the route has been committed. The
//! loaders of all matched routes run concurrently. Each result is accepted on its own, and only
//! if the attempt it belongs to is still the current one.

use std::{collections::BTreeMap, fmt, future::Future, panic::AssertUnwindSafe, sync::Arc};

use futures_util::future::{BoxFuture, FutureExt};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use waymark_history::Location;

use crate::{
    error::{NavigationError, StepError},
    matcher::MatchResult,
    navigation::{NavigateOptions, NavigationRequester},
    route_definition::RouteId,
};

/// What a loader returns.
pub type LoaderResult = Result<Value, StepError>;

type LoaderFn = dyn Fn(LoaderContext) -> BoxFuture<'static, LoaderResult> + Send + Sync;

/// Prepares the data of a route.
///
/// ```rust
/// # use waymark_router::prelude::*;
/// let user = Loader::new(|ctx| async move {
///     let id = ctx.param("id").unwrap_or_default().to_string();
///     Ok::<_, StepError>(serde_json::json!({ "id": id }))
/// });
/// ```
#[derive(Clone)]
pub struct Loader(Arc<LoaderFn>);

impl Loader {
    /// Create a loader from an async function.
    ///
    /// The function gets a [`LoaderContext`] holding the matched parameters and the cancellation
    /// token of the attempt. Anything convertible into a [`serde_json::Value`] may be returned.
    pub fn new<F, Fut, T, E>(loader: F) -> Self
    where
        F: Fn(LoaderContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Into<Value>,
        E: Into<StepError>,
    {
        Self(Arc::new(move |ctx: LoaderContext| {
            let load = loader(ctx);
            async move {
                let result: LoaderResult = load.await.map(Into::into).map_err(Into::into);
                result
            }
            .boxed()
        }))
    }

    pub(crate) fn load(&self, ctx: LoaderContext) -> BoxFuture<'static, LoaderResult> {
        (self.0)(ctx)
    }
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader").finish_non_exhaustive()
    }
}

struct LoaderContextInner {
    route: RouteId,
    params: BTreeMap<String, String>,
    location: Location,
    token: CancellationToken,
    requester: NavigationRequester,
}

/// What a loader knows about the navigation it loads for. Cheap to clone.
#[derive(Clone)]
pub struct LoaderContext {
    inner: Arc<LoaderContextInner>,
}

impl LoaderContext {
    /// The id of the route being loaded.
    pub fn route(&self) -> &RouteId {
        &self.inner.route
    }

    /// The parameters matched up to and including the route.
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.inner.params
    }

    /// A single parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.inner.params.get(name).map(String::as_str)
    }

    /// The committed location.
    pub fn location(&self) -> &Location {
        &self.inner.location
    }

    /// The cancellation token of the attempt. Cancelled once a newer attempt starts.
    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    /// Whether a newer attempt superseded this one.
    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Start a new navigation, superseding the current one.
    pub fn navigate(&self, to: &str) -> Result<(), NavigationError> {
        self.inner
            .requester
            .request(&self.inner.location, to, NavigateOptions::default())
    }
}

impl fmt::Debug for LoaderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderContext")
            .field("route", &self.inner.route)
            .field("params", &self.inner.params)
            .field("location", &self.inner.location)
            .finish_non_exhaustive()
    }
}

/// A settled loader.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LoaderSettled {
    pub(crate) route: RouteId,
    pub(crate) result: LoaderResult,
}

/// Start the loaders of every route in `matches`.
///
/// The returned futures are independent of each other and may be polled in any order. Panics are
/// caught and reported like errors.
pub(crate) fn dispatch<V>(
    matches: &[MatchResult<V>],
    location: &Location,
    token: &CancellationToken,
    requester: &NavigationRequester,
) -> Vec<BoxFuture<'static, LoaderSettled>> {
    matches
        .iter()
        .filter_map(|matched| {
            let loader = matched.route.loader.clone()?;
            let route = matched.route.id().clone();
            debug!(%route, "dispatching loader");

            let ctx = LoaderContext {
                inner: Arc::new(LoaderContextInner {
                    route: route.clone(),
                    params: matched.params.clone(),
                    location: location.clone(),
                    token: token.clone(),
                    requester: requester.clone(),
                }),
            };

            let task = async move {
                // the loader is invoked inside the caught future, so a panic there is caught too
                let load = AssertUnwindSafe(async move { loader.load(ctx).await });
                let result = match load.catch_unwind().await {
                    Ok(result) => result,
                    Err(payload) => {
                        let err = StepError::from_panic(payload);
                        error!(%route, error = %err, "loader panicked");
                        Err(err)
                    }
                };
                LoaderSettled { route, result }
            };
            Some(task.boxed())
        })
        .collect()
}

/// The ids of all routes in `matches` that have a loader.
pub(crate) fn loader_routes<V>(matches: &[MatchResult<V>]) -> Vec<RouteId> {
    matches
        .iter()
        .filter(|m| m.route.has_loader())
        .map(|m| m.route.id().clone())
        .collect()
}
