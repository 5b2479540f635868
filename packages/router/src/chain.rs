//! Middleware and guards.
//!
//! Every matched route can carry an ordered list of middleware [`Step`]s and a single [`Guard`].
//! Steps form a chain of responsibility: each one receives the [`StepContext`] and a [`Next`]
//! handle, and either delegates to the rest of the chain by running `next`, or short-circuits it
//! with an [`Outcome::Redirect`] or [`Outcome::Block`].
//!
//! Steps of a route run strictly in order, and routes run from the root down. Errors and panics
//! raised inside a step never escape the executor, they block the navigation instead.

use std::{collections::BTreeMap, fmt, future::Future, panic::AssertUnwindSafe, sync::Arc};

use futures_util::future::{BoxFuture, FutureExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, trace, warn};
use waymark_history::Location;

use crate::{
    error::{NavigationError, ResolveError, StepError},
    navigation::{NavigateOptions, NavigationRequester},
    route_definition::{RouteId, RouteNode},
};

/// What a step decided.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Carry on with the next step, route or loader.
    Continue,
    /// Abandon this navigation and go somewhere else instead. The target is resolved relative to
    /// the location being navigated to.
    Redirect(String),
    /// Stop here. The chain is truncated and a fallback is rendered.
    Block,
}

impl From<bool> for Outcome {
    /// `true` continues, `false` blocks.
    fn from(value: bool) -> Self {
        match value {
            true => Self::Continue,
            false => Self::Block,
        }
    }
}

impl From<String> for Outcome {
    /// A path redirects.
    fn from(value: String) -> Self {
        Self::Redirect(value)
    }
}

impl From<&str> for Outcome {
    /// A path redirects.
    fn from(value: &str) -> Self {
        Self::Redirect(value.to_string())
    }
}

impl From<Option<String>> for Outcome {
    /// Some path redirects, nothing continues.
    fn from(value: Option<String>) -> Self {
        match value {
            Some(to) => Self::Redirect(to),
            None => Self::Continue,
        }
    }
}

/// What a step returns.
pub type StepResult = Result<Outcome, StepError>;

fn into_step_result<O, E>(result: Result<O, E>) -> StepResult
where
    O: Into<Outcome>,
    E: Into<StepError>,
{
    result.map(Into::into).map_err(Into::into)
}

struct StepContextInner {
    location: Location,
    params: BTreeMap<String, String>,
    route: RouteId,
    pattern: String,
    pathname: String,
    metadata: Arc<BTreeMap<String, String>>,
    depth: usize,
    token: CancellationToken,
    requester: NavigationRequester,
}

/// What a step knows about the navigation it is part of. Cheap to clone.
#[derive(Clone)]
pub struct StepContext {
    inner: Arc<StepContextInner>,
}

impl StepContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        location: Location,
        params: BTreeMap<String, String>,
        route: RouteId,
        pattern: String,
        pathname: String,
        metadata: Arc<BTreeMap<String, String>>,
        depth: usize,
        token: CancellationToken,
        requester: NavigationRequester,
    ) -> Self {
        Self {
            inner: Arc::new(StepContextInner {
                location,
                params,
                route,
                pattern,
                pathname,
                metadata,
                depth,
                token,
                requester,
            }),
        }
    }

    /// The location being navigated to.
    pub fn location(&self) -> &Location {
        &self.inner.location
    }

    /// The parameters matched up to and including the current route.
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.inner.params
    }

    /// A single parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.inner.params.get(name).map(String::as_str)
    }

    /// The id of the route the step belongs to.
    pub fn route(&self) -> &RouteId {
        &self.inner.route
    }

    /// The full pattern the route matched with.
    pub fn pattern(&self) -> &str {
        &self.inner.pattern
    }

    /// The part of the pathname the route consumed.
    pub fn pathname(&self) -> &str {
        &self.inner.pathname
    }

    /// The metadata of the route.
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.inner.metadata
    }

    /// A single metadata value.
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.inner.metadata.get(key).map(String::as_str)
    }

    /// The position of the route in the match chain, `0` being the root.
    pub fn depth(&self) -> usize {
        self.inner.depth
    }

    /// The cancellation token of this navigation attempt.
    ///
    /// It is cancelled once a newer attempt starts. Whatever the step returns afterwards is
    /// ignored, so long running steps may stop early.
    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    /// Whether a newer attempt superseded this one.
    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Wait until a newer attempt supersedes this one.
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await
    }

    /// Start a new navigation, pushing `to` onto the history.
    ///
    /// This supersedes the current attempt. Use [`Outcome::Redirect`] instead to replace the
    /// location being navigated to.
    pub fn navigate(&self, to: &str) -> Result<(), NavigationError> {
        self.navigate_with(to, NavigateOptions::default())
    }

    /// Start a new navigation with explicit options.
    pub fn navigate_with(&self, to: &str, options: NavigateOptions) -> Result<(), NavigationError> {
        self.inner
            .requester
            .request(&self.inner.location, to, options)
    }
}

impl fmt::Debug for StepContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepContext")
            .field("location", &self.inner.location)
            .field("params", &self.inner.params)
            .field("route", &self.inner.route)
            .field("pattern", &self.inner.pattern)
            .field("depth", &self.inner.depth)
            .finish_non_exhaustive()
    }
}

type StepFn = dyn Fn(StepContext, Next) -> BoxFuture<'static, StepResult> + Send + Sync;

/// A middleware step.
///
/// ```rust
/// # use waymark_router::prelude::*;
/// // delegates, after logging
/// let log = Step::new(|ctx, next| async move {
///     println!("entering {}", ctx.pathname());
///     next.run().await
/// });
///
/// // short-circuits
/// let login = Step::sync(|ctx| match ctx.meta("auth") {
///     Some("required") => Outcome::Redirect(String::from("/login")),
///     _ => Outcome::Continue,
/// });
/// ```
#[derive(Clone)]
pub struct Step(Arc<StepFn>);

impl Step {
    /// Create an asynchronous step. It decides itself whether to run `next`.
    pub fn new<F, Fut>(step: F) -> Self
    where
        F: Fn(StepContext, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StepResult> + Send + 'static,
    {
        Self(Arc::new(move |ctx: StepContext, next: Next| step(ctx, next).boxed()))
    }

    /// Create a synchronous step. Continuing runs the rest of the chain.
    pub fn sync<F, O>(step: F) -> Self
    where
        F: Fn(&StepContext) -> O + Send + Sync + 'static,
        O: Into<Outcome>,
    {
        Self::try_sync(move |ctx| Ok::<_, StepError>(step(ctx)))
    }

    /// Create a synchronous step that may fail. Continuing runs the rest of the chain.
    pub fn try_sync<F, O, E>(step: F) -> Self
    where
        F: Fn(&StepContext) -> Result<O, E> + Send + Sync + 'static,
        O: Into<Outcome>,
        E: Into<StepError>,
    {
        Self(Arc::new(move |ctx: StepContext, next: Next| {
            match into_step_result(step(&ctx)) {
                Ok(Outcome::Continue) => next.run(),
                other => async move { other }.boxed(),
            }
        }))
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step").finish_non_exhaustive()
    }
}

/// The rest of a middleware chain.
pub struct Next {
    steps: Arc<[Step]>,
    index: usize,
    ctx: StepContext,
}

impl Next {
    pub(crate) fn new(steps: Arc<[Step]>, ctx: StepContext) -> Self {
        Self {
            steps,
            index: 0,
            ctx,
        }
    }

    /// How many steps are left, including the one `run` would invoke.
    pub fn remaining(&self) -> usize {
        self.steps.len().saturating_sub(self.index)
    }

    /// Run the next step, which gets to decide about the ones after it. Past the last step this
    /// is [`Outcome::Continue`].
    pub fn run(self) -> BoxFuture<'static, StepResult> {
        let Some(step) = self.steps.get(self.index).cloned() else {
            return async { Ok(Outcome::Continue) }.boxed();
        };

        let next = Next {
            steps: self.steps,
            index: self.index + 1,
            ctx: self.ctx.clone(),
        };
        trace!(route = %self.ctx.route(), step = self.index, "running middleware");
        (step.0)(self.ctx, next)
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("index", &self.index)
            .field("remaining", &self.remaining())
            .finish_non_exhaustive()
    }
}

type GuardFn = dyn Fn(StepContext) -> BoxFuture<'static, StepResult> + Send + Sync;

/// The single step a route runs after all of its middleware continued.
///
/// Guards return anything convertible into an [`Outcome`]: a `bool` continues or blocks, and a
/// path redirects.
///
/// ```rust
/// # use waymark_router::prelude::*;
/// let admin_only = Guard::sync(|ctx| ctx.location().query_pairs().contains(&(
///     String::from("role"),
///     String::from("admin"),
/// )));
/// let to_login = Guard::new(|_ctx| async { Ok::<_, StepError>("/login") });
/// ```
#[derive(Clone)]
pub struct Guard(Arc<GuardFn>);

impl Guard {
    /// Create an asynchronous guard.
    pub fn new<F, Fut, O, E>(guard: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, E>> + Send + 'static,
        O: Into<Outcome>,
        E: Into<StepError>,
    {
        Self(Arc::new(move |ctx: StepContext| {
            let check = guard(ctx);
            async move { into_step_result(check.await) }.boxed()
        }))
    }

    /// Create a synchronous guard.
    pub fn sync<F, O>(guard: F) -> Self
    where
        F: Fn(&StepContext) -> O + Send + Sync + 'static,
        O: Into<Outcome>,
    {
        Self(Arc::new(move |ctx: StepContext| {
            let result: StepResult = Ok(guard(&ctx).into());
            async move { result }.boxed()
        }))
    }

    pub(crate) fn check(&self, ctx: StepContext) -> BoxFuture<'static, StepResult> {
        (self.0)(ctx)
    }
}

impl fmt::Debug for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Guard").finish_non_exhaustive()
    }
}

/// Run `steps` in order, as a chain of responsibility.
///
/// An empty chain continues. A panic inside a step is caught and reported as an error.
pub async fn run(steps: Arc<[Step]>, ctx: StepContext) -> StepResult {
    let route = ctx.route().clone();
    // invoking the first step happens inside the caught future as well
    let chain = async move { Next::new(steps, ctx).run().await };
    catch_step_panic(chain, &route, "middleware").await
}

async fn catch_step_panic(
    step: impl Future<Output = StepResult>,
    route: &RouteId,
    kind: &str,
) -> StepResult {
    match AssertUnwindSafe(step).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let err = StepError::from_panic(payload);
            error!(%route, kind, error = %err, "step panicked");
            Err(err)
        }
    }
}

/// The combined outcome of all steps of one route.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Verdict {
    Continue,
    Redirect(String),
    Block(Option<ResolveError>),
}

/// Run the middleware of `route`, then its guard.
pub(crate) async fn run_route<V>(route: &RouteNode<V>, ctx: StepContext) -> Verdict {
    let id = route.id().clone();

    match run(route.middleware.clone(), ctx.clone()).await {
        Ok(Outcome::Continue) => {}
        Ok(Outcome::Redirect(to)) => return Verdict::Redirect(to),
        Ok(Outcome::Block) => {
            warn!(route = %id, "middleware blocked navigation");
            return Verdict::Block(None);
        }
        Err(error) => {
            warn!(route = %id, %error, "middleware failed");
            return Verdict::Block(Some(ResolveError::MiddlewareFailure { route: id, error }));
        }
    }

    let Some(guard) = route.guard.clone() else {
        return Verdict::Continue;
    };

    let check = async move { guard.check(ctx).await };
    match catch_step_panic(check, &id, "guard").await {
        Ok(Outcome::Continue) => Verdict::Continue,
        Ok(Outcome::Redirect(to)) => Verdict::Redirect(to),
        Ok(Outcome::Block) => {
            warn!(route = %id, "guard blocked navigation");
            Verdict::Block(None)
        }
        Err(error) => {
            warn!(route = %id, %error, "guard failed");
            Verdict::Block(Some(ResolveError::GuardFailure { route: id, error }))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use pretty_assertions::assert_eq;

    fn ctx() -> StepContext {
        StepContext::new(
            Location::parse("/dashboard").unwrap(),
            BTreeMap::new(),
            RouteId::from("dashboard"),
            String::from("/dashboard"),
            String::from("/dashboard"),
            Arc::new(BTreeMap::from([(String::from("auth"), String::from("required"))])),
            0,
            CancellationToken::new(),
            NavigationRequester::detached(),
        )
    }

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> Step {
        let log = log.clone();
        Step::new(move |_, next| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(name);
                next.run().await
            }
        })
    }

    #[tokio::test]
    async fn empty_chain_continues() {
        assert_eq!(run(Arc::from([]), ctx()).await, Ok(Outcome::Continue));
    }

    #[tokio::test]
    async fn steps_run_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let steps: Arc<[Step]> = Arc::from([
            recorder(&log, "first"),
            recorder(&log, "second"),
            recorder(&log, "third"),
        ]);
        assert_eq!(run(steps, ctx()).await, Ok(Outcome::Continue));
        assert_eq!(*log.lock().unwrap(), ["first", "second", "third"]);
    }

    #[tokio::test]
    async fn redirect_short_circuits() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let steps: Arc<[Step]> = Arc::from([
            recorder(&log, "first"),
            Step::sync(|ctx| match ctx.meta("auth") {
                Some("required") => Outcome::Redirect(String::from("/login")),
                _ => Outcome::Continue,
            }),
            recorder(&log, "never"),
        ]);
        assert_eq!(
            run(steps, ctx()).await,
            Ok(Outcome::Redirect(String::from("/login")))
        );
        assert_eq!(*log.lock().unwrap(), ["first"]);
    }

    #[tokio::test]
    async fn steps_can_see_what_follows() {
        let steps: Arc<[Step]> = Arc::from([
            Step::new(|_, next| async move {
                // wrap the rest of the chain and rewrite its outcome
                match next.run().await? {
                    Outcome::Block => Ok(Outcome::Redirect(String::from("/denied"))),
                    other => Ok(other),
                }
            }),
            Step::sync(|_| false),
        ]);
        assert_eq!(
            run(steps, ctx()).await,
            Ok(Outcome::Redirect(String::from("/denied")))
        );
    }

    #[tokio::test]
    async fn errors_and_panics_become_errors() {
        let steps: Arc<[Step]> = Arc::from([Step::try_sync(|_| Err::<bool, _>("no session"))]);
        assert_eq!(run(steps, ctx()).await, Err(StepError::msg("no session")));

        let steps: Arc<[Step]> = Arc::from([Step::sync(|_| -> bool { panic!("boom") })]);
        assert_eq!(run(steps, ctx()).await, Err(StepError::msg("panicked: boom")));

        let steps: Arc<[Step]> = Arc::from([Step::new(|_, _| async {
            if true {
                panic!("async boom");
            }
            Ok(Outcome::Continue)
        })]);
        assert_eq!(
            run(steps, ctx()).await,
            Err(StepError::msg("panicked: async boom"))
        );
    }

    #[test]
    fn outcome_conversions() {
        assert_eq!(Outcome::from(true), Outcome::Continue);
        assert_eq!(Outcome::from(false), Outcome::Block);
        assert_eq!(Outcome::from("/a"), Outcome::Redirect(String::from("/a")));
        assert_eq!(Outcome::from(None), Outcome::Continue);
        assert_eq!(
            Outcome::from(Some(String::from("/b"))),
            Outcome::Redirect(String::from("/b"))
        );
    }

    #[test]
    fn context_accessors() {
        let ctx = ctx();
        assert_eq!(ctx.route().as_str(), "dashboard");
        assert_eq!(ctx.meta("auth"), Some("required"));
        assert_eq!(ctx.param("id"), None);
        assert!(!ctx.is_cancelled());
        ctx.token().cancel();
        assert!(ctx.is_cancelled());
    }
}
