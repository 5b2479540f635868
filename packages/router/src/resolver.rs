//! The resolution pipeline shared by the [`Navigator`](crate::Navigator) and the
//! one-shot [`resolve`].

use std::{collections::BTreeMap, sync::Arc};

use futures_util::{stream::FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use waymark_history::Location;

use crate::{
    chain::{run_route, StepContext, Verdict},
    error::ResolveError,
    loader::{dispatch, loader_routes, LoaderSettled},
    matcher::{MatchResult, Matches},
    navigation::NavigationRequester,
    route_definition::{fill_target, RouteTree},
    router_cfg::RouterConfig,
    state::{NavigationState, Phase, Status},
};

/// The result of matching a location and running the steps of the matched routes.
pub(crate) enum Pipeline<V> {
    /// Every route continued.
    Matched(Vec<MatchResult<V>>),
    /// Nothing matched.
    NotFound { fallback: Option<Arc<V>> },
    /// A route blocked. `matches` only holds the routes above it.
    Blocked {
        matches: Vec<MatchResult<V>>,
        fallback: Option<Arc<V>>,
        error: Option<ResolveError>,
    },
    /// A route redirected to `target`.
    Redirect {
        target: Location,
        matches: Vec<MatchResult<V>>,
        depth: usize,
    },
}

impl<V> Pipeline<V> {
    /// Turn a redirect that must not be followed into a block at the redirecting route.
    pub(crate) fn refuse_redirect(self, config: &RouterConfig<V>, error: ResolveError) -> Self {
        match self {
            Self::Redirect { matches, depth, .. } => block(matches, depth, config, Some(error)),
            other => other,
        }
    }
}

/// The base path to match with.
pub(crate) fn base_path<V>(config: &RouterConfig<V>, prefix: Option<String>) -> String {
    config.base_path.clone().or(prefix).unwrap_or_default()
}

/// Match `location` and run the middleware and guards of the chain, root first.
///
/// Returns [`None`] if the attempt was superseded before all routes were checked.
pub(crate) async fn run_pipeline<V>(
    tree: &RouteTree<V>,
    config: &RouterConfig<V>,
    base: &str,
    location: &Location,
    token: &CancellationToken,
    requester: &NavigationRequester,
) -> Option<Pipeline<V>> {
    let Matches { chain, not_found } = tree.matches(&location.pathname, base);

    if chain.is_empty() {
        debug!(%location, "no route matched");
        let fallback = not_found
            .and_then(|route| route.view.clone())
            .or_else(|| config.not_found.clone());
        return Some(Pipeline::NotFound { fallback });
    }

    for (depth, matched) in chain.iter().enumerate() {
        if token.is_cancelled() {
            trace!(%location, depth, "attempt superseded, skipping remaining steps");
            return None;
        }

        let route = &matched.route;
        if let Some(template) = &route.redirect_to {
            let to = fill_target(template, &matched.params);
            debug!(route = %route.id, %to, "redirect route matched");
            return Some(redirect(chain, depth, location, to, config));
        }

        let ctx = StepContext::new(
            location.clone(),
            matched.params.clone(),
            route.id.clone(),
            matched.pattern.clone(),
            matched.pathname.clone(),
            route.metadata.clone(),
            depth,
            token.clone(),
            requester.clone(),
        );

        match run_route(route, ctx).await {
            Verdict::Continue => {}
            Verdict::Redirect(to) => return Some(redirect(chain, depth, location, to, config)),
            Verdict::Block(error) => return Some(block(chain, depth, config, error)),
        }
    }

    Some(Pipeline::Matched(chain))
}

fn redirect<V>(
    matches: Vec<MatchResult<V>>,
    depth: usize,
    location: &Location,
    to: String,
    config: &RouterConfig<V>,
) -> Pipeline<V> {
    match location.resolve(&to) {
        Ok(target) => Pipeline::Redirect {
            target,
            matches,
            depth,
        },
        Err(reason) => {
            warn!(%location, target = %to, %reason, "invalid redirect");
            block(
                matches,
                depth,
                config,
                Some(ResolveError::InvalidRedirect { target: to, reason }),
            )
        }
    }
}

/// Truncate the chain before `depth` and pick the nearest fallback at or above it.
fn block<V>(
    mut matches: Vec<MatchResult<V>>,
    depth: usize,
    config: &RouterConfig<V>,
    error: Option<ResolveError>,
) -> Pipeline<V> {
    let fallback = matches
        .iter()
        .take(depth + 1)
        .rev()
        .find_map(|m| m.route.fallback.clone())
        .or_else(|| config.not_found.clone());
    matches.truncate(depth);

    Pipeline::Blocked {
        matches,
        fallback,
        error,
    }
}

/// Refuse redirects back to the location being resolved, and chains longer than allowed.
pub(crate) fn check_redirect(
    location: &Location,
    target: &Location,
    hops: usize,
    max_redirects: usize,
) -> Result<(), ResolveError> {
    if target.same_target(location) || hops >= max_redirects {
        warn!(from = %location, to = %target, hops, "redirect loop detected");
        return Err(ResolveError::RedirectLoop {
            target: target.href(),
            hops,
        });
    }
    Ok(())
}

/// Build the state a pipeline result commits to.
///
/// Loader bookkeeping starts out pending; results are applied by the caller.
pub(crate) fn commit<V>(
    pipeline: Pipeline<V>,
    location: Location,
    generation: u64,
) -> NavigationState<V> {
    let mut state = NavigationState {
        location,
        generation,
        ..Default::default()
    };

    match pipeline {
        Pipeline::Matched(matches) => {
            state.pending_loaders = loader_routes(&matches).into_iter().collect();
            state.params = chain_params(&matches);
            state.matches = matches;
            state.phase = Phase::Committed;
            state.status = Status::Ok;
        }
        Pipeline::NotFound { fallback } => {
            state.fallback = fallback;
            state.phase = Phase::Committed;
            state.status = Status::NotFound;
        }
        Pipeline::Blocked {
            matches,
            fallback,
            error,
        } => {
            state.params = chain_params(&matches);
            state.matches = matches;
            state.fallback = fallback;
            state.blocked = true;
            state.last_error = error;
            state.phase = Phase::Blocked;
            state.status = Status::NotFound;
        }
        Pipeline::Redirect { target, .. } => {
            state.redirect_pending = Some(target.href());
            state.phase = Phase::Redirecting;
            state.status = Status::Redirect;
        }
    }

    state
}

fn chain_params<V>(matches: &[MatchResult<V>]) -> BTreeMap<String, String> {
    matches
        .last()
        .map(|m| m.params.clone())
        .unwrap_or_default()
}

/// Record a settled loader in `state`.
pub(crate) fn apply_loader<V>(state: &mut NavigationState<V>, settled: LoaderSettled) {
    let LoaderSettled { route, result } = settled;
    state.pending_loaders.remove(&route);
    match result {
        Ok(data) => {
            state.loader_errors.remove(&route);
            state.loader_data.insert(route, data);
        }
        Err(error) => {
            warn!(%route, %error, "loader failed");
            state.loader_errors.insert(route.clone(), error.clone());
            state.last_error = Some(ResolveError::LoaderFailure { route, error });
        }
    }
}

/// Resolve `location` once, the way a server would.
///
/// This runs exactly what a [`Navigator`](crate::Navigator) runs for the same location
/// (matching, middleware, guards) and then awaits every loader of the committed chain. Redirects
/// are not followed: the state reports [`Status::Redirect`] with the resolved target in
/// [`NavigationState::redirect_pending`].
///
/// ```rust
/// # use waymark_history::Location;
/// # use waymark_router::prelude::*;
/// # futures_util::FutureExt::now_or_never(async {
/// let tree = RouteTree::new(vec![
///     RouteDef::new("/").view("home"),
///     RouteDef::new("/old").redirect_to("/"),
/// ])
/// .unwrap();
///
/// let state = resolve(&tree, Location::parse("/").unwrap()).await;
/// assert_eq!(state.status, Status::Ok);
///
/// let state = resolve(&tree, Location::parse("/old").unwrap()).await;
/// assert_eq!(state.status.code(), 302);
/// assert_eq!(state.redirect_pending.as_deref(), Some("/"));
///
/// let state = resolve(&tree, Location::parse("/missing").unwrap()).await;
/// assert_eq!(state.status, Status::NotFound);
/// # }).unwrap();
/// ```
pub async fn resolve<V>(tree: &RouteTree<V>, location: Location) -> NavigationState<V> {
    resolve_with(tree, &RouterConfig::default(), location).await
}

/// Like [`resolve`], with an explicit [`RouterConfig`].
pub async fn resolve_with<V>(
    tree: &RouteTree<V>,
    config: &RouterConfig<V>,
    location: Location,
) -> NavigationState<V> {
    let token = CancellationToken::new();
    let requester = NavigationRequester::detached();
    let base = base_path(config, None);

    let Some(pipeline) = run_pipeline(tree, config, &base, &location, &token, &requester).await
    else {
        // nothing can cancel the token of a one-shot resolution
        return NavigationState::default();
    };

    let refused = match &pipeline {
        Pipeline::Redirect { target, .. } => {
            check_redirect(&location, target, 0, config.max_redirects).err()
        }
        _ => None,
    };
    let pipeline = match refused {
        Some(error) => pipeline.refuse_redirect(config, error),
        None => pipeline,
    };

    let mut state = commit(pipeline, location, 0);
    if state.phase != Phase::Committed {
        return state;
    }

    let settled: Vec<_> = dispatch(&state.matches, &state.location, &token, &requester)
        .into_iter()
        .collect::<FuturesUnordered<_>>()
        .collect()
        .await;

    // apply in chain order so the result does not depend on which loader finished first
    let order: Vec<_> = state.route_ids().cloned().collect();
    let mut settled: BTreeMap<_, _> = settled.into_iter().map(|s| (s.route.clone(), s)).collect();
    for route in order {
        if let Some(settled) = settled.remove(&route) {
            apply_loader(&mut state, settled);
        }
    }

    state
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use serde_json::json;

    use super::*;
    use crate::{
        chain::{Guard, Outcome, Step},
        error::StepError,
        loader::Loader,
        route_definition::RouteDef,
    };
    use pretty_assertions::assert_eq;

    fn loc(path: &str) -> Location {
        Location::parse(path).unwrap()
    }

    fn views(state: &NavigationState<&'static str>) -> Vec<&'static str> {
        state.views().map(|v| **v).collect()
    }

    fn scenario_tree() -> RouteTree<&'static str> {
        RouteTree::new(vec![
            RouteDef::new("/").view("A"),
            RouteDef::new("/users/:id")
                .view("B")
                .child(RouteDef::new("settings").view("C")),
            RouteDef::new("/404").view("D").not_found(),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn nested_match() {
        let state = resolve(&scenario_tree(), loc("/users/42/settings")).await;
        assert_eq!(views(&state), ["B", "C"]);
        assert_eq!(state.matches[0].params["id"], "42");
        assert_eq!(state.matches[1].params["id"], "42");
        assert_eq!(state.params, BTreeMap::from([("id".into(), "42".into())]));
        assert_eq!(state.status, Status::Ok);
        assert_eq!(state.phase, Phase::Committed);
    }

    #[tokio::test]
    async fn unknown_renders_not_found_route() {
        let state = resolve(&scenario_tree(), loc("/unknown")).await;
        assert!(state.matches.is_empty());
        assert_eq!(state.fallback.as_deref(), Some(&"D"));
        assert_eq!(state.status, Status::NotFound);
        assert!(!state.blocked);
    }

    #[tokio::test]
    async fn nested_not_found_renders_alone() {
        let guarded = Arc::new(AtomicBool::new(false));
        let tree = RouteTree::new(vec![RouteDef::new("/docs")
            .view("docs")
            .guard(Guard::sync({
                let guarded = guarded.clone();
                move |_| {
                    guarded.store(true, Ordering::SeqCst);
                    Outcome::Continue
                }
            }))
            .child(RouteDef::new("intro").view("intro"))
            .child(RouteDef::new("missing").view("docs-404").not_found())])
        .unwrap();

        let state = resolve(&tree, loc("/docs/unknown")).await;
        assert!(state.matches.is_empty());
        assert_eq!(state.fallback.as_deref(), Some(&"docs-404"));
        assert_eq!(state.status, Status::NotFound);
        assert!(!guarded.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn configured_not_found_without_route() {
        let tree = RouteTree::new(vec![RouteDef::new("/").view("A")]).unwrap();
        let config = RouterConfig::default().not_found("404");
        let state = resolve_with(&tree, &config, loc("/nope")).await;
        assert_eq!(state.fallback.as_deref(), Some(&"404"));
    }

    #[tokio::test]
    async fn middleware_redirect() {
        let tree = RouteTree::new(vec![
            RouteDef::new("/dashboard")
                .view("dashboard")
                .middleware(Step::sync(|_| Outcome::Redirect(String::from("/login")))),
            RouteDef::new("/login").view("login"),
        ])
        .unwrap();
        let state = resolve(&tree, loc("/dashboard")).await;
        assert_eq!(state.status, Status::Redirect);
        assert_eq!(state.redirect_pending.as_deref(), Some("/login"));
        assert!(state.matches.is_empty());
    }

    #[tokio::test]
    async fn redirect_route_fills_params() {
        let tree = RouteTree::new(vec![
            RouteDef::<()>::new("/blog/:slug").redirect_to("/articles/:slug?ref=blog"),
        ])
        .unwrap();
        let state = resolve(&tree, loc("/blog/hello")).await;
        assert_eq!(
            state.redirect_pending.as_deref(),
            Some("/articles/hello?ref=blog")
        );
    }

    #[tokio::test]
    async fn redirect_to_self_is_a_loop() {
        let tree = RouteTree::new(vec![RouteDef::new("/loop")
            .view("loop")
            .guard(Guard::sync(|_| "/loop"))])
        .unwrap();
        let state = resolve(&tree, loc("/loop")).await;
        assert!(state.blocked);
        assert_eq!(state.status, Status::NotFound);
        assert!(matches!(
            state.last_error,
            Some(ResolveError::RedirectLoop { .. })
        ));
    }

    #[tokio::test]
    async fn invalid_redirect_blocks() {
        let tree = RouteTree::new(vec![RouteDef::new("/x")
            .view("x")
            .guard(Guard::sync(|_| "https://elsewhere.example/"))])
        .unwrap();
        let state = resolve(&tree, loc("/x")).await;
        assert!(state.blocked);
        assert!(matches!(
            state.last_error,
            Some(ResolveError::InvalidRedirect { .. })
        ));
    }

    #[tokio::test]
    async fn block_truncates_and_uses_nearest_fallback() {
        let tree = RouteTree::new(vec![RouteDef::new("/admin")
            .view("admin")
            .fallback("admin-denied")
            .child(
                RouteDef::new("users")
                    .view("users")
                    .child(RouteDef::new(":id").view("user").guard(Guard::sync(|_| false))),
            )])
        .unwrap();
        let state = resolve(&tree, loc("/admin/users/1")).await;
        assert!(state.blocked);
        assert_eq!(views(&state), ["admin", "users"]);
        assert_eq!(state.fallback.as_deref(), Some(&"admin-denied"));
        assert_eq!(state.last_error, None);
        assert_eq!(state.phase, Phase::Blocked);
    }

    #[tokio::test]
    async fn guard_failure_blocks_and_is_recorded() {
        let tree = RouteTree::new(vec![RouteDef::new("/secret")
            .id("secret")
            .view("secret")
            .guard(Guard::new(|_| async {
                Err::<bool, _>(StepError::msg("session store down"))
            }))])
        .unwrap();
        let config = RouterConfig::default().not_found("404");
        let state = resolve_with(&tree, &config, loc("/secret")).await;
        assert!(state.blocked);
        assert!(state.matches.is_empty());
        assert_eq!(state.fallback.as_deref(), Some(&"404"));
        assert_eq!(
            state.last_error,
            Some(ResolveError::GuardFailure {
                route: "secret".into(),
                error: StepError::msg("session store down"),
            })
        );
    }

    #[tokio::test]
    async fn parent_steps_run_before_child_steps() {
        let tree = RouteTree::new(vec![RouteDef::new("/a")
            .view("a")
            .guard(Guard::sync(|_| false))
            .child(RouteDef::new("b").view("b").guard(Guard::sync(|_| -> bool {
                panic!("child guard must not run")
            })))])
        .unwrap();
        let state = resolve(&tree, loc("/a/b")).await;
        assert!(state.blocked);
        assert!(state.matches.is_empty());
        assert_eq!(state.last_error, None);
    }

    #[tokio::test]
    async fn loaders_are_awaited() {
        let tree = RouteTree::new(vec![RouteDef::new("/users/:id")
            .id("user")
            .view("user")
            .loader(Loader::new(|ctx| async move {
                Ok::<_, StepError>(json!({ "name": format!("user {}", ctx.param("id").unwrap_or("?")) }))
            }))
            .child(
                RouteDef::new("posts")
                    .id("posts")
                    .view("posts")
                    .loader(Loader::new(|_| async {
                        Err::<serde_json::Value, _>(StepError::msg("timeout"))
                    })),
            )])
        .unwrap();
        let state = resolve(&tree, loc("/users/9/posts")).await;
        assert_eq!(state.loader_data("user"), Some(&json!({ "name": "user 9" })));
        assert_eq!(
            state.loader_errors.get("posts"),
            Some(&StepError::msg("timeout"))
        );
        assert!(state.loaders_settled());
        assert!(matches!(
            state.last_error,
            Some(ResolveError::LoaderFailure { .. })
        ));
    }

    #[tokio::test]
    async fn base_path_from_config() {
        let tree = scenario_tree();
        let config = RouterConfig::default().base_path("/app");
        let state = resolve_with(&tree, &config, loc("/app/users/1")).await;
        assert_eq!(views(&state), ["B"]);
        assert_eq!(state.matches[0].base, "/app");
    }
}
