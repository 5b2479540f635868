//! Turning a match chain into nested views.
//!
//! Every level of the chain becomes an [`Outlet`] whose slot holds the next level. The rendering
//! layer renders the view of an outlet, and the view renders the slot wherever its child belongs.

use std::{any::Any, collections::BTreeMap, fmt, sync::Arc};

use crate::{
    error::StepError,
    route_definition::{RouteId, RouteNode},
    router_cfg::RouterConfig,
    state::NavigationState,
};

/// What an [`Outlet`] holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OutletKind {
    /// The view of a matched route.
    Route,
    /// An error view rendered in place of a route whose loader (or a descendants loader) failed.
    Error,
    /// The fallback of a blocked navigation or a location nothing matched.
    Fallback,
}

struct ContextFrame {
    route: Option<RouteId>,
    params: BTreeMap<String, String>,
    value: Option<Arc<dyn Any + Send + Sync>>,
    parent: Option<Arc<ContextFrame>>,
}

/// What an [`Outlet`] knows about itself and the outlets around it.
///
/// Values provided for an outlet are visible to the outlet itself and to everything in its slot.
/// Nothing can write to an ancestor.
#[derive(Clone, Default)]
pub struct OutletContext {
    current_level: usize,
    frame: Option<Arc<ContextFrame>>,
}

impl OutletContext {
    fn nest(
        &self,
        current_level: usize,
        route: Option<RouteId>,
        params: BTreeMap<String, String>,
        value: Option<Arc<dyn Any + Send + Sync>>,
    ) -> Self {
        Self {
            current_level,
            frame: Some(Arc::new(ContextFrame {
                route,
                params,
                value,
                parent: self.frame.clone(),
            })),
        }
    }

    /// The depth of the outlet. The outermost outlet is at level `0`.
    pub fn current_level(&self) -> usize {
        self.current_level
    }

    /// The id of the route at this level. [`None`] for fallbacks.
    pub fn route(&self) -> Option<&RouteId> {
        self.frame.as_ref()?.route.as_ref()
    }

    /// The parameters matched up to this level.
    pub fn params(&self) -> Option<&BTreeMap<String, String>> {
        self.frame.as_ref().map(|frame| &frame.params)
    }

    /// A single parameter matched up to this level.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params()?.get(name).map(String::as_str)
    }

    /// The nearest value of type `T` provided for this level or any level above it.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        let mut frame = self.frame.as_deref();
        while let Some(current) = frame {
            if let Some(value) = current.value.as_deref().and_then(|v| v.downcast_ref::<T>()) {
                return Some(value);
            }
            frame = current.parent.as_deref();
        }
        None
    }

    /// The ids of the routes above this level, outermost first.
    pub fn ancestors(&self) -> Vec<RouteId> {
        let mut ids = Vec::new();
        let mut frame = self.frame.as_ref().and_then(|f| f.parent.as_deref());
        while let Some(current) = frame {
            if let Some(route) = &current.route {
                ids.push(route.clone());
            }
            frame = current.parent.as_deref();
        }
        ids.reverse();
        ids
    }
}

impl fmt::Debug for OutletContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutletContext")
            .field("current_level", &self.current_level)
            .field("route", &self.route())
            .finish_non_exhaustive()
    }
}

/// One level of the composed view structure.
pub struct Outlet<V> {
    kind: OutletKind,
    route: Option<Arc<RouteNode<V>>>,
    view: Option<Arc<V>>,
    error: Option<StepError>,
    context: OutletContext,
    slot: Option<Box<Outlet<V>>>,
}

impl<V> Outlet<V> {
    /// What this outlet holds.
    pub fn kind(&self) -> OutletKind {
        self.kind
    }

    /// The route of this level. [`None`] for fallbacks.
    pub fn route(&self) -> Option<&Arc<RouteNode<V>>> {
        self.route.as_ref()
    }

    /// The view to render. [`None`] for routes without a view, which only pass their slot
    /// through.
    pub fn view(&self) -> Option<&Arc<V>> {
        self.view.as_ref()
    }

    /// The loader error an [`OutletKind::Error`] outlet displays, or the error of this levels
    /// loader if nothing could display it.
    pub fn error(&self) -> Option<&StepError> {
        self.error.as_ref()
    }

    /// The context of this level.
    pub fn context(&self) -> &OutletContext {
        &self.context
    }

    /// The depth of this level.
    pub fn depth(&self) -> usize {
        self.context.current_level
    }

    /// The next level, to be rendered inside this one.
    pub fn slot(&self) -> Option<&Outlet<V>> {
        self.slot.as_deref()
    }

    /// This outlet and all outlets nested in it, outermost first.
    pub fn levels(&self) -> impl Iterator<Item = &Outlet<V>> {
        std::iter::successors(Some(self), |outlet| outlet.slot())
    }
}

impl<V> fmt::Debug for Outlet<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outlet")
            .field("kind", &self.kind)
            .field("route", &self.route.as_ref().map(|r| r.id()))
            .field("error", &self.error)
            .field("context", &self.context)
            .field("slot", &self.slot)
            .finish_non_exhaustive()
    }
}

/// Builds [`Outlet`]s from [`NavigationState`]s.
///
/// ```rust
/// # use waymark_router::prelude::*;
/// # use futures_util::FutureExt;
/// # use waymark_history::Location;
/// struct Theme(&'static str);
///
/// let tree = RouteTree::new(vec![RouteDef::new("/settings")
///     .id("settings")
///     .view("settings layout")
///     .child(RouteDef::new("profile").view("profile page"))])
/// .unwrap();
///
/// let location = Location::parse("/settings/profile").unwrap();
/// let state = resolve(&tree, location).now_or_never().unwrap();
/// let outlet = Composer::default()
///     .provide("settings", Theme("dark"))
///     .compose(&state)
///     .unwrap();
///
/// let page = outlet.slot().unwrap();
/// assert_eq!(page.view().map(|v| **v), Some("profile page"));
/// assert_eq!(page.context().get::<Theme>().map(|t| t.0), Some("dark"));
/// ```
pub struct Composer<V> {
    error_view: Option<Arc<V>>,
    provided: BTreeMap<RouteId, Arc<dyn Any + Send + Sync>>,
}

impl<V> Default for Composer<V> {
    fn default() -> Self {
        Self {
            error_view: None,
            provided: BTreeMap::new(),
        }
    }
}

impl<V> Composer<V> {
    /// A composer using the error view of `config` when no route can display a loader error.
    pub fn new(config: &RouterConfig<V>) -> Self {
        Self {
            error_view: config.error_view.clone(),
            provided: BTreeMap::new(),
        }
    }

    /// Make `value` available to the outlet of `route` and everything nested in it.
    pub fn provide<T: Any + Send + Sync>(mut self, route: impl Into<RouteId>, value: T) -> Self {
        self.provided.insert(route.into(), Arc::new(value));
        self
    }

    /// Compose the match chain of `state`.
    ///
    /// Returns [`None`] if there is nothing to render, i.e. before anything was resolved.
    pub fn compose(&self, state: &NavigationState<V>) -> Option<Outlet<V>> {
        let boundary = self.error_boundary(state);
        let levels = match &boundary {
            Some(boundary) => &state.matches[..=boundary.depth],
            None => &state.matches[..],
        };

        // contexts flow downwards
        let mut parent = OutletContext::default();
        let mut contexts = Vec::with_capacity(levels.len());
        for (depth, matched) in levels.iter().enumerate() {
            let id = matched.route.id();
            parent = parent.nest(
                depth,
                Some(id.clone()),
                matched.params.clone(),
                self.provided.get(id).cloned(),
            );
            contexts.push(parent.clone());
        }

        // the innermost slot is the fallback, if there is one and no error replaced the chain
        let mut slot = match (&boundary, &state.fallback) {
            (None, Some(fallback)) => Some(Box::new(Outlet {
                kind: OutletKind::Fallback,
                route: None,
                view: Some(fallback.clone()),
                error: None,
                context: parent.nest(levels.len(), None, state.params.clone(), None),
                slot: None,
            })),
            _ => None,
        };

        // outlets wrap inwards
        for (matched, context) in levels.iter().zip(contexts).rev() {
            let depth = context.current_level;
            let outlet = match &boundary {
                Some(boundary) if boundary.depth == depth => Outlet {
                    kind: OutletKind::Error,
                    route: Some(matched.route.clone()),
                    view: Some(boundary.view.clone()),
                    error: Some(boundary.error.clone()),
                    context,
                    slot: None,
                },
                _ => Outlet {
                    kind: OutletKind::Route,
                    route: Some(matched.route.clone()),
                    view: matched.route.view().cloned(),
                    error: state.loader_errors.get(matched.route.id()).cloned(),
                    context,
                    slot: slot.take(),
                },
            };
            slot = Some(Box::new(outlet));
        }

        slot.map(|outlet| *outlet)
    }

    /// Where the outermost loader error is displayed.
    ///
    /// The route's own error view wins, then the nearest ancestors, then the global one, which
    /// takes the failing routes place.
    fn error_boundary(&self, state: &NavigationState<V>) -> Option<Boundary<V>> {
        let (failed, error) = state
            .matches
            .iter()
            .enumerate()
            .find_map(|(depth, m)| Some((depth, state.loader_errors.get(m.route.id())?)))?;

        let nearest = state.matches[..=failed]
            .iter()
            .enumerate()
            .rev()
            .find_map(|(depth, m)| Some((depth, m.route.error_view()?.clone())));

        let (depth, view) = match nearest {
            Some(nearest) => nearest,
            None => (failed, self.error_view.clone()?),
        };

        Some(Boundary {
            depth,
            view,
            error: error.clone(),
        })
    }
}

impl<V> fmt::Debug for Composer<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Composer")
            .field("error_view", &self.error_view.is_some())
            .field("provided", &self.provided.keys().collect::<Vec<_>>())
            .finish()
    }
}

struct Boundary<V> {
    depth: usize,
    view: Arc<V>,
    error: StepError,
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use waymark_history::Location;

    use super::*;
    use crate::{
        loader::Loader,
        resolver::{resolve, resolve_with},
        route_definition::{RouteDef, RouteTree},
    };
    use pretty_assertions::assert_eq;

    fn at(path: &str) -> Location {
        Location::parse(path).unwrap()
    }

    fn views(outlet: &Outlet<&'static str>) -> Vec<(usize, OutletKind, Option<&'static str>)> {
        outlet
            .levels()
            .map(|o| (o.depth(), o.kind(), o.view().map(|v| **v)))
            .collect()
    }

    fn tree() -> RouteTree<&'static str> {
        RouteTree::new(vec![
            RouteDef::new("/").view("A"),
            RouteDef::new("/users/:id")
                .id("user")
                .view("B")
                .child(RouteDef::new("settings").id("settings").view("C")),
            RouteDef::new("/404").view("D").not_found(),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn chain_is_nested_root_first() {
        let state = resolve(&tree(), at("/users/42/settings")).await;
        let outlet = Composer::default().compose(&state).unwrap();

        assert_eq!(
            views(&outlet),
            [
                (0, OutletKind::Route, Some("B")),
                (1, OutletKind::Route, Some("C")),
            ]
        );
        let inner = outlet.slot().unwrap();
        assert_eq!(inner.context().param("id"), Some("42"));
        assert_eq!(inner.context().ancestors(), [RouteId::from("user")]);
    }

    #[tokio::test]
    async fn not_found_is_the_only_outlet() {
        let state = resolve(&tree(), at("/unknown")).await;
        let outlet = Composer::default().compose(&state).unwrap();

        assert_eq!(views(&outlet), [(0, OutletKind::Fallback, Some("D"))]);
        assert!(outlet.route().is_none());
    }

    #[test]
    fn nothing_to_compose_before_resolving() {
        let state = NavigationState::<&'static str>::default();
        assert!(Composer::default().compose(&state).is_none());
    }

    #[tokio::test]
    async fn context_is_visible_to_descendants_only() {
        let state = resolve(&tree(), at("/users/42/settings")).await;
        let outlet = Composer::default()
            .provide("settings", 7_u32)
            .provide("user", "from user")
            .compose(&state)
            .unwrap();

        assert_eq!(outlet.context().get::<&str>(), Some(&"from user"));
        assert_eq!(outlet.context().get::<u32>(), None);

        let inner = outlet.slot().unwrap();
        assert_eq!(inner.context().get::<&str>(), Some(&"from user"));
        assert_eq!(inner.context().get::<u32>(), Some(&7));
    }

    #[tokio::test]
    async fn nearest_value_wins() {
        let state = resolve(&tree(), at("/users/42/settings")).await;
        let outlet = Composer::default()
            .provide("user", "outer")
            .provide("settings", "inner")
            .compose(&state)
            .unwrap();

        assert_eq!(outlet.context().get::<&str>(), Some(&"outer"));
        assert_eq!(outlet.slot().unwrap().context().get::<&str>(), Some(&"inner"));
    }

    fn failing_tree(error_view_on_parent: bool) -> RouteTree<&'static str> {
        let parent = RouteDef::new("/dash").id("dash").view("layout");
        let parent = match error_view_on_parent {
            true => parent.error_view("dash error"),
            false => parent,
        };
        RouteTree::new(vec![parent.child(
            RouteDef::new("stats")
                .id("stats")
                .view("stats")
                .loader(Loader::new(|_| async {
                    Err::<serde_json::Value, _>(StepError::msg("offline"))
                }))
                .child(RouteDef::new("daily").id("daily").view("daily")),
        )])
        .unwrap()
    }

    #[tokio::test]
    async fn loader_error_uses_nearest_ancestor_error_view() {
        let state = resolve(&failing_tree(true), at("/dash/stats/daily")).await;
        let outlet = Composer::default().compose(&state).unwrap();

        assert_eq!(views(&outlet), [(0, OutletKind::Error, Some("dash error"))]);
        assert_eq!(outlet.error(), Some(&StepError::msg("offline")));
    }

    #[tokio::test]
    async fn loader_error_uses_global_error_view_in_place() {
        let config = RouterConfig::default().error_view("global error");
        let state = resolve_with(&failing_tree(false), &config, at("/dash/stats/daily")).await;
        let outlet = Composer::new(&config).compose(&state).unwrap();

        assert_eq!(
            views(&outlet),
            [
                (0, OutletKind::Route, Some("layout")),
                (1, OutletKind::Error, Some("global error")),
            ]
        );
    }

    #[tokio::test]
    async fn loader_error_without_error_view_is_attached() {
        let state = resolve(&failing_tree(false), at("/dash/stats/daily")).await;
        let outlet = Composer::default().compose(&state).unwrap();

        assert_eq!(outlet.levels().count(), 3);
        assert_eq!(
            outlet.slot().unwrap().error(),
            Some(&StepError::msg("offline"))
        );
    }

    #[tokio::test]
    async fn successful_loaders_leave_the_chain_alone() {
        let tree = RouteTree::new(vec![RouteDef::new("/a")
            .view("a")
            .error_view("a error")
            .loader(Loader::new(|_| async { Ok::<_, StepError>(json!(1)) }))])
        .unwrap();
        let state = resolve(&tree, at("/a")).await;
        let outlet = Composer::default().compose(&state).unwrap();

        assert_eq!(views(&outlet), [(0, OutletKind::Route, Some("a"))]);
        assert_eq!(outlet.error(), None);
    }
}
