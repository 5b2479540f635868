use std::{collections::BTreeMap, fmt};

use tracing::error;

use crate::{
    chain::{Guard, Step},
    loader::Loader,
};

/// The declaration of a single route, as the user writes it.
///
/// A [`RouteDef`] is only a description. It becomes routable once it is normalized into a
/// [`RouteTree`](super::RouteTree), which parses its patterns and validates the whole tree.
///
/// `V` is the view descriptor of the rendering layer. The router never looks inside it.
///
/// ```rust
/// # use waymark_router::prelude::*;
/// let routes = vec![
///     RouteDef::new("/").view("home"),
///     RouteDef::new("/users/:id")
///         .view("user")
///         .child(RouteDef::index().view("profile"))
///         .child(RouteDef::new("settings").view("settings")),
///     RouteDef::new("/404").view("missing").not_found(),
/// ];
/// let tree = RouteTree::new(routes).unwrap();
/// assert_eq!(tree.routes().len(), 3);
/// ```
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(default, bound(deserialize = "V: serde::Deserialize<'de>"))
)]
pub struct RouteDef<V> {
    pub(crate) paths: Vec<String>,
    pub(crate) id: Option<String>,
    pub(crate) view: Option<V>,
    pub(crate) error_view: Option<V>,
    pub(crate) fallback: Option<V>,
    pub(crate) children: Vec<RouteDef<V>>,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub(crate) middleware: Vec<Step>,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub(crate) guard: Option<Guard>,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub(crate) loader: Option<Loader>,
    pub(crate) redirect_to: Option<String>,
    pub(crate) metadata: BTreeMap<String, String>,
    pub(crate) not_found: bool,
    pub(crate) index: bool,
}

impl<V> Default for RouteDef<V> {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            id: None,
            view: None,
            error_view: None,
            fallback: None,
            children: Vec::new(),
            middleware: Vec::new(),
            guard: None,
            loader: None,
            redirect_to: None,
            metadata: BTreeMap::new(),
            not_found: false,
            index: false,
        }
    }
}

impl<V> RouteDef<V> {
    /// Declare a route matching `path`.
    ///
    /// Nested routes are relative to their parent, so `settings` and `/settings` mean the same
    /// below `/users/:id`.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            paths: vec![path.into()],
            ..Default::default()
        }
    }

    /// Declare a pathless layout route.
    ///
    /// It consumes no path segments and only exists to wrap its children (and to run its steps
    /// for all of them).
    pub fn layout() -> Self {
        Self::default()
    }

    /// Declare an index route.
    ///
    /// An index route is active when its parent matched the whole path. It can have neither a
    /// path nor children.
    pub fn index() -> Self {
        Self {
            index: true,
            ..Default::default()
        }
    }

    /// Add an alternative pattern. Aliases are tried in declaration order, after the primary path.
    pub fn alias(mut self, path: impl Into<String>) -> Self {
        self.paths.push(path.into());
        self
    }

    /// Give the route an explicit id.
    ///
    /// Routes without an id get one derived from their position in the tree, like `1.0`.
    ///
    /// # Panic
    /// If an id was already set, but only in debug builds.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        if let Some(old) = &self.id {
            error!(%old, new = %id, "route id already set, later prevails");
            #[cfg(debug_assertions)]
            panic!("route id already set");
        }
        self.id = Some(id);
        self
    }

    /// Set the view to render for this route.
    ///
    /// # Panic
    /// If a view was already set, but only in debug builds.
    pub fn view(mut self, view: V) -> Self {
        if self.view.is_some() {
            error!("view already set, later prevails");
            #[cfg(debug_assertions)]
            panic!("view already set");
        }
        self.view = Some(view);
        self
    }

    /// Set the view that renders loader errors of this route and its descendants.
    pub fn error_view(mut self, view: V) -> Self {
        self.error_view = Some(view);
        self
    }

    /// Set the view that renders when this route or one of its descendants blocks.
    pub fn fallback(mut self, view: V) -> Self {
        self.fallback = Some(view);
        self
    }

    /// Add a nested route.
    pub fn child(mut self, child: RouteDef<V>) -> Self {
        self.children.push(child);
        self
    }

    /// Add several nested routes.
    pub fn children(mut self, children: impl IntoIterator<Item = RouteDef<V>>) -> Self {
        self.children.extend(children);
        self
    }

    /// Append a middleware [`Step`]. Steps run in the order they were added.
    pub fn middleware(mut self, step: Step) -> Self {
        self.middleware.push(step);
        self
    }

    /// Set the [`Guard`], which runs after all middleware continued.
    ///
    /// # Panic
    /// If a guard was already set, but only in debug builds.
    pub fn guard(mut self, guard: Guard) -> Self {
        if self.guard.is_some() {
            error!("guard already set, later prevails");
            #[cfg(debug_assertions)]
            panic!("guard already set");
        }
        self.guard = Some(guard);
        self
    }

    /// Set the [`Loader`] that prepares data once the route is committed.
    ///
    /// # Panic
    /// If a loader was already set, but only in debug builds.
    pub fn loader(mut self, loader: Loader) -> Self {
        if self.loader.is_some() {
            error!("loader already set, later prevails");
            #[cfg(debug_assertions)]
            panic!("loader already set");
        }
        self.loader = Some(loader);
        self
    }

    /// Make this route redirect whenever it is matched.
    ///
    /// `:name` and `*name` segments of `target` are filled in from the matched parameters.
    ///
    /// ```rust
    /// # use waymark_router::prelude::*;
    /// let route: RouteDef<()> = RouteDef::new("/blog/:slug").redirect_to("/articles/:slug");
    /// ```
    pub fn redirect_to(mut self, target: impl Into<String>) -> Self {
        self.redirect_to = Some(target.into());
        self
    }

    /// Attach an opaque key-value pair, readable by steps.
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Mark this route as the not-found fallback of its sibling list.
    ///
    /// It is never matched by its pattern, only used when no sibling matches.
    pub fn not_found(mut self) -> Self {
        self.not_found = true;
        self
    }
}

impl<V> fmt::Debug for RouteDef<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteDef")
            .field("paths", &self.paths)
            .field("id", &self.id)
            .field("children", &self.children)
            .field("middleware", &self.middleware.len())
            .field("guard", &self.guard.is_some())
            .field("loader", &self.loader.is_some())
            .field("redirect_to", &self.redirect_to)
            .field("metadata", &self.metadata)
            .field("not_found", &self.not_found)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}
