use std::{
    collections::{BTreeMap, HashSet},
    fmt::{self, Display},
    sync::Arc,
};

use tracing::trace;

use super::{PathPattern, RouteDef};
use crate::{
    chain::{Guard, Step},
    error::RouteError,
    loader::Loader,
};

/// The identifier of a route.
///
/// Either given explicitly with [`RouteDef::id`], or derived from the position of the route in
/// its tree: `"1.0"` is the first child of the second root route.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RouteId(Arc<str>);

impl RouteId {
    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl From<&str> for RouteId {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<String> for RouteId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl std::borrow::Borrow<str> for RouteId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A normalized route. Immutable once its [`RouteTree`] is built.
pub struct RouteNode<V> {
    pub(crate) id: RouteId,
    pub(crate) patterns: Vec<PathPattern>,
    pub(crate) view: Option<Arc<V>>,
    pub(crate) error_view: Option<Arc<V>>,
    pub(crate) fallback: Option<Arc<V>>,
    pub(crate) children: Vec<Arc<RouteNode<V>>>,
    pub(crate) middleware: Arc<[Step]>,
    pub(crate) guard: Option<Guard>,
    pub(crate) loader: Option<Loader>,
    pub(crate) redirect_to: Option<String>,
    pub(crate) metadata: Arc<BTreeMap<String, String>>,
    pub(crate) not_found: bool,
    pub(crate) index: bool,
}

impl<V> RouteNode<V> {
    /// The id of the route.
    pub fn id(&self) -> &RouteId {
        &self.id
    }

    /// The patterns of the route, primary first, aliases after.
    ///
    /// Index routes and pathless layouts have exactly one, empty, pattern.
    pub fn patterns(&self) -> &[PathPattern] {
        &self.patterns
    }

    /// The view descriptor, if any.
    pub fn view(&self) -> Option<&Arc<V>> {
        self.view.as_ref()
    }

    /// The view rendering loader errors, if any.
    pub fn error_view(&self) -> Option<&Arc<V>> {
        self.error_view.as_ref()
    }

    /// The view rendering blocked navigation, if any.
    pub fn fallback(&self) -> Option<&Arc<V>> {
        self.fallback.as_ref()
    }

    /// The nested routes.
    pub fn children(&self) -> &[Arc<RouteNode<V>>] {
        &self.children
    }

    /// Whether the route has a loader.
    pub fn has_loader(&self) -> bool {
        self.loader.is_some()
    }

    /// The redirect target template, if the route always redirects.
    pub fn redirect_to(&self) -> Option<&str> {
        self.redirect_to.as_deref()
    }

    /// The opaque metadata attached with [`RouteDef::meta`].
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Whether this is the not-found fallback of its sibling list.
    pub fn is_not_found(&self) -> bool {
        self.not_found
    }

    /// Whether this is an index route.
    pub fn is_index(&self) -> bool {
        self.index
    }
}

impl<V> fmt::Debug for RouteNode<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteNode")
            .field("id", &self.id)
            .field(
                "patterns",
                &self.patterns.iter().map(|p| p.to_string()).collect::<Vec<_>>(),
            )
            .field("children", &self.children)
            .field("not_found", &self.not_found)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

/// A normalized, validated tree of routes.
///
/// Cheap to clone and safe to share between threads (given a shareable `V`). Matching never
/// mutates it.
pub struct RouteTree<V> {
    pub(crate) routes: Arc<[Arc<RouteNode<V>>]>,
    pub(crate) index: Arc<BTreeMap<RouteId, IndexEntry<V>>>,
}

pub(crate) struct IndexEntry<V> {
    pub(crate) node: Arc<RouteNode<V>>,
    /// The full pattern of every way to reach the node, parent aliases included.
    pub(crate) full_patterns: Vec<PathPattern>,
}

impl<V> Clone for RouteTree<V> {
    fn clone(&self) -> Self {
        Self {
            routes: self.routes.clone(),
            index: self.index.clone(),
        }
    }
}

impl<V> fmt::Debug for RouteTree<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteTree")
            .field("routes", &self.routes)
            .finish()
    }
}

impl<V> RouteTree<V> {
    /// Normalize and validate `definitions`.
    ///
    /// # Errors
    /// - [`RouteError::MalformedPattern`] if any pattern cannot be parsed.
    /// - [`RouteError::InvalidIndexRoute`] if an index route has a path or children.
    /// - [`RouteError::DuplicateNotFound`] if a sibling list has more than one not-found route.
    /// - [`RouteError::DuplicateCatchAll`] if two siblings declare the same catch-all pattern.
    /// - [`RouteError::DuplicateRouteId`] if two routes share an id.
    pub fn new(definitions: impl IntoIterator<Item = RouteDef<V>>) -> Result<Self, RouteError> {
        let mut index = BTreeMap::new();
        let routes = normalize_list(
            definitions.into_iter().collect(),
            None,
            &[PathPattern::root()],
            &mut index,
        )?;

        Ok(Self {
            routes: routes.into(),
            index: Arc::new(index),
        })
    }

    /// The top level routes.
    pub fn routes(&self) -> &[Arc<RouteNode<V>>] {
        &self.routes
    }

    /// Look up a route by id.
    pub fn find(&self, id: &str) -> Option<&Arc<RouteNode<V>>> {
        self.index.get(id).map(|entry| &entry.node)
    }

    /// The number of routes in the tree, nested ones included.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the tree has no routes at all.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

fn normalize_list<V>(
    definitions: Vec<RouteDef<V>>,
    parent: Option<&RouteId>,
    parent_patterns: &[PathPattern],
    index: &mut BTreeMap<RouteId, IndexEntry<V>>,
) -> Result<Vec<Arc<RouteNode<V>>>, RouteError> {
    let mut nodes = Vec::with_capacity(definitions.len());
    let mut has_not_found = false;
    let mut catch_alls = HashSet::new();

    for (position, definition) in definitions.into_iter().enumerate() {
        let id = match (&definition.id, parent) {
            (Some(id), _) => RouteId::from(id.as_str()),
            (None, Some(parent)) => RouteId::from(format!("{parent}.{position}")),
            (None, None) => RouteId::from(position.to_string()),
        };

        if definition.not_found {
            if has_not_found {
                return Err(RouteError::DuplicateNotFound {
                    parent: parent.map_or_else(|| String::from("root"), ToString::to_string),
                });
            }
            has_not_found = true;
        }

        let node = normalize_route(definition, id, parent_patterns, index)?;

        if !node.not_found {
            for pattern in node.patterns.iter().filter(|p| p.has_catch_all()) {
                if !catch_alls.insert(pattern.shape()) {
                    return Err(RouteError::DuplicateCatchAll {
                        pattern: pattern.to_string(),
                    });
                }
            }
        }

        nodes.push(node);
    }

    Ok(nodes)
}

fn normalize_route<V>(
    definition: RouteDef<V>,
    id: RouteId,
    parent_patterns: &[PathPattern],
    index: &mut BTreeMap<RouteId, IndexEntry<V>>,
) -> Result<Arc<RouteNode<V>>, RouteError> {
    let RouteDef {
        paths,
        id: _,
        view,
        error_view,
        fallback,
        children,
        middleware,
        guard,
        loader,
        redirect_to,
        metadata,
        not_found,
        index: is_index,
    } = definition;

    if is_index && !paths.is_empty() {
        return Err(RouteError::InvalidIndexRoute {
            reason: format!("route {id} cannot have a path"),
        });
    }
    if is_index && !children.is_empty() {
        return Err(RouteError::InvalidIndexRoute {
            reason: format!("route {id} cannot have children"),
        });
    }

    let mut patterns = Vec::with_capacity(paths.len().max(1));
    for path in &paths {
        let pattern = PathPattern::parse(path)?;
        if !patterns.contains(&pattern) {
            patterns.push(pattern);
        }
    }
    if patterns.is_empty() {
        patterns.push(PathPattern::root());
    }

    let full_patterns: Vec<_> = parent_patterns
        .iter()
        .flat_map(|parent| patterns.iter().map(move |own| parent.join(own)))
        .collect();

    let children = normalize_list(children, Some(&id), &full_patterns, index)?;
    trace!(%id, patterns = ?patterns.iter().map(|p| p.to_string()).collect::<Vec<_>>(), "normalized route");

    let node = Arc::new(RouteNode {
        id: id.clone(),
        patterns,
        view: view.map(Arc::new),
        error_view: error_view.map(Arc::new),
        fallback: fallback.map(Arc::new),
        children,
        middleware: middleware.into(),
        guard,
        loader,
        redirect_to,
        metadata: Arc::new(metadata),
        not_found,
        index: is_index,
    });

    if index.contains_key(&id) {
        return Err(RouteError::DuplicateRouteId(id));
    }
    index.insert(
        id,
        IndexEntry {
            node: node.clone(),
            full_patterns,
        },
    );

    Ok(node)
}
