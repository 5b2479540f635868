//! Resolving a pathname against a [`RouteTree`].

use std::{collections::BTreeMap, fmt, sync::Arc};

use tracing::trace;
use urlencoding::decode;

use crate::route_definition::{PathPattern, RouteNode, RouteTree};

/// One level of a match chain.
pub struct MatchResult<V> {
    /// The matched route.
    pub route: Arc<RouteNode<V>>,
    /// The parameters of this level merged over those of all levels above it.
    pub params: BTreeMap<String, String>,
    /// The full pattern that matched, from the root down to this level.
    pub pattern: String,
    /// The part of the pathname consumed up to and including this level, base path included.
    pub pathname: String,
    /// The base path that was stripped before matching.
    pub base: String,
}

impl<V> Clone for MatchResult<V> {
    fn clone(&self) -> Self {
        Self {
            route: self.route.clone(),
            params: self.params.clone(),
            pattern: self.pattern.clone(),
            pathname: self.pathname.clone(),
            base: self.base.clone(),
        }
    }
}

impl<V> PartialEq for MatchResult<V> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.route, &other.route)
            && self.params == other.params
            && self.pattern == other.pattern
            && self.pathname == other.pathname
            && self.base == other.base
    }
}

impl<V> fmt::Debug for MatchResult<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatchResult")
            .field("route", self.route.id())
            .field("params", &self.params)
            .field("pattern", &self.pattern)
            .field("pathname", &self.pathname)
            .field("base", &self.base)
            .finish()
    }
}

/// Everything the matcher found for one pathname.
pub struct Matches<V> {
    /// The match chain, root first. Empty if nothing matched.
    pub chain: Vec<MatchResult<V>>,
    /// The innermost not-found route seen while matching. Only set if `chain` is empty.
    ///
    /// The routes above a nested not-found route are not part of the chain. An unmatched location
    /// never runs the steps or loaders of its would-be ancestors, so the fallback renders alone.
    pub not_found: Option<Arc<RouteNode<V>>>,
}

impl<V> fmt::Debug for Matches<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Matches")
            .field("chain", &self.chain)
            .field("not_found", &self.not_found.as_ref().map(|n| n.id()))
            .finish()
    }
}

struct Path<'a> {
    raw: Vec<&'a str>,
    decoded: Vec<String>,
    base: String,
}

struct NotFound<V> {
    depth: usize,
    node: Arc<RouteNode<V>>,
}

impl<V> RouteTree<V> {
    /// Match `pathname` and return the match chain, root first.
    ///
    /// Returns [`None`] if no route matches. `base` is stripped from the pathname first; a
    /// pathname outside of it matches nothing.
    ///
    /// ```rust
    /// # use waymark_router::prelude::*;
    /// let tree = RouteTree::new(vec![
    ///     RouteDef::new("/").view("home"),
    ///     RouteDef::new("/users/:id")
    ///         .view("user")
    ///         .child(RouteDef::new("settings").view("settings")),
    /// ])
    /// .unwrap();
    ///
    /// let chain = tree.match_path("/users/42/settings", "").unwrap();
    /// assert_eq!(chain.len(), 2);
    /// assert_eq!(chain[1].params["id"], "42");
    /// assert_eq!(chain[1].pattern, "/users/:id/settings");
    ///
    /// assert!(tree.match_path("/unknown", "").is_none());
    /// ```
    pub fn match_path(&self, pathname: &str, base: &str) -> Option<Vec<MatchResult<V>>> {
        let chain = self.matches(pathname, base).chain;
        match chain.is_empty() {
            true => None,
            false => Some(chain),
        }
    }

    /// Match `pathname`, also reporting the not-found route to use if nothing matched.
    ///
    /// A not-found route nested below `/docs` is picked for `/docs/unknown`, but the chain stays
    /// empty; the `/docs` layout is not rendered around it.
    pub fn matches(&self, pathname: &str, base: &str) -> Matches<V> {
        let Some(path) = split_path(pathname, base) else {
            trace!(pathname, base, "pathname outside of base path");
            return Matches {
                chain: Vec::new(),
                not_found: self.routes.iter().find(|r| r.not_found).cloned(),
            };
        };

        let mut not_found = None;
        let chain = match_level(
            &self.routes,
            &path,
            0,
            0,
            &PathPattern::root(),
            &BTreeMap::new(),
            &mut not_found,
        );

        match chain {
            Some(chain) => Matches {
                chain,
                not_found: None,
            },
            None => Matches {
                chain: Vec::new(),
                not_found: not_found.map(|nf| nf.node),
            },
        }
    }
}

fn normalize_base(base: &str) -> String {
    let trimmed: Vec<_> = base.split('/').filter(|s| !s.is_empty()).collect();
    match trimmed.is_empty() {
        true => String::new(),
        false => format!("/{}", trimmed.join("/")),
    }
}

fn split_path<'a>(pathname: &'a str, base: &str) -> Option<Path<'a>> {
    let pathname = match pathname.find(['?', '#']) {
        Some(idx) => &pathname[..idx],
        None => pathname,
    };

    let base = normalize_base(base);
    let mut raw: Vec<_> = pathname.split('/').filter(|s| !s.is_empty()).collect();

    let base_segments: Vec<_> = base.split('/').filter(|s| !s.is_empty()).collect();
    if !raw.starts_with(&base_segments) {
        return None;
    }
    raw.drain(..base_segments.len());

    let decoded = raw
        .iter()
        .map(|s| match decode(s) {
            Ok(decoded) => decoded.into_owned(),
            Err(_) => s.to_string(),
        })
        .collect();

    Some(Path { raw, decoded, base })
}

fn consumed_pathname(path: &Path<'_>, end: usize) -> String {
    let mut pathname = path.base.clone();
    for segment in &path.raw[..end] {
        pathname.push('/');
        pathname.push_str(segment);
    }
    if pathname.is_empty() {
        pathname.push('/');
    }
    pathname
}

fn match_level<V>(
    routes: &[Arc<RouteNode<V>>],
    path: &Path<'_>,
    start: usize,
    depth: usize,
    parent_pattern: &PathPattern,
    parent_params: &BTreeMap<String, String>,
    not_found: &mut Option<NotFound<V>>,
) -> Option<Vec<MatchResult<V>>> {
    // the innermost not-found route wins
    if let Some(node) = routes.iter().find(|r| r.not_found) {
        if not_found.as_ref().map_or(true, |nf| nf.depth < depth) {
            *not_found = Some(NotFound {
                depth,
                node: node.clone(),
            });
        }
    }

    let mut candidates: Vec<_> = routes
        .iter()
        .filter(|route| !route.not_found)
        .flat_map(|route| route.patterns.iter().map(move |pattern| (route, pattern)))
        .collect();
    // stable, so declaration order breaks ties
    candidates.sort_by_key(|(_, pattern)| pattern.priority());

    let remaining = &path.decoded[start..];
    for (route, pattern) in candidates {
        let Some(matched) = pattern.match_prefix(remaining) else {
            continue;
        };
        let end = start + matched.consumed;

        let mut params = parent_params.clone();
        params.extend(matched.params);
        let full_pattern = parent_pattern.join(pattern);

        trace!(
            route = %route.id,
            pattern = %full_pattern,
            consumed = matched.consumed,
            "candidate matched"
        );

        let result = MatchResult {
            route: route.clone(),
            params,
            pattern: full_pattern.to_string(),
            pathname: consumed_pathname(path, end),
            base: path.base.clone(),
        };

        if !route.children.is_empty() {
            if let Some(mut chain) = match_level(
                &route.children,
                path,
                end,
                depth + 1,
                &full_pattern,
                &result.params,
                not_found,
            ) {
                chain.insert(0, result);
                return Some(chain);
            }
        }

        if end == path.decoded.len() {
            return Some(vec![result]);
        }

        trace!(route = %route.id, "candidate left segments unmatched");
    }

    None
}
