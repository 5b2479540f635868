use std::collections::BTreeMap;

use urlencoding::encode;

use super::{PathPattern, PatternSegment, RouteNode, RouteTree};

impl<V> RouteTree<V> {
    /// Every pattern a location can match, in declaration order.
    ///
    /// Parameters are rendered as `:name`, optional ones as `:name?` and catch-alls as `*name`.
    /// Not-found routes (and their children) are left out, as are duplicates produced by layouts
    /// and index routes.
    ///
    /// ```rust
    /// # use waymark_router::prelude::*;
    /// let tree = RouteTree::new(vec![
    ///     RouteDef::new("/").view(()),
    ///     RouteDef::new("/users/:id").child(RouteDef::index()).child(RouteDef::new("settings")),
    ///     RouteDef::new("/404").not_found(),
    /// ])
    /// .unwrap();
    /// assert_eq!(tree.sitemap(), ["/", "/users/:id", "/users/:id/settings"]);
    /// ```
    pub fn sitemap(&self) -> Vec<String> {
        let mut sitemap = Vec::new();
        for route in self.routes.iter() {
            self.collect_sitemap(route, &mut sitemap);
        }
        sitemap
    }

    fn collect_sitemap(&self, node: &RouteNode<V>, sitemap: &mut Vec<String>) {
        if node.not_found {
            return;
        }

        if let Some(entry) = self.index.get(&node.id) {
            for pattern in &entry.full_patterns {
                let pattern = pattern.to_string();
                if !sitemap.contains(&pattern) {
                    sitemap.push(pattern);
                }
            }
        }

        for child in &node.children {
            self.collect_sitemap(child, sitemap);
        }
    }

    /// Build a concrete path for the route with the given id.
    ///
    /// The first pattern of the route (through its parents' first patterns) whose required
    /// parameters are all in `params` is used. Values are percent-encoded, and catch-all values are
    /// split at `/` first. Optional parameters and catch-alls may be missing.
    ///
    /// Returns [`None`] if there is no such route or no pattern can be filled.
    ///
    /// ```rust
    /// # use std::collections::BTreeMap;
    /// # use waymark_router::prelude::*;
    /// let tree = RouteTree::new(vec![RouteDef::<()>::new("/users/:id").id("user")]).unwrap();
    /// let params = BTreeMap::from([(String::from("id"), String::from("ada lovelace"))]);
    /// assert_eq!(tree.href("user", &params).as_deref(), Some("/users/ada%20lovelace"));
    /// assert_eq!(tree.href("user", &BTreeMap::new()), None);
    /// ```
    pub fn href(&self, id: &str, params: &BTreeMap<String, String>) -> Option<String> {
        let entry = self.index.get(id)?;
        entry
            .full_patterns
            .iter()
            .find_map(|pattern| fill_pattern(pattern, params))
    }
}

fn fill_pattern(pattern: &PathPattern, params: &BTreeMap<String, String>) -> Option<String> {
    let mut path = String::new();

    for segment in pattern.segments() {
        match segment {
            PatternSegment::Static(literal) => {
                path.push('/');
                path.push_str(&encode(literal));
            }
            PatternSegment::Dynamic(name) => {
                let value = params.get(name).filter(|v| !v.is_empty())?;
                path.push('/');
                path.push_str(&encode(value));
            }
            PatternSegment::OptionalDynamic(name) => {
                if let Some(value) = params.get(name).filter(|v| !v.is_empty()) {
                    path.push('/');
                    path.push_str(&encode(value));
                }
            }
            PatternSegment::CatchAll(name) => {
                let rest = params.get(name).map(String::as_str).unwrap_or_default();
                for part in rest.split('/').filter(|p| !p.is_empty()) {
                    path.push('/');
                    path.push_str(&encode(part));
                }
            }
        }
    }

    if path.is_empty() {
        path.push('/');
    }
    Some(path)
}

/// Substitute `:name`, `:name?` and `*name` segments of a redirect target.
///
/// Only the path is touched, a query or fragment is kept as is. Parameters that are missing drop
/// their segment.
pub(crate) fn fill_target(target: &str, params: &BTreeMap<String, String>) -> String {
    let split = target.find(['?', '#']).unwrap_or(target.len());
    let (path, suffix) = target.split_at(split);

    let mut filled = String::with_capacity(target.len());
    for (idx, segment) in path.split('/').enumerate() {
        let value = if let Some(name) = segment.strip_prefix(':') {
            let name = name.strip_suffix('?').unwrap_or(name);
            Some(params.get(name).map(|v| encode(v).into_owned()))
        } else if let Some(name) = segment.strip_prefix('*') {
            let name = match name.is_empty() {
                true => super::DEFAULT_CATCH_ALL,
                false => name,
            };
            Some(params.get(name).map(|v| {
                v.split('/')
                    .map(|part| encode(part).into_owned())
                    .collect::<Vec<_>>()
                    .join("/")
            }))
        } else {
            None
        };

        let segment = match value {
            None => segment.to_string(),
            Some(Some(value)) if !value.is_empty() => value,
            Some(_) => continue,
        };

        if idx > 0 {
            filled.push('/');
        }
        filled.push_str(&segment);
    }

    if filled.is_empty() && path.starts_with('/') {
        filled.push('/');
    }
    filled.push_str(suffix);
    filled
}
