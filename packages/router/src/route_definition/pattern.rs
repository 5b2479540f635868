use std::{
    collections::BTreeSet,
    fmt::{self, Display},
};

use crate::error::RouteError;

/// The name a catch-all segment binds to when none is given (`/files/*`).
pub const DEFAULT_CATCH_ALL: &str = "splat";

/// The kind of a [`PatternSegment`], without its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    /// Matches one path segment exactly.
    Static,
    /// Matches any one path segment and binds it.
    Dynamic,
    /// Like [`SegmentKind::Dynamic`], but binds an empty string if the path segment is absent.
    OptionalDynamic,
    /// Matches all remaining path segments and binds them joined by `/`.
    CatchAll,
}

/// A single segment of a [`PathPattern`], i.e. the stuff between two slashes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PatternSegment {
    /// A literal segment, e.g. `users`.
    Static(String),
    /// A parameter, e.g. `:id`.
    Dynamic(String),
    /// An optional parameter, e.g. `:tab?`.
    OptionalDynamic(String),
    /// A catch-all, e.g. `*rest`.
    CatchAll(String),
}

impl PatternSegment {
    /// The kind of this segment.
    pub fn kind(&self) -> SegmentKind {
        match self {
            Self::Static(_) => SegmentKind::Static,
            Self::Dynamic(_) => SegmentKind::Dynamic,
            Self::OptionalDynamic(_) => SegmentKind::OptionalDynamic,
            Self::CatchAll(_) => SegmentKind::CatchAll,
        }
    }

    /// The literal of a static segment or the parameter name of any other.
    pub fn value(&self) -> &str {
        match self {
            Self::Static(s) | Self::Dynamic(s) | Self::OptionalDynamic(s) | Self::CatchAll(s) => s,
        }
    }

    /// The parameter name, if this segment binds one.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Static(_) => None,
            Self::Dynamic(n) | Self::OptionalDynamic(n) | Self::CatchAll(n) => Some(n),
        }
    }

    fn parse(raw: &str, pattern: &str) -> Result<Self, RouteError> {
        let malformed = |reason: &str| RouteError::MalformedPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        if let Some(name) = raw.strip_prefix(':') {
            let (name, optional) = match name.strip_suffix('?') {
                Some(name) => (name, true),
                None => (name, false),
            };
            if name.is_empty() {
                return Err(malformed("parameter without a name"));
            }
            if name.contains([':', '*', '?']) {
                return Err(malformed(&format!("invalid parameter name {name:?}")));
            }

            return Ok(match optional {
                true => Self::OptionalDynamic(name.to_string()),
                false => Self::Dynamic(name.to_string()),
            });
        }

        if let Some(name) = raw.strip_prefix('*') {
            if name.contains([':', '*', '?']) {
                return Err(malformed(&format!("invalid catch-all name {name:?}")));
            }
            let name = match name.is_empty() {
                true => DEFAULT_CATCH_ALL,
                false => name,
            };
            return Ok(Self::CatchAll(name.to_string()));
        }

        Ok(Self::Static(raw.to_string()))
    }
}

impl Display for PatternSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(s) => write!(f, "{s}"),
            Self::Dynamic(n) => write!(f, ":{n}"),
            Self::OptionalDynamic(n) => write!(f, ":{n}?"),
            Self::CatchAll(n) => write!(f, "*{n}"),
        }
    }
}

/// The priority bucket of a [`PathPattern`] among its siblings.
///
/// Lower sorts first: static patterns are tried before dynamic ones, and those before catch-alls.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Only static segments (this includes the empty root pattern).
    Static,
    /// At least one dynamic or optional segment, no catch-all.
    Dynamic,
    /// Ends in a catch-all.
    CatchAll,
}

/// A parsed path pattern like `/users/:id/*rest`.
///
/// Patterns are parsed once, when a [`RouteTree`](super::RouteTree) is normalized, and never
/// change afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct PathPattern {
    segments: Vec<PatternSegment>,
}

/// What a [`PathPattern`] bound while consuming a prefix of a path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatternMatch {
    /// How many path segments were consumed.
    pub consumed: usize,
    /// The bound parameters, in pattern order.
    pub params: Vec<(String, String)>,
}

impl PathPattern {
    /// Parse a pattern.
    ///
    /// Empty segments are dropped, so `//users//:id/` is the same pattern as `/users/:id`, and `/`
    /// is the empty pattern. A leading slash is optional; nested patterns are relative to their
    /// parent either way.
    ///
    /// ```rust
    /// # use waymark_router::route_definition::{PathPattern, SegmentKind};
    /// let pattern = PathPattern::parse("/users/:id?/*").unwrap();
    /// let kinds: Vec<_> = pattern.segments().iter().map(|s| s.kind()).collect();
    /// assert_eq!(
    ///     kinds,
    ///     [SegmentKind::Static, SegmentKind::OptionalDynamic, SegmentKind::CatchAll]
    /// );
    /// assert_eq!(pattern.to_string(), "/users/:id?/*splat");
    /// ```
    ///
    /// # Errors
    /// A catch-all that is not the last segment, parameters without names and parameter names
    /// used twice are reported as [`RouteError::MalformedPattern`].
    pub fn parse(pattern: &str) -> Result<Self, RouteError> {
        let raw_segments: Vec<_> = pattern.split('/').filter(|s| !s.is_empty()).collect();

        let mut segments = Vec::with_capacity(raw_segments.len());
        let mut names = BTreeSet::new();
        for (idx, raw) in raw_segments.iter().enumerate() {
            let segment = PatternSegment::parse(raw, pattern)?;

            if segment.kind() == SegmentKind::CatchAll && idx + 1 != raw_segments.len() {
                return Err(RouteError::MalformedPattern {
                    pattern: pattern.to_string(),
                    reason: String::from("a catch-all segment must be the last segment"),
                });
            }
            if let Some(name) = segment.name() {
                if !names.insert(name.to_string()) {
                    return Err(RouteError::MalformedPattern {
                        pattern: pattern.to_string(),
                        reason: format!("parameter {name:?} is bound twice"),
                    });
                }
            }

            segments.push(segment);
        }

        Ok(Self { segments })
    }

    /// The empty pattern, which consumes nothing.
    pub fn root() -> Self {
        Self::default()
    }

    /// The segments, in order.
    pub fn segments(&self) -> &[PatternSegment] {
        &self.segments
    }

    /// Whether this is the empty pattern.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Whether the pattern ends in a catch-all.
    pub fn has_catch_all(&self) -> bool {
        matches!(self.segments.last(), Some(PatternSegment::CatchAll(_)))
    }

    /// The segments with parameter names erased. Patterns of equal shape match the same paths.
    pub(crate) fn shape(&self) -> Vec<PatternSegment> {
        self.segments
            .iter()
            .map(|segment| match segment {
                PatternSegment::Static(literal) => PatternSegment::Static(literal.clone()),
                PatternSegment::Dynamic(_) => PatternSegment::Dynamic(String::new()),
                PatternSegment::OptionalDynamic(_) => PatternSegment::OptionalDynamic(String::new()),
                PatternSegment::CatchAll(_) => PatternSegment::CatchAll(String::new()),
            })
            .collect()
    }

    /// The names of all parameters this pattern binds.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(PatternSegment::name)
    }

    /// The priority bucket of this pattern.
    pub fn priority(&self) -> Priority {
        if self.has_catch_all() {
            Priority::CatchAll
        } else if self
            .segments
            .iter()
            .any(|s| s.kind() != SegmentKind::Static)
        {
            Priority::Dynamic
        } else {
            Priority::Static
        }
    }

    /// Join `child` onto this pattern.
    pub fn join(&self, child: &PathPattern) -> PathPattern {
        let mut segments = self.segments.clone();
        segments.extend(child.segments.iter().cloned());
        Self { segments }
    }

    /// Try to consume a prefix of the (already decoded) `path` segments.
    ///
    /// Static segments must be equal, dynamic segments take any one segment, and a catch-all takes
    /// everything that is left (possibly nothing). Optional segments are greedy: each takes the
    /// next path segment if there is one and binds an empty string otherwise. There is no
    /// backtracking, so `/:a?/:b?` against `/x` binds `a = "x"` and `b = ""`.
    ///
    /// Whether a match must consume the whole path is up to the caller.
    ///
    /// ```rust
    /// # use waymark_router::route_definition::PathPattern;
    /// let pattern = PathPattern::parse("/users/:id").unwrap();
    /// let path = ["users".to_string(), "42".to_string(), "settings".to_string()];
    /// let matched = pattern.match_prefix(&path).unwrap();
    /// assert_eq!(matched.consumed, 2);
    /// assert_eq!(matched.params, vec![("id".to_string(), "42".to_string())]);
    /// ```
    pub fn match_prefix(&self, path: &[String]) -> Option<PatternMatch> {
        let mut consumed = 0;
        let mut params = Vec::new();

        for segment in &self.segments {
            match segment {
                PatternSegment::Static(literal) => {
                    if path.get(consumed)? != literal {
                        return None;
                    }
                    consumed += 1;
                }
                PatternSegment::Dynamic(name) => {
                    let value = path.get(consumed)?;
                    params.push((name.clone(), value.clone()));
                    consumed += 1;
                }
                PatternSegment::OptionalDynamic(name) => match path.get(consumed) {
                    Some(value) => {
                        params.push((name.clone(), value.clone()));
                        consumed += 1;
                    }
                    None => params.push((name.clone(), String::new())),
                },
                PatternSegment::CatchAll(name) => {
                    let rest = path.get(consumed..).unwrap_or_default();
                    params.push((name.clone(), rest.join("/")));
                    consumed = path.len();
                }
            }
        }

        Some(PatternMatch { consumed, params })
    }
}

impl Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for PathPattern {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn segs(path: &str) -> Vec<String> {
        path.split('/')
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }

    fn bound(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn root_is_empty() {
        assert!(PathPattern::parse("/").unwrap().is_root());
        assert!(PathPattern::parse("").unwrap().is_root());
        assert!(PathPattern::parse("///").unwrap().is_root());
        assert_eq!(PathPattern::root().to_string(), "/");
    }

    #[test]
    fn classify_segments() {
        let pattern = PathPattern::parse("/a/:b/:c?/*d").unwrap();
        assert_eq!(
            pattern.segments(),
            &[
                PatternSegment::Static("a".into()),
                PatternSegment::Dynamic("b".into()),
                PatternSegment::OptionalDynamic("c".into()),
                PatternSegment::CatchAll("d".into()),
            ]
        );
        assert_eq!(pattern.param_names().collect::<Vec<_>>(), ["b", "c", "d"]);
    }

    #[test]
    fn unnamed_catch_all_is_splat() {
        let pattern = PathPattern::parse("/files/*").unwrap();
        assert_eq!(
            pattern.segments()[1],
            PatternSegment::CatchAll(DEFAULT_CATCH_ALL.into())
        );
    }

    #[test]
    fn redundant_separators_are_stripped() {
        assert_eq!(
            PathPattern::parse("//users//:id/").unwrap(),
            PathPattern::parse("/users/:id").unwrap()
        );
        assert_eq!(
            PathPattern::parse("settings").unwrap(),
            PathPattern::parse("/settings").unwrap()
        );
    }

    #[test]
    fn catch_all_must_be_last() {
        let err = PathPattern::parse("/*rest/edit").unwrap_err();
        assert!(matches!(err, RouteError::MalformedPattern { .. }));
    }

    #[test]
    fn nameless_parameter_is_malformed() {
        assert!(PathPattern::parse("/users/:").is_err());
        assert!(PathPattern::parse("/users/:?").is_err());
    }

    #[test]
    fn duplicate_parameter_is_malformed() {
        assert!(PathPattern::parse("/:id/posts/:id").is_err());
    }

    #[test]
    fn normalization_is_idempotent() {
        for raw in [
            "/",
            "//a//b/",
            "users/:id",
            "/docs/:lang?/*",
            "/x/:a?/:b?",
            "/files/:dir/*rest",
        ] {
            let once = PathPattern::parse(raw).unwrap();
            let twice = PathPattern::parse(&once.to_string()).unwrap();
            assert_eq!(once, twice, "{raw}");
            assert_eq!(once.to_string(), twice.to_string());
        }
    }

    #[test]
    fn priority_buckets() {
        assert_eq!(PathPattern::parse("/users").unwrap().priority(), Priority::Static);
        assert_eq!(PathPattern::parse("/").unwrap().priority(), Priority::Static);
        assert_eq!(PathPattern::parse("/:id").unwrap().priority(), Priority::Dynamic);
        assert_eq!(PathPattern::parse("/:id?").unwrap().priority(), Priority::Dynamic);
        assert_eq!(PathPattern::parse("/*rest").unwrap().priority(), Priority::CatchAll);
        assert!(Priority::Static < Priority::Dynamic);
        assert!(Priority::Dynamic < Priority::CatchAll);
    }

    #[test]
    fn match_static_prefix() {
        let pattern = PathPattern::parse("/users").unwrap();
        let m = pattern.match_prefix(&segs("/users/42")).unwrap();
        assert_eq!(m.consumed, 1);
        assert!(m.params.is_empty());
        assert!(pattern.match_prefix(&segs("/posts")).is_none());
        assert!(pattern.match_prefix(&segs("/")).is_none());
    }

    #[test]
    fn match_dynamic_requires_segment() {
        let pattern = PathPattern::parse("/users/:id").unwrap();
        assert!(pattern.match_prefix(&segs("/users")).is_none());
        assert_eq!(
            pattern.match_prefix(&segs("/users/7")).unwrap().params,
            bound(&[("id", "7")])
        );
    }

    #[test]
    fn match_optional_binds_empty_when_absent() {
        let pattern = PathPattern::parse("/posts/:page?").unwrap();
        let m = pattern.match_prefix(&segs("/posts")).unwrap();
        assert_eq!(m.consumed, 1);
        assert_eq!(m.params, bound(&[("page", "")]));

        let m = pattern.match_prefix(&segs("/posts/3")).unwrap();
        assert_eq!(m.consumed, 2);
        assert_eq!(m.params, bound(&[("page", "3")]));
    }

    // several optionals fill greedily from the left and never backtrack
    #[test]
    fn match_multiple_trailing_optionals() {
        let pattern = PathPattern::parse("/x/:a?/:b?").unwrap();

        let m = pattern.match_prefix(&segs("/x")).unwrap();
        assert_eq!((m.consumed, m.params), (1, bound(&[("a", ""), ("b", "")])));

        let m = pattern.match_prefix(&segs("/x/1")).unwrap();
        assert_eq!((m.consumed, m.params), (2, bound(&[("a", "1"), ("b", "")])));

        let m = pattern.match_prefix(&segs("/x/1/2")).unwrap();
        assert_eq!((m.consumed, m.params), (3, bound(&[("a", "1"), ("b", "2")])));
    }

    #[test]
    fn optional_in_the_middle_is_greedy() {
        let pattern = PathPattern::parse("/a/:x?/b").unwrap();
        // `:x?` takes "b", leaving nothing for the static segment
        assert!(pattern.match_prefix(&segs("/a/b")).is_none());
        assert_eq!(
            pattern.match_prefix(&segs("/a/1/b")).unwrap().params,
            bound(&[("x", "1")])
        );
    }

    #[test]
    fn match_catch_all_takes_rest() {
        let pattern = PathPattern::parse("/docs/*path").unwrap();
        let m = pattern.match_prefix(&segs("/docs/guide/intro")).unwrap();
        assert_eq!(m.consumed, 3);
        assert_eq!(m.params, bound(&[("path", "guide/intro")]));

        let m = pattern.match_prefix(&segs("/docs")).unwrap();
        assert_eq!(m.consumed, 1);
        assert_eq!(m.params, bound(&[("path", "")]));
    }

    // a dynamic segment takes exactly one segment, the catch-all the remainder
    #[test]
    fn dynamic_followed_by_catch_all() {
        let pattern = PathPattern::parse("/files/:dir/*rest").unwrap();
        assert!(pattern.match_prefix(&segs("/files")).is_none());
        assert_eq!(
            pattern.match_prefix(&segs("/files/a")).unwrap().params,
            bound(&[("dir", "a"), ("rest", "")])
        );
        assert_eq!(
            pattern.match_prefix(&segs("/files/a/b/c")).unwrap().params,
            bound(&[("dir", "a"), ("rest", "b/c")])
        );
    }

    #[test]
    fn join_patterns() {
        let parent = PathPattern::parse("/users/:id").unwrap();
        let child = PathPattern::parse("settings").unwrap();
        assert_eq!(parent.join(&child).to_string(), "/users/:id/settings");
        assert_eq!(PathPattern::root().join(&child).to_string(), "/settings");
    }
}
