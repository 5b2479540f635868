use std::fmt::{self, Display};

use url::{form_urlencoded, Url};
use uuid::Uuid;

/// The base every [`Location`] is resolved against. Only its path, query and fragment ever leave
/// this module.
const BASE: &str = "waymark://index.html/";

/// A unique identifier minted for every pushed or replaced [`Location`].
///
/// Keys correlate bookkeeping done outside the router (e.g. scroll positions) with history
/// entries. Two locations with the same path still get different keys.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocationKey(String);

impl LocationKey {
    /// Mint a fresh key.
    pub fn new() -> Self {
        let mut key = Uuid::new_v4().simple().to_string();
        key.truncate(12);
        Self(key)
    }

    /// The key of the location a history starts out with.
    pub fn initial() -> Self {
        Self(String::from("default"))
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for LocationKey {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for LocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A reason a string could not be turned into a [`Location`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocationError {
    /// The string was empty.
    #[error("cannot navigate to an empty location")]
    Empty,
    /// The string starts with `//`, which browsers treat as a protocol relative URL.
    #[error(r#"cannot navigate to paths starting with "//": {0}"#)]
    ProtocolRelative(String),
    /// The string points outside of the application.
    #[error("cannot navigate to external url: {0}")]
    External(String),
    /// The string is not a valid URL reference.
    #[error("invalid location {location:?}: {reason}")]
    Invalid {
        /// The rejected string.
        location: String,
        /// Why the URL parser rejected it.
        reason: String,
    },
}

/// A position in the navigation history.
#[derive(Clone, Debug, PartialEq)]
pub struct Location {
    /// The path, always starting with `/`. Percent-encoding is preserved.
    pub pathname: String,
    /// The query string including the leading `?`, or empty.
    pub search: String,
    /// The fragment including the leading `#`, or empty.
    pub hash: String,
    /// Opaque state attached by whoever navigated here.
    pub state: Option<serde_json::Value>,
    /// The identifier minted when this location entered the history.
    pub key: LocationKey,
}

impl Default for Location {
    fn default() -> Self {
        Self {
            pathname: String::from("/"),
            search: String::new(),
            hash: String::new(),
            state: None,
            key: LocationKey::initial(),
        }
    }
}

impl Location {
    /// Parse an absolute or root-relative location string.
    ///
    /// ```rust
    /// # use waymark_history::Location;
    /// let location = Location::parse("/users/42?tab=posts#top").unwrap();
    /// assert_eq!(location.pathname, "/users/42");
    /// assert_eq!(location.search, "?tab=posts");
    /// assert_eq!(location.hash, "#top");
    /// ```
    pub fn parse(href: &str) -> Result<Self, LocationError> {
        Self::default().resolve(href)
    }

    /// Resolve `to` relative to this location, the way a browser resolves a link.
    ///
    /// The returned location gets a freshly minted key and no state.
    ///
    /// ```rust
    /// # use waymark_history::Location;
    /// let here = Location::parse("/users/42").unwrap();
    /// assert_eq!(here.resolve("settings").unwrap().pathname, "/users/settings");
    /// assert_eq!(here.resolve("/login").unwrap().pathname, "/login");
    /// assert!(here.resolve("//evil.com").is_err());
    /// ```
    pub fn resolve(&self, to: &str) -> Result<Self, LocationError> {
        if to.is_empty() {
            return Err(LocationError::Empty);
        }
        if to.starts_with("//") {
            return Err(LocationError::ProtocolRelative(to.to_string()));
        }

        let invalid = |err: url::ParseError| LocationError::Invalid {
            location: to.to_string(),
            reason: err.to_string(),
        };
        let current = Url::parse(BASE)
            .and_then(|base| base.join(&self.href()))
            .map_err(invalid)?;
        let url = current.join(to).map_err(invalid)?;

        if url.scheme() != current.scheme() || url.host_str() != current.host_str() {
            return Err(LocationError::External(to.to_string()));
        }

        Ok(Self::from_url(&url))
    }

    fn from_url(url: &Url) -> Self {
        Self {
            pathname: url.path().to_string(),
            search: url.query().map(|q| format!("?{q}")).unwrap_or_default(),
            hash: url.fragment().map(|f| format!("#{f}")).unwrap_or_default(),
            state: None,
            key: LocationKey::new(),
        }
    }

    /// Attach opaque state.
    pub fn with_state(mut self, state: impl Into<Option<serde_json::Value>>) -> Self {
        self.state = state.into();
        self
    }

    /// Replace the key, e.g. when restoring a persisted entry.
    pub fn with_key(mut self, key: LocationKey) -> Self {
        self.key = key;
        self
    }

    /// The path, query and fragment joined back together.
    pub fn href(&self) -> String {
        format!("{}{}{}", self.pathname, self.search, self.hash)
    }

    /// Decode the query string into key-value pairs, in order of appearance.
    ///
    /// ```rust
    /// # use waymark_history::Location;
    /// let location = Location::parse("/search?q=rust%20router&page=2").unwrap();
    /// assert_eq!(
    ///     location.query_pairs(),
    ///     vec![
    ///         (String::from("q"), String::from("rust router")),
    ///         (String::from("page"), String::from("2")),
    ///     ]
    /// );
    /// ```
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let query = self.search.strip_prefix('?').unwrap_or(&self.search);
        form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect()
    }

    /// Whether `other` points at the same path, query and fragment, ignoring key and state.
    pub fn same_target(&self, other: &Location) -> bool {
        self.pathname == other.pathname && self.search == other.search && self.hash == other.hash
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.pathname, self.search, self.hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_root() {
        let location = Location::parse("/").unwrap();
        assert_eq!(location.pathname, "/");
        assert_eq!(location.search, "");
        assert_eq!(location.hash, "");
    }

    #[test]
    fn parse_mints_distinct_keys() {
        let a = Location::parse("/same").unwrap();
        let b = Location::parse("/same").unwrap();
        assert!(a.same_target(&b));
        assert_ne!(a.key, b.key);
    }

    #[test]
    fn resolve_relative_and_parent() {
        let here = Location::parse("/users/42/settings").unwrap();
        assert_eq!(here.resolve("profile").unwrap().pathname, "/users/42/profile");
        assert_eq!(here.resolve("../7").unwrap().pathname, "/users/7");
        assert_eq!(here.resolve("?tab=a").unwrap().href(), "/users/42/settings?tab=a");
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(Location::parse(""), Err(LocationError::Empty));
    }

    #[test]
    fn rejects_protocol_relative() {
        assert_eq!(
            Location::parse("//example.com/x"),
            Err(LocationError::ProtocolRelative(String::from("//example.com/x")))
        );
    }

    #[test]
    fn rejects_external() {
        assert_eq!(
            Location::parse("https://example.com/"),
            Err(LocationError::External(String::from("https://example.com/")))
        );
    }

    #[test]
    fn state_and_key_builders() {
        let key = LocationKey::initial();
        let location = Location::parse("/a")
            .unwrap()
            .with_state(serde_json::json!({ "from": "link" }))
            .with_key(key.clone());
        assert_eq!(location.key, key);
        assert_eq!(location.state, Some(serde_json::json!({ "from": "link" })));
    }
}
