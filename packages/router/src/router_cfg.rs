use std::{fmt, sync::Arc};

/// The default for [`RouterConfig::max_redirects`].
pub const DEFAULT_MAX_REDIRECTS: usize = 8;

/// Global configuration options for the router.
///
/// This implements [`Default`] and follows the builder pattern, so you can use it like this:
/// ```rust
/// # use waymark_router::prelude::*;
/// let cfg = RouterConfig::default()
///     .not_found("page not found")
///     .error_view("something went wrong")
///     .max_redirects(4)
///     .base_path("/app");
/// assert_eq!(cfg.get_max_redirects(), 4);
/// ```
pub struct RouterConfig<V> {
    pub(crate) not_found: Option<Arc<V>>,
    pub(crate) error_view: Option<Arc<V>>,
    pub(crate) max_redirects: usize,
    pub(crate) base_path: Option<String>,
}

impl<V> Default for RouterConfig<V> {
    fn default() -> Self {
        Self {
            not_found: None,
            error_view: None,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            base_path: None,
        }
    }
}

impl<V> RouterConfig<V> {
    /// A view to render when nothing matches, or when navigation was blocked and no route in the
    /// chain has a fallback.
    ///
    /// Not-found routes in the tree take precedence.
    ///
    /// Defaults to [`None`].
    pub fn not_found(self, view: V) -> Self {
        Self {
            not_found: Some(Arc::new(view)),
            ..self
        }
    }

    /// A view to render loader errors with when no route in the chain has an error view.
    ///
    /// Defaults to [`None`].
    pub fn error_view(self, view: V) -> Self {
        Self {
            error_view: Some(Arc::new(view)),
            ..self
        }
    }

    /// How many redirects in a row are followed before giving up with
    /// [`ResolveError::RedirectLoop`](crate::error::ResolveError::RedirectLoop).
    ///
    /// A redirect to the location being resolved is always refused.
    ///
    /// Defaults to [`DEFAULT_MAX_REDIRECTS`].
    pub fn max_redirects(self, max_redirects: usize) -> Self {
        Self {
            max_redirects,
            ..self
        }
    }

    /// A path prefix the application is mounted at. It is stripped before matching.
    ///
    /// Defaults to the prefix of the history, if any.
    pub fn base_path(self, base_path: impl Into<String>) -> Self {
        Self {
            base_path: Some(base_path.into()),
            ..self
        }
    }

    /// The configured redirect limit.
    pub fn get_max_redirects(&self) -> usize {
        self.max_redirects
    }

    /// The configured base path, if any.
    pub fn get_base_path(&self) -> Option<&str> {
        self.base_path.as_deref()
    }
}

impl<V> fmt::Debug for RouterConfig<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterConfig")
            .field("not_found", &self.not_found.is_some())
            .field("error_view", &self.error_view.is_some())
            .field("max_redirects", &self.max_redirects)
            .field("base_path", &self.base_path)
            .finish()
    }
}
