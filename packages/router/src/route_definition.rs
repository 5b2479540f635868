//! Route declarations and the normalized route tree.
//!
//! Routes are declared with [`RouteDef`] and normalized into a [`RouteTree`], which parses every
//! pattern into a [`PathPattern`] and validates the structure of the tree. After that, the tree
//! never changes.

mod pattern;
pub use pattern::*;

mod route;
pub use route::*;

mod sitemap;
pub(crate) use sitemap::fill_target;

mod tree;
pub use tree::*;
