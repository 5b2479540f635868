#![doc = include_str!("../README.md")]
#![deny(missing_docs)]

pub mod chain;
pub mod error;
pub mod loader;
pub mod matcher;
pub mod navigation;
pub mod outlet;
pub mod route_definition;
pub mod state;

mod navigator;
mod resolver;
mod router_cfg;
mod service;

pub use navigator::{Navigator, StateStream, Subscription};
pub use resolver::{resolve, resolve_with};
pub use router_cfg::{RouterConfig, DEFAULT_MAX_REDIRECTS};
pub use service::RouterService;

use crate::{
    error::RouteError,
    route_definition::{RouteDef, RouteTree},
};

/// Normalize route definitions into a [`RouteTree`].
///
/// Fails on malformed patterns and inconsistent definitions, see [`RouteError`].
pub fn create_route_tree<V>(
    definitions: impl IntoIterator<Item = RouteDef<V>>,
) -> Result<RouteTree<V>, RouteError> {
    RouteTree::new(definitions)
}

/// Create a router over `tree` with the default configuration and a
/// [`MemoryHistory`](waymark_history::MemoryHistory).
///
/// The [`RouterService`] has to be run for the [`Navigator`] to do anything.
pub fn create_navigator<V: 'static>(tree: RouteTree<V>) -> (RouterService<V>, Navigator<V>) {
    RouterService::new(tree, RouterConfig::default())
}

/// A collection of useful items most applications might need.
pub mod prelude {
    pub use crate::chain::{Guard, Next, Outcome, Step, StepContext, StepResult};
    pub use crate::error::{NavigationError, ResolveError, RouteError, StepError};
    pub use crate::loader::{Loader, LoaderContext, LoaderResult};
    pub use crate::matcher::MatchResult;
    pub use crate::navigation::NavigateOptions;
    pub use crate::outlet::{Composer, Outlet, OutletContext, OutletKind};
    pub use crate::route_definition::{RouteDef, RouteId, RouteNode, RouteTree};
    pub use crate::state::{NavigationState, Phase, Status};
    pub use crate::{
        create_navigator, create_route_tree, resolve, resolve_with, Navigator, RouterConfig,
        RouterService, StateStream, Subscription,
    };
}
