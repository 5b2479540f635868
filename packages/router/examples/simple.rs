//! Walks a small app through a few navigations and prints what would be rendered.
//!
//! Run with `RUST_LOG=waymark_router=debug` to see the router at work.

use std::time::Duration;

use futures_util::StreamExt;
use serde_json::json;
use tokio::task::LocalSet;
use tracing_subscriber::EnvFilter;
use waymark_router::prelude::*;

#[derive(Debug)]
enum Page {
    Layout,
    Home,
    Login,
    Dashboard,
    User,
    NotFound,
}

fn routes() -> Result<RouteTree<Page>, RouteError> {
    create_route_tree(vec![RouteDef::layout()
        .view(Page::Layout)
        .children([
            RouteDef::index().view(Page::Home),
            RouteDef::new("login").view(Page::Login),
            RouteDef::new("dashboard")
                .view(Page::Dashboard)
                .meta("auth", "required")
                .middleware(Step::sync(|ctx| match ctx.location().query_pairs().is_empty() {
                    true => Outcome::Redirect(String::from("/login")),
                    false => Outcome::Continue,
                })),
            RouteDef::new("users/:id").view(Page::User).loader(Loader::new(|ctx| async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok::<_, StepError>(json!({ "name": format!("user {}", ctx.param("id").unwrap_or("?")) }))
            })),
            RouteDef::new("404").view(Page::NotFound).not_found(),
        ])])
}

fn describe(outlet: &Outlet<Page>) -> String {
    outlet
        .levels()
        .map(|level| match level.view() {
            Some(view) => format!("{view:?}"),
            None => String::from("_"),
        })
        .collect::<Vec<_>>()
        .join(" > ")
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let tree = routes()?;
    println!("routes: {:?}", tree.sitemap());

    LocalSet::new()
        .run_until(async move {
            let (service, navigator) = RouterService::new(tree, RouterConfig::default());
            tokio::task::spawn_local(service.run());

            let mut states = navigator.watch();
            let _printer = navigator.subscribe(|state| {
                if !state.is_resolving {
                    println!(
                        "{} [{:?}, {}] data: {:?}",
                        state.location,
                        state.phase,
                        state.status.code(),
                        state.loader_data
                    );
                }
            });

            for to in ["/dashboard", "/dashboard?token=1", "/users/7", "/nope"] {
                navigator.push(to)?;
                while let Some(state) = states.next().await {
                    if !state.is_resolving && state.loaders_settled() && state.phase != Phase::Idle
                    {
                        break;
                    }
                }
                if let Some(outlet) = navigator.outlet() {
                    println!("  renders {}", describe(&outlet));
                }
            }

            navigator.back();
            Ok::<_, NavigationError>(())
        })
        .await?;

    Ok(())
}
