#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
// easier to use when using the functions as callback of foreign functions
#![allow(clippy::needless_pass_by_value)]

use anyhow::Result;
use axum::Extension;
use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::trace::TraceLayer;
use tracing_subscriber::prelude::*;

use crate::allocator::CodeAllocator;
use crate::api::IdentityKeys;
use crate::click_recorder::ClickRecorder;
use crate::config::Config;
use crate::resolver::RedirectResolver;
use crate::storage::Config as StorageConfig;
use crate::storage::SharedStorage;

mod allocator;
mod api;
mod click_recorder;
mod clicks;
mod config;
mod graceful_shutdown;
mod links;
mod resolver;
mod root;
mod short_code;
mod storage;
mod utils;

const DEFAULT_RUST_LOG: &str = "snip=debug,tower_http=debug";

#[tokio::main]
async fn main() -> Result<()> {
    setup_environment();
    setup_tracing();

    let config = Config::from_env()?;

    let shutdown = CancellationToken::new();
    let tracker = TaskTracker::new();

    let app = setup_app(&config, StorageConfig::DetectConfig, &shutdown, &tracker).await?;

    let listener = TcpListener::bind(config.address).await?;
    tracing::info!("Listening on {}", config.address);

    axum::serve(listener, app)
        .with_graceful_shutdown(graceful_shutdown::handler(shutdown.clone()))
        .await?;

    // the server is done, let the click recorder drain its queue
    shutdown.cancel();
    tracker.close();
    tracker.wait().await;

    Ok(())
}

/// Create and setup the app with its dependencies
///
/// Background work is spawned on the `tracker` and stops when `shutdown` is cancelled
///
/// # Errors
///
/// Will return `Err` if any of its dependencies fail to load:
/// - Database connection
/// - Database migrations
pub async fn setup_app(
    config: &Config,
    storage_config: StorageConfig,
    shutdown: &CancellationToken,
    tracker: &TaskTracker,
) -> Result<Router> {
    let storage = storage::setup(storage_config).await?;

    Ok(create_router(config, storage, shutdown, tracker))
}

/// Create the router for Snip
fn create_router(
    config: &Config,
    storage: SharedStorage,
    shutdown: &CancellationToken,
    tracker: &TaskTracker,
) -> Router {
    let clicks = ClickRecorder::spawn(
        storage.clone(),
        config.clicks.queue_capacity,
        shutdown.clone(),
        tracker,
    );

    let allocator = CodeAllocator::new(storage.clone(), config.allocator.clone());
    let resolver = RedirectResolver::new(storage.clone(), clicks, config.link_cache_ttl);
    let identity_keys = IdentityKeys::new(config.identity_secret.as_bytes());

    Router::new()
        .nest("/api", api::router())
        .fallback(get(root::root))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(storage))
        .layer(Extension(allocator))
        .layer(Extension(resolver))
        .layer(Extension(identity_keys))
        .layer(Extension(config.base_url.clone()))
        .layer(Extension(config.clicks.clone()))
}

fn setup_environment() {
    dotenvy::dotenv().ok();
}

fn setup_tracing() {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::registry;

    registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_RUST_LOG.into()),
        ))
        .with(fmt::layer())
        .init();
}
