//! All things related to the storage of links and clicks

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use url::Url;

use crate::clicks::ClickSummary;
use crate::clicks::NewClick;
use crate::links::Link;
use crate::utils::env_var;

pub use memory::Memory;
pub use postgres::Postgres;

mod memory;
mod postgres;

/// Storage shared by every request
pub type SharedStorage = Arc<dyn Storage>;

/// Storage configuration
pub enum Config {
    /// Detect configuration from environment
    ///
    /// PostgreSQL when `DATABASE_URL` is set, memory otherwise
    DetectConfig,

    /// Keep everything in memory
    Memory,

    /// Use existing PostgreSQL connection
    ExistingConnection(PgPool),
}

/// Setup the storage
///
/// # Errors
///
/// Will return `Err` when the database can not be reached or migrated
pub async fn setup(config: Config) -> anyhow::Result<SharedStorage> {
    let storage: SharedStorage = match config {
        Config::DetectConfig => match env_var("DATABASE_URL") {
            Some(database_url) => Arc::new(Postgres::connect(&database_url).await?),
            None => {
                tracing::warn!("`DATABASE_URL` is not set, links are kept in memory only");
                Arc::new(Memory::new())
            }
        },
        Config::Memory => Arc::new(Memory::new()),
        Config::ExistingConnection(pool) => Arc::new(Postgres::with_pool(pool).await?),
    };

    Ok(storage)
}

/// Storage errors
#[derive(Debug, Error)]
pub enum Error {
    /// The short code is already in use, by an active or tombstoned link
    #[error("Short code already exists")]
    Conflict,

    /// The operation did not finish in time, its outcome is unknown
    #[error("Storage operation timed out")]
    Timeout,

    /// A connection error with the storage
    #[error("Connection error: {0}")]
    Connection(String),
}

/// Result type for all storage interactions
pub type Result<T> = core::result::Result<T, Error>;

/// Values to create a Link
pub struct CreateLinkValues<'a> {
    /// The owner creating the link
    pub owner_id: &'a str,

    /// The short code to reserve
    pub short_code: &'a str,

    /// The URL the link redirects to
    pub original_url: &'a Url,
}

/// Storage with all supported operations
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Insert a link, reserving its short code
    ///
    /// Fails with [`Error::Conflict`] when the short code is taken, the check and the insert are
    /// a single atomic step
    async fn insert_link(&self, values: &CreateLinkValues<'_>) -> Result<Link>;

    /// Find a single link by short code
    ///
    /// Includes tombstoned links
    async fn find_single_link_by_short_code(&self, short_code: &str) -> Result<Option<Link>>;

    /// Find a single link by ID
    ///
    /// Includes tombstoned links
    async fn find_single_link_by_id(&self, id: i64) -> Result<Option<Link>>;

    /// Find all links of an owner, newest first
    ///
    /// Includes tombstoned links
    async fn find_all_links_by_owner(&self, owner_id: &str) -> Result<Vec<Link>>;

    /// Tombstone a link, its short code stays reserved
    async fn tombstone_link(&self, link: &Link) -> Result<Link>;

    /// Save a click on a link
    async fn insert_click(&self, click: &NewClick) -> Result<()>;

    /// Aggregate all clicks of a link
    async fn summarize_clicks(&self, link: &Link) -> Result<ClickSummary>;
}
