//! Postgres storage

use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;

use crate::clicks::ClickCount;
use crate::clicks::ClickSummary;
use crate::clicks::NewClick;
use crate::links::Link;

use super::CreateLinkValues;
use super::Error;
use super::Result;
use super::Storage;

/// Migrator to run migrations on startup
static MIGRATOR: Migrator = sqlx::migrate!();

/// Postgres storage
#[derive(Clone, Debug)]
pub struct Postgres {
    /// Pool of connections
    connection_pool: PgPool,
}

impl Postgres {
    /// Connect to the database behind the connection string
    ///
    /// Migrations will be run
    pub async fn connect(database_connection_string: &str) -> anyhow::Result<Self> {
        let connection_pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect(database_connection_string)
            .await?;

        Self::with_pool(connection_pool).await
    }

    /// Create Postgres storage with existing pool
    ///
    /// Migrations will be run
    pub async fn with_pool(connection_pool: PgPool) -> anyhow::Result<Self> {
        MIGRATOR.run(&connection_pool).await?;

        Ok(Self { connection_pool })
    }

    /// Count clicks of a link grouped by a column
    async fn count_clicks_by(&self, link: &Link, column: Column) -> Result<Vec<ClickCount>> {
        let query = format!(
            r"
            SELECT {column} AS value, COUNT(*) AS count
            FROM clicks
            WHERE link_id = $1
            GROUP BY {column}
            ORDER BY count DESC, value ASC NULLS LAST
            ",
            column = column.name(),
        );

        sqlx::query_as::<_, ClickCount>(&query)
            .bind(link.id)
            .fetch_all(&self.connection_pool)
            .await
            .map_err(connection_error)
    }
}

/// Click columns that can be grouped on
#[derive(Clone, Copy)]
enum Column {
    /// `referrer`
    Referrer,

    /// `country`
    Country,
}

impl Column {
    /// Column name, never user input
    fn name(self) -> &'static str {
        match self {
            Self::Referrer => "referrer",
            Self::Country => "country",
        }
    }
}

#[async_trait]
impl Storage for Postgres {
    async fn insert_link(&self, values: &CreateLinkValues<'_>) -> Result<Link> {
        sqlx::query_as::<_, Link>(
            r"
            INSERT INTO links (short_code, original_url, owner_id)
            VALUES ($1, $2, $3)
            RETURNING *
            ",
        )
        .bind(values.short_code)
        .bind(values.original_url.as_str())
        .bind(values.owner_id)
        .fetch_one(&self.connection_pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(ref database_error) if database_error.is_unique_violation() => {
                Error::Conflict
            }
            err => connection_error(err),
        })
    }

    async fn find_single_link_by_short_code(&self, short_code: &str) -> Result<Option<Link>> {
        sqlx::query_as::<_, Link>(
            r"
            SELECT *
            FROM links
            WHERE short_code = $1
            LIMIT 1
            ",
        )
        .bind(short_code)
        .fetch_optional(&self.connection_pool)
        .await
        .map_err(connection_error)
    }

    async fn find_single_link_by_id(&self, id: i64) -> Result<Option<Link>> {
        sqlx::query_as::<_, Link>(
            r"
            SELECT *
            FROM links
            WHERE id = $1
            LIMIT 1
            ",
        )
        .bind(id)
        .fetch_optional(&self.connection_pool)
        .await
        .map_err(connection_error)
    }

    async fn find_all_links_by_owner(&self, owner_id: &str) -> Result<Vec<Link>> {
        sqlx::query_as::<_, Link>(
            r"
            SELECT *
            FROM links
            WHERE owner_id = $1
            ORDER BY created_at DESC, id DESC
            ",
        )
        .bind(owner_id)
        .fetch_all(&self.connection_pool)
        .await
        .map_err(connection_error)
    }

    async fn tombstone_link(&self, link: &Link) -> Result<Link> {
        sqlx::query_as::<_, Link>(
            r"
            UPDATE links
            SET
                tombstoned_at = COALESCE(tombstoned_at, CURRENT_TIMESTAMP),
                updated_at = CASE
                    WHEN tombstoned_at IS NULL THEN CURRENT_TIMESTAMP
                    ELSE updated_at
                END
            WHERE id = $1
            RETURNING *
            ",
        )
        .bind(link.id)
        .fetch_one(&self.connection_pool)
        .await
        .map_err(connection_error)
    }

    async fn insert_click(&self, click: &NewClick) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO clicks (link_id, referrer, country, user_agent, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(click.link_id)
        .bind(click.metadata.referrer.as_deref())
        .bind(click.metadata.country.as_deref())
        .bind(click.metadata.user_agent.as_deref())
        .bind(click.clicked_at)
        .execute(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(())
    }

    async fn summarize_clicks(&self, link: &Link) -> Result<ClickSummary> {
        let total = sqlx::query_scalar::<_, i64>(
            r"
            SELECT COUNT(*)
            FROM clicks
            WHERE link_id = $1
            ",
        )
        .bind(link.id)
        .fetch_one(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(ClickSummary {
            total,
            by_referrer: self.count_clicks_by(link, Column::Referrer).await?,
            by_country: self.count_clicks_by(link, Column::Country).await?,
        })
    }
}

/// Convert `SQLx` to storage error
fn connection_error(err: sqlx::Error) -> Error {
    match err {
        sqlx::Error::PoolTimedOut => Error::Timeout,
        err => Error::Connection(err.to_string()),
    }
}
