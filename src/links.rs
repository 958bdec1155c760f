//! Links

use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;

/// A short code mapped onto a destination URL
#[derive(Clone, Debug, PartialEq, Eq, sqlx::FromRow)]
pub struct Link {
    /// Storage generated ID
    pub id: i64,

    /// External identifier for the link, unique over all links
    pub short_code: String,

    /// Location where the link redirects to
    pub original_url: String,

    /// Opaque identifier of the owner, as handed out by the identity provider
    pub owner_id: String,

    /// Creation date
    pub created_at: DateTime<Utc>,

    /// Last updated at
    pub updated_at: DateTime<Utc>,

    /// Retired at, the short code stays reserved
    pub tombstoned_at: Option<DateTime<Utc>>,
}

/// Lifecycle state of a link
///
/// `Active -> Tombstoned` is the only transition, tombstoned is terminal
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkState {
    /// Redirects visitors
    Active,

    /// Retired, visitors get a `410 Gone`
    Tombstoned,
}

impl Link {
    /// Current lifecycle state
    pub fn state(&self) -> LinkState {
        if self.tombstoned_at.is_some() {
            LinkState::Tombstoned
        } else {
            LinkState::Active
        }
    }

    /// Is the link retired?
    pub fn is_tombstoned(&self) -> bool {
        self.state() == LinkState::Tombstoned
    }

    /// Is the link owned by the given owner?
    pub fn is_owned_by(&self, owner_id: &str) -> bool {
        self.owner_id == owner_id
    }
}
