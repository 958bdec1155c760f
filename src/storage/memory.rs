//! Memory storage
//!
//! Will be destroyed on system shutdown

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::clicks::ClickSummary;
use crate::clicks::NewClick;
use crate::clicks::count_by;
use crate::links::Link;

use super::CreateLinkValues;
use super::Error;
use super::Result;
use super::Storage;

/// Links with their short code index, guarded together
#[derive(Debug, Default)]
struct Links {
    /// Last handed out ID
    last_id: i64,

    /// All links by ID
    by_id: BTreeMap<i64, Link>,

    /// Link IDs by short code, the uniqueness constraint
    by_short_code: HashMap<String, i64>,
}

/// An in-memory storage
///
/// Will be destroyed on system shutdown
#[derive(Clone, Debug, Default)]
pub struct Memory {
    /// All links in storage
    links: Arc<Mutex<Links>>,

    /// All clicks in storage
    clicks: Arc<Mutex<Vec<NewClick>>>,
}

impl Memory {
    /// Create a new empty Memory storage
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for Memory {
    async fn insert_link(&self, values: &CreateLinkValues<'_>) -> Result<Link> {
        let mut links = self.links.lock().await;

        if links.by_short_code.contains_key(values.short_code) {
            return Err(Error::Conflict);
        }

        links.last_id += 1;

        let now = Utc::now();
        let link = Link {
            id: links.last_id,
            short_code: values.short_code.to_string(),
            original_url: values.original_url.to_string(),
            owner_id: values.owner_id.to_string(),
            created_at: now,
            updated_at: now,
            tombstoned_at: None,
        };

        links.by_short_code.insert(link.short_code.clone(), link.id);
        links.by_id.insert(link.id, link.clone());

        Ok(link)
    }

    async fn find_single_link_by_short_code(&self, short_code: &str) -> Result<Option<Link>> {
        let links = self.links.lock().await;

        Ok(links
            .by_short_code
            .get(short_code)
            .and_then(|id| links.by_id.get(id))
            .cloned())
    }

    async fn find_single_link_by_id(&self, id: i64) -> Result<Option<Link>> {
        Ok(self.links.lock().await.by_id.get(&id).cloned())
    }

    async fn find_all_links_by_owner(&self, owner_id: &str) -> Result<Vec<Link>> {
        Ok(self
            .links
            .lock()
            .await
            .by_id
            .values()
            .rev()
            .filter(|link| link.is_owned_by(owner_id))
            .cloned()
            .collect())
    }

    async fn tombstone_link(&self, link: &Link) -> Result<Link> {
        self.links
            .lock()
            .await
            .by_id
            .get_mut(&link.id)
            .map(|link| {
                if link.tombstoned_at.is_none() {
                    let now = Utc::now();
                    link.tombstoned_at = Some(now);
                    link.updated_at = now;
                }

                link.clone()
            })
            .ok_or_else(|| Error::Connection(format!("Link {} vanished from memory", link.id)))
    }

    async fn insert_click(&self, click: &NewClick) -> Result<()> {
        self.clicks.lock().await.push(click.clone());

        Ok(())
    }

    async fn summarize_clicks(&self, link: &Link) -> Result<ClickSummary> {
        let clicks = self.clicks.lock().await;
        let clicks = clicks
            .iter()
            .filter(|click| click.link_id == link.id)
            .collect::<Vec<_>>();

        Ok(ClickSummary {
            total: i64::try_from(clicks.len()).unwrap_or(i64::MAX),
            by_referrer: count_by(clicks.iter().map(|click| click.metadata.referrer.as_deref())),
            by_country: count_by(clicks.iter().map(|click| click.metadata.country.as_deref())),
        })
    }
}
