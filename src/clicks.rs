//! Clicks
//!
//! A click is one successful resolution of a short code, recorded in the background

use axum::http::HeaderMap;
use axum::http::HeaderName;
use axum::http::header::REFERER;
use axum::http::header::USER_AGENT;
use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;

use crate::links::Link;

/// Longest header value kept on a click, longer values are dropped
const MAX_HEADER_VALUE_LENGTH: usize = 2048;

/// Longest country code kept on a click
const MAX_COUNTRY_LENGTH: usize = 3;

/// Which request metadata ends up on a click
#[derive(Clone, Debug)]
pub struct ClickSettings {
    /// Capacity of the click queue, clicks are dropped when it is full
    pub queue_capacity: usize,

    /// Keep the `Referer` header
    pub record_referrer: bool,

    /// Keep the `User-Agent` header
    pub record_user_agent: bool,

    /// Header carrying the visitor country, set by an edge proxy
    pub country_header: Option<HeaderName>,
}

impl Default for ClickSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            record_referrer: true,
            record_user_agent: false,
            country_header: None,
        }
    }
}

/// Coarse request metadata of a click
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClickMetadata {
    /// Where the visitor came from
    pub referrer: Option<String>,

    /// Country of the visitor
    pub country: Option<String>,

    /// Browser of the visitor
    pub user_agent: Option<String>,
}

impl ClickMetadata {
    /// Collect the metadata allowed by the settings from the request headers
    pub fn from_headers(headers: &HeaderMap, settings: &ClickSettings) -> Self {
        let referrer = if settings.record_referrer {
            header_value(headers, &REFERER)
        } else {
            None
        };

        let user_agent = if settings.record_user_agent {
            header_value(headers, &USER_AGENT)
        } else {
            None
        };

        let country = settings
            .country_header
            .as_ref()
            .and_then(|name| header_value(headers, name))
            .filter(|country| {
                country.len() <= MAX_COUNTRY_LENGTH
                    && country.chars().all(|ch| ch.is_ascii_alphanumeric())
            })
            .map(|country| country.to_ascii_uppercase());

        Self {
            referrer,
            country,
            user_agent,
        }
    }
}

/// Trimmed, non-empty, visible ASCII header value
fn header_value(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty() && value.len() <= MAX_HEADER_VALUE_LENGTH)
        .map(ToString::to_string)
}

/// A click waiting to be persisted
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewClick {
    /// The link that was resolved
    pub link_id: i64,

    /// Moment of resolution, not of persisting
    pub clicked_at: DateTime<Utc>,

    /// Request metadata
    pub metadata: ClickMetadata,
}

impl NewClick {
    /// Click on a link, right now
    pub fn new(link: &Link, metadata: ClickMetadata) -> Self {
        Self {
            link_id: link.id,
            clicked_at: Utc::now(),
            metadata,
        }
    }
}

/// Number of clicks sharing a value
#[derive(Clone, Debug, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct ClickCount {
    /// The shared value, `None` when it was not recorded
    pub value: Option<String>,

    /// Number of clicks
    pub count: i64,
}

/// Aggregated clicks of a single link
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickSummary {
    /// All clicks
    pub total: i64,

    /// Clicks per referrer, most clicked first
    pub by_referrer: Vec<ClickCount>,

    /// Clicks per country, most clicked first
    pub by_country: Vec<ClickCount>,
}

/// Count clicks per value, most clicked first, ties by value with unknown last
pub fn count_by<'a, I>(values: I) -> Vec<ClickCount>
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let mut counts: Vec<ClickCount> = Vec::new();

    for value in values {
        if let Some(count) = counts.iter_mut().find(|count| count.value.as_deref() == value) {
            count.count += 1;
        } else {
            counts.push(ClickCount {
                value: value.map(ToString::to_string),
                count: 1,
            });
        }
    }

    counts.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.value.is_none().cmp(&b.value.is_none()))
            .then_with(|| a.value.cmp(&b.value))
    });

    counts
}
