//! Links API endpoints
//!
//! Everything the dashboard needs to manage the links of the current owner

use axum::Extension;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::allocator::CodeAllocator;
use crate::clicks::ClickSummary;
use crate::links::Link;
use crate::links::LinkState;
use crate::resolver::RedirectResolver;
use crate::short_code::BaseUrl;
use crate::storage::SharedStorage;

use super::CurrentOwner;
use super::Error;
use super::Form;
use super::PathParameters;
use super::Success;

/// Link response going to the owner
///
/// Basically filtering which fields are shown to the owner
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkResponse {
    /// Link ID
    pub id: i64,

    /// Code used to identify the link by the root
    pub short_code: String,

    /// Full URL to share
    pub short_url: String,

    /// URL where root will redirect to
    pub original_url: String,

    /// Active or tombstoned
    pub state: LinkState,

    /// Creation date
    pub created_at: DateTime<Utc>,

    /// Last updated at
    pub updated_at: DateTime<Utc>,
}

impl LinkResponse {
    /// Create a response from a [`Link`](Link)
    fn from_link(link: Link, base_url: &BaseUrl) -> Self {
        Self {
            id: link.id,
            short_url: base_url.short_url(&link.short_code),
            state: link.state(),
            short_code: link.short_code,
            original_url: link.original_url,
            created_at: link.created_at,
            updated_at: link.updated_at,
        }
    }

    /// Create a response from multiple [`Link`](Link)s
    fn from_link_multiple(links: Vec<Link>, base_url: &BaseUrl) -> Vec<Self> {
        links
            .into_iter()
            .map(|link| Self::from_link(link, base_url))
            .collect()
    }
}

/// List all links of the current owner, newest first
///
/// Request:
/// ```sh
/// curl -v -H 'Authorization: Bearer tokentokentoken' \
///     http://localhost:6000/api/links
/// ```
///
/// Response:
/// ```json
/// { "data": [ { "id": 1, "shortCode": "x7Kp2m" ... } ] }
/// ```
pub async fn list(
    Extension(storage): Extension<SharedStorage>,
    Extension(base_url): Extension<BaseUrl>,
    current_owner: CurrentOwner,
) -> Result<Success<Vec<LinkResponse>>, Error> {
    let links = storage
        .find_all_links_by_owner(&current_owner)
        .await
        .map_err(Error::service_unavailable)?;

    Ok(Success::ok(LinkResponse::from_link_multiple(
        links, &base_url,
    )))
}

/// Get a single link
///
/// Request:
/// ```sh
/// curl -v -H 'Authorization: Bearer tokentokentoken' \
///     http://localhost:6000/api/links/1
/// ```
///
/// Response:
/// ```json
/// { "data": { "id": 1, "shortCode": "x7Kp2m" ... } }
/// ```
pub async fn single(
    Extension(storage): Extension<SharedStorage>,
    Extension(base_url): Extension<BaseUrl>,
    current_owner: CurrentOwner,
    PathParameters(link_id): PathParameters<i64>,
) -> Result<Success<LinkResponse>, Error> {
    fetch_link(&storage, &current_owner, link_id)
        .await
        .map(|link| Success::ok(LinkResponse::from_link(link, &base_url)))
}

/// Create link form
///
/// Fields to create a link with
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLinkForm {
    /// Absolute URL to shorten
    url: String,

    /// Custom code, a random one is generated when not provided
    ///
    /// The code is normalized:
    /// - Leading and trailing slashes are removed
    /// - Unicode normalization
    code: Option<String>,
}

/// Create a link based on the [`CreateLinkForm`](CreateLinkForm) form
///
/// Request:
/// ```sh
/// curl -v -H 'Content-Type: application/json' \
///     -H 'Authorization: Bearer tokentokentoken' \
///     -d '{ "url": "https://www.example.com/", "code": "launch" }' \
///     http://localhost:6000/api/links
/// ```
///
/// Response
/// ```json
/// { "data": { "id": 1, "shortCode": "launch" ... } }
/// ```
pub async fn create(
    Extension(allocator): Extension<CodeAllocator>,
    Extension(base_url): Extension<BaseUrl>,
    current_owner: CurrentOwner,
    Form(form): Form<CreateLinkForm>,
) -> Result<Success<LinkResponse>, Error> {
    let link = allocator
        .allocate(&current_owner, &form.url, form.code.as_deref())
        .await?;

    Ok(Success::created(LinkResponse::from_link(link, &base_url)))
}

/// Tombstone a link
///
/// The short code stays reserved, visitors get a `410 Gone`
///
/// Request:
/// ```sh
/// curl -v -XDELETE \
///     -H 'Authorization: Bearer tokentokentoken' \
///     http://localhost:6000/api/links/1
/// ```
pub async fn delete(
    Extension(storage): Extension<SharedStorage>,
    Extension(resolver): Extension<RedirectResolver>,
    current_owner: CurrentOwner,
    PathParameters(link_id): PathParameters<i64>,
) -> Result<Success<&'static str>, Error> {
    let link = fetch_link(&storage, &current_owner, link_id).await?;

    if !link.is_tombstoned() {
        storage
            .tombstone_link(&link)
            .await
            .map_err(Error::service_unavailable)?;

        resolver.forget(&link.short_code).await;

        tracing::info!(r#"Tombstoned short code "{}""#, link.short_code);
    }

    Ok(Success::<&'static str>::no_content())
}

/// Get the click summary of a link
///
/// Request:
/// ```sh
/// curl -v -H 'Authorization: Bearer tokentokentoken' \
///     http://localhost:6000/api/links/1/clicks
/// ```
///
/// Response:
/// ```json
/// { "data": { "total": 3, "byReferrer": [ { "value": null, "count": 3 } ], "byCountry": [] } }
/// ```
pub async fn clicks(
    Extension(storage): Extension<SharedStorage>,
    current_owner: CurrentOwner,
    PathParameters(link_id): PathParameters<i64>,
) -> Result<Success<ClickSummary>, Error> {
    let link = fetch_link(&storage, &current_owner, link_id).await?;

    storage
        .summarize_clicks(&link)
        .await
        .map(Success::ok)
        .map_err(Error::service_unavailable)
}

/// Fetch link from storage, links of other owners do not exist
async fn fetch_link(storage: &SharedStorage, owner_id: &str, link_id: i64) -> Result<Link, Error> {
    storage
        .find_single_link_by_id(link_id)
        .await
        .map_err(Error::service_unavailable)?
        .filter(|link| link.is_owned_by(owner_id))
        .ok_or_else(|| Error::not_found("Link not found"))
}
