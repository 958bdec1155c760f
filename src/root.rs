//! The root!
//!
//! The most important part of Snip, the actual redirect logic

use std::str::Utf8Error;

use axum::Extension;
use axum::http::HeaderMap;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use axum::http::Uri;
use axum::http::header::LOCATION;
use percent_encoding::percent_decode_str;

use crate::api::Error;
use crate::clicks::ClickMetadata;
use crate::clicks::ClickSettings;
use crate::resolver::RedirectResolver;
use crate::resolver::RedirectResult;
use crate::short_code::normalize_code;

/// The root!
///
/// All wildcard requests end up in this function.
///
/// The short code is the whole path, resolved into:
/// - `302 Found` with a `Location` for active links
/// - `404 Not Found` for unknown codes
/// - `410 Gone` for tombstoned links
pub async fn root(
    Extension(resolver): Extension<RedirectResolver>,
    Extension(click_settings): Extension<ClickSettings>,
    request_headers: HeaderMap,
    uri: Uri,
) -> Result<(StatusCode, HeaderMap), Error> {
    let short_code = url_decode_short_code(uri.path())
        .map_err(|_| Error::bad_request("URL contains invalid UTF-8 characters"))?;
    let short_code = normalize_code(&short_code);

    tracing::debug!("Looking for short code: /{short_code}");

    let mut headers = HeaderMap::new();

    if short_code.is_empty() {
        return Ok((StatusCode::NOT_FOUND, headers));
    }

    let metadata = ClickMetadata::from_headers(&request_headers, &click_settings);

    let result = resolver
        .resolve(&short_code, metadata)
        .await
        .map_err(Error::service_unavailable)?;

    let status_code = match result {
        RedirectResult::Found { original_url } => {
            let location =
                HeaderValue::from_str(&original_url).map_err(Error::internal_server_error)?;

            headers.insert(LOCATION, location);

            StatusCode::FOUND
        }
        RedirectResult::NotFound => StatusCode::NOT_FOUND,
        RedirectResult::Gone => StatusCode::GONE,
    };

    Ok((status_code, headers))
}

/// URL decode short code
///
/// Uses percentage encoding for the decoding, might error in case of invalid UTF-8
fn url_decode_short_code(short_code: &str) -> Result<String, Utf8Error> {
    let decoded = percent_decode_str(short_code);

    decoded.decode_utf8().map(|decoded| decoded.to_string())
}
