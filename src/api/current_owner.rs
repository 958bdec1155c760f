//! Current owner service
//!
//! Get the owner from the request, based on the token of the identity provider in the
//! Authorization header

use std::ops::Deref;
use std::sync::Arc;

use axum::Extension;
use axum::RequestPartsExt;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;
use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use serde::Serialize;

use crate::api::Error;

/// The key used for verifying identity tokens
#[derive(Clone)]
pub struct IdentityKeys {
    /// The decoding key
    decoding: DecodingKey,
}

impl IdentityKeys {
    /// Create the decoding key, derived from the secret shared with the identity provider
    pub fn new(secret: &[u8]) -> Self {
        Self {
            decoding: DecodingKey::from_secret(secret),
        }
    }
}

/// The claims identifying an owner
#[derive(Debug, Deserialize, Serialize)]
pub struct Claims {
    /// The opaque owner identifier
    pub sub: String,

    /// When the token expires, as UNIX timestamp
    pub exp: i64,
}

/// Current owner service
#[derive(Clone, Debug)]
pub struct CurrentOwner {
    /// The opaque owner identifier
    owner_id: Arc<str>,
}

impl Deref for CurrentOwner {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.owner_id
    }
}

impl<S> FromRequestParts<S> for CurrentOwner
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        use jsonwebtoken::Validation;
        use jsonwebtoken::decode;

        // Extract the token from the authorization header
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| Error::forbidden("Missing API token"))?;

        let Extension(identity_keys) = parts
            .extract::<Extension<IdentityKeys>>()
            .await
            .map_err(|_| Error::internal_server_error("Could not get identity keys"))?;

        let token_data =
            decode::<Claims>(bearer.token(), &identity_keys.decoding, &Validation::default())
                .map_err(|err| Error::forbidden(format!("Invalid token: {err}")))?;

        let owner_id = token_data.claims.sub;

        if owner_id.is_empty() {
            return Err(Error::forbidden("Token has no subject"));
        }

        Ok(CurrentOwner {
            owner_id: owner_id.into(),
        })
    }
}
