//! All API endpoint setup

use axum::Router;
use axum::routing::get;

pub use current_owner::CurrentOwner;
pub use current_owner::IdentityKeys;
pub use request::Form;
pub use request::PathParameters;
pub use response::Error;
pub use response::Success;

#[cfg(test)]
pub use current_owner::Claims;

mod current_owner;
mod links;
mod request;
mod response;

/// Get the Axum router for all API routes
pub fn router() -> Router {
    let links = Router::new()
        .route("/", get(links::list).post(links::create))
        .route("/{link}", get(links::single).delete(links::delete))
        .route("/{link}/clicks", get(links::clicks));

    Router::new().nest("/links", links)
}
