//! HTTP surface of the relay.
//!
//! ## Structure
//!
//! - [`handler`] - [`RelayService`] state and the route handlers.
//! - [`auth`] - The [`auth::Authenticated`] extractor.

pub mod auth;
pub mod handler;


pub use handler::RelayService;

use axum::{Router, routing::get};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Builds the application router, mounted under `base_url` (which must be
/// normalized to start and end with `/`).
pub fn router(service: RelayService, base_url: &str) -> Router {
    let routes = Router::new()
        .route("/wwtkdr/_probe", get(handler::probe))
        .route("/wwtkdr/{key}/", get(handler::relay_root))
        .route("/wwtkdr/{key}/{*entry}", get(handler::relay_entry));

    let prefix = base_url.trim_end_matches('/');
    let app = if prefix.is_empty() {
        routes
    } else {
        Router::new().nest(prefix, routes)
    };

    app.with_state(service).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
    )
}
