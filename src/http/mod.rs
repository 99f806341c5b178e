//! HTTP surface: routes, admission control and the server.

mod body;
mod client;
mod error;
mod headers;
mod middleware;
mod routes;
mod server;

pub use body::{BodyRejection, RequestBodyGuard, MIN_BODY_LIMIT_BYTES};
pub use client::{extract_client_identity, UNKNOWN_CLIENT};
pub use error::{ApiError, FieldError, Validate, ValidatedJson};
pub use headers::{apply_security_headers, CspMode, CSP_DIRECTIVES, X_REQUEST_ID};
pub use middleware::{
    admission_middleware, current_request_id, AdmissionMiddleware, AdmissionOutcome, RequestId,
};
pub use routes::{routes, AppState, EditFeedback, GenerateRequest, ThumbFeedback};
pub use server::HttpServer;

use axum::http::{header, HeaderValue, Method};
use axum::{middleware as axum_middleware, Router};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;

/// Build the full application: routes, CORS, then admission control
/// outermost so every response passes through it.
pub fn app(state: AppState, admission: Arc<AdmissionMiddleware>, cors: CorsLayer) -> Router {
    routes(state)
        .layer(cors)
        .layer(axum_middleware::from_fn_with_state(admission, admission_middleware))
}

/// CORS for the given browser origins. Unparseable origins are skipped.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
