//! Cross-origin access for the browser frontend.

use std::time::Duration;

use axum::http::{HeaderName, HeaderValue, Method, header};
use tower_http::cors::{AllowOrigin, CorsLayer};
use url::Url;

/// How long browsers may cache a preflight answer.
pub const PREFLIGHT_MAX_AGE: Duration = Duration::from_secs(300);

const CSRF_TOKEN: HeaderName = HeaderName::from_static("x-csrf-token");

/// CORS policy that admits only the frontend's origin.
///
/// A frontend URL without a tuple origin admits nothing.
pub fn cors_layer(frontend_url: &Url) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::ACCEPT,
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            CSRF_TOKEN,
        ])
        .expose_headers([header::LINK])
        .max_age(PREFLIGHT_MAX_AGE);

    let origin = frontend_url.origin();
    if !origin.is_tuple() {
        tracing::warn!(url = %frontend_url, "Frontend URL has no origin, cross-origin requests disabled");
        return layer;
    }

    match HeaderValue::from_str(&origin.ascii_serialization()) {
        Ok(value) => layer.allow_origin(AllowOrigin::exact(value)),
        Err(e) => {
            tracing::warn!(url = %frontend_url, error = %e, "Frontend origin is not a valid header, cross-origin requests disabled");
            layer
        }
    }
}
