//! Image pass-through endpoint

use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::services::UpstreamError;
use crate::{ApiError, ApiResult, AppState};

/// Matches the server-side cache lifetime
const CACHE_CONTROL: &str = "public, max-age=600";

#[derive(Debug, Deserialize)]
pub struct ImageProxyQuery {
    pub url: Option<String>,
}

/// GET /api/image-proxy?url=<http(s) url>
///
/// **Response:** the image bytes with the upstream content type
///
/// **Errors:**
/// - 400 Bad Request: missing, malformed, non-http(s) or private URL
/// - 415 Unsupported Media Type: upstream did not return an image
/// - 413 Payload Too Large: image over 10 MiB
/// - 502 Bad Gateway: upstream unreachable, slow, non-2xx (429 included)
///   or redirecting to a refused host
pub async fn image_proxy(
    State(state): State<AppState>,
    Query(query): Query<ImageProxyQuery>,
) -> ApiResult<Response> {
    let url = query
        .url
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing 'url' query parameter".to_string()))?;

    // Failures are shared with every concurrent waiter
    let image = state
        .image_fetcher
        .fetch(&url)
        .await
        .map_err(|e| proxy_error(Arc::unwrap_or_clone(e)))?;

    Ok((
        [
            (header::CONTENT_TYPE, image.content_type),
            (header::CACHE_CONTROL, CACHE_CONTROL.to_string()),
        ],
        image.bytes,
    )
        .into_response())
}

/// Problems with the request or the content keep their own status; every
/// other image host failure is a 502
fn proxy_error(err: UpstreamError) -> ApiError {
    match err {
        UpstreamError::InvalidRequest(_)
        | UpstreamError::UnsupportedContent(_)
        | UpstreamError::TooLarge(_) => ApiError::Upstream(err),
        other => ApiError::BadGateway(other),
    }
}

/// Build image proxy routes
pub fn image_proxy_routes() -> Router<AppState> {
    Router::new().route("/api/image-proxy", get(image_proxy))
}
