//! Bearer-token authentication middleware
//!
//! When `api_token` is configured every protected route requires
//! `Authorization: Bearer <token>`. With no token configured all requests
//! pass through.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::{ApiError, AppState};

/// Authentication middleware
///
/// Applied to protected routes only; `/health` and `/api/buildinfo` do not
/// use it.
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let expected = state.config.read().await.api_token.clone();
    let Some(expected) = expected else {
        // Auth disabled - pass through without validation
        return Ok(next.run(request).await);
    };

    let provided = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    let rejection = match provided {
        Some(token) if tokens_match(token, &expected) => None,
        Some(_) => {
            warn!(path = %request.uri().path(), "Rejected request with wrong bearer token");
            Some("Invalid bearer token")
        }
        None => Some("Missing Authorization: Bearer header"),
    };

    match rejection {
        None => Ok(next.run(request).await),
        Some(reason) => Err(ApiError::Unauthorized(reason.to_string())),
    }
}

/// Comparison whose duration does not depend on where the inputs differ
fn tokens_match(provided: &str, expected: &str) -> bool {
    let (a, b) = (provided.as_bytes(), expected.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
