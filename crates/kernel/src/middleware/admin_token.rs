//! Admin bearer token middleware.
//!
//! When an admin token is configured, every `/admin` request must carry
//! `Authorization: Bearer <token>`. Without one the admin API is open,
//! which is only suitable for local development.

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::state::AppState;

/// Reject admin requests that do not present the configured token.
pub async fn require_admin_token(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.admin_token() else {
        return next.run(request).await;
    };

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(token) if token_matches(token, expected) => next.run(request).await,
        Some(_) => {
            debug!(path = %request.uri().path(), "rejected admin request with wrong token");
            unauthorized("invalid admin token")
        }
        None => unauthorized("admin token required"),
    }
}

/// Compare digests so the comparison time does not depend on where the
/// strings first differ.
fn token_matches(presented: &str, expected: &str) -> bool {
    let a = Sha256::digest(presented.as_bytes());
    let b = Sha256::digest(expected.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Bearer")],
        axum::Json(json!({ "error": message })),
    )
        .into_response()
}
