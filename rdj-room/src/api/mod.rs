//! HTTP API
//!
//! REST endpoints for rooms plus a per-room SSE stream of change events.
//! Callers identify themselves with the `X-User-Id` header, which an upstream
//! identity layer is trusted to set.

pub mod handlers;
pub mod server;
pub mod sse;

pub use server::{router, run, AppContext};

use crate::error::Error;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

/// Header carrying the caller's user id
pub const USER_HEADER: &str = "x-user-id";

/// Authenticated caller
#[derive(Debug, Clone)]
pub struct Caller(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| Error::Unauthorized(format!("missing {} header", USER_HEADER)))?;
        Ok(Caller(user.to_string()))
    }
}
