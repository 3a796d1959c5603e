//! Error types for rdj-room
//!
//! Intake and control operations return these to the acting user. Scheduler
//! failures are logged and retried on the next trigger instead.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;

/// Main error type for rdj-room
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed request (not retried)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Reference could not be resolved into a playable track (not retried)
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// Submitter already has `cap` entries queued
    #[error("Queue quota exceeded for {submitter}: {cap} requests already queued")]
    QuotaExceeded { submitter: String, cap: usize },

    /// Submitter's intake privilege is suspended
    #[error("Submitter {submitter} is suspended until {until}")]
    SuspendedSubmitter {
        submitter: String,
        until: DateTime<Utc>,
    },

    /// Store hiccup; the caller retries with backoff
    #[error("State store unavailable: {0}")]
    StoreUnavailable(String),

    /// Optimistic update lost against a concurrent writer
    #[error("Write conflict: {0}")]
    Conflict(String),

    /// Another actor already consumed the resource
    #[error("Race lost: {0}")]
    RaceLost(String),

    /// Caller lacks the required capability
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Worth retrying with backoff
    pub fn is_transient(&self) -> bool {
        match self {
            Error::StoreUnavailable(_) | Error::Conflict(_) => true,
            Error::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ) || is_sqlite_busy(e),
            _ => false,
        }
    }

    /// Stable machine-readable kind for API responses
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::InvalidReference(_) => "invalid_reference",
            Error::QuotaExceeded { .. } => "quota_exceeded",
            Error::SuspendedSubmitter { .. } => "suspended_submitter",
            Error::StoreUnavailable(_) => "store_unavailable",
            Error::Conflict(_) => "conflict",
            Error::RaceLost(_) => "race_lost",
            Error::Unauthorized(_) => "unauthorized",
            Error::NotFound(_) => "not_found",
            Error::InvalidState(_) => "invalid_state",
            Error::Config(_) => "config",
            Error::Database(_) => "database",
            Error::Http(_) => "http",
            Error::Io(_) => "io",
            Error::Internal(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation(_) | Error::InvalidReference(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::QuotaExceeded { .. }
            | Error::SuspendedSubmitter { .. }
            | Error::Conflict(_)
            | Error::RaceLost(_)
            | Error::InvalidState(_) => StatusCode::CONFLICT,
            Error::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        let body = Json(json!({
            "status": "error",
            "error": self.kind(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

fn is_sqlite_busy(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => {
            let msg = db.message();
            msg.contains("database is locked") || msg.contains("database is busy")
        }
        _ => false,
    }
}

impl From<rdj_common::Error> for Error {
    fn from(e: rdj_common::Error) -> Self {
        Error::Config(e.to_string())
    }
}

/// Convenience Result type using rdj-room Error
pub type Result<T> = std::result::Result<T, Error>;
