//! Typed errors for the attestation surface and the replay guard
//!
//! Relay and ledger plumbing use `eyre::Result`. Only the places where the
//! caller must branch on the failure kind get a typed error.

use axum::http::StatusCode;
use thiserror::Error;

/// Rejection reasons of the attestation pipeline.
///
/// Each variant maps to a stable code and HTTP status. Authenticity
/// failures (`NoMatchingEvent`, `Unauthorized`, ...) are kept distinct from
/// the duplicate case so callers can tell a replay from a forgery.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AttestationError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("source chain {0} is not served by this service")]
    UnsupportedChain(u64),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    TimestampMismatch(String),

    #[error("{0}")]
    ChainMismatch(String),

    #[error("no transfer event in the transaction matches the claim")]
    NoMatchingEvent,

    #[error("transfer already attested")]
    AlreadyAttested,

    #[error("attestation service not configured: {0}")]
    NotConfigured(&'static str),

    #[error("ledger query failed: {0}")]
    Upstream(String),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AttestationError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            AttestationError::MissingField(_) => "MissingField",
            AttestationError::InvalidField { .. } => "InvalidField",
            AttestationError::UnsupportedChain(_) => "UnsupportedChain",
            AttestationError::NotFound(_) => "NotFound",
            AttestationError::Unauthorized(_) => "Unauthorized",
            AttestationError::TimestampMismatch(_) => "TimestampMismatch",
            AttestationError::ChainMismatch(_) => "ChainMismatch",
            AttestationError::NoMatchingEvent => "NoMatchingEvent",
            AttestationError::AlreadyAttested => "AlreadyAttested",
            AttestationError::NotConfigured(_) => "NotConfigured",
            AttestationError::Upstream(_) => "Upstream",
            AttestationError::Storage(_) => "Storage",
            AttestationError::Internal(_) => "Internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AttestationError::MissingField(_)
            | AttestationError::InvalidField { .. }
            | AttestationError::UnsupportedChain(_)
            | AttestationError::TimestampMismatch(_)
            | AttestationError::ChainMismatch(_) => StatusCode::BAD_REQUEST,
            AttestationError::Unauthorized(_) => StatusCode::FORBIDDEN,
            AttestationError::NotFound(_) | AttestationError::NoMatchingEvent => {
                StatusCode::NOT_FOUND
            }
            AttestationError::AlreadyAttested => StatusCode::CONFLICT,
            AttestationError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            AttestationError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AttestationError::Storage(_) | AttestationError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        AttestationError::InvalidField {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn upstream(e: eyre::Report) -> Self {
        AttestationError::Upstream(format!("{:#}", e))
    }
}

/// Replay guard failures
#[derive(Debug, Error)]
pub enum StoreError {
    /// A record with the same (tx hash, log index, source chain) exists
    #[error("attestation record already exists")]
    Duplicate,

    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        // 23505 = unique_violation
        match &e {
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                StoreError::Duplicate
            }
            _ => StoreError::Database(e.to_string()),
        }
    }
}

impl From<StoreError> for AttestationError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate => AttestationError::AlreadyAttested,
            StoreError::Database(msg) => AttestationError::Storage(msg),
        }
    }
}
