//! Crate-wide error type and the JSON-RPC error code each variant maps to.

use thiserror::Error;

/// Result type alias using the crate's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the decision-intelligence server.
///
/// Every variant corresponds to one row of the error taxonomy in the spec:
/// stable codes so clients can branch on `code()` rather than parse
/// messages.
#[derive(Error, Debug)]
pub enum Error {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("authentication required")]
    AuthRequired,

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("query failed: {0}")]
    QueryFailed(String),

    #[error("guardrail evaluation failed: {0}")]
    GuardrailEvalFailed(String),

    #[error("record failed: {0}")]
    RecordFailed(String),

    #[error("review failed: {0}")]
    ReviewFailed(String),

    #[error("decision not found: {0}")]
    DecisionNotFound(String),

    #[error("attribution failed: {0}")]
    AttributionFailed(String),

    #[error("operation timed out after {0}ms")]
    Timeout(u64),

    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Stable JSON-RPC 2.0 error code for this variant.
    pub fn code(&self) -> i64 {
        match self {
            Error::Parse(_) => -32700,
            Error::InvalidRequest(_) => -32600,
            Error::MethodNotFound(_) => -32601,
            Error::InvalidParams(_) => -32602,
            Error::Internal(_) | Error::Serialization(_) => -32603,
            Error::AuthRequired => -32001,
            Error::RateLimited(_) => -32002,
            Error::QueryFailed(_) | Error::Timeout(_) => -32003,
            Error::GuardrailEvalFailed(_) => -32004,
            Error::RecordFailed(_) => -32005,
            Error::ReviewFailed(_) => -32006,
            Error::DecisionNotFound(_) => -32007,
            Error::AttributionFailed(_) => -32008,
            Error::Storage(e) => e.code(),
        }
    }

    /// Message safe to return to an untrusted client: unexpected/internal
    /// failures never leak their cause over the wire.
    pub fn public_message(&self) -> String {
        match self {
            Error::Internal(_) | Error::Serialization(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}
