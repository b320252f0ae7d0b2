//! # Feed Error Taxonomy
//!
//! The live path and the fetch path fail independently. Decode failures are
//! dropped where they happen, transport failures drive the reconnect
//! supervisor, and query failures surface on the controller's `last_error`.

use std::time::Duration;

use thiserror::Error;

/// A payload (stream frame, push message or fetch body) could not be decoded.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("malformed JSON payload: {0}")]
    Json(String),

    #[error("event record is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("event record `{id}` has an unparseable occurredAt `{value}`")]
    BadTimestamp { id: String, value: String },

    #[error("push payload carries no event data")]
    EmptyPush,
}

/// Network-level failure on either the stream or a fetch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("stream endpoint answered HTTP {0}")]
    Status(u16),

    #[error("stream read failed: {0}")]
    Read(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

/// Umbrella error for the controller, fetch service and configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeedError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("fetch answered HTTP {status}: {body}")]
    Query { status: u16, body: String },

    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("gave up after {attempts} consecutive failures: {last}")]
    ExhaustedRetries { attempts: u32, last: TransportError },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("feed controller has been torn down")]
    ShutDown,
}

impl FeedError {
    /// Whether the same request could succeed if retried later.
    pub fn is_transient(&self) -> bool {
        matches!(self, FeedError::Transport(_) | FeedError::Timeout(_))
            || matches!(self, FeedError::Query { status, .. } if *status >= 500)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else if let Some(status) = e.status() {
            TransportError::Status(status.as_u16())
        } else {
            TransportError::Read(e.to_string())
        }
    }
}

impl From<reqwest_middleware::Error> for FeedError {
    fn from(e: reqwest_middleware::Error) -> Self {
        match e {
            reqwest_middleware::Error::Reqwest(inner) if inner.is_decode() => {
                FeedError::Decode(DecodeError::Json(inner.to_string()))
            }
            reqwest_middleware::Error::Reqwest(inner) => FeedError::Transport(inner.into()),
            reqwest_middleware::Error::Middleware(inner) => {
                FeedError::Transport(TransportError::Connect(inner.to_string()))
            }
        }
    }
}
