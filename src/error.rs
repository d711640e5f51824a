//! Error taxonomy for the live pipeline.
//!
//! None of these are fatal: transport errors trigger fallback or retry, parse
//! errors drop the offending snapshot, and exhausted retries leave polling as
//! the only data source.

use thiserror::Error;

/// Connectivity failure on either the push or the poll transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("connection closed by peer")]
    Closed,

    #[error("server answered HTTP {status}")]
    Http { status: u16 },

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("transport I/O error: {0}")]
    Io(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            TransportError::Http {
                status: status.as_u16(),
            }
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Io(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed,
            WsError::Http(response) => TransportError::Http {
                status: response.status().as_u16(),
            },
            WsError::Io(io) => TransportError::Io(io.to_string()),
            other => TransportError::Connect(other.to_string()),
        }
    }
}

/// Malformed snapshot payload. The snapshot is dropped before any state changes.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload must be a JSON object")]
    NotAnObject,

    #[error("field `{field}` is malformed: {reason}")]
    Field { field: String, reason: String },

    #[error("unknown snapshot type `{0}`")]
    UnknownType(String),
}

impl ParseError {
    pub(crate) fn field(field: &str, reason: impl Into<String>) -> Self {
        ParseError::Field {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Failure of the key/value store backing the notification log and dedup cache.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored value is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Everything the reconciliation pipeline can surface to its collaborator.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("push transport gave up after {attempts} reconnect attempts")]
    ExhaustedRetries { attempts: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}
