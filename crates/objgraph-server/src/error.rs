//! Server error types.

use objgraph_proto::{proto_codes, CodecError, Message};
use thiserror::Error;

/// A client misused the protocol on an otherwise healthy connection.
///
/// Translated into a `proto_error` reply at the dispatch boundary; the
/// connection stays up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("protocol error {code}: {error}")]
pub struct ProtocolError {
    pub code: String,
    pub error: String,
}

impl ProtocolError {
    pub fn new(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            error: error.into(),
        }
    }

    pub fn qid_in_use() -> Self {
        Self::new(proto_codes::QID_IN_USE, "qid already in use")
    }

    pub fn not_supported(kind: &str) -> Self {
        Self::new(proto_codes::NOT_SUPPORTED, format!("{kind} is not supported"))
    }

    pub fn unexpected_message(kind: &str) -> Self {
        Self::new(
            proto_codes::UNEXPECTED_MESSAGE,
            format!("{kind} is not a request"),
        )
    }

    /// The `proto_error` reply reporting this violation.
    pub fn into_reply(self) -> Message {
        Message::ProtoError {
            code: self.code,
            error: self.error,
        }
    }
}

/// Why a connection stopped being served.
///
/// Framing and transport failures are fatal; they are reported to the log
/// and the connection is torn down, never retried.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Errors surfaced by the [`crate::client::Client`] helper.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("connection closed")]
    ConnectionClosed,
}
