//! Backend error type.

use objgraph_proto::NodeId;
use thiserror::Error;

/// Well-known backend error codes.
///
/// Codes travel the wire verbatim inside `request_error`/`query_error`
/// replies, so they are part of the protocol surface.
pub mod backend_codes {
    pub const OBJ_NOT_FOUND: &str = "obj_not_found";
    pub const OBJ_EXISTS: &str = "obj_exists";
    pub const CONNECTION_LIMIT: &str = "connection_limit";
}

/// A domain failure reported by the object-graph service.
///
/// Carries a machine-readable code and a human-readable message; both are
/// preserved verbatim when translated into error replies.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {msg}")]
pub struct BackendError {
    pub code: String,
    pub msg: String,
}

impl BackendError {
    pub fn new(code: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            msg: msg.into(),
        }
    }

    pub fn not_found(id: NodeId) -> Self {
        Self::new(backend_codes::OBJ_NOT_FOUND, format!("no such node: {id}"))
    }

    pub fn exists(id: NodeId) -> Self {
        Self::new(
            backend_codes::OBJ_EXISTS,
            format!("node already exists: {id}"),
        )
    }
}

/// Result type alias using BackendError.
pub type BackendResult<T> = Result<T, BackendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code_and_message() {
        let err = BackendError::new("conflict", "version mismatch");
        assert_eq!(err.to_string(), "conflict: version mismatch");
    }

    #[test]
    fn not_found_mentions_the_node() {
        let id = NodeId::new();
        let err = BackendError::not_found(id);
        assert_eq!(err.code, backend_codes::OBJ_NOT_FOUND);
        assert!(err.msg.contains(&id.to_string()));
    }
}
