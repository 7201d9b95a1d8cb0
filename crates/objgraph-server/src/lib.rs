//! Protocol endpoint for the objgraph daemon.
//!
//! Accepts binary-framed messages over a stream transport, dispatches them
//! against a [`objgraph_backend::Backend`], and streams back replies and
//! asynchronous change notifications.
//!
//! ## Per-connection model
//!
//! Every accepted transport gets one [`run_connection`] task that owns a
//! frame reader, a subscription registry, and a single writer task.
//! Inbound messages are handled concurrently. Outbound messages (replies
//! and subscription pushes alike) are serialized through the writer so
//! partially written frames can never interleave.
//!
//! ## Error domains
//!
//! Client misuse (duplicate qid, unsupported kind) is answered with
//! `proto_error` and keeps the connection alive. Backend failures are
//! echoed as `request_error`/`query_error` with the backend's code and
//! message preserved. Corrupt framing terminates the connection.

mod connection;
mod registry;
mod subscription;

pub mod client;
pub mod error;
pub mod listen;

pub use client::Client;
pub use connection::run_connection;
pub use error::{ClientError, ConnectionError, ProtocolError};
pub use listen::serve_tcp;
#[cfg(unix)]
pub use listen::serve_unix;
