//! Wire protocol for the objgraph daemon.
//!
//! Defines the message model shared by client and server and the
//! self-delimiting msgpack framing used on stream transports.

pub mod codec;
pub mod message;

pub use codec::{encode, CodecError, CodecResult, FrameReader};
pub use message::{proto_codes, Message, NodeId, NodeSnapshot, PosFilter};

/// Dynamic msgpack value used for attributes and data slots.
pub use rmpv::Value;
