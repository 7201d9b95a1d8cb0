//! Wire message definitions.
//!
//! Every message is one self-describing msgpack map whose `object_type` field
//! selects the kind. There is no length prefix; message boundaries come from
//! the encoding itself (see [`crate::codec`]).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use rmpv::Value;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Object-graph node identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// Node ids travel as hyphenated UUID strings in every encoding.
impl Serialize for NodeId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Uuid::parse_str(&raw)
            .map(NodeId)
            .map_err(serde::de::Error::custom)
    }
}

/// Position-range bounds for listing queries.
///
/// Each bound is optional; an absent bound does not constrain the listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PosFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_from: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_to: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_from: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_to: Option<u64>,
}

/// A node's externally visible state.
///
/// `data` and `bindata` carry the populated key sets only; payloads are
/// fetched separately (`get_data`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos_start: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos_end: Option<u64>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub attr: BTreeMap<String, Value>,
    #[serde(default)]
    pub data: BTreeSet<String>,
    #[serde(default)]
    pub bindata: BTreeSet<String>,
}

/// One protocol message, inbound or outbound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "object_type", rename_all = "snake_case")]
pub enum Message {
    // Client requests.
    Create {
        rid: u64,
        id: NodeId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<NodeId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pos_start: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pos_end: Option<u64>,
        #[serde(default)]
        tags: BTreeSet<String>,
        #[serde(default)]
        attr: BTreeMap<String, Value>,
        #[serde(default)]
        data: BTreeMap<String, Value>,
        #[serde(default)]
        bindata: BTreeMap<String, Value>,
    },
    Delete {
        rid: u64,
        id: NodeId,
    },
    SetData {
        rid: u64,
        id: NodeId,
        key: String,
        data: Value,
    },
    List {
        qid: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<NodeId>,
        #[serde(default)]
        tags: BTreeSet<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pos_filter: Option<PosFilter>,
        #[serde(default)]
        sub: bool,
    },
    Get {
        qid: u64,
        id: NodeId,
        #[serde(default)]
        sub: bool,
    },
    GetData {
        qid: u64,
        id: NodeId,
        key: String,
        #[serde(default)]
        sub: bool,
    },
    Unsub {
        qid: u64,
    },

    // Request kinds with no established semantics. Decoded only far enough
    // to answer `proto_error(not_supported)`; extra fields are ignored.
    GetBin {
        #[serde(default)]
        qid: u64,
    },
    MthdRun {
        #[serde(default)]
        rid: u64,
    },
    MthdDone {
        #[serde(default)]
        rid: u64,
    },
    ProcDone {
        #[serde(default)]
        rid: u64,
    },
    MthdReg {
        #[serde(default)]
        rid: u64,
    },
    ProcReg {
        #[serde(default)]
        rid: u64,
    },

    // Server replies and pushes.
    Ack {
        rid: u64,
    },
    RequestError {
        rid: u64,
        code: String,
        msg: String,
    },
    QueryError {
        qid: u64,
        code: String,
        msg: String,
    },
    GetReply {
        qid: u64,
        obj: NodeSnapshot,
    },
    GetDataReply {
        qid: u64,
        data: Value,
    },
    ListReply {
        qid: u64,
        objs: Vec<NodeSnapshot>,
        gone: Vec<NodeId>,
    },
    ObjGone {
        qid: u64,
    },
    SubCancelled {
        qid: u64,
    },
    ProtoError {
        code: String,
        error: String,
    },
}

impl Message {
    /// The wire name of this message's kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Create { .. } => "create",
            Message::Delete { .. } => "delete",
            Message::SetData { .. } => "set_data",
            Message::List { .. } => "list",
            Message::Get { .. } => "get",
            Message::GetData { .. } => "get_data",
            Message::Unsub { .. } => "unsub",
            Message::GetBin { .. } => "get_bin",
            Message::MthdRun { .. } => "mthd_run",
            Message::MthdDone { .. } => "mthd_done",
            Message::ProcDone { .. } => "proc_done",
            Message::MthdReg { .. } => "mthd_reg",
            Message::ProcReg { .. } => "proc_reg",
            Message::Ack { .. } => "ack",
            Message::RequestError { .. } => "request_error",
            Message::QueryError { .. } => "query_error",
            Message::GetReply { .. } => "get_reply",
            Message::GetDataReply { .. } => "get_data_reply",
            Message::ListReply { .. } => "list_reply",
            Message::ObjGone { .. } => "obj_gone",
            Message::SubCancelled { .. } => "sub_cancelled",
            Message::ProtoError { .. } => "proto_error",
        }
    }
}

/// Protocol-level error codes carried by `proto_error`.
pub mod proto_codes {
    /// A query identifier is already bound to an active subscription.
    pub const QID_IN_USE: &str = "qid_in_use";
    /// The request kind has no implemented semantics.
    pub const NOT_SUPPORTED: &str = "not_supported";
    /// A reply-only kind arrived on the inbound stream.
    pub const UNEXPECTED_MESSAGE: &str = "unexpected_message";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_match_wire_discriminators() {
        let cases = [
            (Message::Unsub { qid: 1 }, "unsub"),
            (Message::Ack { rid: 1 }, "ack"),
            (Message::ObjGone { qid: 1 }, "obj_gone"),
            (Message::SubCancelled { qid: 1 }, "sub_cancelled"),
            (
                Message::ProtoError {
                    code: "x".into(),
                    error: "y".into(),
                },
                "proto_error",
            ),
        ];
        for (msg, expected) in cases {
            assert_eq!(msg.kind(), expected);
        }
    }

    #[test]
    fn node_id_display_is_uuid() {
        let id = NodeId::new();
        let shown = id.to_string();
        assert_eq!(shown.len(), 36);
        assert_eq!(shown.matches('-').count(), 4);
    }

    #[test]
    fn pos_filter_defaults_are_unbounded() {
        let filter = PosFilter::default();
        assert!(filter.start_from.is_none());
        assert!(filter.start_to.is_none());
        assert!(filter.end_from.is_none());
        assert!(filter.end_to.is_none());
    }
}
