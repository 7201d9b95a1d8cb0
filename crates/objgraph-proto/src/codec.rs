//! Incremental msgpack framing.
//!
//! Messages are encoded as named msgpack maps (string keys) and concatenated
//! on the stream with no length prefix; the encoding is self-delimiting, so
//! the reader recovers message boundaries by decoding. [`FrameReader`]
//! buffers partial input across reads and yields one message at a time.

use std::io::{self, Cursor};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::Message;

/// Framing/codec error.
///
/// Any error here is fatal for the connection that produced the bytes:
/// a corrupt or unrecognized record leaves the stream position undefined.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The buffered bytes do not decode as a known message.
    #[error("malformed frame: {0}")]
    Malformed(#[source] rmp_serde::decode::Error),

    /// A message failed to serialize.
    #[error("encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
}

/// Result type alias using CodecError.
pub type CodecResult<T> = Result<T, CodecError>;

/// Encode one message as a self-delimiting msgpack map.
pub fn encode(msg: &Message) -> CodecResult<Vec<u8>> {
    let mut buf = Vec::new();
    let mut ser = rmp_serde::Serializer::new(&mut buf).with_struct_map();
    msg.serialize(&mut ser)?;
    Ok(buf)
}

/// Incremental decoder for a stream of concatenated messages.
///
/// Feed raw transport bytes with [`feed`](Self::feed), then drain decoded
/// messages with [`next_message`](Self::next_message) until it returns
/// `Ok(None)` ("need more data"). Decoding is stateless across messages;
/// only partial bytes are carried between calls.
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: Vec<u8>,
}

impl FrameReader {
    /// Create an empty reader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes to the internal buffer.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Decode and remove exactly one complete message from the buffer.
    ///
    /// Returns `Ok(None)` when the buffer holds no complete record yet.
    /// A record that is complete but corrupt, or whose discriminator is
    /// unknown, yields `Err` and must terminate the connection.
    pub fn next_message(&mut self) -> CodecResult<Option<Message>> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        let mut cursor = Cursor::new(&self.buf[..]);
        let mut de = rmp_serde::Deserializer::new(&mut cursor);
        match Message::deserialize(&mut de) {
            Ok(msg) => {
                let consumed = cursor.position() as usize;
                self.buf.drain(..consumed);
                Ok(Some(msg))
            }
            Err(err) if is_truncated(&err) => Ok(None),
            Err(err) => Err(CodecError::Malformed(err)),
        }
    }
}

/// Whether a decode error means "record not complete yet" rather than
/// "record corrupt".
fn is_truncated(err: &rmp_serde::decode::Error) -> bool {
    match err {
        rmp_serde::decode::Error::InvalidMarkerRead(io)
        | rmp_serde::decode::Error::InvalidDataRead(io) => {
            io.kind() == io::ErrorKind::UnexpectedEof
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use rmpv::Value;

    use super::*;
    use crate::message::{NodeId, NodeSnapshot, PosFilter};

    fn snapshot(id: NodeId) -> NodeSnapshot {
        let mut attr = BTreeMap::new();
        attr.insert("name".to_string(), Value::from("widget"));
        NodeSnapshot {
            id,
            parent: Some(NodeId::new()),
            pos_start: Some(16),
            pos_end: Some(64),
            tags: BTreeSet::from(["blob".to_string(), "parsed".to_string()]),
            attr,
            data: BTreeSet::from(["comment".to_string()]),
            bindata: BTreeSet::new(),
        }
    }

    fn round_trip(msg: Message) {
        let bytes = encode(&msg).unwrap();
        let mut reader = FrameReader::new();
        reader.feed(&bytes);
        let decoded = reader.next_message().unwrap().expect("complete message");
        assert_eq!(decoded, msg);
        assert_eq!(reader.buffered(), 0);
        assert!(reader.next_message().unwrap().is_none());
    }

    #[test]
    fn round_trip_requests() {
        let id = NodeId::new();
        round_trip(Message::Create {
            rid: 7,
            id,
            parent: None,
            pos_start: Some(0),
            pos_end: None,
            tags: BTreeSet::from(["raw".to_string()]),
            attr: BTreeMap::from([("size".to_string(), Value::from(1024))]),
            data: BTreeMap::from([("note".to_string(), Value::from("hello"))]),
            bindata: BTreeMap::from([(
                "payload".to_string(),
                Value::Binary(vec![0, 159, 146, 150]),
            )]),
        });
        round_trip(Message::Delete { rid: 8, id });
        round_trip(Message::SetData {
            rid: 9,
            id,
            key: "note".to_string(),
            data: Value::Nil,
        });
        round_trip(Message::List {
            qid: 1,
            parent: Some(id),
            tags: BTreeSet::from(["chunk".to_string()]),
            pos_filter: Some(PosFilter {
                start_from: Some(0),
                start_to: Some(100),
                ..PosFilter::default()
            }),
            sub: true,
        });
        round_trip(Message::Get {
            qid: 2,
            id,
            sub: false,
        });
        round_trip(Message::GetData {
            qid: 3,
            id,
            key: "note".to_string(),
            sub: true,
        });
        round_trip(Message::Unsub { qid: 2 });
    }

    #[test]
    fn round_trip_replies() {
        let id = NodeId::new();
        round_trip(Message::Ack { rid: 7 });
        round_trip(Message::RequestError {
            rid: 7,
            code: "obj_exists".to_string(),
            msg: "node already exists".to_string(),
        });
        round_trip(Message::QueryError {
            qid: 1,
            code: "obj_not_found".to_string(),
            msg: "no such node".to_string(),
        });
        round_trip(Message::GetReply {
            qid: 1,
            obj: snapshot(id),
        });
        round_trip(Message::GetDataReply {
            qid: 1,
            data: Value::from(vec![Value::from(1), Value::from("two")]),
        });
        round_trip(Message::ListReply {
            qid: 4,
            objs: vec![snapshot(id), snapshot(NodeId::new())],
            gone: vec![NodeId::new()],
        });
        round_trip(Message::ObjGone { qid: 4 });
        round_trip(Message::SubCancelled { qid: 4 });
        round_trip(Message::ProtoError {
            code: "qid_in_use".to_string(),
            error: "qid already in use".to_string(),
        });
    }

    #[test]
    fn round_trip_placeholder_kinds() {
        round_trip(Message::GetBin { qid: 5 });
        round_trip(Message::MthdRun { rid: 5 });
        round_trip(Message::MthdDone { rid: 5 });
        round_trip(Message::ProcDone { rid: 5 });
        round_trip(Message::MthdReg { rid: 5 });
        round_trip(Message::ProcReg { rid: 5 });
    }

    #[test]
    fn partial_input_is_not_an_error() {
        let bytes = encode(&Message::GetReply {
            qid: 9,
            obj: snapshot(NodeId::new()),
        })
        .unwrap();

        let mut reader = FrameReader::new();
        // Feed one byte at a time; only the final byte completes the record.
        for (i, byte) in bytes.iter().enumerate() {
            reader.feed(std::slice::from_ref(byte));
            let decoded = reader.next_message().unwrap();
            if i + 1 < bytes.len() {
                assert!(decoded.is_none(), "decoded early at byte {i}");
            } else {
                assert!(decoded.is_some());
            }
        }
    }

    #[test]
    fn multiple_messages_in_one_feed() {
        let first = Message::Ack { rid: 1 };
        let second = Message::SubCancelled { qid: 2 };
        let third = Message::ObjGone { qid: 3 };

        let mut bytes = encode(&first).unwrap();
        bytes.extend(encode(&second).unwrap());
        bytes.extend(encode(&third).unwrap());

        let mut reader = FrameReader::new();
        reader.feed(&bytes);
        assert_eq!(reader.next_message().unwrap(), Some(first));
        assert_eq!(reader.next_message().unwrap(), Some(second));
        assert_eq!(reader.next_message().unwrap(), Some(third));
        assert_eq!(reader.next_message().unwrap(), None);
    }

    #[test]
    fn message_followed_by_partial_tail() {
        let first = Message::Ack { rid: 1 };
        let second = encode(&Message::SubCancelled { qid: 2 }).unwrap();

        let mut bytes = encode(&first).unwrap();
        bytes.extend(&second[..second.len() - 1]);

        let mut reader = FrameReader::new();
        reader.feed(&bytes);
        assert_eq!(reader.next_message().unwrap(), Some(first));
        assert_eq!(reader.next_message().unwrap(), None);

        reader.feed(&second[second.len() - 1..]);
        assert_eq!(
            reader.next_message().unwrap(),
            Some(Message::SubCancelled { qid: 2 })
        );
    }

    #[test]
    fn unknown_discriminator_is_fatal() {
        let record = Value::Map(vec![(
            Value::from("object_type"),
            Value::from("frobnicate"),
        )]);
        let mut bytes = Vec::new();
        rmpv::encode::write_value(&mut bytes, &record).unwrap();

        let mut reader = FrameReader::new();
        reader.feed(&bytes);
        assert!(matches!(
            reader.next_message(),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn corrupt_marker_is_fatal() {
        let mut reader = FrameReader::new();
        // 0xc1 is the one marker msgpack never assigns.
        reader.feed(&[0xc1]);
        assert!(matches!(
            reader.next_message(),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn empty_buffer_needs_more_data() {
        let mut reader = FrameReader::new();
        assert!(reader.next_message().unwrap().is_none());
    }
}
