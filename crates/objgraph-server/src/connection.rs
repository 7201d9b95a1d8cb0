//! Per-connection dispatch engine.
//!
//! One [`run_connection`] call owns one transport: it feeds inbound bytes
//! through a [`FrameReader`], spawns an independent task per decoded
//! message, and serializes every reply and subscription push through a
//! single writer task. Handlers therefore interleave freely; registry
//! operations stay race-free because check-and-insert happens under one
//! lock with no await in between.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use objgraph_backend::{
    Backend, BackendError, BackendResult, ConnectionId, CreateArgs, ListEvent, ListingSelector,
};
use objgraph_proto::{encode, FrameReader, Message, NodeId};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{ConnectionError, ProtocolError};
use crate::registry::{SubKind, SubscriptionRegistry};
use crate::subscription;

const READ_CHUNK: usize = 8 * 1024;
const OUTBOUND_BUFFER: usize = 64;

/// Shared state of one client connection.
pub(crate) struct Connection {
    pub(crate) cid: ConnectionId,
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) subs: SubscriptionRegistry,
    outbound: mpsc::Sender<Message>,
    torn_down: AtomicBool,
}

impl Connection {
    /// Queue a message for the writer task. A closed channel means the
    /// transport is gone; the message is dropped silently.
    pub(crate) async fn send(&self, msg: Message) {
        if self.outbound.send(msg).await.is_err() {
            debug!(cid = self.cid, "reply dropped; transport is gone");
        }
    }

    pub(crate) async fn send_query_error(&self, qid: u64, err: BackendError) {
        self.send(Message::QueryError {
            qid,
            code: err.code,
            msg: err.msg,
        })
        .await;
    }

    async fn reply_request(&self, rid: u64, result: BackendResult<()>) {
        match result {
            Ok(()) => self.send(Message::Ack { rid }).await,
            Err(err) => {
                self.send(Message::RequestError {
                    rid,
                    code: err.code,
                    msg: err.msg,
                })
                .await
            }
        }
    }

    /// Cancel every subscription and release the connection identifier.
    /// Safe to call more than once.
    fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.subs.cancel_all();
        self.backend.remove_connection(self.cid);
    }
}

/// Serve one accepted transport until it closes or fails.
pub async fn run_connection<S>(stream: S, backend: Arc<dyn Backend>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let cid = backend.new_connection();
    info!(cid, "connection open");

    let (reader, writer) = tokio::io::split(stream);
    let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
    let conn = Arc::new(Connection {
        cid,
        backend,
        subs: SubscriptionRegistry::new(),
        outbound,
        torn_down: AtomicBool::new(false),
    });

    let writer_task = tokio::spawn(write_loop(writer, outbound_rx));

    match read_loop(&conn, reader).await {
        Ok(()) => info!(cid, "connection closed"),
        Err(ConnectionError::Io(err)) => debug!(cid, error = %err, "connection lost"),
        Err(ConnectionError::Codec(err)) => {
            warn!(cid, error = %err, "framing error; dropping connection")
        }
    }

    conn.teardown();
    writer_task.abort();
}

/// Drain the outbound queue onto the transport, one fully written message
/// at a time.
async fn write_loop<W>(mut writer: W, mut rx: mpsc::Receiver<Message>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(msg) = rx.recv().await {
        let bytes = match encode(&msg) {
            Ok(bytes) => bytes,
            Err(err) => {
                error!(error = %err, kind = msg.kind(), "failed to encode reply");
                continue;
            }
        };
        if writer.write_all(&bytes).await.is_err() || writer.flush().await.is_err() {
            break;
        }
    }
}

async fn read_loop<R>(conn: &Arc<Connection>, mut reader: R) -> Result<(), ConnectionError>
where
    R: AsyncRead + Unpin,
{
    let mut frames = FrameReader::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        frames.feed(&chunk[..n]);
        // Drain every complete message before reading again; one transport
        // read may carry several records.
        while let Some(msg) = frames.next_message()? {
            let conn = Arc::clone(conn);
            tokio::spawn(dispatch(conn, msg));
        }
    }
}

async fn dispatch(conn: Arc<Connection>, msg: Message) {
    let kind = msg.kind();
    debug!(cid = conn.cid, kind, "dispatching");
    if let Err(err) = handle(&conn, msg).await {
        debug!(cid = conn.cid, kind, code = %err.code, "protocol error");
        conn.send(err.into_reply()).await;
    }
}

async fn handle(conn: &Arc<Connection>, msg: Message) -> Result<(), ProtocolError> {
    match msg {
        Message::Create {
            rid,
            id,
            parent,
            pos_start,
            pos_end,
            tags,
            attr,
            data,
            bindata,
        } => {
            let result = conn
                .backend
                .create(CreateArgs {
                    id,
                    parent,
                    pos_start,
                    pos_end,
                    tags,
                    attr,
                    data,
                    bindata,
                })
                .await;
            conn.reply_request(rid, result).await;
            Ok(())
        }
        Message::Delete { rid, id } => {
            let result = conn.backend.delete(id).await;
            conn.reply_request(rid, result).await;
            Ok(())
        }
        Message::SetData { rid, id, key, data } => {
            let result = conn.backend.set_data(id, &key, data).await;
            conn.reply_request(rid, result).await;
            Ok(())
        }
        Message::Get { qid, id, sub } => msg_get(conn, qid, id, sub).await,
        Message::GetData { qid, id, key, sub } => msg_get_data(conn, qid, id, key, sub).await,
        Message::List {
            qid,
            parent,
            tags,
            pos_filter,
            sub,
        } => {
            let selector = ListingSelector {
                parent,
                tags,
                pos_filter,
            };
            msg_list(conn, qid, selector, sub).await
        }
        Message::Unsub { qid } => {
            conn.subs.cancel(qid);
            conn.send(Message::SubCancelled { qid }).await;
            Ok(())
        }
        other @ (Message::GetBin { .. }
        | Message::MthdRun { .. }
        | Message::MthdDone { .. }
        | Message::ProcDone { .. }
        | Message::MthdReg { .. }
        | Message::ProcReg { .. }) => Err(ProtocolError::not_supported(other.kind())),
        other => Err(ProtocolError::unexpected_message(other.kind())),
    }
}

async fn msg_get(
    conn: &Arc<Connection>,
    qid: u64,
    id: NodeId,
    sub: bool,
) -> Result<(), ProtocolError> {
    if sub {
        let events = conn.backend.watch_node(id);
        let (token, cancel) = conn.subs.register(qid, SubKind::Object)?;
        tokio::spawn(subscription::run_object(
            Arc::clone(conn),
            qid,
            token,
            events,
            cancel,
        ));
        return Ok(());
    }

    conn.subs.ensure_vacant(qid)?;
    match conn.backend.get(id).await {
        Ok(obj) => conn.send(Message::GetReply { qid, obj }).await,
        Err(err) => conn.send_query_error(qid, err).await,
    }
    Ok(())
}

async fn msg_get_data(
    conn: &Arc<Connection>,
    qid: u64,
    id: NodeId,
    key: String,
    sub: bool,
) -> Result<(), ProtocolError> {
    if sub {
        let events = conn.backend.watch_data(id, &key);
        let (token, cancel) = conn.subs.register(qid, SubKind::Data)?;
        tokio::spawn(subscription::run_data(
            Arc::clone(conn),
            qid,
            token,
            events,
            cancel,
        ));
        return Ok(());
    }

    conn.subs.ensure_vacant(qid)?;
    match conn.backend.get_data(id, &key).await {
        Ok(data) => conn.send(Message::GetDataReply { qid, data }).await,
        Err(err) => conn.send_query_error(qid, err).await,
    }
    Ok(())
}

async fn msg_list(
    conn: &Arc<Connection>,
    qid: u64,
    selector: ListingSelector,
    sub: bool,
) -> Result<(), ProtocolError> {
    if sub {
        // Registering before any await makes a concurrently arriving
        // duplicate qid lose deterministically.
        let events = conn.backend.watch_list(selector, true);
        let (token, cancel) = conn.subs.register(qid, SubKind::Listing)?;
        tokio::spawn(subscription::run_listing(
            Arc::clone(conn),
            qid,
            token,
            events,
            cancel,
        ));
        return Ok(());
    }

    conn.subs.ensure_vacant(qid)?;
    let mut events = conn.backend.watch_list(selector, false);
    while let Some(event) = events.recv().await {
        match event {
            ListEvent::Changed { new, gone } => {
                conn.send(Message::ListReply {
                    qid,
                    objs: new,
                    gone,
                })
                .await
            }
            ListEvent::ParentGone => {
                conn.send(Message::ObjGone { qid }).await;
                break;
            }
            ListEvent::Error(err) => conn.send_query_error(qid, err).await,
        }
    }
    Ok(())
}
