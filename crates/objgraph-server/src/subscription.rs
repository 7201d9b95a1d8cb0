//! Subscription variants.
//!
//! Each variant is a forwarding task bound at spawn time to an immutable
//! qid, its registry token, the connection's outbound channel, and one
//! backend event stream. Cancellation is raced against the stream and wins
//! ties; it stops future pushes, not one already written out.

use std::sync::Arc;

use objgraph_backend::{DataEvent, ListEvent, NodeEvent};
use objgraph_proto::Message;
use tokio::sync::{mpsc, oneshot};

use crate::connection::Connection;
use crate::registry::SubToken;

/// Forward node changes as `get_reply` pushes.
pub(crate) async fn run_object(
    conn: Arc<Connection>,
    qid: u64,
    token: SubToken,
    mut events: mpsc::UnboundedReceiver<NodeEvent>,
    mut cancel: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut cancel => break,
            event = events.recv() => match event {
                Some(NodeEvent::Changed(obj)) => {
                    conn.send(Message::GetReply { qid, obj }).await;
                }
                Some(NodeEvent::Gone) => {
                    conn.subs.remove_if_current(qid, token);
                    conn.send(Message::ObjGone { qid }).await;
                    break;
                }
                Some(NodeEvent::Error(err)) => conn.send_query_error(qid, err).await,
                None => break,
            },
        }
    }
}

/// Forward data-slot changes as `get_data_reply` pushes.
pub(crate) async fn run_data(
    conn: Arc<Connection>,
    qid: u64,
    token: SubToken,
    mut events: mpsc::UnboundedReceiver<DataEvent>,
    mut cancel: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut cancel => break,
            event = events.recv() => match event {
                Some(DataEvent::Changed(data)) => {
                    conn.send(Message::GetDataReply { qid, data }).await;
                }
                Some(DataEvent::Gone) => {
                    conn.subs.remove_if_current(qid, token);
                    conn.send(Message::ObjGone { qid }).await;
                    break;
                }
                Some(DataEvent::Error(err)) => conn.send_query_error(qid, err).await,
                None => break,
            },
        }
    }
}

/// Forward listing diffs as `list_reply` pushes, starting with the initial
/// content.
pub(crate) async fn run_listing(
    conn: Arc<Connection>,
    qid: u64,
    token: SubToken,
    mut events: mpsc::UnboundedReceiver<ListEvent>,
    mut cancel: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut cancel => break,
            event = events.recv() => match event {
                Some(ListEvent::Changed { new, gone }) => {
                    conn.send(Message::ListReply { qid, objs: new, gone }).await;
                }
                Some(ListEvent::ParentGone) => {
                    conn.subs.remove_if_current(qid, token);
                    conn.send(Message::ObjGone { qid }).await;
                    break;
                }
                Some(ListEvent::Error(err)) => conn.send_query_error(qid, err).await,
                None => break,
            },
        }
    }
}
