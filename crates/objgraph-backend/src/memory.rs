//! In-memory object-graph store.
//!
//! Keeps the whole graph in one mutex-guarded table and pushes change
//! notifications to registered watchers over unbounded channels. Watchers
//! whose receiving side has been dropped are pruned lazily on the next
//! notification pass.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use objgraph_proto::{NodeId, NodeSnapshot, Value};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{BackendError, BackendResult};
use crate::facade::{
    Backend, ConnectionId, CreateArgs, DataEvent, ListEvent, ListingSelector, NodeEvent,
};

/// In-memory [`Backend`] implementation.
#[derive(Default)]
pub struct MemoryBackend {
    inner: Mutex<Inner>,
    next_cid: AtomicU64,
}

#[derive(Default)]
struct Inner {
    nodes: HashMap<NodeId, NodeRecord>,
    roots: BTreeSet<NodeId>,
    connections: HashSet<ConnectionId>,
    node_watches: Vec<NodeWatch>,
    data_watches: Vec<DataWatch>,
    list_watches: Vec<ListWatch>,
}

struct NodeRecord {
    parent: Option<NodeId>,
    pos_start: Option<u64>,
    pos_end: Option<u64>,
    tags: BTreeSet<String>,
    attr: BTreeMap<String, Value>,
    data: BTreeMap<String, Value>,
    bindata: BTreeMap<String, Value>,
    children: BTreeSet<NodeId>,
}

impl NodeRecord {
    fn snapshot(&self, id: NodeId) -> NodeSnapshot {
        NodeSnapshot {
            id,
            parent: self.parent,
            pos_start: self.pos_start,
            pos_end: self.pos_end,
            tags: self.tags.clone(),
            attr: self.attr.clone(),
            data: self.data.keys().cloned().collect(),
            bindata: self.bindata.keys().cloned().collect(),
        }
    }
}

struct NodeWatch {
    id: NodeId,
    tx: mpsc::UnboundedSender<NodeEvent>,
}

struct DataWatch {
    id: NodeId,
    key: String,
    tx: mpsc::UnboundedSender<DataEvent>,
}

struct ListWatch {
    selector: ListingSelector,
    tx: mpsc::UnboundedSender<ListEvent>,
}

/// Point-in-time counters, mostly for tests and status logging.
///
/// Watch counts include channels whose receiver is gone but which no
/// notification pass has pruned yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendStats {
    pub connections: usize,
    pub nodes: usize,
    pub node_watches: usize,
    pub data_watches: usize,
    pub list_watches: usize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> BackendStats {
        let inner = self.lock();
        BackendStats {
            connections: inner.connections.len(),
            nodes: inner.nodes.len(),
            node_watches: inner.node_watches.len(),
            data_watches: inner.data_watches.len(),
            list_watches: inner.list_watches.len(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned store is unrecoverable either way.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Inner {
    fn record(&self, id: NodeId) -> BackendResult<&NodeRecord> {
        self.nodes.get(&id).ok_or_else(|| BackendError::not_found(id))
    }

    /// Children ids of a parent (`None` = top level).
    fn children_of(&self, parent: Option<NodeId>) -> BTreeSet<NodeId> {
        match parent {
            Some(p) => self
                .nodes
                .get(&p)
                .map(|rec| rec.children.clone())
                .unwrap_or_default(),
            None => self.roots.clone(),
        }
    }

    fn notify_node_changed(&mut self, snap: &NodeSnapshot) {
        let id = snap.id;
        self.node_watches.retain(|w| {
            if w.id != id {
                return !w.tx.is_closed();
            }
            w.tx.send(NodeEvent::Changed(snap.clone())).is_ok()
        });
    }

    fn notify_data_changed(&mut self, id: NodeId, key: &str, value: &Value) {
        self.data_watches.retain(|w| {
            if w.id != id || w.key != key {
                return !w.tx.is_closed();
            }
            w.tx.send(DataEvent::Changed(value.clone())).is_ok()
        });
    }

    fn notify_list_changed(&mut self, snap: &NodeSnapshot) {
        self.list_watches.retain(|w| {
            if !w.selector.matches(snap) {
                return !w.tx.is_closed();
            }
            w.tx.send(ListEvent::Changed {
                new: vec![snap.clone()],
                gone: vec![],
            })
            .is_ok()
        });
    }

    /// Fire every watcher affected by the deletion of one node, dropping
    /// the watchers that become terminal.
    fn notify_deleted(&mut self, snap: &NodeSnapshot) {
        let id = snap.id;
        self.node_watches.retain(|w| {
            if w.id != id {
                return !w.tx.is_closed();
            }
            let _ = w.tx.send(NodeEvent::Gone);
            false
        });
        self.data_watches.retain(|w| {
            if w.id != id {
                return !w.tx.is_closed();
            }
            let _ = w.tx.send(DataEvent::Gone);
            false
        });
        self.list_watches.retain(|w| {
            if w.selector.parent == Some(id) {
                let _ = w.tx.send(ListEvent::ParentGone);
                return false;
            }
            if w.selector.matches(snap) {
                return w
                    .tx
                    .send(ListEvent::Changed {
                        new: vec![],
                        gone: vec![id],
                    })
                    .is_ok();
            }
            !w.tx.is_closed()
        });
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn new_connection(&self) -> ConnectionId {
        let cid = self.next_cid.fetch_add(1, Ordering::Relaxed) + 1;
        self.lock().connections.insert(cid);
        debug!(cid, "connection registered");
        cid
    }

    fn remove_connection(&self, cid: ConnectionId) {
        let removed = self.lock().connections.remove(&cid);
        if removed {
            debug!(cid, "connection released");
        }
    }

    async fn create(&self, args: CreateArgs) -> BackendResult<()> {
        let mut inner = self.lock();
        if inner.nodes.contains_key(&args.id) {
            return Err(BackendError::exists(args.id));
        }
        if let Some(parent) = args.parent {
            inner.record(parent)?;
        }

        let record = NodeRecord {
            parent: args.parent,
            pos_start: args.pos_start,
            pos_end: args.pos_end,
            tags: args.tags,
            attr: args.attr,
            data: args.data,
            bindata: args.bindata,
            children: BTreeSet::new(),
        };
        let snap = record.snapshot(args.id);
        inner.nodes.insert(args.id, record);
        match args.parent {
            Some(parent) => {
                if let Some(rec) = inner.nodes.get_mut(&parent) {
                    rec.children.insert(args.id);
                }
            }
            None => {
                inner.roots.insert(args.id);
            }
        }
        inner.notify_list_changed(&snap);
        Ok(())
    }

    async fn delete(&self, id: NodeId) -> BackendResult<()> {
        let mut inner = self.lock();
        let parent = inner.record(id)?.parent;

        // Collect the subtree before unlinking anything.
        let mut doomed = vec![id];
        let mut i = 0;
        while i < doomed.len() {
            if let Some(rec) = inner.nodes.get(&doomed[i]) {
                doomed.extend(rec.children.iter().copied());
            }
            i += 1;
        }

        match parent {
            Some(p) => {
                if let Some(rec) = inner.nodes.get_mut(&p) {
                    rec.children.remove(&id);
                }
            }
            None => {
                inner.roots.remove(&id);
            }
        }

        let mut removed = Vec::with_capacity(doomed.len());
        for d in &doomed {
            if let Some(rec) = inner.nodes.remove(d) {
                removed.push(rec.snapshot(*d));
            }
        }
        for snap in &removed {
            inner.notify_deleted(snap);
        }
        Ok(())
    }

    async fn set_data(&self, id: NodeId, key: &str, value: Value) -> BackendResult<()> {
        let mut inner = self.lock();
        let record = inner
            .nodes
            .get_mut(&id)
            .ok_or_else(|| BackendError::not_found(id))?;
        if value == Value::Nil {
            record.data.remove(key);
        } else {
            record.data.insert(key.to_string(), value.clone());
        }
        let snap = record.snapshot(id);
        inner.notify_data_changed(id, key, &value);
        inner.notify_node_changed(&snap);
        Ok(())
    }

    async fn get(&self, id: NodeId) -> BackendResult<NodeSnapshot> {
        let inner = self.lock();
        Ok(inner.record(id)?.snapshot(id))
    }

    async fn get_data(&self, id: NodeId, key: &str) -> BackendResult<Value> {
        let inner = self.lock();
        let record = inner.record(id)?;
        Ok(record.data.get(key).cloned().unwrap_or(Value::Nil))
    }

    fn watch_node(&self, id: NodeId) -> mpsc::UnboundedReceiver<NodeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        if inner.nodes.contains_key(&id) {
            inner.node_watches.push(NodeWatch { id, tx });
        } else {
            let _ = tx.send(NodeEvent::Error(BackendError::not_found(id)));
        }
        rx
    }

    fn watch_data(&self, id: NodeId, key: &str) -> mpsc::UnboundedReceiver<DataEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        if inner.nodes.contains_key(&id) {
            inner.data_watches.push(DataWatch {
                id,
                key: key.to_string(),
                tx,
            });
        } else {
            let _ = tx.send(DataEvent::Error(BackendError::not_found(id)));
        }
        rx
    }

    fn watch_list(
        &self,
        selector: ListingSelector,
        subscribe: bool,
    ) -> mpsc::UnboundedReceiver<ListEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();

        if let Some(parent) = selector.parent {
            if !inner.nodes.contains_key(&parent) {
                let _ = tx.send(ListEvent::Error(BackendError::not_found(parent)));
                return rx;
            }
        }

        let initial: Vec<NodeSnapshot> = inner
            .children_of(selector.parent)
            .iter()
            .filter_map(|child| inner.nodes.get(child).map(|rec| rec.snapshot(*child)))
            .filter(|snap| selector.matches(snap))
            .collect();
        let _ = tx.send(ListEvent::Changed {
            new: initial,
            gone: vec![],
        });

        if subscribe {
            inner.list_watches.push(ListWatch { selector, tx });
        }
        rx
    }
}
