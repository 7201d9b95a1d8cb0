//! Backend facade consumed by the protocol layer.
//!
//! The facade is shared by every connection (`Arc<dyn Backend>`). Mutating
//! and reading operations are async and may fail with a [`BackendError`];
//! the `watch_*` operations register push listeners synchronously, with no
//! suspension point, which the protocol layer relies on for race-free
//! subscription registration.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use objgraph_proto::{NodeId, NodeSnapshot, PosFilter, Value};
use tokio::sync::mpsc;

use crate::error::{BackendError, BackendResult};

/// Process-scoped identifier handed to each accepted connection.
pub type ConnectionId = u64;

/// Arguments to [`Backend::create`].
#[derive(Debug, Clone, Default)]
pub struct CreateArgs {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub pos_start: Option<u64>,
    pub pos_end: Option<u64>,
    pub tags: BTreeSet<String>,
    pub attr: BTreeMap<String, Value>,
    pub data: BTreeMap<String, Value>,
    pub bindata: BTreeMap<String, Value>,
}

/// What a filtered child listing tracks: a parent (`None` for top-level
/// nodes), a tag set every child must carry, and optional position bounds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingSelector {
    pub parent: Option<NodeId>,
    pub tags: BTreeSet<String>,
    pub pos_filter: Option<PosFilter>,
}

impl ListingSelector {
    /// Whether a node belongs to this listing.
    ///
    /// A position bound only admits nodes that actually carry the
    /// corresponding position.
    pub fn matches(&self, node: &NodeSnapshot) -> bool {
        if node.parent != self.parent {
            return false;
        }
        if !self.tags.is_subset(&node.tags) {
            return false;
        }
        match &self.pos_filter {
            None => true,
            Some(filter) => {
                in_bounds(node.pos_start, filter.start_from, filter.start_to)
                    && in_bounds(node.pos_end, filter.end_from, filter.end_to)
            }
        }
    }
}

fn in_bounds(pos: Option<u64>, from: Option<u64>, to: Option<u64>) -> bool {
    if from.is_none() && to.is_none() {
        return true;
    }
    let Some(pos) = pos else { return false };
    from.is_none_or(|f| pos >= f) && to.is_none_or(|t| pos < t)
}

/// Push events for one watched node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    /// The node's state changed; carries the fresh snapshot.
    Changed(NodeSnapshot),
    /// The node was deleted. Terminal.
    Gone,
    /// The backend reported a failure for this watch.
    Error(BackendError),
}

/// Push events for one watched (node, key) data slot.
#[derive(Debug, Clone, PartialEq)]
pub enum DataEvent {
    Changed(Value),
    Gone,
    Error(BackendError),
}

/// Push events for one watched listing.
#[derive(Debug, Clone, PartialEq)]
pub enum ListEvent {
    /// Incremental diff: nodes now visible (new or changed) and identifiers
    /// of nodes no longer visible.
    Changed {
        new: Vec<NodeSnapshot>,
        gone: Vec<NodeId>,
    },
    /// The listed parent was deleted. Terminal.
    ParentGone,
    Error(BackendError),
}

/// The object-graph service, as seen by the protocol layer.
///
/// Dropping a `watch_*` receiver releases the backend-side listener; the
/// backend prunes closed channels lazily and never errors on them.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Allocate an identifier for a newly accepted connection.
    fn new_connection(&self) -> ConnectionId;

    /// Release a connection identifier. Idempotent.
    fn remove_connection(&self, cid: ConnectionId);

    async fn create(&self, args: CreateArgs) -> BackendResult<()>;

    /// Delete a node and, recursively, its subtree.
    async fn delete(&self, id: NodeId) -> BackendResult<()>;

    /// Set one data slot. A nil value clears the slot.
    async fn set_data(&self, id: NodeId, key: &str, value: Value) -> BackendResult<()>;

    async fn get(&self, id: NodeId) -> BackendResult<NodeSnapshot>;

    /// Read one data slot; an unset slot reads as nil.
    async fn get_data(&self, id: NodeId, key: &str) -> BackendResult<Value>;

    /// Watch a node for changes. No initial event is delivered; a missing
    /// node yields one `Error` and a closed channel.
    fn watch_node(&self, id: NodeId) -> mpsc::UnboundedReceiver<NodeEvent>;

    /// Watch one data slot for changes. Same initial-event contract as
    /// [`watch_node`](Self::watch_node).
    fn watch_data(&self, id: NodeId, key: &str) -> mpsc::UnboundedReceiver<DataEvent>;

    /// Start a listing. The initial content always arrives as the first
    /// `Changed` event; with `subscribe: false` the channel closes right
    /// after it.
    fn watch_list(
        &self,
        selector: ListingSelector,
        subscribe: bool,
    ) -> mpsc::UnboundedReceiver<ListEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(parent: Option<NodeId>, tags: &[&str], pos: Option<(u64, u64)>) -> NodeSnapshot {
        NodeSnapshot {
            id: NodeId::new(),
            parent,
            pos_start: pos.map(|p| p.0),
            pos_end: pos.map(|p| p.1),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            attr: BTreeMap::new(),
            data: BTreeSet::new(),
            bindata: BTreeSet::new(),
        }
    }

    #[test]
    fn selector_requires_matching_parent() {
        let parent = NodeId::new();
        let sel = ListingSelector {
            parent: Some(parent),
            ..ListingSelector::default()
        };
        assert!(sel.matches(&node(Some(parent), &[], None)));
        assert!(!sel.matches(&node(None, &[], None)));
        assert!(!sel.matches(&node(Some(NodeId::new()), &[], None)));
    }

    #[test]
    fn selector_tags_are_a_required_subset() {
        let sel = ListingSelector {
            tags: BTreeSet::from(["a".to_string(), "b".to_string()]),
            ..ListingSelector::default()
        };
        assert!(sel.matches(&node(None, &["a", "b", "c"], None)));
        assert!(!sel.matches(&node(None, &["a"], None)));
    }

    #[test]
    fn pos_bounds_are_half_open() {
        let sel = ListingSelector {
            pos_filter: Some(PosFilter {
                start_from: Some(10),
                start_to: Some(20),
                ..PosFilter::default()
            }),
            ..ListingSelector::default()
        };
        assert!(sel.matches(&node(None, &[], Some((10, 99)))));
        assert!(sel.matches(&node(None, &[], Some((19, 99)))));
        assert!(!sel.matches(&node(None, &[], Some((20, 99)))));
        assert!(!sel.matches(&node(None, &[], Some((9, 99)))));
    }

    #[test]
    fn bounded_filter_rejects_positionless_nodes() {
        let sel = ListingSelector {
            pos_filter: Some(PosFilter {
                start_from: Some(0),
                ..PosFilter::default()
            }),
            ..ListingSelector::default()
        };
        assert!(!sel.matches(&node(None, &[], None)));
    }

    #[test]
    fn empty_filter_admits_positionless_nodes() {
        let sel = ListingSelector {
            pos_filter: Some(PosFilter::default()),
            ..ListingSelector::default()
        };
        assert!(sel.matches(&node(None, &[], None)));
    }
}
