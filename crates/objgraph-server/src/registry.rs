//! Per-connection subscription registry.
//!
//! Maps client-chosen query identifiers to live subscriptions. Handlers for
//! one connection run as parallel tasks, so the duplicate check and the
//! insert happen under one lock acquisition; the lock is never held across
//! an await.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::debug;

use crate::error::ProtocolError;

/// Identity of one registration, distinct from its qid.
///
/// A qid can be reused after an unsubscribe; the token lets a subscription's
/// gone-path remove its own entry without clobbering an unrelated
/// registration that has since taken over the qid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SubToken(u64);

/// What a registry entry is subscribed to, for logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubKind {
    Object,
    Data,
    Listing,
}

impl SubKind {
    fn name(self) -> &'static str {
        match self {
            SubKind::Object => "object",
            SubKind::Data => "data",
            SubKind::Listing => "listing",
        }
    }
}

struct SubEntry {
    token: SubToken,
    kind: SubKind,
    cancel: oneshot::Sender<()>,
}

#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    entries: Mutex<HashMap<u64, SubEntry>>,
    next_token: AtomicU64,
}

impl SubscriptionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Atomically claim a qid for a new subscription.
    ///
    /// Returns the entry's token and the cancellation receiver its
    /// forwarding task must race against the event stream.
    pub(crate) fn register(
        &self,
        qid: u64,
        kind: SubKind,
    ) -> Result<(SubToken, oneshot::Receiver<()>), ProtocolError> {
        let mut entries = self.lock();
        if entries.contains_key(&qid) {
            return Err(ProtocolError::qid_in_use());
        }
        let token = SubToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        let (cancel_tx, cancel_rx) = oneshot::channel();
        entries.insert(
            qid,
            SubEntry {
                token,
                kind,
                cancel: cancel_tx,
            },
        );
        debug!(qid, kind = kind.name(), "subscription registered");
        Ok((token, cancel_rx))
    }

    /// Fail if the qid is bound to an active subscription.
    ///
    /// Used by one-shot queries, which share the identifier space but never
    /// occupy it.
    pub(crate) fn ensure_vacant(&self, qid: u64) -> Result<(), ProtocolError> {
        if self.lock().contains_key(&qid) {
            return Err(ProtocolError::qid_in_use());
        }
        Ok(())
    }

    /// Cancel and remove a subscription. No-op when the qid is absent.
    pub(crate) fn cancel(&self, qid: u64) -> bool {
        let entry = self.lock().remove(&qid);
        match entry {
            Some(entry) => {
                debug!(qid, kind = entry.kind.name(), "subscription cancelled");
                let _ = entry.cancel.send(());
                true
            }
            None => false,
        }
    }

    /// Cancel every subscription. Used at connection teardown; safe to call
    /// repeatedly.
    pub(crate) fn cancel_all(&self) {
        let drained: Vec<(u64, SubEntry)> = self.lock().drain().collect();
        for (qid, entry) in drained {
            debug!(qid, kind = entry.kind.name(), "subscription cancelled");
            let _ = entry.cancel.send(());
        }
    }

    /// Remove an entry only if it still belongs to the given registration.
    pub(crate) fn remove_if_current(&self, qid: u64, token: SubToken) {
        let mut entries = self.lock();
        if entries.get(&qid).is_some_and(|e| e.token == token) {
            entries.remove(&qid);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, SubEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
