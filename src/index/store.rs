//! The `DocumentStore` trait: this crate's boundary to the out-of-scope
//! persistent document body store, plus an in-memory reference
//! implementation used only by tests.

use std::{
    collections::HashMap,
    sync::{mpsc, Mutex},
};

use crate::forest::{Revision, RevisionForest};

/// One document touched since some previously-observed sequence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentChange {
    pub doc_id: String,
    pub sequence: u64,
}

/// Payload of a purge notification from the document store's event bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PurgeEvent {
    pub doc_id: String,
    pub purged_rev_ids: Vec<String>,
}

/// A receiver end for purge notifications. A bounded channel, matching the
/// gen-server channel pattern used by the rest of this codebase's
/// inter-thread plumbing.
pub struct PurgeSubscription {
    rx: mpsc::Receiver<PurgeEvent>,
}

impl PurgeSubscription {
    pub fn try_recv(&self) -> Option<PurgeEvent> {
        self.rx.try_recv().ok()
    }
}

/// The document-store collaborator this crate depends on but doesn't
/// implement: sequence-ordered revision iteration, body lookup by
/// `(docId, revId)`, and an event bus for purge notifications.
pub trait DocumentStore: Send + Sync {
    /// The store's global high-water sequence.
    fn current_sequence(&self) -> u64;

    /// Ascending-sequence change feed since (exclusive) `seq`. A document
    /// with several new revisions since `seq` appears once, at its highest
    /// new sequence.
    fn changes_since(&self, seq: u64) -> Vec<DocumentChange>;

    /// Materialize the full revision forest for `doc_id`, or `None` if the
    /// document is unknown.
    fn load_forest(&self, doc_id: &str) -> Option<RevisionForest>;

    /// Point lookup used by the query executor's final join back to the
    /// document store.
    fn body(&self, doc_id: &str, rev_id: &str) -> Option<serde_json::Value>;

    /// Register for purge notifications.
    fn subscribe_purge(&self) -> PurgeSubscription;
}

/// An in-memory `DocumentStore`, used only under `#[cfg(test)]` — not a
/// production body store. Each call to `put` appends a revision to the
/// named document's forest, assigning it the store's next global sequence.
#[derive(Default)]
pub struct MemoryDocumentStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    seqno: u64,
    forests: HashMap<String, RevisionForest>,
    purge_txs: Vec<mpsc::Sender<PurgeEvent>>,
}

impl MemoryDocumentStore {
    pub fn new() -> MemoryDocumentStore {
        MemoryDocumentStore::default()
    }

    /// Insert a revision, auto-assigning the next global sequence number.
    /// Returns the assigned sequence.
    pub fn put(
        &self,
        doc_id: &str,
        rev_id: &str,
        parent_seq: i64,
        deleted: bool,
        current: bool,
        body: serde_json::Value,
    ) -> crate::Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        inner.seqno += 1;
        let seq = inner.seqno;

        let revision = Revision::new(doc_id, rev_id, parent_seq, seq, deleted, current, body)?;
        inner
            .forests
            .entry(doc_id.to_string())
            .or_insert_with(|| RevisionForest::new(doc_id))
            .add(revision)?;

        Ok(seq)
    }

    /// Simulate a purge: drop the document's forest entirely and notify
    /// subscribers.
    pub fn purge(&self, doc_id: &str, purged_rev_ids: Vec<String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.forests.remove(doc_id);
        let event = PurgeEvent {
            doc_id: doc_id.to_string(),
            purged_rev_ids,
        };
        inner.purge_txs.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn current_sequence(&self) -> u64 {
        self.inner.lock().unwrap().seqno
    }

    fn changes_since(&self, seq: u64) -> Vec<DocumentChange> {
        let inner = self.inner.lock().unwrap();
        let mut changes: Vec<DocumentChange> = inner
            .forests
            .values()
            .filter_map(|forest| {
                // every inserted revision either becomes a leaf or is
                // superseded by one with a higher sequence, so scanning
                // leaves alone is enough to find the highest touched
                // sequence.
                let highest = forest.leaf_revisions().into_iter().map(|rev| rev.sequence).max()?;
                if highest > seq {
                    Some(DocumentChange {
                        doc_id: forest.doc_id().to_string(),
                        sequence: highest,
                    })
                } else {
                    None
                }
            })
            .collect();
        changes.sort_by_key(|c| c.sequence);
        changes
    }

    fn load_forest(&self, doc_id: &str) -> Option<RevisionForest> {
        self.inner.lock().unwrap().forests.get(doc_id).cloned()
    }

    fn body(&self, doc_id: &str, rev_id: &str) -> Option<serde_json::Value> {
        self.inner
            .lock()
            .unwrap()
            .forests
            .get(doc_id)
            .and_then(|forest| forest.lookup(doc_id, rev_id))
            .map(|rev| rev.body.clone())
    }

    fn subscribe_purge(&self) -> PurgeSubscription {
        let (tx, rx) = mpsc::channel();
        self.inner.lock().unwrap().purge_txs.push(tx);
        PurgeSubscription { rx }
    }
}

#[cfg(test)]
mod store_test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_put_assigns_ascending_sequence() {
        let store = MemoryDocumentStore::new();
        let s1 = store.put("doc1", "1-a", 0, false, true, json!({"a": 1})).unwrap();
        let s2 = store.put("doc2", "1-a", 0, false, true, json!({"a": 2})).unwrap();
        assert_eq!(s1, 1);
        assert_eq!(s2, 2);
        assert_eq!(store.current_sequence(), 2);
    }

    #[test]
    fn test_changes_since_reports_highest_sequence_per_doc() {
        let store = MemoryDocumentStore::new();
        store.put("doc1", "1-a", 0, false, false, json!({})).unwrap();
        store.put("doc1", "2-b", 1, false, true, json!({})).unwrap();
        store.put("doc2", "1-a", 0, false, true, json!({})).unwrap();

        let changes = store.changes_since(0);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].doc_id, "doc1");
        assert_eq!(changes[0].sequence, 2);
        assert_eq!(changes[1].doc_id, "doc2");
        assert_eq!(changes[1].sequence, 3);

        assert!(store.changes_since(3).is_empty());
    }

    #[test]
    fn test_purge_removes_forest_and_notifies() {
        let store = MemoryDocumentStore::new();
        store.put("doc1", "1-a", 0, false, true, json!({})).unwrap();
        let sub = store.subscribe_purge();

        store.purge("doc1", vec!["1-a".to_string()]);

        assert!(store.load_forest("doc1").is_none());
        let event = sub.try_recv().unwrap();
        assert_eq!(event.doc_id, "doc1");
        assert_eq!(event.purged_rev_ids, vec!["1-a".to_string()]);
    }
}
