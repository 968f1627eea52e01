//! [RevisionForest]: the MVCC ground truth for one document's history.

use std::collections::{BTreeSet, HashMap};

use crate::{
    forest::{Revision, RevisionNode},
    Error, Result,
};

/// All known revisions of one document, as a forest of trees.
///
/// Constructed empty, populated by ascending-generation `add` calls, then
/// queried read-only. Never mutated after the last insertion of a given
/// materialization — see the Design Notes on why winner selection doesn't
/// patch existing nodes in place.
#[derive(Clone, Debug)]
pub struct RevisionForest {
    doc_id: String,
    roots: BTreeSet<u64>,
    by_seq: HashMap<u64, RevisionNode>,
    leaves: BTreeSet<u64>,
}

impl RevisionForest {
    /// Start an empty forest for `doc_id`.
    pub fn new(doc_id: impl Into<String>) -> RevisionForest {
        RevisionForest {
            doc_id: doc_id.into(),
            roots: BTreeSet::new(),
            by_seq: HashMap::new(),
            leaves: BTreeSet::new(),
        }
    }

    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    /// Insert a new revision. The caller must feed strictly new sequences in
    /// ascending-generation order; this is not idempotent.
    pub fn add(&mut self, revision: Revision) -> Result<&mut Self> {
        let seq = revision.sequence;
        if self.by_seq.contains_key(&seq) {
            err_at!(
                AlreadyPresent,
                msg: "sequence {} already present in forest for {:?}", seq, self.doc_id
            )?;
        }

        if revision.is_root() {
            log::debug!(target: "rforest", "{:?} add root seq={}", self.doc_id, seq);
            self.by_seq.insert(seq, RevisionNode::new(revision));
            self.roots.insert(seq);
            self.leaves.insert(seq);
        } else {
            let parent_seq = revision.parent_seq as u64;
            if !self.by_seq.contains_key(&parent_seq) {
                err_at!(
                    OrphanRevision,
                    msg: "parent seq {} for seq {} not in forest for {:?}",
                    parent_seq, seq, self.doc_id
                )?;
            }

            log::debug!(
                target: "rforest", "{:?} add seq={} parent={}", self.doc_id, seq, parent_seq
            );
            self.by_seq.insert(seq, RevisionNode::new(revision));
            self.by_seq.get_mut(&parent_seq).unwrap().add_child(seq);
            self.leaves.remove(&parent_seq);
            self.leaves.insert(seq);
        }

        Ok(self)
    }

    /// Linear scan of `by_seq` for a `(docId, revId)` pair. Callers supply
    /// both because a forest may hold nodes sharing `doc_id` but not
    /// `rev_id` (the expected case, since this forest is scoped to one
    /// document already — `doc_id` here is mostly a sanity check).
    pub fn lookup(&self, doc_id: &str, rev_id: &str) -> Option<&Revision> {
        self.by_seq
            .values()
            .map(|node| &node.revision)
            .find(|rev| rev.doc_id == doc_id && rev.rev_id == rev_id)
    }

    pub fn by_sequence(&self, seq: u64) -> Option<&Revision> {
        self.by_seq.get(&seq).map(|node| &node.revision)
    }

    /// 0 for a root, `-1` if `seq` is absent, otherwise the length of the
    /// chain from `seq` up to (not including) its containing root.
    pub fn depth(&self, seq: u64) -> i64 {
        let mut node = match self.by_seq.get(&seq) {
            Some(node) => node,
            None => return -1,
        };
        let mut depth = 0i64;
        while !node.revision.is_root() {
            let parent_seq = node.revision.parent_seq as u64;
            node = self.by_seq.get(&parent_seq).expect("parent must exist");
            depth += 1;
        }
        depth
    }

    /// Look up a child of `parent_seq` by its revision id. Fails
    /// `NotInTree` if the parent itself is absent.
    pub fn lookup_child_by_rev_id(&self, parent_seq: u64, child_rev_id: &str) -> Result<Option<&Revision>> {
        let parent = match self.by_seq.get(&parent_seq) {
            Some(parent) => parent,
            None => err_at!(
                NotInTree, msg: "parent seq {} not in forest for {:?}", parent_seq, self.doc_id
            )?,
        };

        Ok(parent
            .children()
            .iter()
            .filter_map(|seq| self.by_seq.get(seq))
            .map(|node| &node.revision)
            .find(|rev| rev.rev_id == child_rev_id))
    }

    /// Leaf nodes, ascending by sequence.
    pub fn leaves(&self) -> Vec<&RevisionNode> {
        self.leaves
            .iter()
            .filter_map(|seq| self.by_seq.get(seq))
            .collect()
    }

    pub fn leaf_revisions(&self) -> Vec<&Revision> {
        self.leaves().into_iter().map(|node| &node.revision).collect()
    }

    pub fn leaf_revision_ids(&self) -> Vec<String> {
        self.leaf_revisions()
            .into_iter()
            .map(|rev| rev.rev_id.clone())
            .collect()
    }

    /// `true` iff at least two leaves are non-deleted.
    pub fn has_conflicts(&self) -> bool {
        self.leaf_revisions()
            .into_iter()
            .filter(|rev| !rev.deleted)
            .count()
            >= 2
    }

    /// The leaf flagged `current = true`. Fails `NoCurrent` if no leaf
    /// carries the flag — this is a thin accessor over whatever an external
    /// winner-picking policy set, not a computation. See `winner()` for the
    /// always-succeeding alternative.
    pub fn get_current_revision(&self) -> Result<&Revision> {
        match self.leaf_revisions().into_iter().find(|rev| rev.current) {
            Some(rev) => Ok(rev),
            None => err_at!(NoCurrent, msg: "no current revision for {:?}", self.doc_id)?,
        }
    }

    /// The revision this forest would pick as the document's winner:
    /// whichever leaf carries `current = true`, falling back — if none
    /// does — to the highest-generation non-deleted leaf (tie-broken
    /// lexicographically descending on revision id). Fails `NoCurrent` only
    /// when every leaf is deleted (the document is a tombstone) or the
    /// forest is empty.
    pub fn winner(&self) -> Result<&Revision> {
        if let Ok(rev) = self.get_current_revision() {
            return Ok(rev);
        }

        self.leaf_revisions()
            .into_iter()
            .filter(|rev| !rev.deleted)
            .max()
            .ok_or_else(|| Error::NoCurrent(
                "forest/tree.rs".to_string(),
                format!("no non-deleted leaf for {:?}", self.doc_id),
            ))
    }

    /// Revisions from `seq` up to (and including) its containing root,
    /// leaf-first.
    pub fn get_path_for_node(&self, seq: u64) -> Result<Vec<&Revision>> {
        let mut node = match self.by_seq.get(&seq) {
            Some(node) => node,
            None => err_at!(NotInTree, msg: "seq {} not in forest for {:?}", seq, self.doc_id)?,
        };

        let mut path = vec![&node.revision];
        while !node.revision.is_root() {
            let parent_seq = node.revision.parent_seq as u64;
            node = self.by_seq.get(&parent_seq).expect("parent must exist");
            path.push(&node.revision);
        }
        Ok(path)
    }

    pub fn get_path(&self, seq: u64) -> Result<Vec<String>> {
        Ok(self
            .get_path_for_node(seq)?
            .into_iter()
            .map(|rev| rev.rev_id.clone())
            .collect())
    }

    pub fn roots(&self) -> impl Iterator<Item = u64> + '_ {
        self.roots.iter().copied()
    }
}

#[cfg(test)]
mod tree_test;
