//! [Revision], the immutable unit of history the forest is built from.

use std::cmp::Ordering;

use crate::Result;

/// One version of a document.
///
/// Immutable once constructed — the forest never mutates a `Revision` in
/// place, it only ever inserts new ones (see `RevisionForest::add`).
#[derive(Clone, Debug, PartialEq)]
pub struct Revision {
    pub doc_id: String,
    pub rev_id: String,
    pub generation: u64,
    /// Non-positive means this revision is a root of its tree.
    pub parent_seq: i64,
    pub sequence: u64,
    pub deleted: bool,
    /// At most one revision per document carries `current = true` in a
    /// well-formed forest.
    pub current: bool,
    pub body: serde_json::Value,
}

impl Revision {
    /// Build a new revision, deriving `generation` from the `<gen>-<opaque>`
    /// prefix of `rev_id`.
    pub fn new(
        doc_id: impl Into<String>,
        rev_id: impl Into<String>,
        parent_seq: i64,
        sequence: u64,
        deleted: bool,
        current: bool,
        body: serde_json::Value,
    ) -> Result<Revision> {
        let rev_id = rev_id.into();
        let generation = parse_generation(&rev_id)?;

        Ok(Revision {
            doc_id: doc_id.into(),
            rev_id,
            generation,
            parent_seq,
            sequence,
            deleted,
            current,
            body,
        })
    }

    pub fn is_root(&self) -> bool {
        self.parent_seq <= 0
    }
}

/// Natural order over revisions: by generation, then revision id
/// lexicographically. Used to tie-break winner selection when more than one
/// non-deleted leaf shares the highest generation.
impl Eq for Revision {}

impl PartialOrd for Revision {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Revision {
    fn cmp(&self, other: &Self) -> Ordering {
        self.generation
            .cmp(&other.generation)
            .then_with(|| self.rev_id.cmp(&other.rev_id))
    }
}

fn parse_generation(rev_id: &str) -> Result<u64> {
    let prefix = match rev_id.split_once('-') {
        Some((prefix, _)) => prefix,
        None => err_at!(InvalidArgument, msg: "revision id {:?} missing '-' separator", rev_id)?,
    };
    match prefix.parse::<u64>() {
        Ok(0) => err_at!(InvalidArgument, msg: "revision id {:?} has generation 0", rev_id),
        Ok(gen) => Ok(gen),
        Err(_) => err_at!(InvalidArgument, msg: "revision id {:?} has non-numeric generation", rev_id),
    }
}

#[cfg(test)]
mod revision_test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_parses_generation() {
        let rev = Revision::new("doc1", "3-cafe", 2, 3, false, true, json!({})).unwrap();
        assert_eq!(rev.generation, 3);
        assert_eq!(rev.rev_id, "3-cafe");
    }

    #[test]
    fn test_new_rejects_malformed_rev_id() {
        assert!(Revision::new("doc1", "nogen", 0, 1, false, false, json!({})).is_err());
        assert!(Revision::new("doc1", "0-cafe", 0, 1, false, false, json!({})).is_err());
        assert!(Revision::new("doc1", "x-cafe", 0, 1, false, false, json!({})).is_err());
    }

    #[test]
    fn test_is_root() {
        let rev = Revision::new("doc1", "1-a", 0, 1, false, false, json!({})).unwrap();
        assert!(rev.is_root());
        let rev = Revision::new("doc1", "2-b", 1, 2, false, false, json!({})).unwrap();
        assert!(!rev.is_root());
    }

    #[test]
    fn test_ord_by_generation_then_rev_id() {
        let a = Revision::new("doc1", "2-b", 1, 2, false, false, json!({})).unwrap();
        let b = Revision::new("doc1", "2-a", 1, 2, false, false, json!({})).unwrap();
        let c = Revision::new("doc1", "3-a", 1, 3, false, false, json!({})).unwrap();
        assert!(b < a);
        assert!(a < c);
    }
}
