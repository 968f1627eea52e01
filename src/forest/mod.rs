//! The revision-forest model: per-document MVCC history as a forest of
//! trees, the ground truth for conflict detection, replication exchange, and
//! winner selection.

mod node;
mod revision;
mod tree;

pub use node::RevisionNode;
pub use revision::Revision;
pub use tree::RevisionForest;
