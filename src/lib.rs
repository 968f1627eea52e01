//! `revforest`: a revision-forest MVCC model and secondary-index subsystem
//! for a client-side replicable document store.
//!
//! Two halves, kept independent:
//!
//! * [`forest`] models a single document's revision history as a forest of
//!   trees (CouchDB/Cloudant-Sync style), with conflict detection and winner
//!   selection.
//! * [`index`] materializes secondary indexes over a [`index::DocumentStore`]
//!   of such documents into SQLite tables, refreshed incrementally and
//!   queried through a small covering-index planner.
//!
//! Both funnel their fallible paths through one [Error] type, constructed
//! with `err_at!`.

#[macro_use]
mod error;

pub mod forest;
pub mod index;
pub mod util;

pub use crate::error::{Error, Result};
