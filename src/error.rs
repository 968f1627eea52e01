//! Crate-wide error type and the `err_at!` construction macro.
//!
//! Every fallible path in this crate, from forest-invariant violations to
//! SQLite failures, is funneled through a single [Error] enum so that callers
//! never have to match on more than one error hierarchy. Each variant carries
//! a `file:line` provenance prefix (filled in by `err_at!`) and a formatted
//! message.

use std::{fmt, result};

/// Convenience alias, used throughout this crate instead of
/// `std::result::Result`.
pub type Result<T> = result::Result<T, Error>;

/// Construct or convert into an [Error], stamping the call site.
///
/// Three forms:
///
/// * `err_at!(Kind, msg: "fmt", args...)` builds `Err(Error::Kind(prefix, msg))`
///   directly.
/// * `err_at!(Kind, fallible_expr)` runs `fallible_expr` (any `Result<T, E>`
///   with `E: fmt::Display`) and, on `Err`, wraps it as `Error::Kind`.
/// * `err_at!(Kind)` builds an empty-message `Error::Kind` for match arms that
///   only need a sentinel.
#[macro_export]
macro_rules! err_at {
    ($v:ident) => {{
        let prefix = format!("{}:{}", file!(), line!());
        Err($crate::Error::$v(prefix, String::new()))
    }};
    ($v:ident, msg: $($arg:expr),+ $(,)?) => {{
        let prefix = format!("{}:{}", file!(), line!());
        Err($crate::Error::$v(prefix, format!($($arg),+)))
    }};
    ($v:ident, $e:expr) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                Err($crate::Error::$v(prefix, format!("{}", err)))
            }
        }
    }};
}

/// Crate-wide error type.
///
/// Every variant is `(provenance, message)`, `provenance` being the
/// `file:line` of the `err_at!` call site that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Null/empty index name, malformed field name, duplicate field, or
    /// `tokenize` set on a `json` index.
    InvalidArgument(String, String),
    /// `RevisionForest::add` given a revision whose parent sequence is
    /// missing from the forest.
    OrphanRevision(String, String),
    /// `RevisionForest::add` given a sequence already present in the forest.
    AlreadyPresent(String, String),
    /// Lookup (path, child-by-rev-id, ...) against a sequence absent from
    /// the forest.
    NotInTree(String, String),
    /// `getCurrentRevision` called on a forest with no leaf flagged current.
    NoCurrent(String, String),
    /// `ensureIndexed` name collision with a differently-shaped definition.
    IndexExists(String, String),
    /// A `text` index was requested but FTS is unavailable on this engine.
    TextSearchUnavailable(String, String),
    /// A storage-engine error surfaced while creating, dropping, or updating
    /// an index.
    IndexOpFailed(String, String),
    /// No index covers the fields referenced by a query.
    NoUsableIndex(String, String),
    /// Malformed query AST.
    InvalidQuery(String, String),
    /// The single-writer queue was interrupted before a submission could
    /// complete.
    Interrupted(String, String),
    /// A submission to the single-writer queue ran but its worker thread
    /// terminated abnormally.
    ExecutionFailed(String, String),
    /// A numeric/type conversion failed.
    FailConvert(String, String),
    /// A filesystem operation failed.
    IOError(String, String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Error::*;

        match self {
            InvalidArgument(p, m) => write!(f, "{} InvalidArgument: {}", p, m),
            OrphanRevision(p, m) => write!(f, "{} OrphanRevision: {}", p, m),
            AlreadyPresent(p, m) => write!(f, "{} AlreadyPresent: {}", p, m),
            NotInTree(p, m) => write!(f, "{} NotInTree: {}", p, m),
            NoCurrent(p, m) => write!(f, "{} NoCurrent: {}", p, m),
            IndexExists(p, m) => write!(f, "{} IndexExists: {}", p, m),
            TextSearchUnavailable(p, m) => write!(f, "{} TextSearchUnavailable: {}", p, m),
            IndexOpFailed(p, m) => write!(f, "{} IndexOpFailed: {}", p, m),
            NoUsableIndex(p, m) => write!(f, "{} NoUsableIndex: {}", p, m),
            InvalidQuery(p, m) => write!(f, "{} InvalidQuery: {}", p, m),
            Interrupted(p, m) => write!(f, "{} Interrupted: {}", p, m),
            ExecutionFailed(p, m) => write!(f, "{} ExecutionFailed: {}", p, m),
            FailConvert(p, m) => write!(f, "{} FailConvert: {}", p, m),
            IOError(p, m) => write!(f, "{} IOError: {}", p, m),
        }
    }
}

impl std::error::Error for Error {}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Error {
        Error::IndexOpFailed("sqlite".to_string(), format!("{}", err))
    }
}
