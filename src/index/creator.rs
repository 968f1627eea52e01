//! `IndexCreator`: the `ensureIndexed` state machine — validate, normalize
//! the name, check for an existing definition, then create the physical
//! table and seed its metadata rows.

use std::collections::HashSet;

use rusqlite::params;

use crate::{
    index::{
        config::IndexManagerConfig,
        metadata::{self, validate_identifier, FieldSpec, IndexDefinition, IndexKind, IndexSettings},
        queue::SqliteQueue,
    },
    util::hash::derive_index_name,
    Result,
};

pub struct IndexCreator<'a> {
    queue: &'a SqliteQueue,
    config: &'a IndexManagerConfig,
    metadata_table: String,
}

impl<'a> IndexCreator<'a> {
    pub fn new(queue: &'a SqliteQueue, config: &'a IndexManagerConfig, metadata_table: impl Into<String>) -> Self {
        IndexCreator {
            queue,
            config,
            metadata_table: metadata_table.into(),
        }
    }

    /// Run the five-step protocol and return the index's final name. Steps
    /// 1-4 only — the caller (`IndexManager`) is responsible for triggering
    /// the initial update pass (step 5) once this returns, so that
    /// `IndexCreator` doesn't need to know about `IndexUpdater`.
    pub fn ensure_indexed(
        &self,
        fields: Vec<FieldSpec>,
        name: Option<String>,
        kind: IndexKind,
        tokenize: Option<String>,
        fts_enabled: bool,
    ) -> Result<String> {
        if kind == IndexKind::Json && tokenize.is_some() {
            err_at!(InvalidArgument, msg: "tokenize is only valid for text indexes")?;
        }
        if fields.is_empty() {
            err_at!(InvalidArgument, msg: "ensureIndexed requires at least one field")?;
        }

        let mut seen = HashSet::new();
        for field in &fields {
            validate_identifier("field name", field.column_name())?;
            if !seen.insert(field.column_name().to_string()) {
                err_at!(InvalidArgument, msg: "duplicate field {:?}", field.column_name())?;
            }
        }

        let name = match name {
            Some(n) => {
                validate_identifier("index name", &n)?;
                n
            }
            None => {
                let paths: Vec<String> = fields.iter().map(|f| f.path.clone()).collect();
                derive_index_name(&paths, kind.as_str(), tokenize.as_deref())
            }
        };

        if let Some(existing) = self.lookup_definition(&name)? {
            if existing.same_shape(kind, &fields, tokenize.as_deref()) {
                log::debug!(target: "imgr  ", "ensureIndexed {:?} already present, no-op", name);
                return Ok(name);
            }
            err_at!(
                IndexExists,
                msg: "index {:?} already exists with a different definition", name
            )?;
        }

        if kind == IndexKind::Text && !fts_enabled {
            err_at!(
                TextSearchUnavailable,
                msg: "text index {:?} requested but FTS is unavailable", name
            )?;
        }

        self.create_physical(&name, kind, &fields, tokenize.as_deref())?;
        log::info!(target: "imgr  ", "created index {:?} ({} fields, kind={:?})", name, fields.len(), kind);

        Ok(name)
    }

    fn lookup_definition(&self, name: &str) -> Result<Option<IndexDefinition>> {
        let table = self.metadata_table.clone();
        let name = name.to_string();
        self.queue.submit(move |conn| metadata::read_definition(conn, &table, &name))
    }

    fn create_physical(&self, name: &str, kind: IndexKind, fields: &[FieldSpec], tokenize: Option<&str>) -> Result<()> {
        let table = self.config.table_name(name);
        let metadata_table = self.metadata_table.clone();
        let name = name.to_string();
        let field_cols: Vec<String> = fields.iter().map(|f| f.column_name().to_string()).collect();
        let tokenize = tokenize.map(|s| s.to_string());
        let settings_json = serde_json::to_string(&IndexSettings {
            tokenize: tokenize.clone(),
        })
        .expect("IndexSettings always serializes");

        self.queue.submit(move |conn| {
            let tx = conn.unchecked_transaction()?;

            match kind {
                IndexKind::Json => {
                    let cols = field_cols
                        .iter()
                        .map(|c| format!("\"{}\" TEXT", c))
                        .collect::<Vec<_>>()
                        .join(", ");
                    let covered = std::iter::once("_id".to_string())
                        .chain(std::iter::once("_rev".to_string()))
                        .chain(field_cols.iter().map(|c| format!("\"{}\"", c)))
                        .collect::<Vec<_>>()
                        .join(", ");
                    tx.execute_batch(&format!(
                        "CREATE TABLE \"{table}\" (_id TEXT, _rev TEXT, {cols});\
                         CREATE INDEX \"{table}_cover\" ON \"{table}\" ({covered});",
                        table = table,
                        cols = cols,
                        covered = covered,
                    ))?;
                }
                IndexKind::Text => {
                    let columns = field_cols
                        .iter()
                        .map(|c| format!("\"{}\"", c))
                        .collect::<Vec<_>>()
                        .join(", ");
                    let tokenize_clause = match &tokenize {
                        Some(t) => format!(", tokenize={}", t),
                        None => String::new(),
                    };
                    tx.execute_batch(&format!(
                        "CREATE VIRTUAL TABLE \"{table}\" USING FTS4(_id, _rev, {columns}{tokenize_clause});",
                        table = table,
                        columns = columns,
                        tokenize_clause = tokenize_clause,
                    ))?;
                }
            }

            let insert = format!(
                "INSERT INTO {} (index_name, index_type, field_name, last_sequence, index_settings) \
                 VALUES (?1, ?2, ?3, 0, ?4)",
                metadata_table
            );
            for col in &field_cols {
                tx.execute(&insert, params![name, kind.as_str(), col, settings_json])?;
            }

            tx.commit()?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod creator_test {
    use super::*;
    use crate::Error;

    const METADATA_TABLE: &str = "_t_cloudant_sync_query_metadata";

    fn setup() -> (tempfile::TempDir, SqliteQueue) {
        let dir = tempfile::tempdir().unwrap();
        let queue = SqliteQueue::start(dir.path().join("indexes.sqlite")).unwrap();
        queue
            .submit(|conn| {
                conn.execute_batch(&format!(
                    "CREATE TABLE {} (index_name TEXT, index_type TEXT, field_name TEXT, \
                     last_sequence INTEGER, index_settings TEXT, \
                     PRIMARY KEY (index_name, field_name));",
                    METADATA_TABLE
                ))?;
                Ok(())
            })
            .unwrap();
        (dir, queue)
    }

    #[test]
    fn test_ensure_indexed_creates_table_and_metadata() {
        let (_dir, queue) = setup();
        let config = IndexManagerConfig::default();
        let creator = IndexCreator::new(&queue, &config, METADATA_TABLE);

        let name = creator
            .ensure_indexed(
                vec![FieldSpec::new("firstName"), FieldSpec::new("lastName")],
                Some("name".to_string()),
                IndexKind::Json,
                None,
                true,
            )
            .unwrap();
        assert_eq!(name, "name");

        let row_count: i64 = queue
            .submit(move |conn| {
                Ok(conn.query_row(
                    &format!("SELECT COUNT(*) FROM {}", METADATA_TABLE),
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(row_count, 2);
    }

    #[test]
    fn test_ensure_indexed_is_idempotent_for_same_shape() {
        let (_dir, queue) = setup();
        let config = IndexManagerConfig::default();
        let creator = IndexCreator::new(&queue, &config, METADATA_TABLE);

        let fields = vec![FieldSpec::new("firstName")];
        let first = creator
            .ensure_indexed(fields.clone(), Some("name".to_string()), IndexKind::Json, None, true)
            .unwrap();
        let second = creator
            .ensure_indexed(fields, Some("name".to_string()), IndexKind::Json, None, true)
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_ensure_indexed_rejects_reshaped_same_name() {
        let (_dir, queue) = setup();
        let config = IndexManagerConfig::default();
        let creator = IndexCreator::new(&queue, &config, METADATA_TABLE);

        creator
            .ensure_indexed(
                vec![FieldSpec::new("firstName")],
                Some("name".to_string()),
                IndexKind::Json,
                None,
                true,
            )
            .unwrap();

        let err = creator
            .ensure_indexed(
                vec![FieldSpec::new("lastName")],
                Some("name".to_string()),
                IndexKind::Json,
                None,
                true,
            )
            .unwrap_err();
        assert!(matches!(err, Error::IndexExists(..)));
    }

    #[test]
    fn test_ensure_indexed_rejects_tokenize_on_json() {
        let (_dir, queue) = setup();
        let config = IndexManagerConfig::default();
        let creator = IndexCreator::new(&queue, &config, METADATA_TABLE);

        let err = creator
            .ensure_indexed(
                vec![FieldSpec::new("firstName")],
                None,
                IndexKind::Json,
                Some("unicode61".to_string()),
                true,
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(..)));
    }

    #[test]
    fn test_ensure_indexed_text_fails_when_fts_disabled() {
        let (_dir, queue) = setup();
        let config = IndexManagerConfig::default();
        let creator = IndexCreator::new(&queue, &config, METADATA_TABLE);

        let err = creator
            .ensure_indexed(vec![FieldSpec::new("body")], Some("b".to_string()), IndexKind::Text, None, false)
            .unwrap_err();
        assert!(matches!(err, Error::TextSearchUnavailable(..)));
    }

    #[test]
    fn test_ensure_indexed_derives_name_when_absent() {
        let (_dir, queue) = setup();
        let config = IndexManagerConfig::default();
        let creator = IndexCreator::new(&queue, &config, METADATA_TABLE);

        let name = creator
            .ensure_indexed(vec![FieldSpec::new("firstName")], None, IndexKind::Json, None, true)
            .unwrap();
        assert!(name.starts_with("idx_"));
    }
}
