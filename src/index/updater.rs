//! `IndexUpdater`: brings each index's materialized table up to the
//! document store's current global sequence.

use rusqlite::params;
use serde_json::Value;

use crate::{
    forest::Revision,
    index::{config::IndexManagerConfig, metadata, queue::SqliteQueue, store::DocumentStore},
    Result,
};

pub struct IndexUpdater<'a> {
    queue: &'a SqliteQueue,
    config: &'a IndexManagerConfig,
    metadata_table: String,
}

/// Summary of one index's update pass, logged by the caller.
pub struct UpdateSummary {
    pub name: String,
    pub docs_scanned: usize,
    pub rows_upserted: usize,
    pub last_sequence: u64,
}

impl<'a> IndexUpdater<'a> {
    pub fn new(queue: &'a SqliteQueue, config: &'a IndexManagerConfig, metadata_table: impl Into<String>) -> Self {
        IndexUpdater {
            queue,
            config,
            metadata_table: metadata_table.into(),
        }
    }

    /// Refresh every index named in `names`, best-effort: a failure on one
    /// index is logged and skipped rather than aborting the remaining
    /// indexes, per the update protocol's best-effort policy.
    pub fn update_all(&self, names: &[String], store: &dyn DocumentStore) -> Vec<UpdateSummary> {
        names
            .iter()
            .filter_map(|name| match self.update_one(name, store) {
                Ok(summary) => Some(summary),
                Err(err) => {
                    log::warn!(target: "imupd ", "update of index {:?} failed: {}", name, err);
                    None
                }
            })
            .collect()
    }

    /// Refresh a single index against `store`'s current global sequence.
    pub fn update_one(&self, name: &str, store: &dyn DocumentStore) -> Result<UpdateSummary> {
        let definition = {
            let table = self.metadata_table.clone();
            let name = name.to_string();
            self.queue.submit(move |conn| metadata::read_definition(conn, &table, &name))?
        };
        let definition = match definition {
            Some(d) => d,
            None => err_at!(InvalidArgument, msg: "no such index {:?}", name)?,
        };

        let global_sequence = store.current_sequence();
        let changes = store.changes_since(definition.last_sequence);

        let mut docs_scanned = 0usize;
        let mut rows_upserted = 0usize;
        let table_name = self.config.table_name(name);
        let columns: Vec<String> = definition.fields.iter().map(|f| f.column_name().to_string()).collect();

        for change in &changes {
            docs_scanned += 1;
            let forest = match store.load_forest(&change.doc_id) {
                Some(forest) => forest,
                None => continue,
            };

            let winner = forest.winner().ok();
            let rev_id = winner.filter(|rev| !rev.deleted).map(|rev| rev.rev_id.clone());
            let rows = winner
                .filter(|rev| !rev.deleted)
                .map(|rev| project(rev, &columns))
                .unwrap_or_default();

            rows_upserted += self.upsert_doc(&table_name, &change.doc_id, rev_id, &columns, &rows)?;
        }

        let name_owned = name.to_string();
        let table = self.metadata_table.clone();
        self.queue
            .submit(move |conn| metadata::set_last_sequence(conn, &table, &name_owned, global_sequence))?;

        log::info!(
            target: "imupd ",
            "updated index {:?}: {} docs scanned, {} rows upserted, last_sequence={}",
            name, docs_scanned, rows_upserted, global_sequence
        );

        Ok(UpdateSummary {
            name: name.to_string(),
            docs_scanned,
            rows_upserted,
            last_sequence: global_sequence,
        })
    }

    /// Delete existing rows for `doc_id`, then insert the projected rows (if
    /// any — a missing winner or a deleted winner leaves no rows). Returns
    /// the number of rows inserted.
    fn upsert_doc(
        &self,
        table_name: &str,
        doc_id: &str,
        rev_id: Option<String>,
        columns: &[String],
        rows: &[Vec<Option<String>>],
    ) -> Result<usize> {
        let table = table_name.to_string();
        let doc_id = doc_id.to_string();
        let rows = rows.to_vec();

        let insert_sql = {
            let col_list = columns
                .iter()
                .map(|c| format!(", \"{}\"", c))
                .collect::<String>();
            let placeholders = (0..columns.len()).map(|i| format!(", ?{}", i + 3)).collect::<String>();
            format!(
                "INSERT INTO \"{}\" (_id, _rev{}) VALUES (?1, ?2{})",
                table, col_list, placeholders
            )
        };

        self.queue.submit(move |conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(&format!("DELETE FROM \"{}\" WHERE _id = ?1", table), params![doc_id])?;

            let mut inserted = 0usize;
            if let Some(rev_id) = rev_id.as_ref() {
                for row in &rows {
                    let mut bound: Vec<&dyn rusqlite::ToSql> = vec![&doc_id, rev_id];
                    for value in row {
                        bound.push(value as &dyn rusqlite::ToSql);
                    }
                    tx.execute(&insert_sql, bound.as_slice())?;
                    inserted += 1;
                }
            }

            tx.commit()?;
            Ok(inserted)
        })
    }
}

/// Project a winning revision's body onto `columns`. Array-valued fields
/// expand into a cartesian product of rows; missing fields and objects
/// project as `NULL`.
fn project(revision: &Revision, columns: &[String]) -> Vec<Vec<Option<String>>> {
    let mut rows: Vec<Vec<Option<String>>> = vec![Vec::new()];

    for column in columns {
        let field_value = revision.body.get(column);
        let expansions = expand(field_value);

        let mut next_rows = Vec::with_capacity(rows.len() * expansions.len().max(1));
        for row in &rows {
            for value in &expansions {
                let mut next = row.clone();
                next.push(value.clone());
                next_rows.push(next);
            }
        }
        rows = next_rows;
    }

    rows
}

/// All scalar projections of one field's JSON value: a scalar projects as
/// one value, an array projects as one value per scalar element (non-scalar
/// elements become `NULL`), anything else (object, missing) projects as a
/// single `NULL`.
fn expand(value: Option<&Value>) -> Vec<Option<String>> {
    match value {
        None => vec![None],
        Some(Value::Array(items)) => {
            if items.is_empty() {
                vec![None]
            } else {
                items.iter().map(scalar_text).collect()
            }
        }
        Some(other) => vec![scalar_text(other)],
    }
}

/// Serialize a JSON scalar the way it is stored in an index column: strings
/// unquoted, other scalars via their canonical JSON text form, objects and
/// null as the absence of a value. Shared with the query planner so a
/// literal's bound parameter matches what `project` wrote.
pub(crate) fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Object(_) => None,
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
