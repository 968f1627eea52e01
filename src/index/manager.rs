//! `IndexManager`: the top-level façade — open/close, index lifecycle,
//! refresh, and query, wiring together `IndexCreator`, `IndexUpdater`, and
//! `QueryExecutor` over one `SqliteQueue`.

use std::path::Path;

use rusqlite::params;

use crate::{
    index::{
        config::IndexManagerConfig,
        creator::IndexCreator,
        metadata::{self, FieldSpec, IndexDefinition, IndexKind},
        query::{DocumentRevision, Query, QueryExecutor, SortSpec},
        queue::SqliteQueue,
        store::{DocumentStore, PurgeSubscription},
        updater::{IndexUpdater, UpdateSummary},
    },
    Result,
};

const METADATA_TABLE: &str = "_t_cloudant_sync_query_metadata";
const FTS_PROBE_TABLE: &str = "_t_cloudant_sync_query_fts_check";

pub struct IndexManager {
    queue: SqliteQueue,
    config: IndexManagerConfig,
    fts_enabled: bool,
    purge_sub: PurgeSubscription,
}

impl IndexManager {
    /// Open (creating if absent) the index database under
    /// `config.extension_dir`, relative to `datastore_root`. `passphrase` is
    /// threaded through for a future encrypted-connection provider but
    /// otherwise unused here.
    pub fn open(
        datastore_root: &Path,
        config: IndexManagerConfig,
        _passphrase: Option<&[u8]>,
        store: &dyn DocumentStore,
    ) -> Result<IndexManager> {
        let db_path = config.database_path(datastore_root);
        if let Some(parent) = db_path.parent() {
            err_at!(IOError, std::fs::create_dir_all(parent))?;
        }

        let queue = SqliteQueue::start(db_path)?;
        migrate_v1(&queue)?;
        migrate_v2(&queue)?;
        let fts_enabled = probe_fts(&queue)?;
        let purge_sub = store.subscribe_purge();

        log::info!(target: "imgr  ", "opened index manager, fts_enabled={}", fts_enabled);

        Ok(IndexManager {
            queue,
            config,
            fts_enabled,
            purge_sub,
        })
    }

    pub fn is_text_search_enabled(&self) -> bool {
        self.fts_enabled
    }

    /// Every known index definition, one entry per name, fields in
    /// insertion order.
    pub fn list_indexes(&self) -> Result<Vec<IndexDefinition>> {
        let names = self.queue.submit(|conn| metadata::list_names(conn, METADATA_TABLE))?;
        let mut defs = Vec::with_capacity(names.len());
        for name in names {
            if let Some(def) = self.queue.submit(move |conn| metadata::read_definition(conn, METADATA_TABLE, &name))? {
                defs.push(def);
            }
        }
        Ok(defs)
    }

    /// Create (or confirm) an index, then run its initial update pass.
    pub fn ensure_indexed(
        &self,
        fields: Vec<FieldSpec>,
        name: Option<String>,
        kind: IndexKind,
        tokenize: Option<String>,
        store: &dyn DocumentStore,
    ) -> Result<String> {
        let creator = IndexCreator::new(&self.queue, &self.config, METADATA_TABLE);
        let name = creator.ensure_indexed(fields, name, kind, tokenize, self.fts_enabled)?;

        let updater = IndexUpdater::new(&self.queue, &self.config, METADATA_TABLE);
        updater.update_one(&name, store)?;

        Ok(name)
    }

    /// Drop an index's physical table and metadata rows in one transaction.
    pub fn delete_index(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            err_at!(InvalidArgument, msg: "index name must not be empty")?;
        }

        let table = self.config.table_name(name);
        let name = name.to_string();

        self.queue.submit(move |conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute_batch(&format!("DROP TABLE IF EXISTS \"{}\";", table))?;
            tx.execute(
                &format!("DELETE FROM {} WHERE index_name = ?1", METADATA_TABLE),
                params![name],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Refresh every known index, best-effort.
    pub fn update_all_indexes(&self, store: &dyn DocumentStore) -> Result<Vec<UpdateSummary>> {
        let names = self.queue.submit(|conn| metadata::list_names(conn, METADATA_TABLE))?;
        let updater = IndexUpdater::new(&self.queue, &self.config, METADATA_TABLE);
        Ok(updater.update_all(&names, store))
    }

    /// Refresh all indexes, then plan and execute `query`.
    #[allow(clippy::too_many_arguments)]
    pub fn find(
        &self,
        query: &Query,
        skip: usize,
        limit: Option<usize>,
        fields: Option<&[String]>,
        sort: Option<&SortSpec>,
        store: &dyn DocumentStore,
    ) -> Result<Vec<DocumentRevision>> {
        self.update_all_indexes(store)?;
        let indexes = self.list_indexes()?;
        let executor = QueryExecutor::new(&self.queue, &self.config);
        executor.find(query, &indexes, skip, limit, fields, sort, store)
    }

    /// Drain pending purge notifications, deleting the purged document's
    /// rows from every index's table. Returns the number of events handled.
    pub fn process_purge_events(&self) -> Result<usize> {
        let mut handled = 0usize;
        while let Some(event) = self.purge_sub.try_recv() {
            let indexes = self.list_indexes()?;
            for index in &indexes {
                let table = self.config.table_name(&index.name);
                let doc_id = event.doc_id.clone();
                self.queue.submit(move |conn| {
                    conn.execute(&format!("DELETE FROM \"{}\" WHERE _id = ?1", table), params![doc_id])?;
                    Ok(())
                })?;
            }
            log::debug!(target: "imgr  ", "purged {:?} from {} indexes", event.doc_id, indexes.len());
            handled += 1;
        }
        Ok(handled)
    }

    /// Drain the single-writer queue and join its worker thread.
    pub fn close(self) -> Result<()> {
        self.queue.close()
    }
}

fn migrate_v1(queue: &SqliteQueue) -> Result<()> {
    queue.submit(|conn| {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (\
                index_name TEXT NOT NULL, \
                index_type TEXT NOT NULL, \
                field_name TEXT NOT NULL, \
                last_sequence INTEGER NOT NULL DEFAULT 0, \
                index_settings TEXT NOT NULL DEFAULT '{{}}', \
                PRIMARY KEY (index_name, field_name)\
            );",
            METADATA_TABLE
        ))?;
        Ok(())
    })
}

fn migrate_v2(queue: &SqliteQueue) -> Result<()> {
    queue.submit(|conn| {
        conn.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS {}_name ON {} (index_name);",
            METADATA_TABLE, METADATA_TABLE
        ))?;
        Ok(())
    })
}

/// Probe FTS4 support by creating and dropping a throwaway virtual table in
/// one transaction; any failure means the engine lacks FTS.
fn probe_fts(queue: &SqliteQueue) -> Result<bool> {
    queue.submit(|conn| {
        let tx = conn.unchecked_transaction()?;
        let probe = tx.execute_batch(&format!(
            "CREATE VIRTUAL TABLE {} USING FTS4(probe); DROP TABLE {};",
            FTS_PROBE_TABLE, FTS_PROBE_TABLE
        ));
        match probe {
            Ok(()) => {
                tx.commit()?;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    })
}
