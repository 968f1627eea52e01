//! Index Manager configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for opening an [super::IndexManager].
///
/// Round-trips through `serde_json` and `toml`, matching how the rest of
/// this codebase's modules configure themselves.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexManagerConfig {
    /// Folder, relative to the document store's root, holding this
    /// extension's SQLite file.
    pub extension_dir: PathBuf,
    /// Table-name prefix applied to every physical index table and the
    /// metadata/FTS-probe tables.
    pub table_prefix: String,
}

impl Default for IndexManagerConfig {
    fn default() -> IndexManagerConfig {
        IndexManagerConfig {
            extension_dir: PathBuf::from("extensions/com.cloudant.sync.query"),
            table_prefix: "_t_cloudant_sync_query_index_".to_string(),
        }
    }
}

impl IndexManagerConfig {
    /// Full path to the SQLite file, given the document store's root
    /// directory.
    pub fn database_path(&self, datastore_root: &std::path::Path) -> PathBuf {
        datastore_root.join(&self.extension_dir).join("indexes.sqlite")
    }

    /// Physical table name for index `name`.
    pub fn table_name(&self, name: &str) -> String {
        format!("{}{}", self.table_prefix, name)
    }
}

#[cfg(test)]
mod config_test {
    use super::*;

    #[test]
    fn test_default_matches_extension_layout() {
        let cfg = IndexManagerConfig::default();
        assert_eq!(cfg.extension_dir, PathBuf::from("extensions/com.cloudant.sync.query"));
        assert_eq!(cfg.table_prefix, "_t_cloudant_sync_query_index_");
    }

    #[test]
    fn test_database_path_joins_root() {
        let cfg = IndexManagerConfig::default();
        let path = cfg.database_path(std::path::Path::new("/data/store"));
        assert_eq!(
            path,
            PathBuf::from("/data/store/extensions/com.cloudant.sync.query/indexes.sqlite")
        );
    }

    #[test]
    fn test_round_trips_through_json_and_toml() {
        let cfg = IndexManagerConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: IndexManagerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);

        let toml_str = toml::to_string(&cfg).unwrap();
        let back: IndexManagerConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(cfg, back);
    }

    #[test]
    fn test_table_name_applies_prefix() {
        let cfg = IndexManagerConfig::default();
        assert_eq!(cfg.table_name("name"), "_t_cloudant_sync_query_index_name");
    }
}
