//! Index metadata: the persistent shape of an index definition, independent
//! of whatever rows happen to be materialized in its table.

use lazy_static::lazy_static;
use regex::Regex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::Result;

lazy_static! {
    static ref IDENTIFIER_RE: Regex = Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").unwrap();
}

/// Validate an index name or a field's column name against
/// `^[A-Za-z][A-Za-z0-9_]*$`.
pub fn validate_identifier(kind: &str, value: &str) -> Result<()> {
    if !IDENTIFIER_RE.is_match(value) {
        err_at!(
            InvalidArgument,
            msg: "{} {:?} does not match ^[A-Za-z][A-Za-z0-9_]*$", kind, value
        )?;
    }
    Ok(())
}

/// Sort direction hint carried by a field spec. Not enforced by the query
/// planner (§4.5 plans on covering fields, not direction), but persisted so
/// a future planner revision can use it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    #[serde(rename = "asc")]
    Ascending,
    #[serde(rename = "desc")]
    Descending,
}

impl Default for SortDirection {
    fn default() -> Self {
        SortDirection::Ascending
    }
}

/// One field of an index: a dotted path into the document body, plus a
/// sort-direction hint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub path: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl FieldSpec {
    pub fn new(path: impl Into<String>) -> FieldSpec {
        FieldSpec {
            path: path.into(),
            direction: SortDirection::Ascending,
        }
    }

    /// The index table's column name for this field: its leftmost path
    /// segment. Dotted sub-paths (`"address.city"`) all project through the
    /// same column policy as a bare field (`"address"`'s column is
    /// `address`); this is the "leftmost path segment" policy called out in
    /// §4.3.
    pub fn column_name(&self) -> &str {
        self.path.split('.').next().unwrap_or(&self.path)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    #[serde(rename = "json")]
    Json,
    #[serde(rename = "text")]
    Text,
}

impl IndexKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexKind::Json => "json",
            IndexKind::Text => "text",
        }
    }
}

/// Settings map attached to an index, currently only used for `text`
/// indexes' `tokenize` setting.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokenize: Option<String>,
}

/// A persistent index definition: everything `listIndexes` reports about
/// one index, minus its materialized rows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub kind: IndexKind,
    pub fields: Vec<FieldSpec>,
    pub settings: IndexSettings,
    pub last_sequence: u64,
}

impl IndexDefinition {
    /// Definition-equivalence used by `ensureIndexed`'s idempotence check:
    /// same kind, same ordered fields (paths only — direction is not part
    /// of identity), same tokenize setting.
    pub fn same_shape(&self, kind: IndexKind, fields: &[FieldSpec], tokenize: Option<&str>) -> bool {
        self.kind == kind
            && self.fields.len() == fields.len()
            && self
                .fields
                .iter()
                .zip(fields.iter())
                .all(|(a, b)| a.path == b.path)
            && self.settings.tokenize.as_deref() == tokenize
    }
}

/// Read one index's definition from the metadata table, or `None` if no
/// rows exist under that name. Shared by `IndexCreator`'s idempotence check
/// and `IndexManager::list_indexes`.
pub fn read_definition(conn: &Connection, metadata_table: &str, name: &str) -> Result<Option<IndexDefinition>> {
    let query = format!(
        "SELECT index_type, field_name, last_sequence, index_settings \
         FROM {} WHERE index_name = ?1 ORDER BY rowid",
        metadata_table
    );
    let mut stmt = conn.prepare(&query)?;
    let mut rows = stmt.query(params![name])?;

    let mut kind = None;
    let mut fields = Vec::new();
    let mut last_sequence = 0u64;
    let mut settings = IndexSettings::default();

    while let Some(row) = rows.next()? {
        let kind_str: String = row.get(0)?;
        let field_name: String = row.get(1)?;
        let ls: i64 = row.get(2)?;
        let settings_json: String = row.get(3)?;

        kind = Some(if kind_str == "text" { IndexKind::Text } else { IndexKind::Json });
        fields.push(FieldSpec::new(field_name));
        last_sequence = ls as u64;
        settings = serde_json::from_str(&settings_json).unwrap_or_default();
    }

    Ok(kind.map(|kind| IndexDefinition {
        name: name.to_string(),
        kind,
        fields,
        settings,
        last_sequence,
    }))
}

/// List every index name present in the metadata table, ordered by first
/// insertion.
pub fn list_names(conn: &Connection, metadata_table: &str) -> Result<Vec<String>> {
    let query = format!(
        "SELECT index_name FROM {} GROUP BY index_name ORDER BY MIN(rowid)",
        metadata_table
    );
    let mut stmt = conn.prepare(&query)?;
    let mut rows = stmt.query([])?;

    let mut names = Vec::new();
    while let Some(row) = rows.next()? {
        names.push(row.get(0)?);
    }
    Ok(names)
}

/// Set an index's `last_sequence` across all of its metadata rows.
pub fn set_last_sequence(conn: &Connection, metadata_table: &str, name: &str, last_sequence: u64) -> Result<()> {
    let update = format!("UPDATE {} SET last_sequence = ?1 WHERE index_name = ?2", metadata_table);
    conn.execute(&update, params![last_sequence as i64, name])?;
    Ok(())
}

#[cfg(test)]
mod metadata_test {
    use super::*;

    #[test]
    fn test_validate_identifier_accepts_alnum_underscore() {
        assert!(validate_identifier("index name", "name").is_ok());
        assert!(validate_identifier("index name", "name_2").is_ok());
        assert!(validate_identifier("index name", "Name").is_ok());
    }

    #[test]
    fn test_validate_identifier_rejects_leading_digit_or_symbols() {
        assert!(validate_identifier("index name", "2name").is_err());
        assert!(validate_identifier("index name", "na-me").is_err());
        assert!(validate_identifier("index name", "").is_err());
    }

    #[test]
    fn test_column_name_is_leftmost_segment() {
        assert_eq!(FieldSpec::new("address.city").column_name(), "address");
        assert_eq!(FieldSpec::new("firstName").column_name(), "firstName");
    }

    #[test]
    fn test_same_shape_ignores_direction() {
        let def = IndexDefinition {
            name: "name".to_string(),
            kind: IndexKind::Json,
            fields: vec![FieldSpec::new("firstName"), FieldSpec::new("lastName")],
            settings: IndexSettings::default(),
            last_sequence: 0,
        };
        let mut reordered_direction = FieldSpec::new("lastName");
        reordered_direction.direction = SortDirection::Descending;
        assert!(def.same_shape(
            IndexKind::Json,
            &[FieldSpec::new("firstName"), reordered_direction],
            None
        ));
        assert!(!def.same_shape(IndexKind::Json, &[FieldSpec::new("firstName")], None));
    }
}
