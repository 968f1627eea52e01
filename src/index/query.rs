//! `QueryExecutor`: plans a query AST against the set of known indexes and
//! executes it, joining back to the document store.
//!
//! Supported AST shape (documented limitation, not the full Cloudant Query
//! grammar): a query is either a single field selector, a flat `$and` of
//! field selectors, a flat `$or` of field selectors, or `$not` of a single
//! `$exists` selector. Deeper nesting returns `InvalidQuery` — this mirrors
//! an interface-level planner, not a general boolean-expression evaluator.

use std::collections::{HashMap, HashSet};

use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use crate::{
    index::{
        config::IndexManagerConfig,
        metadata::{IndexDefinition, IndexKind},
        queue::SqliteQueue,
        store::DocumentStore,
        updater::scalar_text,
    },
    Result,
};

#[derive(Clone, Debug, PartialEq)]
pub enum Selector {
    Eq(Value),
    Ne(Value),
    In(Vec<Value>),
    Exists(bool),
    Text(String),
}

#[derive(Clone, Debug)]
pub enum Query {
    Field(String, Selector),
    And(Vec<Query>),
    Or(Vec<Query>),
    Not(Box<Query>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub descending: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DocumentRevision {
    pub id: String,
    pub rev: String,
    pub body: Value,
}

enum Clause {
    Conjunction(Vec<(String, Selector)>),
    Disjunction(Vec<(String, Selector)>),
}

fn resolve_literal(query: &Query) -> Result<(String, Selector)> {
    match query {
        Query::Field(field, selector) => Ok((field.clone(), selector.clone())),
        Query::Not(inner) => match inner.as_ref() {
            Query::Field(field, Selector::Exists(want)) => Ok((field.clone(), Selector::Exists(!want))),
            _ => err_at!(InvalidQuery, msg: "$not only supports a single $exists selector")?,
        },
        _ => err_at!(InvalidQuery, msg: "expected a field selector, found nested $and/$or")?,
    }
}

fn flatten(query: &Query) -> Result<Clause> {
    match query {
        Query::Field(field, selector) => Ok(Clause::Conjunction(vec![(field.clone(), selector.clone())])),
        Query::Not(_) => {
            let literal = resolve_literal(query)?;
            Ok(Clause::Conjunction(vec![literal]))
        }
        Query::And(parts) => {
            let mut literals = Vec::with_capacity(parts.len());
            for part in parts {
                literals.push(resolve_literal(part)?);
            }
            Ok(Clause::Conjunction(literals))
        }
        Query::Or(parts) => {
            let mut literals = Vec::with_capacity(parts.len());
            for part in parts {
                literals.push(resolve_literal(part)?);
            }
            Ok(Clause::Disjunction(literals))
        }
    }
}

pub struct QueryExecutor<'a> {
    queue: &'a SqliteQueue,
    config: &'a IndexManagerConfig,
}

impl<'a> QueryExecutor<'a> {
    pub fn new(queue: &'a SqliteQueue, config: &'a IndexManagerConfig) -> Self {
        QueryExecutor { queue, config }
    }

    /// Plan and execute `query` against `indexes`, joining matches back to
    /// `store` and applying `sort`/`skip`/`limit`/`fields` over the joined
    /// results.
    #[allow(clippy::too_many_arguments)]
    pub fn find(
        &self,
        query: &Query,
        indexes: &[IndexDefinition],
        skip: usize,
        limit: Option<usize>,
        fields: Option<&[String]>,
        sort: Option<&SortSpec>,
        store: &dyn DocumentStore,
    ) -> Result<Vec<DocumentRevision>> {
        let clause = flatten(query)?;
        let candidates = self.plan_clause(&clause, indexes, store)?;

        let mut joined: Vec<DocumentRevision> = candidates
            .into_iter()
            .filter_map(|(id, rev)| {
                store.body(&id, &rev).map(|body| DocumentRevision { id, rev, body })
            })
            .collect();

        if let Some(sort) = sort {
            joined.sort_by(|a, b| {
                let av = a.body.get(&sort.field);
                let bv = b.body.get(&sort.field);
                let ordering = json_cmp(av, bv);
                if sort.descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }

        let limited: Vec<DocumentRevision> = joined
            .into_iter()
            .skip(skip)
            .take(limit.unwrap_or(usize::MAX))
            .map(|mut rev| {
                if let Some(fields) = fields {
                    rev.body = project_fields(&rev.body, fields);
                }
                rev
            })
            .collect();

        Ok(limited)
    }

    fn plan_clause(&self, clause: &Clause, indexes: &[IndexDefinition], store: &dyn DocumentStore) -> Result<Vec<(String, String)>> {
        match clause {
            Clause::Conjunction(literals) => self.plan_conjunction(literals, indexes, store),
            Clause::Disjunction(literals) => {
                let mut seen = HashSet::new();
                let mut out = Vec::new();
                for literal in literals {
                    for pair in self.plan_conjunction(std::slice::from_ref(literal), indexes, store)? {
                        if seen.insert(pair.clone()) {
                            out.push(pair);
                        }
                    }
                }
                Ok(out)
            }
        }
    }

    fn plan_conjunction(
        &self,
        literals: &[(String, Selector)],
        indexes: &[IndexDefinition],
        store: &dyn DocumentStore,
    ) -> Result<Vec<(String, String)>> {
        let (text_literals, json_literals): (Vec<_>, Vec<_>) =
            literals.iter().cloned().partition(|(_, s)| matches!(s, Selector::Text(_)));

        if text_literals.len() > 1 {
            err_at!(InvalidQuery, msg: "at most one $text conjunct is supported")?;
        }

        if let Some((field, selector)) = text_literals.into_iter().next() {
            let query_text = match &selector {
                Selector::Text(q) => q.clone(),
                _ => unreachable!(),
            };
            let text_field_set: HashSet<String> = [field.clone()].into_iter().collect();
            let index = match self.find_index(&text_field_set, IndexKind::Text, indexes) {
                Some(idx) => idx,
                None => err_at!(NoUsableIndex, msg: "no text index covers field {:?}", field)?,
            };

            let candidates = self.run_text_scan(index, &query_text)?;

            if json_literals.is_empty() {
                return Ok(candidates);
            }
            // mixed text+json: the text index doesn't cover the json
            // fields, so fetch each candidate's body and filter in memory.
            return Ok(candidates
                .into_iter()
                .filter(|(id, rev)| match store.body(id, rev) {
                    Some(body) => json_literals.iter().all(|(f, s)| matches_selector(body.get(f), s)),
                    None => false,
                })
                .collect());
        }

        if json_literals.is_empty() {
            return Ok(Vec::new());
        }

        let field_set: HashSet<String> = json_literals.iter().map(|(f, _)| f.clone()).collect();
        if let Some(index) = self.find_index(&field_set, IndexKind::Json, indexes) {
            return self.run_json_scan(index, &json_literals);
        }

        // no single index covers the whole conjunction: plan one scan per
        // conjunct against its own covering index and intersect the results
        // by `_id`, the same per-branch-then-combine shape `plan_clause`
        // already uses for `$or`, but intersecting instead of unioning.
        self.plan_conjunction_by_intersection(&json_literals, indexes)
    }

    fn plan_conjunction_by_intersection(
        &self,
        json_literals: &[(String, Selector)],
        indexes: &[IndexDefinition],
    ) -> Result<Vec<(String, String)>> {
        let mut per_literal: Vec<HashMap<String, String>> = Vec::with_capacity(json_literals.len());

        for literal @ (field, _) in json_literals {
            let field_set: HashSet<String> = [field.clone()].into_iter().collect();
            let index = match self.find_index(&field_set, IndexKind::Json, indexes) {
                Some(idx) => idx,
                None => err_at!(NoUsableIndex, msg: "no json index covers field {:?}", field)?,
            };
            let scanned = self.run_json_scan(index, std::slice::from_ref(literal))?;
            per_literal.push(scanned.into_iter().collect());
        }

        let smallest = match per_literal.iter().min_by_key(|m| m.len()) {
            Some(m) => m.clone(),
            None => return Ok(Vec::new()),
        };

        Ok(smallest
            .into_iter()
            .filter(|(id, rev)| per_literal.iter().all(|m| m.get(id) == Some(rev)))
            .collect())
    }

    /// Pick the index of `kind` whose column set covers `fields`, preferring
    /// the one with the fewest total fields (a cardinality proxy — this
    /// planner has no row-count statistics to work from).
    fn find_index<'b>(&self, fields: &HashSet<String>, kind: IndexKind, indexes: &'b [IndexDefinition]) -> Option<&'b IndexDefinition> {
        indexes
            .iter()
            .filter(|idx| idx.kind == kind)
            .filter(|idx| {
                let columns: HashSet<&str> = idx.fields.iter().map(|f| f.column_name()).collect();
                fields.iter().all(|f| columns.contains(f.as_str()))
            })
            .min_by_key(|idx| idx.fields.len())
    }

    fn run_json_scan(&self, index: &IndexDefinition, literals: &[(String, Selector)]) -> Result<Vec<(String, String)>> {
        let table = self.config.table_name(&index.name);
        let mut clauses = Vec::new();
        let mut params: Vec<SqlValue> = Vec::new();

        for (field, selector) in literals {
            match selector {
                Selector::Eq(v) => {
                    clauses.push(format!("\"{}\" = ?", field));
                    params.push(to_sql_value(scalar_text(v)));
                }
                Selector::Ne(v) => {
                    clauses.push(format!("\"{}\" != ?", field));
                    params.push(to_sql_value(scalar_text(v)));
                }
                Selector::In(values) => {
                    let placeholders = values.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
                    clauses.push(format!("\"{}\" IN ({})", field, placeholders));
                    for v in values {
                        params.push(to_sql_value(scalar_text(v)));
                    }
                }
                Selector::Exists(true) => clauses.push(format!("\"{}\" IS NOT NULL", field)),
                Selector::Exists(false) => clauses.push(format!("\"{}\" IS NULL", field)),
                Selector::Text(_) => unreachable!("text literals are split out before this point"),
            }
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        let sql = format!("SELECT DISTINCT _id, _rev FROM \"{}\"{}", table, where_clause);

        self.queue.submit(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    fn run_text_scan(&self, index: &IndexDefinition, query_text: &str) -> Result<Vec<(String, String)>> {
        let table = self.config.table_name(&index.name);
        let query_text = query_text.to_string();
        let sql = format!("SELECT _id, _rev FROM \"{}\" WHERE \"{}\" MATCH ?1", table, table);

        self.queue.submit(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params![query_text], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }
}

fn matches_selector(value: Option<&Value>, selector: &Selector) -> bool {
    match selector {
        Selector::Eq(v) => value == Some(v),
        Selector::Ne(v) => value != Some(v),
        Selector::In(values) => value.map_or(false, |v| values.contains(v)),
        Selector::Exists(want) => value.is_some() == *want,
        Selector::Text(_) => true,
    }
}

fn to_sql_value(value: Option<String>) -> SqlValue {
    match value {
        Some(s) => SqlValue::Text(s),
        None => SqlValue::Null,
    }
}

fn json_cmp(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    let a = a.map(value_sort_key);
    let b = b.map(value_sort_key);
    a.cmp(&b)
}

fn value_sort_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn project_fields(body: &Value, fields: &[String]) -> Value {
    match body.as_object() {
        Some(obj) => {
            let mut projected = serde_json::Map::new();
            for field in fields {
                if let Some(v) = obj.get(field) {
                    projected.insert(field.clone(), v.clone());
                }
            }
            Value::Object(projected)
        }
        None => body.clone(),
    }
}

#[cfg(test)]
mod query_test {
    use super::*;
    use crate::index::{
        config::IndexManagerConfig,
        creator::IndexCreator,
        metadata::FieldSpec,
        store::MemoryDocumentStore,
        updater::IndexUpdater,
    };
    use serde_json::json;

    const METADATA_TABLE: &str = "_t_cloudant_sync_query_metadata";

    fn setup() -> (tempfile::TempDir, SqliteQueue, IndexManagerConfig) {
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
        let config = IndexManagerConfig::default();
        (dir, queue, config)
    }

    fn indexed_definition(config: &IndexManagerConfig, queue: &SqliteQueue) -> IndexDefinition {
        let creator = IndexCreator::new(queue, config, METADATA_TABLE);
        let name = creator
            .ensure_indexed(
                vec![FieldSpec::new("firstName"), FieldSpec::new("lastName")],
                Some("name".to_string()),
                IndexKind::Json,
                None,
                true,
            )
            .unwrap();

        IndexDefinition {
            name,
            kind: IndexKind::Json,
            fields: vec![FieldSpec::new("firstName"), FieldSpec::new("lastName")],
            settings: Default::default(),
            last_sequence: 0,
        }
    }

    #[test]
    fn test_find_single_field_eq_uses_covering_index() {
        let (_dir, queue, config) = setup();
        let def = indexed_definition(&config, &queue);
        let updater = IndexUpdater::new(&queue, &config, METADATA_TABLE);

        let store = MemoryDocumentStore::new();
        store
            .put("doc1", "1-a", 0, false, true, json!({"firstName": "Mike", "lastName": "Rhodes"}))
            .unwrap();
        store
            .put("doc2", "1-a", 0, false, true, json!({"firstName": "Anna", "lastName": "Rhodes"}))
            .unwrap();
        updater.update_one(&def.name, &store).unwrap();

        let executor = QueryExecutor::new(&queue, &config);
        let query = Query::Field("firstName".to_string(), Selector::Eq(json!("Mike")));
        let results = executor
            .find(&query, std::slice::from_ref(&def), 0, None, None, None, &store)
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "doc1");
        assert_eq!(results[0].body["firstName"], json!("Mike"));
    }

    #[test]
    fn test_find_with_no_covering_index_fails() {
        let (_dir, queue, config) = setup();
        let def = indexed_definition(&config, &queue);
        let store = MemoryDocumentStore::new();

        let executor = QueryExecutor::new(&queue, &config);
        let query = Query::Field("age".to_string(), Selector::Eq(json!(42)));
        let err = executor
            .find(&query, std::slice::from_ref(&def), 0, None, None, None, &store)
            .unwrap_err();
        assert!(matches!(err, crate::Error::NoUsableIndex(..)));
    }

    #[test]
    fn test_find_applies_fields_projection() {
        let (_dir, queue, config) = setup();
        let def = indexed_definition(&config, &queue);
        let updater = IndexUpdater::new(&queue, &config, METADATA_TABLE);

        let store = MemoryDocumentStore::new();
        store
            .put("doc1", "1-a", 0, false, true, json!({"firstName": "Mike", "lastName": "Rhodes", "age": 40}))
            .unwrap();
        updater.update_one(&def.name, &store).unwrap();

        let executor = QueryExecutor::new(&queue, &config);
        let query = Query::Field("firstName".to_string(), Selector::Eq(json!("Mike")));
        let results = executor
            .find(
                &query,
                std::slice::from_ref(&def),
                0,
                None,
                Some(&["firstName".to_string()]),
                None,
                &store,
            )
            .unwrap();

        assert_eq!(results[0].body, json!({"firstName": "Mike"}));
    }

    #[test]
    fn test_find_or_unions_results() {
        let (_dir, queue, config) = setup();
        let def = indexed_definition(&config, &queue);
        let updater = IndexUpdater::new(&queue, &config, METADATA_TABLE);

        let store = MemoryDocumentStore::new();
        store
            .put("doc1", "1-a", 0, false, true, json!({"firstName": "Mike", "lastName": "Rhodes"}))
            .unwrap();
        store
            .put("doc2", "1-a", 0, false, true, json!({"firstName": "Anna", "lastName": "Smith"}))
            .unwrap();
        updater.update_one(&def.name, &store).unwrap();

        let executor = QueryExecutor::new(&queue, &config);
        let query = Query::Or(vec![
            Query::Field("firstName".to_string(), Selector::Eq(json!("Mike"))),
            Query::Field("firstName".to_string(), Selector::Eq(json!("Anna"))),
        ]);
        let results = executor
            .find(&query, std::slice::from_ref(&def), 0, None, None, None, &store)
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_find_and_intersects_per_field_indexes_when_no_single_index_covers_both() {
        let (_dir, queue, config) = setup();
        let creator = IndexCreator::new(&queue, &config, METADATA_TABLE);
        let first_name_index = creator
            .ensure_indexed(vec![FieldSpec::new("firstName")], Some("first_name".to_string()), IndexKind::Json, None, true)
            .unwrap();
        let age_index = creator
            .ensure_indexed(vec![FieldSpec::new("age")], Some("age".to_string()), IndexKind::Json, None, true)
            .unwrap();

        let defs = vec![
            IndexDefinition {
                name: first_name_index,
                kind: IndexKind::Json,
                fields: vec![FieldSpec::new("firstName")],
                settings: Default::default(),
                last_sequence: 0,
            },
            IndexDefinition {
                name: age_index,
                kind: IndexKind::Json,
                fields: vec![FieldSpec::new("age")],
                settings: Default::default(),
                last_sequence: 0,
            },
        ];

        let updater = IndexUpdater::new(&queue, &config, METADATA_TABLE);
        let store = MemoryDocumentStore::new();
        store
            .put("doc1", "1-a", 0, false, true, json!({"firstName": "Mike", "age": 40}))
            .unwrap();
        store
            .put("doc2", "1-a", 0, false, true, json!({"firstName": "Mike", "age": 21}))
            .unwrap();
        for def in &defs {
            updater.update_one(&def.name, &store).unwrap();
        }

        let executor = QueryExecutor::new(&queue, &config);
        let query = Query::And(vec![
            Query::Field("firstName".to_string(), Selector::Eq(json!("Mike"))),
            Query::Field("age".to_string(), Selector::Eq(json!(40))),
        ]);
        let results = executor.find(&query, &defs, 0, None, None, None, &store).unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "doc1");
    }

    #[test]
    fn test_flatten_rejects_nested_and_inside_or() {
        let nested = Query::Or(vec![Query::And(vec![
            Query::Field("a".to_string(), Selector::Eq(json!(1))),
            Query::Field("b".to_string(), Selector::Eq(json!(2))),
        ])]);
        assert!(matches!(flatten(&nested).unwrap_err(), crate::Error::InvalidQuery(..)));
    }
}
