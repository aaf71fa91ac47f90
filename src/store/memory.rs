//! In-memory reference backend
//!
//! A `BTreeMap`-backed [`TableStore`] used by the test suite and for local
//! development. It honors the semantics the persistence layer depends on:
//! inclusive directional range scans with continuation keys, post-read
//! filtering that still consumes the request limit, precondition
//! enforcement, the batch-write ceiling, and locally maintained secondary
//! index projections.
//!
//! Index and search-index definitions are registered at construction; there
//! are no schema operations on the trait itself.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{Result, TablememError};
use crate::model::MetadataValue;

use super::{
    compare_scalars, row_scalar, BatchWriteOp, Column, CompositeKey, Direction, KeyValue,
    Precondition, RangeQuery, RangeSlice, Row, SearchQuery, SearchRequest, SearchSlice,
    SearchSort, TableStore, MAX_BATCH_WRITE_OPS,
};

type ColumnMap = BTreeMap<String, MetadataValue>;
type TableData = BTreeMap<CompositeKey, ColumnMap>;

/// A local secondary index: rows of the base table re-keyed by `key_fields`
#[derive(Debug, Clone)]
struct IndexProjection {
    index_table: String,
    key_fields: Vec<String>,
}

#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<String, TableData>,
    /// Base table -> index projections maintained on every mutation
    indexes: HashMap<String, Vec<IndexProjection>>,
    /// Base table -> registered search index names
    search_indexes: HashMap<String, HashSet<String>>,
}

/// In-memory [`TableStore`] implementation
#[derive(Debug, Default)]
pub struct InMemoryTableStore {
    inner: RwLock<Inner>,
}

impl InMemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a local secondary index over `base_table`, keyed by
    /// `key_fields` (drawn from the base key fields and columns)
    pub fn with_index(mut self, base_table: &str, index_table: &str, key_fields: &[&str]) -> Self {
        self.inner
            .get_mut()
            .indexes
            .entry(base_table.to_string())
            .or_default()
            .push(IndexProjection {
                index_table: index_table.to_string(),
                key_fields: key_fields.iter().map(|s| s.to_string()).collect(),
            });
        self
    }

    /// Register a full-text search index over `base_table`
    pub fn with_search_index(mut self, base_table: &str, index_name: &str) -> Self {
        self.inner
            .get_mut()
            .search_indexes
            .entry(base_table.to_string())
            .or_default()
            .insert(index_name.to_string());
        self
    }
}

fn column_to_key(value: &MetadataValue) -> Option<KeyValue> {
    match value {
        MetadataValue::Str(s) => Some(KeyValue::Str(s.clone())),
        MetadataValue::I64(i) => Some(KeyValue::Int(*i)),
        MetadataValue::I32(i) => Some(KeyValue::Int(i64::from(*i))),
        _ => None,
    }
}

/// Re-key a base row for an index; None when a key field is absent (the row
/// is simply not indexed, as with an unset indexed column)
fn index_key_for(
    projection: &IndexProjection,
    base_key: &CompositeKey,
    columns: &ColumnMap,
) -> Option<CompositeKey> {
    let mut key = CompositeKey::new();
    for field in &projection.key_fields {
        let value = match base_key.get(field) {
            Some(v) => v.clone(),
            None => column_to_key(columns.get(field)?)?,
        };
        key.push(field.clone(), value);
    }
    Some(key)
}

impl Inner {
    fn projections_for(&self, table: &str) -> Vec<IndexProjection> {
        self.indexes.get(table).cloned().unwrap_or_default()
    }

    fn deindex(&mut self, table: &str, base_key: &CompositeKey, columns: &ColumnMap) {
        for projection in self.projections_for(table) {
            if let Some(index_key) = index_key_for(&projection, base_key, columns) {
                if let Some(index_table) = self.tables.get_mut(&projection.index_table) {
                    index_table.remove(&index_key);
                }
            }
        }
    }

    fn reindex(&mut self, table: &str, base_key: &CompositeKey, columns: &ColumnMap) {
        for projection in self.projections_for(table) {
            if let Some(index_key) = index_key_for(&projection, base_key, columns) {
                self.tables
                    .entry(projection.index_table.clone())
                    .or_default()
                    .insert(index_key, columns.clone());
            }
        }
    }

    fn apply_put(&mut self, table: &str, key: CompositeKey, columns: ColumnMap) {
        if let Some(old) = self
            .tables
            .get(table)
            .and_then(|t| t.get(&key))
            .cloned()
        {
            self.deindex(table, &key, &old);
        }
        self.tables
            .entry(table.to_string())
            .or_default()
            .insert(key.clone(), columns.clone());
        self.reindex(table, &key, &columns);
    }

    fn apply_delete(&mut self, table: &str, key: &CompositeKey) {
        let old = self
            .tables
            .get_mut(table)
            .and_then(|t| t.remove(key));
        if let Some(columns) = old {
            self.deindex(table, key, &columns);
        }
    }

    fn row_exists(&self, table: &str, key: &CompositeKey) -> bool {
        self.tables
            .get(table)
            .is_some_and(|t| t.contains_key(key))
    }
}

fn column_map(columns: Vec<Column>) -> ColumnMap {
    columns.into_iter().map(|c| (c.name, c.value)).collect()
}

fn make_row(key: &CompositeKey, columns: &ColumnMap) -> Row {
    Row {
        key: key.clone(),
        columns: columns
            .iter()
            .map(|(n, v)| Column {
                name: n.clone(),
                value: v.clone(),
            })
            .collect(),
    }
}

fn search_matches(query: &SearchQuery, key: &CompositeKey, columns: &[Column]) -> bool {
    match query {
        SearchQuery::Term { field, value } => row_scalar(key, columns, field)
            .and_then(|actual| compare_scalars(&actual, value))
            .is_some_and(|ord| ord.is_eq()),
        SearchQuery::NumericRange { field, from, to } => {
            match row_scalar(key, columns, field).and_then(|v| v.as_i64()) {
                Some(n) => from.is_none_or(|f| n >= f) && to.is_none_or(|t| n <= t),
                None => false,
            }
        }
        SearchQuery::MatchPhrase { field, text } => match row_scalar(key, columns, field) {
            Some(MetadataValue::Str(s)) => s.contains(text.as_str()),
            _ => false,
        },
        SearchQuery::Bool { must } => must.iter().all(|q| search_matches(q, key, columns)),
    }
}

fn decode_token(token: &[u8]) -> Result<usize> {
    let bytes: [u8; 8] = token
        .try_into()
        .map_err(|_| TablememError::store("search", "malformed continuation token"))?;
    Ok(u64::from_be_bytes(bytes) as usize)
}

#[async_trait]
impl TableStore for InMemoryTableStore {
    async fn put_row(
        &self,
        table: &str,
        key: CompositeKey,
        columns: Vec<Column>,
        precondition: Precondition,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        if precondition == Precondition::MustExist && !inner.row_exists(table, &key) {
            return Err(TablememError::NotFound(format!(
                "row in table '{table}'"
            )));
        }
        inner.apply_put(table, key, column_map(columns));
        Ok(())
    }

    async fn update_row(
        &self,
        table: &str,
        key: CompositeKey,
        upserts: Vec<Column>,
        deletions: Vec<String>,
        precondition: Precondition,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let existing = inner.tables.get(table).and_then(|t| t.get(&key)).cloned();
        if precondition == Precondition::MustExist && existing.is_none() {
            return Err(TablememError::NotFound(format!(
                "row in table '{table}'"
            )));
        }
        let mut columns = existing.unwrap_or_default();
        for column in upserts {
            columns.insert(column.name, column.value);
        }
        for name in deletions {
            columns.remove(&name);
        }
        inner.apply_put(table, key, columns);
        Ok(())
    }

    async fn delete_row(
        &self,
        table: &str,
        key: CompositeKey,
        precondition: Precondition,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        if precondition == Precondition::MustExist && !inner.row_exists(table, &key) {
            return Err(TablememError::NotFound(format!(
                "row in table '{table}'"
            )));
        }
        inner.apply_delete(table, &key);
        Ok(())
    }

    async fn batch_write(&self, ops: Vec<BatchWriteOp>) -> Result<()> {
        if ops.len() > MAX_BATCH_WRITE_OPS {
            return Err(TablememError::store(
                "batch write",
                format!(
                    "{} entries exceed the {MAX_BATCH_WRITE_OPS}-entry limit",
                    ops.len()
                ),
            ));
        }
        let mut inner = self.inner.write().await;
        for op in ops {
            match op {
                BatchWriteOp::Put {
                    table,
                    key,
                    columns,
                } => inner.apply_put(&table, key, column_map(columns)),
                BatchWriteOp::Delete { table, key } => inner.apply_delete(&table, &key),
            }
        }
        Ok(())
    }

    async fn range_query(&self, query: RangeQuery) -> Result<RangeSlice> {
        let inner = self.inner.read().await;
        let Some(table) = inner.tables.get(&query.table) else {
            return Ok(RangeSlice {
                rows: Vec::new(),
                next_start: None,
            });
        };

        let (lower, upper) = match query.direction {
            Direction::Forward => (&query.start, &query.end),
            Direction::Backward => (&query.end, &query.start),
        };
        if lower > upper {
            return Ok(RangeSlice {
                rows: Vec::new(),
                next_start: None,
            });
        }

        let range = table.range((
            Bound::Included(lower.clone()),
            Bound::Included(upper.clone()),
        ));
        let mut rows = Vec::new();
        let mut next_start = None;
        let mut read = 0usize;

        let mut visit = |key: &CompositeKey, columns: &ColumnMap| -> bool {
            if read == query.limit {
                next_start = Some(key.clone());
                return false;
            }
            read += 1;
            let row = make_row(key, columns);
            match &query.filter {
                Some(predicate) if !predicate.matches(&row.key, &row.columns) => {}
                _ => rows.push(row),
            }
            true
        };

        match query.direction {
            Direction::Forward => {
                for (key, columns) in range {
                    if !visit(key, columns) {
                        break;
                    }
                }
            }
            Direction::Backward => {
                for (key, columns) in range.rev() {
                    if !visit(key, columns) {
                        break;
                    }
                }
            }
        }

        Ok(RangeSlice { rows, next_start })
    }

    async fn search(&self, request: SearchRequest) -> Result<SearchSlice> {
        let inner = self.inner.read().await;
        let registered = inner
            .search_indexes
            .get(&request.table)
            .is_some_and(|set| set.contains(&request.index));
        if !registered {
            return Err(TablememError::store(
                "search",
                format!(
                    "no search index '{}' on table '{}'",
                    request.index, request.table
                ),
            ));
        }

        let mut matches: Vec<Row> = inner
            .tables
            .get(&request.table)
            .map(|table| {
                table
                    .iter()
                    .map(|(k, c)| make_row(k, c))
                    .filter(|row| search_matches(&request.query, &row.key, &row.columns))
                    .collect()
            })
            .unwrap_or_default();

        if let SearchSort::Field { name, direction } = &request.sort {
            matches.sort_by(|a, b| {
                let ord = match (
                    row_scalar(&a.key, &a.columns, name),
                    row_scalar(&b.key, &b.columns, name),
                ) {
                    (Some(x), Some(y)) => {
                        compare_scalars(&x, &y).unwrap_or(std::cmp::Ordering::Equal)
                    }
                    _ => std::cmp::Ordering::Equal,
                };
                match direction {
                    Direction::Forward => ord,
                    Direction::Backward => ord.reverse(),
                }
            });
        }

        let total = matches.len();
        let offset = match &request.token {
            Some(token) => decode_token(token)?,
            None => 0,
        };
        let hits: Vec<Row> = matches.into_iter().skip(offset).take(request.limit).collect();
        let consumed = offset + hits.len();
        let next_token = if consumed < total {
            Some((consumed as u64).to_be_bytes().to_vec())
        } else {
            None
        };

        Ok(SearchSlice {
            rows: hits,
            total,
            next_token,
        })
    }
}
