//! Abstract ordered wide-column store
//!
//! The persistence layer is written against the [`TableStore`] trait: an
//! externally supplied store exposing composite-primary-key tables, range
//! queries with continuation keys, bounded batch writes, and full-text search
//! indexes. There is deliberately no point-get operation; single-entity
//! reads are fully pinned range queries with a limit of 1.
//!
//! Schema provisioning (tables, indexes) is not part of this surface; it
//! belongs to whatever provisions the store itself.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::MetadataValue;

pub use memory::InMemoryTableStore;

/// Store-imposed ceiling on entries in one batch-write call
pub const MAX_BATCH_WRITE_OPS: usize = 200;

/// One component of a composite key
///
/// `Min` and `Max` are sentinels meaning "lowest/highest possible value of
/// this field"; they appear only in scan bounds, never in stored rows. The
/// derived ordering places `Min` below and `Max` above every concrete value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyValue {
    Min,
    Int(i64),
    Str(String),
    Max,
}

impl KeyValue {
    pub fn str(v: impl Into<String>) -> Self {
        KeyValue::Str(v.into())
    }

    pub fn int(v: i64) -> Self {
        KeyValue::Int(v)
    }
}

/// Ordered, named key fields identifying a row and its sort position
///
/// Comparison is lexicographic over the fields, which within one table all
/// carry the same names in the same positions, so ordering is effectively
/// by value, field by field.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CompositeKey {
    fields: Vec<(String, KeyValue)>,
}

impl CompositeKey {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a key field (builder-style)
    pub fn field(mut self, name: impl Into<String>, value: KeyValue) -> Self {
        self.fields.push((name.into(), value));
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: KeyValue) {
        self.fields.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&KeyValue> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &KeyValue)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A named attribute column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub value: MetadataValue,
}

impl Column {
    pub fn new(name: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A row returned by a range query or search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub key: CompositeKey,
    pub columns: Vec<Column>,
}

/// Scan direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forward,
    Backward,
}

/// Row-existence expectation attached to a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// Upsert-like: succeed regardless of existing state
    IgnoreExisting,
    /// The row must already exist
    MustExist,
}

/// Comparison applied to one column of each scanned row
///
/// Filters run server-side after rows are read, so filtered-out rows still
/// consume the request's row limit, which is why scan page sizes are inflated
/// when a filter is present.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnPredicate {
    pub column: String,
    pub op: CompareOp,
    pub value: MetadataValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl ColumnPredicate {
    pub fn new(column: impl Into<String>, op: CompareOp, value: impl Into<MetadataValue>) -> Self {
        Self {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    /// Evaluate against a row; a missing or incomparable column never matches
    pub fn matches(&self, key: &CompositeKey, columns: &[Column]) -> bool {
        let Some(actual) = row_scalar(key, columns, &self.column) else {
            return false;
        };
        let Some(ordering) = compare_scalars(&actual, &self.value) else {
            return false;
        };
        match self.op {
            CompareOp::Eq => ordering.is_eq(),
            CompareOp::Ne => ordering.is_ne(),
            CompareOp::Gt => ordering.is_gt(),
            CompareOp::Ge => ordering.is_ge(),
            CompareOp::Lt => ordering.is_lt(),
            CompareOp::Le => ordering.is_le(),
        }
    }
}

/// Look up a field by name in the key, then in the columns
pub(crate) fn row_scalar(
    key: &CompositeKey,
    columns: &[Column],
    name: &str,
) -> Option<MetadataValue> {
    if let Some(kv) = key.get(name) {
        return match kv {
            KeyValue::Str(s) => Some(MetadataValue::Str(s.clone())),
            KeyValue::Int(i) => Some(MetadataValue::I64(*i)),
            KeyValue::Min | KeyValue::Max => None,
        };
    }
    columns
        .iter()
        .find(|c| c.name == name)
        .map(|c| c.value.clone())
}

/// Compare two scalars of compatible kinds; integers of different widths are
/// promoted, everything else must match kinds exactly
pub(crate) fn compare_scalars(
    a: &MetadataValue,
    b: &MetadataValue,
) -> Option<std::cmp::Ordering> {
    use MetadataValue::*;
    match (a, b) {
        (Str(x), Str(y)) => Some(x.cmp(y)),
        (Bool(x), Bool(y)) => Some(x.cmp(y)),
        (Bytes(x), Bytes(y)) => Some(x.cmp(y)),
        (I32(_) | I64(_), I32(_) | I64(_)) => {
            let (x, y) = (a.as_i64()?, b.as_i64()?);
            Some(x.cmp(&y))
        }
        (F32(_) | F64(_), F32(_) | F64(_)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        _ => None,
    }
}

/// One entry of a batch write
#[derive(Debug, Clone)]
pub enum BatchWriteOp {
    Put {
        table: String,
        key: CompositeKey,
        columns: Vec<Column>,
    },
    Delete {
        table: String,
        key: CompositeKey,
    },
}

/// One range-query request
#[derive(Debug, Clone)]
pub struct RangeQuery {
    pub table: String,
    /// Inclusive start of the sweep (the higher key when scanning backward)
    pub start: CompositeKey,
    /// Inclusive end of the sweep
    pub end: CompositeKey,
    pub direction: Direction,
    /// Maximum rows *read* by this request
    pub limit: usize,
    pub filter: Option<ColumnPredicate>,
}

/// Result of one range-query request
#[derive(Debug, Clone)]
pub struct RangeSlice {
    pub rows: Vec<Row>,
    /// Key the next request should start from; absent when exhausted
    pub next_start: Option<CompositeKey>,
}

/// Full-text query tree
#[derive(Debug, Clone)]
pub enum SearchQuery {
    /// Exact match on a keyword field
    Term { field: String, value: MetadataValue },
    /// Inclusive numeric range; open ends span the whole field
    NumericRange {
        field: String,
        from: Option<i64>,
        to: Option<i64>,
    },
    /// Phrase match on an analyzed text field
    MatchPhrase { field: String, text: String },
    /// All sub-queries must match
    Bool { must: Vec<SearchQuery> },
}

/// Result ordering for search requests
#[derive(Debug, Clone, Default)]
pub enum SearchSort {
    /// Most relevant first (store-defined scoring)
    #[default]
    Relevance,
    Field { name: String, direction: Direction },
}

/// One search request against a full-text index
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub table: String,
    pub index: String,
    pub query: SearchQuery,
    pub sort: SearchSort,
    pub limit: usize,
    /// Opaque token from a previous page
    pub token: Option<Vec<u8>>,
}

/// Result of one search request
#[derive(Debug, Clone)]
pub struct SearchSlice {
    pub rows: Vec<Row>,
    pub total: usize,
    pub next_token: Option<Vec<u8>>,
}

/// Client surface of the ordered wide-column store
///
/// Every operation is independently invokable by any number of concurrent
/// callers; implementations hold no per-call mutable state.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Write a full row
    async fn put_row(
        &self,
        table: &str,
        key: CompositeKey,
        columns: Vec<Column>,
        precondition: Precondition,
    ) -> Result<()>;

    /// Upsert and delete individual columns of an existing row
    async fn update_row(
        &self,
        table: &str,
        key: CompositeKey,
        upserts: Vec<Column>,
        deletions: Vec<String>,
        precondition: Precondition,
    ) -> Result<()>;

    /// Delete a row
    async fn delete_row(
        &self,
        table: &str,
        key: CompositeKey,
        precondition: Precondition,
    ) -> Result<()>;

    /// Apply up to [`MAX_BATCH_WRITE_OPS`] mutations as one call
    async fn batch_write(&self, ops: Vec<BatchWriteOp>) -> Result<()>;

    /// Read one inclusive key-range slice
    async fn range_query(&self, query: RangeQuery) -> Result<RangeSlice>;

    /// Query a full-text index
    async fn search(&self, request: SearchRequest) -> Result<SearchSlice>;
}
