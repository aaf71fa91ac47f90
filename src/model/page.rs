//! Paged response types

use serde::{Deserialize, Serialize};

use crate::store::CompositeKey;

/// One page of a range scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub hits: Vec<T>,
    /// Where the next page starts; absent when the range is exhausted.
    ///
    /// The key is self-describing: any caller holding it can resume the
    /// scan, including across process restarts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_key: Option<CompositeKey>,
}

/// One page of full-text search results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchPage<T> {
    pub hits: Vec<T>,
    /// Total matches across all pages
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<Vec<u8>>,
}
