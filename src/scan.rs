//! Key-range scanning and pagination
//!
//! Three read shapes over the same range-query primitive:
//!
//! - [`scan_stream`] pulls pages in a background task and yields decoded
//!   entities over a bounded channel, stopping as soon as the receiver is
//!   dropped. Mid-stream store failures surface as a final `Err` item.
//! - [`scan_page`] issues exactly one request and returns the page together
//!   with the continuation key, for stateless request/response pagination.
//! - [`scan_collect`] drains a bounded range into a `Vec`.
//!
//! Bounds are built with [`RangeBoundsBuilder`], which pins leading key
//! fields to concrete values and fills open fields with the sentinels that
//! match the scan direction.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::codec::{decode, RowCodec};
use crate::error::Result;
use crate::model::Page;
use crate::store::{
    ColumnPredicate, CompositeKey, Direction, KeyValue, RangeQuery, TableStore,
};

/// Store-imposed ceiling on rows read by one range request
pub const MAX_SCAN_PAGE: usize = 5000;

/// Rows to request per page
///
/// An explicit `batch_size` wins. Otherwise the size is derived from
/// `max_count`, inflated by 30% when a post-read filter is present since
/// filtered-out rows still consume the request limit. Either way the result
/// is clamped to `1..=MAX_SCAN_PAGE`; a zero request limit would make the
/// store return an empty slice that still carries a continuation key, and
/// the scan would never advance. With neither given, pages are as large as
/// the store allows.
pub fn effective_page_size(
    batch_size: Option<usize>,
    max_count: Option<usize>,
    filtered: bool,
) -> usize {
    if let Some(size) = batch_size {
        return size.clamp(1, MAX_SCAN_PAGE);
    }
    match max_count {
        Some(count) => {
            let wanted = if filtered {
                (count as f64 * 1.3) as usize
            } else {
                count
            };
            wanted.clamp(1, MAX_SCAN_PAGE)
        }
        None => MAX_SCAN_PAGE,
    }
}

/// Builds the inclusive start/end keys of a directional range sweep
///
/// Fields must be added in the table's key order. A pinned field holds the
/// same concrete value on both bounds; an open field holds the lowest
/// possible value on the start bound and the highest on the end bound, with
/// "lowest" and "highest" swapped for backward scans. Trailing fields not
/// mentioned stay open, so pinning a prefix spans every row under it.
#[derive(Debug, Clone)]
pub struct RangeBoundsBuilder {
    start: CompositeKey,
    end: CompositeKey,
    direction: Direction,
}

impl RangeBoundsBuilder {
    pub fn new(direction: Direction) -> Self {
        Self {
            start: CompositeKey::new(),
            end: CompositeKey::new(),
            direction,
        }
    }

    fn sentinels(&self) -> (KeyValue, KeyValue) {
        match self.direction {
            Direction::Forward => (KeyValue::Min, KeyValue::Max),
            Direction::Backward => (KeyValue::Max, KeyValue::Min),
        }
    }

    /// Pin a field to one concrete value on both bounds
    pub fn pinned(mut self, name: &str, value: KeyValue) -> Self {
        self.start.push(name, value.clone());
        self.end.push(name, value);
        self
    }

    /// Leave a field spanning its whole domain
    pub fn open(mut self, name: &str) -> Self {
        let (low, high) = self.sentinels();
        self.start.push(name, low);
        self.end.push(name, high);
        self
    }

    /// Constrain a field to an inclusive sub-range in scan order; an open
    /// end falls back to the directional sentinel
    pub fn span(mut self, name: &str, from: Option<KeyValue>, to: Option<KeyValue>) -> Self {
        let (low, high) = self.sentinels();
        self.start.push(name, from.unwrap_or(low));
        self.end.push(name, to.unwrap_or(high));
        self
    }

    pub fn build(self) -> (CompositeKey, CompositeKey) {
        (self.start, self.end)
    }
}

/// Everything one scan needs, independent of the entity type
#[derive(Debug, Clone)]
pub struct ScanParams {
    pub table: String,
    pub start: CompositeKey,
    pub end: CompositeKey,
    pub direction: Direction,
    /// Stop after roughly this many entities; checked between pages, so a
    /// few extra rows from the final page may still be emitted
    pub max_count: Option<usize>,
    /// Explicit per-request page size, overriding the derived one
    pub batch_size: Option<usize>,
    pub filter: Option<ColumnPredicate>,
}

/// Stream a key range as decoded entities
///
/// A background task walks the range page by page. The channel holds one
/// page, so at most one page is fetched ahead of the consumer, and dropping
/// the stream stops the walk after the in-flight request.
pub fn scan_stream<S, T>(store: Arc<S>, params: ScanParams) -> ReceiverStream<Result<T>>
where
    S: TableStore + 'static,
    T: RowCodec,
{
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        let page_size = effective_page_size(
            params.batch_size,
            params.max_count,
            params.filter.is_some(),
        );
        let mut start = params.start.clone();
        let mut emitted = 0usize;
        loop {
            if tx.is_closed() {
                debug!(table = %params.table, "scan consumer gone, stopping");
                return;
            }
            let query = RangeQuery {
                table: params.table.clone(),
                start,
                end: params.end.clone(),
                direction: params.direction,
                limit: page_size,
                filter: params.filter.clone(),
            };
            let slice = match store.range_query(query).await {
                Ok(slice) => slice,
                Err(e) => {
                    warn!(table = %params.table, error = %e, "range scan failed");
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };
            for row in &slice.rows {
                if tx.send(Ok(decode::<T>(row))).await.is_err() {
                    return;
                }
            }
            emitted += slice.rows.len();
            if params.max_count.is_some_and(|max| emitted >= max) {
                return;
            }
            match slice.next_start {
                Some(next) => start = next,
                None => return,
            }
        }
    });
    ReceiverStream::new(rx)
}

/// Read exactly one page of a key range
///
/// Stateless: the caller carries `page.next_key` and passes it back as
/// `start` to resume, across requests or processes.
pub async fn scan_page<S, T>(
    store: &S,
    table: &str,
    start: CompositeKey,
    end: CompositeKey,
    direction: Direction,
    page_size: usize,
    filter: Option<ColumnPredicate>,
) -> Result<Page<T>>
where
    S: TableStore + ?Sized,
    T: RowCodec,
{
    let slice = store
        .range_query(RangeQuery {
            table: table.to_string(),
            start,
            end,
            direction,
            limit: page_size.clamp(1, MAX_SCAN_PAGE),
            filter,
        })
        .await?;
    Ok(Page {
        hits: slice.rows.iter().map(decode::<T>).collect(),
        next_key: slice.next_start,
    })
}

/// Drain a key range into a `Vec`, page by page
pub async fn scan_collect<S, T>(store: &S, params: ScanParams) -> Result<Vec<T>>
where
    S: TableStore + ?Sized,
    T: RowCodec,
{
    let page_size = effective_page_size(
        params.batch_size,
        params.max_count,
        params.filter.is_some(),
    );
    let mut hits = Vec::new();
    let mut start = params.start;
    loop {
        let slice = store
            .range_query(RangeQuery {
                table: params.table.clone(),
                start,
                end: params.end.clone(),
                direction: params.direction,
                limit: page_size,
                filter: params.filter.clone(),
            })
            .await?;
        hits.extend(slice.rows.iter().map(decode::<T>));
        if params.max_count.is_some_and(|max| hits.len() >= max) {
            hits.truncate(params.max_count.unwrap_or(hits.len()));
            return Ok(hits);
        }
        match slice.next_start {
            Some(next) => start = next,
            None => return Ok(hits),
        }
    }
}
