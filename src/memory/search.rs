//! Search query composition shared by sessions and messages

use crate::codec::{decode, RowCodec};
use crate::error::{Result, TablememError};
use crate::model::{MetadataValue, SearchPage};
use crate::store::{Direction, SearchQuery, SearchRequest, SearchSort, TableStore};

use super::TimeRange;

/// Combine the optional partition, time window, and keyword conditions into
/// one query tree; zero conditions is a caller error
pub(crate) fn compose_search_query(
    partition_field: &str,
    partition: Option<&str>,
    time_field: &str,
    range: TimeRange,
    content_field: &str,
    keyword: Option<&str>,
) -> Result<SearchQuery> {
    let mut must = Vec::new();
    if let Some(partition) = partition {
        must.push(SearchQuery::Term {
            field: partition_field.to_string(),
            value: MetadataValue::Str(partition.to_string()),
        });
    }
    if !range.is_open() {
        must.push(SearchQuery::NumericRange {
            field: time_field.to_string(),
            from: range.start,
            to: range.end,
        });
    }
    if let Some(keyword) = keyword {
        must.push(SearchQuery::MatchPhrase {
            field: content_field.to_string(),
            text: keyword.to_string(),
        });
    }
    match must.len() {
        0 => Err(TablememError::Validation(
            "missing search conditions".to_string(),
        )),
        1 => Ok(must.remove(0)),
        _ => Ok(SearchQuery::Bool { must }),
    }
}

/// Run one search page, newest first on `time_field`
pub(crate) async fn run_search<S, T>(
    store: &S,
    table: &str,
    index: &str,
    query: SearchQuery,
    time_field: &str,
    page_size: usize,
    token: Option<Vec<u8>>,
) -> Result<SearchPage<T>>
where
    S: TableStore + ?Sized,
    T: RowCodec,
{
    let slice = store
        .search(SearchRequest {
            table: table.to_string(),
            index: index.to_string(),
            query,
            sort: SearchSort::Field {
                name: time_field.to_string(),
                direction: Direction::Backward,
            },
            limit: page_size,
            token,
        })
        .await?;
    Ok(SearchPage {
        hits: slice.rows.iter().map(decode::<T>).collect(),
        total: slice.total,
        next_token: slice.next_token,
    })
}
