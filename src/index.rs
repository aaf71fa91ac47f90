//! Secondary-index point lookups
//!
//! Resolves an entity through a secondary index when the caller cannot
//! supply the full primary key. The index is swept with the known fields
//! pinned and the missing one open, asking for two rows so that a second
//! hit can be told apart from a unique one.

use tracing::debug;

use crate::codec::{decode, RowCodec};
use crate::error::{Result, TablememError};
use crate::scan::RangeBoundsBuilder;
use crate::store::{Direction, KeyValue, RangeQuery, TableStore};

/// Find exactly one entity by pinned index fields
///
/// Zero hits is [`TablememError::NotFound`]; more than one is
/// [`TablememError::AmbiguousIndex`], since the caller would have no basis
/// for picking among them. `context` names the entity for the error message.
pub async fn resolve_unique<S, T>(
    store: &S,
    index_table: &str,
    pinned: Vec<(String, KeyValue)>,
    open_field: &str,
    context: &str,
) -> Result<T>
where
    S: TableStore + ?Sized,
    T: RowCodec,
{
    let mut bounds = RangeBoundsBuilder::new(Direction::Forward);
    for (name, value) in pinned {
        bounds = bounds.pinned(&name, value);
    }
    let (start, end) = bounds.open(open_field).build();

    let slice = store
        .range_query(RangeQuery {
            table: index_table.to_string(),
            start,
            end,
            direction: Direction::Forward,
            limit: 2,
            filter: None,
        })
        .await?;
    debug!(index = %index_table, hits = slice.rows.len(), "index lookup");
    match slice.rows.len() {
        0 => Err(TablememError::NotFound(context.to_string())),
        1 => Ok(decode(&slice.rows[0])),
        _ => Err(TablememError::AmbiguousIndex(context.to_string())),
    }
}
