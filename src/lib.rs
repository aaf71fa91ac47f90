//! Session and message persistence over an ordered wide-column store.
//!
//! The crate stores conversational memory, sessions and the messages inside
//! them, against any backend implementing the [`store::TableStore`] trait:
//! composite-primary-key tables, inclusive range queries with continuation
//! keys, bounded batch writes, and full-text search indexes. An in-memory
//! backend ships for tests and local development.
//!
//! ```no_run
//! use tablemem::{InMemoryTableStore, MemoryStore, Session};
//!
//! # async fn demo() -> tablemem::Result<()> {
//! let store = MemoryStore::new(InMemoryTableStore::new());
//! store.put_session(&Session::new("user_1", "session_1")).await?;
//! let session = store.get_session("user_1", "session_1").await?;
//! assert_eq!(session.session_id, "session_1");
//! # Ok(())
//! # }
//! ```
//!
//! Reads come in three shapes built on the same range-query engine: streams
//! that pull pages lazily and stop when dropped, single stateless pages
//! carrying a self-describing continuation key, and bounded collections.
//! Bulk deletion chunks its writes to the store's batch ceiling; partial
//! progress on failure is reported, not rolled back.

pub mod batch;
pub mod codec;
pub mod config;
pub mod error;
pub mod index;
pub mod memory;
pub mod model;
pub mod scan;
pub mod store;

pub use codec::RowCodec;
pub use config::StoreConfig;
pub use error::{Result, TablememError};
pub use memory::{ListOptions, MemoryStore, TimeRange};
pub use model::{Message, Metadata, MetadataValue, Page, SearchPage, Session};
pub use scan::{effective_page_size, RangeBoundsBuilder, ScanParams, MAX_SCAN_PAGE};
pub use store::{
    ColumnPredicate, CompareOp, CompositeKey, Direction, InMemoryTableStore, KeyValue,
    TableStore, MAX_BATCH_WRITE_OPS,
};
