//! Core entity types: sessions, messages, metadata, and paged responses
//!
//! Entities are value objects: constructed in memory, mutated through plain
//! field access and methods, and persisted by an explicit write call. The
//! store has no notion of object identity between calls; `Clone` deep-copies
//! the metadata map.

mod message;
mod metadata;
mod page;
mod session;

pub use message::Message;
pub use metadata::{Metadata, MetadataValue};
pub use page::{Page, SearchPage};
pub use session::Session;

/// Current wall-clock time in microseconds since the epoch
pub fn current_time_micros() -> i64 {
    chrono::Utc::now().timestamp_micros()
}
