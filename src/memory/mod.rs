//! Conversational memory persistence
//!
//! [`MemoryStore`] is the application-facing surface: session and message
//! CRUD, streaming and paginated listings, bulk deletion, and full-text
//! search, all expressed over the abstract [`TableStore`](crate::store::TableStore)
//! trait. Operations live in the `session` and `message` submodules; this
//! module holds the store itself and the option types they share.

mod message;
mod search;
mod session;

use std::sync::Arc;

use tracing::debug;

use crate::config::StoreConfig;
use crate::error::Result;
use crate::store::{ColumnPredicate, Direction, KeyValue, Precondition, TableStore};

/// Session and message persistence over an abstract ordered store
///
/// Cheap to clone; clones share the backend handle and each carry their own
/// config. All operations are `&self` and safe to invoke concurrently.
#[derive(Debug)]
pub struct MemoryStore<S: TableStore> {
    pub(crate) store: Arc<S>,
    pub(crate) config: StoreConfig,
}

impl<S: TableStore> Clone for MemoryStore<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
        }
    }
}

impl<S: TableStore + 'static> MemoryStore<S> {
    /// Wrap a backend with the default table and index names
    pub fn new(store: S) -> Self {
        Self::with_config(store, StoreConfig::default())
    }

    pub fn with_config(store: S, config: StoreConfig) -> Self {
        Self {
            store: Arc::new(store),
            config,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Remove one session together with all of its messages
    ///
    /// Messages go first so an interrupted call leaves the session visible
    /// for a retry. Returns the number of messages removed; a session that
    /// never existed is not an error here.
    pub async fn delete_session_and_messages(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<usize> {
        let removed = self.delete_messages(session_id).await?;
        self.store
            .delete_row(
                &self.config.session_table,
                crate::store::CompositeKey::new()
                    .field(crate::codec::fields::USER_ID, KeyValue::str(user_id))
                    .field(crate::codec::fields::SESSION_ID, KeyValue::str(session_id)),
                Precondition::IgnoreExisting,
            )
            .await
            .map_err(|e| e.with_context("delete session with messages"))?;
        debug!(user_id, session_id, removed, "session and messages removed");
        Ok(removed)
    }
}

/// Knobs shared by the listing operations
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Stop after roughly this many entities (whole pages are still emitted)
    pub max_count: Option<usize>,
    /// Explicit rows-per-request, overriding the derived page size
    pub batch_size: Option<usize>,
    /// Post-read column filter; filtered rows still consume request limits
    pub filter: Option<ColumnPredicate>,
}

/// Inclusive timestamp window; open ends span everything
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeRange {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl TimeRange {
    pub fn new(start: Option<i64>, end: Option<i64>) -> Self {
        Self { start, end }
    }

    pub fn is_open(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// The window's (from, to) in scan order for the given direction
    pub(crate) fn scan_span(&self, direction: Direction) -> (Option<KeyValue>, Option<KeyValue>) {
        let start = self.start.map(KeyValue::int);
        let end = self.end.map(KeyValue::int);
        match direction {
            Direction::Forward => (start, end),
            Direction::Backward => (end, start),
        }
    }
}
