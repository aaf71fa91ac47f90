//! Session operations

use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::debug;

use crate::codec::{fields, RowCodec};
use crate::error::{Result, TablememError};
use crate::model::{Page, SearchPage, Session};
use crate::scan::{scan_collect, scan_page, scan_stream, RangeBoundsBuilder, ScanParams};
use crate::store::{
    BatchWriteOp, ColumnPredicate, CompositeKey, Direction, KeyValue, Precondition, TableStore,
};

use super::search::{compose_search_query, run_search};
use super::{ListOptions, MemoryStore, TimeRange};

impl<S: TableStore + 'static> MemoryStore<S> {
    /// Write a session, overwriting any existing row with the same key
    pub async fn put_session(&self, session: &Session) -> Result<()> {
        session.validate()?;
        self.store
            .put_row(
                &self.config.session_table,
                session.primary_key(),
                session.encode_columns(),
                Precondition::IgnoreExisting,
            )
            .await
            .map_err(|e| e.with_context("put session"))?;
        debug!(user_id = %session.user_id, session_id = %session.session_id, "session written");
        Ok(())
    }

    /// Fetch one session by full primary key
    pub async fn get_session(&self, user_id: &str, session_id: &str) -> Result<Session> {
        let (start, end) = RangeBoundsBuilder::new(Direction::Forward)
            .pinned(fields::USER_ID, KeyValue::str(user_id))
            .pinned(fields::SESSION_ID, KeyValue::str(session_id))
            .build();
        let mut page: Page<Session> = scan_page(
            self.store.as_ref(),
            &self.config.session_table,
            start,
            end,
            Direction::Forward,
            1,
            None,
        )
        .await
        .map_err(|e| e.with_context("get session"))?;
        page.hits
            .pop()
            .ok_or_else(|| TablememError::NotFound(format!("session {user_id}/{session_id}")))
    }

    /// Re-read the stored session and apply column-level changes
    ///
    /// Metadata keys present before but absent now become column deletions,
    /// so removing a map entry actually removes the stored column.
    pub async fn update_session(&self, session: &Session) -> Result<()> {
        session.validate()?;
        let previous = self
            .get_session(&session.user_id, &session.session_id)
            .await?;
        let (upserts, deletions) = session.update_mutation(&previous);
        self.store
            .update_row(
                &self.config.session_table,
                session.primary_key(),
                upserts,
                deletions,
                Precondition::MustExist,
            )
            .await
            .map_err(|e| e.with_context("update session"))
    }

    /// Delete one session; the row must exist
    pub async fn delete_session(&self, user_id: &str, session_id: &str) -> Result<()> {
        self.store
            .delete_row(
                &self.config.session_table,
                CompositeKey::new()
                    .field(fields::USER_ID, KeyValue::str(user_id))
                    .field(fields::SESSION_ID, KeyValue::str(session_id)),
                Precondition::MustExist,
            )
            .await
            .map_err(|e| e.with_context("delete session"))
    }

    /// Delete every session of one user; returns how many were removed
    pub async fn delete_sessions(&self, user_id: &str) -> Result<usize> {
        self.delete_sessions_in(Some(user_id)).await
    }

    /// Delete every session in the table
    pub async fn delete_all_sessions(&self) -> Result<usize> {
        self.delete_sessions_in(None).await
    }

    async fn delete_sessions_in(&self, user_id: Option<&str>) -> Result<usize> {
        let mut stream = self.list_sessions(user_id, ListOptions::default());
        let mut mutator = crate::batch::BatchMutator::new(self.store.as_ref());
        while let Some(session) = stream.next().await {
            let session = session?;
            mutator
                .push(BatchWriteOp::Delete {
                    table: self.config.session_table.clone(),
                    key: session.primary_key(),
                })
                .await?;
        }
        let removed = mutator.finish().await?;
        debug!(user_id = user_id.unwrap_or("*"), removed, "sessions removed");
        Ok(removed)
    }

    /// Stream sessions in key order, optionally restricted to one user
    ///
    /// Dropping the stream cancels the underlying scan. A store failure
    /// mid-scan ends the stream with one `Err` item.
    pub fn list_sessions(
        &self,
        user_id: Option<&str>,
        opts: ListOptions,
    ) -> ReceiverStream<Result<Session>> {
        let mut bounds = RangeBoundsBuilder::new(Direction::Forward);
        bounds = match user_id {
            Some(user_id) => bounds.pinned(fields::USER_ID, KeyValue::str(user_id)),
            None => bounds.open(fields::USER_ID),
        };
        let (start, end) = bounds.open(fields::SESSION_ID).build();
        scan_stream(
            self.store.clone(),
            ScanParams {
                table: self.config.session_table.clone(),
                start,
                end,
                direction: Direction::Forward,
                max_count: opts.max_count,
                batch_size: opts.batch_size,
                filter: opts.filter,
            },
        )
    }

    pub fn list_all_sessions(&self, opts: ListOptions) -> ReceiverStream<Result<Session>> {
        self.list_sessions(None, opts)
    }

    fn recent_session_bounds(
        &self,
        user_id: &str,
        range: TimeRange,
    ) -> (CompositeKey, CompositeKey) {
        let (from, to) = range.scan_span(Direction::Backward);
        RangeBoundsBuilder::new(Direction::Backward)
            .pinned(fields::USER_ID, KeyValue::str(user_id))
            .span(fields::UPDATE_TIME, from, to)
            .open(fields::SESSION_ID)
            .build()
    }

    /// A user's sessions, most recently updated first
    ///
    /// Served from the secondary index ordered by
    /// (user_id, update_time, session_id).
    pub async fn list_recent_sessions(
        &self,
        user_id: &str,
        range: TimeRange,
        opts: ListOptions,
    ) -> Result<Vec<Session>> {
        let (start, end) = self.recent_session_bounds(user_id, range);
        scan_collect(
            self.store.as_ref(),
            ScanParams {
                table: self.config.session_secondary_index.clone(),
                start,
                end,
                direction: Direction::Backward,
                max_count: opts.max_count,
                batch_size: opts.batch_size,
                filter: opts.filter,
            },
        )
        .await
        .map_err(|e| e.with_context("list recent sessions"))
    }

    /// One page of [`list_recent_sessions`](Self::list_recent_sessions)
    ///
    /// Pass the returned `next_key` back as `next_key` to resume; the call
    /// itself holds no state between pages. A filter is applied after rows
    /// are read, so filtered-out rows still count against `page_size`.
    pub async fn list_recent_sessions_paginated(
        &self,
        user_id: &str,
        range: TimeRange,
        page_size: usize,
        next_key: Option<CompositeKey>,
        filter: Option<ColumnPredicate>,
    ) -> Result<Page<Session>> {
        let (start, end) = self.recent_session_bounds(user_id, range);
        scan_page(
            self.store.as_ref(),
            &self.config.session_secondary_index,
            next_key.unwrap_or(start),
            end,
            Direction::Backward,
            page_size,
            filter,
        )
        .await
        .map_err(|e| e.with_context("list recent sessions page"))
    }

    /// Full-text search over sessions, newest first
    ///
    /// At least one of `user_id`, `keyword`, or a bounded `range` must be
    /// given. `token` resumes a previous page.
    pub async fn search_sessions(
        &self,
        user_id: Option<&str>,
        keyword: Option<&str>,
        range: TimeRange,
        page_size: usize,
        token: Option<Vec<u8>>,
    ) -> Result<SearchPage<Session>> {
        let query = compose_search_query(
            fields::USER_ID,
            user_id,
            fields::UPDATE_TIME,
            range,
            fields::SEARCH_CONTENT,
            keyword,
        )?;
        run_search(
            self.store.as_ref(),
            &self.config.session_table,
            &self.config.session_search_index,
            query,
            fields::UPDATE_TIME,
            page_size,
            token,
        )
        .await
        .map_err(|e| e.with_context("search sessions"))
    }
}
