//! Message operations
//!
//! The message primary key is (session_id, create_time, message_id), which
//! keeps a session's messages physically ordered by time. Callers that know
//! only the message id reach the row through the secondary index ordered by
//! (session_id, message_id, create_time); a `create_time` of zero means
//! "unknown, resolve it for me".

use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::debug;

use crate::codec::{fields, RowCodec};
use crate::error::{Result, TablememError};
use crate::index::resolve_unique;
use crate::model::{Message, Page, SearchPage};
use crate::scan::{scan_page, scan_stream, RangeBoundsBuilder, ScanParams};
use crate::store::{
    BatchWriteOp, ColumnPredicate, CompositeKey, Direction, KeyValue, Precondition, TableStore,
};

use super::search::{compose_search_query, run_search};
use super::{ListOptions, MemoryStore, TimeRange};

impl<S: TableStore + 'static> MemoryStore<S> {
    /// Write a message, overwriting any existing row with the same key
    pub async fn put_message(&self, message: &Message) -> Result<()> {
        message.validate()?;
        self.store
            .put_row(
                &self.config.message_table,
                message.primary_key(),
                message.encode_columns(),
                Precondition::IgnoreExisting,
            )
            .await
            .map_err(|e| e.with_context("put message"))?;
        debug!(
            session_id = %message.session_id,
            message_id = %message.message_id,
            "message written"
        );
        Ok(())
    }

    /// Fetch one message
    ///
    /// With `create_time` zero the key is first recovered through the
    /// secondary index; exactly one index hit is required.
    pub async fn get_message(
        &self,
        session_id: &str,
        message_id: &str,
        create_time: i64,
    ) -> Result<Message> {
        let create_time = self
            .resolve_create_time(session_id, message_id, create_time)
            .await?;
        let (start, end) = RangeBoundsBuilder::new(Direction::Forward)
            .pinned(fields::SESSION_ID, KeyValue::str(session_id))
            .pinned(fields::CREATE_TIME, KeyValue::int(create_time))
            .pinned(fields::MESSAGE_ID, KeyValue::str(message_id))
            .build();
        let mut page: Page<Message> = scan_page(
            self.store.as_ref(),
            &self.config.message_table,
            start,
            end,
            Direction::Forward,
            1,
            None,
        )
        .await
        .map_err(|e| e.with_context("get message"))?;
        page.hits
            .pop()
            .ok_or_else(|| TablememError::NotFound(format!("message {session_id}/{message_id}")))
    }

    /// Re-read the stored message and apply column-level changes
    ///
    /// A zero `create_time` on the argument adopts the stored one, so a
    /// message fetched by id round-trips through update unchanged.
    pub async fn update_message(&self, message: &Message) -> Result<()> {
        message.validate()?;
        let previous = self
            .get_message(&message.session_id, &message.message_id, message.create_time)
            .await?;
        let mut next = message.clone();
        next.create_time = previous.create_time;
        let (upserts, deletions) = next.update_mutation(&previous);
        self.store
            .update_row(
                &self.config.message_table,
                next.primary_key(),
                upserts,
                deletions,
                Precondition::MustExist,
            )
            .await
            .map_err(|e| e.with_context("update message"))
    }

    /// Delete one message, resolving a zero `create_time` through the index
    ///
    /// With a known `create_time` a missing row is not an error; with a zero
    /// one the index resolution itself reports `NotFound`.
    pub async fn delete_message(
        &self,
        session_id: &str,
        message_id: &str,
        create_time: i64,
    ) -> Result<()> {
        let create_time = self
            .resolve_create_time(session_id, message_id, create_time)
            .await?;
        self.store
            .delete_row(
                &self.config.message_table,
                CompositeKey::new()
                    .field(fields::SESSION_ID, KeyValue::str(session_id))
                    .field(fields::CREATE_TIME, KeyValue::int(create_time))
                    .field(fields::MESSAGE_ID, KeyValue::str(message_id)),
                Precondition::IgnoreExisting,
            )
            .await
            .map_err(|e| e.with_context("delete message"))
    }

    async fn resolve_create_time(
        &self,
        session_id: &str,
        message_id: &str,
        create_time: i64,
    ) -> Result<i64> {
        if create_time != 0 {
            return Ok(create_time);
        }
        let resolved: Message = resolve_unique(
            self.store.as_ref(),
            &self.config.message_secondary_index,
            vec![
                (fields::SESSION_ID.to_string(), KeyValue::str(session_id)),
                (fields::MESSAGE_ID.to_string(), KeyValue::str(message_id)),
            ],
            fields::CREATE_TIME,
            &format!("message {session_id}/{message_id}"),
        )
        .await?;
        Ok(resolved.create_time)
    }

    /// Delete every message of one session; returns how many were removed
    pub async fn delete_messages(&self, session_id: &str) -> Result<usize> {
        self.delete_messages_in(Some(session_id)).await
    }

    /// Delete every message in the table
    pub async fn delete_all_messages(&self) -> Result<usize> {
        self.delete_messages_in(None).await
    }

    async fn delete_messages_in(&self, session_id: Option<&str>) -> Result<usize> {
        let mut stream = self.list_messages_filtered(
            session_id,
            TimeRange::default(),
            Direction::Forward,
            ListOptions::default(),
        );
        let mut mutator = crate::batch::BatchMutator::new(self.store.as_ref());
        while let Some(message) = stream.next().await {
            let message = message?;
            mutator
                .push(BatchWriteOp::Delete {
                    table: self.config.message_table.clone(),
                    key: message.primary_key(),
                })
                .await?;
        }
        let removed = mutator.finish().await?;
        debug!(
            session_id = session_id.unwrap_or("*"),
            removed, "messages removed"
        );
        Ok(removed)
    }

    /// Stream one session's messages oldest first
    pub fn list_messages(
        &self,
        session_id: &str,
        opts: ListOptions,
    ) -> ReceiverStream<Result<Message>> {
        self.list_messages_filtered(
            Some(session_id),
            TimeRange::default(),
            Direction::Forward,
            opts,
        )
    }

    /// Stream every message in the table in key order
    pub fn list_all_messages(&self, opts: ListOptions) -> ReceiverStream<Result<Message>> {
        self.list_messages_filtered(None, TimeRange::default(), Direction::Forward, opts)
    }

    /// Stream messages restricted by session, time window, and direction
    ///
    /// Dropping the stream cancels the underlying scan. A store failure
    /// mid-scan ends the stream with one `Err` item.
    pub fn list_messages_filtered(
        &self,
        session_id: Option<&str>,
        range: TimeRange,
        direction: Direction,
        opts: ListOptions,
    ) -> ReceiverStream<Result<Message>> {
        let (start, end) = self.message_bounds(session_id, range, direction);
        scan_stream(
            self.store.clone(),
            ScanParams {
                table: self.config.message_table.clone(),
                start,
                end,
                direction,
                max_count: opts.max_count,
                batch_size: opts.batch_size,
                filter: opts.filter,
            },
        )
    }

    /// One page of a session's messages
    ///
    /// Pass the returned `next_key` back as `next_key` to resume; the call
    /// itself holds no state between pages. A filter is applied after rows
    /// are read, so filtered-out rows still count against `page_size`.
    pub async fn list_messages_paginated(
        &self,
        session_id: &str,
        range: TimeRange,
        direction: Direction,
        page_size: usize,
        next_key: Option<CompositeKey>,
        filter: Option<ColumnPredicate>,
    ) -> Result<Page<Message>> {
        let (start, end) = self.message_bounds(Some(session_id), range, direction);
        scan_page(
            self.store.as_ref(),
            &self.config.message_table,
            next_key.unwrap_or(start),
            end,
            direction,
            page_size,
            filter,
        )
        .await
        .map_err(|e| e.with_context("list messages page"))
    }

    fn message_bounds(
        &self,
        session_id: Option<&str>,
        range: TimeRange,
        direction: Direction,
    ) -> (CompositeKey, CompositeKey) {
        let (from, to) = range.scan_span(direction);
        let mut bounds = RangeBoundsBuilder::new(direction);
        bounds = match session_id {
            Some(session_id) => bounds.pinned(fields::SESSION_ID, KeyValue::str(session_id)),
            None => bounds.open(fields::SESSION_ID),
        };
        bounds
            .span(fields::CREATE_TIME, from, to)
            .open(fields::MESSAGE_ID)
            .build()
    }

    /// Full-text search over messages, newest first
    ///
    /// At least one of `session_id`, `keyword`, or a bounded `range` must be
    /// given. `token` resumes a previous page.
    pub async fn search_messages(
        &self,
        session_id: Option<&str>,
        keyword: Option<&str>,
        range: TimeRange,
        page_size: usize,
        token: Option<Vec<u8>>,
    ) -> Result<SearchPage<Message>> {
        let query = compose_search_query(
            fields::SESSION_ID,
            session_id,
            fields::CREATE_TIME,
            range,
            fields::SEARCH_CONTENT,
            keyword,
        )?;
        run_search(
            self.store.as_ref(),
            &self.config.message_table,
            &self.config.message_search_index,
            query,
            fields::CREATE_TIME,
            page_size,
            token,
        )
        .await
        .map_err(|e| e.with_context("search messages"))
    }
}
