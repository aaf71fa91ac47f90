//! End-to-end scenarios against the in-memory backend

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use proptest::prelude::*;
use tokio_stream::StreamExt;

use tablemem::{
    config::{
        DEFAULT_MESSAGE_SECONDARY_INDEX, DEFAULT_MESSAGE_SEARCH_INDEX, DEFAULT_MESSAGE_TABLE,
        DEFAULT_SESSION_SECONDARY_INDEX, DEFAULT_SESSION_SEARCH_INDEX, DEFAULT_SESSION_TABLE,
    },
    store::{
        BatchWriteOp, Column, CompositeKey, Precondition, RangeQuery, RangeSlice, SearchRequest,
        SearchSlice,
    },
    ColumnPredicate, CompareOp, Direction, InMemoryTableStore, ListOptions, MemoryStore, Message,
    Session, TableStore, TablememError, TimeRange,
};

fn new_store() -> MemoryStore<InMemoryTableStore> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
    let backend = InMemoryTableStore::new()
        .with_index(
            DEFAULT_SESSION_TABLE,
            DEFAULT_SESSION_SECONDARY_INDEX,
            &["user_id", "update_time", "session_id"],
        )
        .with_index(
            DEFAULT_MESSAGE_TABLE,
            DEFAULT_MESSAGE_SECONDARY_INDEX,
            &["session_id", "message_id", "create_time"],
        )
        .with_search_index(DEFAULT_SESSION_TABLE, DEFAULT_SESSION_SEARCH_INDEX)
        .with_search_index(DEFAULT_MESSAGE_TABLE, DEFAULT_MESSAGE_SEARCH_INDEX);
    MemoryStore::new(backend)
}

fn message_at(session_id: &str, message_id: &str, create_time: i64) -> Message {
    let mut msg = Message::with_time(session_id, message_id, create_time);
    msg.content = Some(format!("content of {message_id}"));
    msg
}

async fn seed_messages<S: TableStore + 'static>(
    store: &MemoryStore<S>,
    session_id: &str,
    n: usize,
) {
    for i in 0..n {
        let msg = message_at(session_id, &format!("m{i:05}"), (i as i64 + 1) * 1000);
        store.put_message(&msg).await.unwrap();
    }
}

/// Backend wrapper that starts failing a chosen operation after a number of
/// successful calls, standing in for a store that drops out mid-task
struct FlakyBackend {
    inner: InMemoryTableStore,
    batch_writes_allowed: Option<usize>,
    range_queries_allowed: Option<usize>,
    batch_writes: AtomicUsize,
    range_queries: AtomicUsize,
}

impl FlakyBackend {
    fn new(inner: InMemoryTableStore) -> Self {
        Self {
            inner,
            batch_writes_allowed: None,
            range_queries_allowed: None,
            batch_writes: AtomicUsize::new(0),
            range_queries: AtomicUsize::new(0),
        }
    }

    fn failing_batch_writes_after(mut self, allowed: usize) -> Self {
        self.batch_writes_allowed = Some(allowed);
        self
    }

    fn failing_range_queries_after(mut self, allowed: usize) -> Self {
        self.range_queries_allowed = Some(allowed);
        self
    }

    fn tick(counter: &AtomicUsize, allowed: Option<usize>, op: &str) -> tablemem::Result<()> {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        match allowed {
            Some(allowed) if n >= allowed => Err(TablememError::store(op, "connection reset")),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl TableStore for FlakyBackend {
    async fn put_row(
        &self,
        table: &str,
        key: CompositeKey,
        columns: Vec<Column>,
        precondition: Precondition,
    ) -> tablemem::Result<()> {
        self.inner.put_row(table, key, columns, precondition).await
    }

    async fn update_row(
        &self,
        table: &str,
        key: CompositeKey,
        upserts: Vec<Column>,
        deletions: Vec<String>,
        precondition: Precondition,
    ) -> tablemem::Result<()> {
        self.inner
            .update_row(table, key, upserts, deletions, precondition)
            .await
    }

    async fn delete_row(
        &self,
        table: &str,
        key: CompositeKey,
        precondition: Precondition,
    ) -> tablemem::Result<()> {
        self.inner.delete_row(table, key, precondition).await
    }

    async fn batch_write(&self, ops: Vec<BatchWriteOp>) -> tablemem::Result<()> {
        Self::tick(&self.batch_writes, self.batch_writes_allowed, "batch write")?;
        self.inner.batch_write(ops).await
    }

    async fn range_query(&self, query: RangeQuery) -> tablemem::Result<RangeSlice> {
        Self::tick(&self.range_queries, self.range_queries_allowed, "range query")?;
        self.inner.range_query(query).await
    }

    async fn search(&self, request: SearchRequest) -> tablemem::Result<SearchSlice> {
        self.inner.search(request).await
    }
}

#[tokio::test]
async fn test_session_round_trip_with_all_metadata_kinds() {
    let store = new_store();
    let mut session = Session::with_time("u1", "s1", 42);
    session.search_content = Some("quarterly planning".to_string());
    session.metadata.put("str", "v").unwrap();
    session.metadata.put("int", 7i64).unwrap();
    session.metadata.put("float", 1.5f64).unwrap();
    session.metadata.put("flag", true).unwrap();
    session.metadata.put("blob", vec![1u8, 2, 3]).unwrap();

    store.put_session(&session).await.unwrap();
    let fetched = store.get_session("u1", "s1").await.unwrap();
    assert_eq!(fetched, session);

    // Survives a JSON round trip as well
    let json = serde_json::to_string(&fetched).unwrap();
    let back: Session = serde_json::from_str(&json).unwrap();
    assert_eq!(back, fetched);
}

#[tokio::test]
async fn test_get_missing_session_is_not_found() {
    let store = new_store();
    let err = store.get_session("u1", "absent").await.unwrap_err();
    assert!(matches!(err, TablememError::NotFound(_)));

    let err = store
        .update_session(&Session::with_time("u1", "absent", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, TablememError::NotFound(_)));
}

#[tokio::test]
async fn test_update_session_removes_dropped_metadata_columns() {
    let store = new_store();
    let mut session = Session::with_time("u1", "s1", 100);
    session.metadata.put("a", 1i64).unwrap();
    session.metadata.put("b", 2i64).unwrap();
    store.put_session(&session).await.unwrap();

    session.metadata.remove("b");
    session.metadata.put("c", 3i64).unwrap();
    session.update_time = 200;
    store.update_session(&session).await.unwrap();

    let fetched = store.get_session("u1", "s1").await.unwrap();
    assert_eq!(fetched.update_time, 200);
    assert_eq!(fetched.metadata.get_i64("a"), Some(1));
    assert_eq!(fetched.metadata.get_i64("c"), Some(3));
    assert!(!fetched.metadata.contains_key("b"));
}

#[tokio::test]
async fn test_message_lookup_by_id_resolves_create_time() {
    let store = new_store();
    let msg = message_at("s1", uuid::Uuid::new_v4().to_string().as_str(), 5000);
    store.put_message(&msg).await.unwrap();

    let fetched = store.get_message("s1", &msg.message_id, 0).await.unwrap();
    assert_eq!(fetched, msg);

    store.delete_message("s1", &msg.message_id, 0).await.unwrap();
    let err = store.get_message("s1", &msg.message_id, 0).await.unwrap_err();
    assert!(matches!(err, TablememError::NotFound(_)));
}

#[tokio::test]
async fn test_duplicate_index_entries_are_ambiguous() {
    let store = new_store();
    store.put_message(&message_at("s1", "m1", 100)).await.unwrap();
    store.put_message(&message_at("s1", "m1", 200)).await.unwrap();

    let err = store.get_message("s1", "m1", 0).await.unwrap_err();
    assert!(matches!(err, TablememError::AmbiguousIndex(_)));

    // A concrete create_time still disambiguates
    let fetched = store.get_message("s1", "m1", 200).await.unwrap();
    assert_eq!(fetched.create_time, 200);
}

#[tokio::test]
async fn test_update_message_with_zero_create_time_adopts_stored_one() {
    let store = new_store();
    store.put_message(&message_at("s1", "m1", 7000)).await.unwrap();

    let mut edit = Message::with_time("s1", "m1", 0);
    edit.content = Some("edited".to_string());
    store.update_message(&edit).await.unwrap();

    let fetched = store.get_message("s1", "m1", 7000).await.unwrap();
    assert_eq!(fetched.content.as_deref(), Some("edited"));
    assert_eq!(fetched.create_time, 7000);
}

#[tokio::test]
async fn test_listing_direction_orders_by_create_time() {
    let store = new_store();
    seed_messages(&store, "s1", 5).await;

    let forward: Vec<Message> = store
        .list_messages("s1", ListOptions::default())
        .collect::<Result<_, _>>()
        .await
        .unwrap();
    let backward: Vec<Message> = store
        .list_messages_filtered(
            Some("s1"),
            TimeRange::default(),
            Direction::Backward,
            ListOptions::default(),
        )
        .collect::<Result<_, _>>()
        .await
        .unwrap();

    let times: Vec<i64> = forward.iter().map(|m| m.create_time).collect();
    assert_eq!(times, vec![1000, 2000, 3000, 4000, 5000]);
    let mut reversed = backward.clone();
    reversed.reverse();
    assert_eq!(forward, reversed);
}

#[tokio::test]
async fn test_time_window_bounds_are_inclusive() {
    let store = new_store();
    seed_messages(&store, "s1", 5).await;

    let hits: Vec<Message> = store
        .list_messages_filtered(
            Some("s1"),
            TimeRange::new(Some(2000), Some(4000)),
            Direction::Forward,
            ListOptions::default(),
        )
        .collect::<Result<_, _>>()
        .await
        .unwrap();
    let times: Vec<i64> = hits.iter().map(|m| m.create_time).collect();
    assert_eq!(times, vec![2000, 3000, 4000]);
}

#[tokio::test]
async fn test_dropping_the_stream_stops_the_scan() {
    let store = new_store();
    seed_messages(&store, "s1", 20).await;

    let stream = store.list_messages(
        "s1",
        ListOptions {
            batch_size: Some(4),
            ..Default::default()
        },
    );
    let first: Vec<Message> = stream
        .take(3)
        .collect::<Result<_, _>>()
        .await
        .unwrap();
    assert_eq!(first.len(), 3);
    assert_eq!(first[0].create_time, 1000);
}

#[tokio::test]
async fn test_paginated_listing_resumes_from_next_key() {
    let store = new_store();
    seed_messages(&store, "s1", 7).await;

    let mut collected = Vec::new();
    let mut next_key = None;
    let mut pages = 0;
    loop {
        let page = store
            .list_messages_paginated(
                "s1",
                TimeRange::default(),
                Direction::Forward,
                3,
                next_key,
                None,
            )
            .await
            .unwrap();
        collected.extend(page.hits);
        pages += 1;
        match page.next_key {
            Some(key) => next_key = Some(key),
            None => break,
        }
    }
    assert_eq!(pages, 3);
    let times: Vec<i64> = collected.iter().map(|m| m.create_time).collect();
    assert_eq!(times, (1..=7).map(|i| i * 1000).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_bulk_delete_counts_across_chunk_boundaries() {
    for n in [0usize, 1, 199, 200, 201, 401] {
        let store = new_store();
        seed_messages(&store, "s1", n).await;
        let removed = store.delete_messages("s1").await.unwrap();
        assert_eq!(removed, n, "seeded {n}");

        let leftover: Vec<Message> = store
            .list_messages("s1", ListOptions::default())
            .collect::<Result<_, _>>()
            .await
            .unwrap();
        assert!(leftover.is_empty());
    }
}

#[tokio::test]
async fn test_deleting_one_session_leaves_the_other_intact() {
    let store = new_store();
    seed_messages(&store, "s1", 50).await;
    seed_messages(&store, "s2", 30).await;

    assert_eq!(store.delete_messages("s1").await.unwrap(), 50);

    let remaining: Vec<Message> = store
        .list_all_messages(ListOptions::default())
        .collect::<Result<_, _>>()
        .await
        .unwrap();
    assert_eq!(remaining.len(), 30);
    assert!(remaining.iter().all(|m| m.session_id == "s2"));

    assert_eq!(store.delete_all_messages().await.unwrap(), 30);
    let remaining: Vec<Message> = store
        .list_all_messages(ListOptions::default())
        .collect::<Result<_, _>>()
        .await
        .unwrap();
    assert!(remaining.is_empty());
}

#[tokio::test]
async fn test_delete_session_and_messages() {
    let store = new_store();
    store
        .put_session(&Session::with_time("u1", "s1", 10))
        .await
        .unwrap();
    seed_messages(&store, "s1", 12).await;

    let removed = store.delete_session_and_messages("u1", "s1").await.unwrap();
    assert_eq!(removed, 12);
    assert!(store.get_session("u1", "s1").await.is_err());
}

#[tokio::test]
async fn test_recent_sessions_come_newest_first() {
    let store = new_store();
    for (id, time) in [("s1", 100i64), ("s2", 300), ("s3", 200)] {
        store
            .put_session(&Session::with_time("u1", id, time))
            .await
            .unwrap();
    }
    store
        .put_session(&Session::with_time("u2", "other", 999))
        .await
        .unwrap();

    let recent = store
        .list_recent_sessions("u1", TimeRange::default(), ListOptions::default())
        .await
        .unwrap();
    let ids: Vec<&str> = recent.iter().map(|s| s.session_id.as_str()).collect();
    assert_eq!(ids, vec!["s2", "s3", "s1"]);

    let windowed = store
        .list_recent_sessions("u1", TimeRange::new(Some(150), Some(250)), ListOptions::default())
        .await
        .unwrap();
    let ids: Vec<&str> = windowed.iter().map(|s| s.session_id.as_str()).collect();
    assert_eq!(ids, vec!["s3"]);
}

#[tokio::test]
async fn test_recent_sessions_index_follows_updates() {
    let store = new_store();
    let mut session = Session::with_time("u1", "s1", 100);
    store.put_session(&session).await.unwrap();
    store
        .put_session(&Session::with_time("u1", "s2", 200))
        .await
        .unwrap();

    session.update_time = 300;
    store.update_session(&session).await.unwrap();

    let recent = store
        .list_recent_sessions("u1", TimeRange::default(), ListOptions::default())
        .await
        .unwrap();
    let ids: Vec<&str> = recent.iter().map(|s| s.session_id.as_str()).collect();
    assert_eq!(ids, vec!["s1", "s2"]);
}

#[tokio::test]
async fn test_recent_sessions_pagination() {
    let store = new_store();
    for i in 0..5i64 {
        store
            .put_session(&Session::with_time("u1", format!("s{i}"), (i + 1) * 10))
            .await
            .unwrap();
    }

    let first = store
        .list_recent_sessions_paginated("u1", TimeRange::default(), 2, None, None)
        .await
        .unwrap();
    assert_eq!(first.hits.len(), 2);
    assert_eq!(first.hits[0].session_id, "s4");

    let second = store
        .list_recent_sessions_paginated("u1", TimeRange::default(), 2, first.next_key, None)
        .await
        .unwrap();
    assert_eq!(second.hits[0].session_id, "s2");
}

#[tokio::test]
async fn test_session_search_by_keyword_and_user() {
    let store = new_store();
    let mut a = Session::with_time("u1", "s1", 100);
    a.search_content = Some("rust borrow checker notes".to_string());
    let mut b = Session::with_time("u1", "s2", 200);
    b.search_content = Some("holiday plans".to_string());
    let mut c = Session::with_time("u2", "s3", 300);
    c.search_content = Some("rust async pitfalls".to_string());
    for s in [&a, &b, &c] {
        store.put_session(s).await.unwrap();
    }

    let page = store
        .search_sessions(Some("u1"), Some("rust"), TimeRange::default(), 10, None)
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.hits[0].session_id, "s1");

    let page = store
        .search_sessions(None, Some("rust"), TimeRange::default(), 10, None)
        .await
        .unwrap();
    assert_eq!(page.total, 2);
    // Newest first
    assert_eq!(page.hits[0].session_id, "s3");

    let err = store
        .search_sessions(None, None, TimeRange::default(), 10, None)
        .await
        .unwrap_err();
    assert!(matches!(err, TablememError::Validation(_)));
}

#[tokio::test]
async fn test_message_search_pagination_token() {
    let store = new_store();
    for i in 0..5 {
        let mut msg = message_at("s1", &format!("m{i}"), (i as i64 + 1) * 10);
        msg.search_content = Some(format!("note {i} about rust"));
        store.put_message(&msg).await.unwrap();
    }

    let first = store
        .search_messages(Some("s1"), Some("rust"), TimeRange::default(), 2, None)
        .await
        .unwrap();
    assert_eq!(first.total, 5);
    assert_eq!(first.hits.len(), 2);
    let token = first.next_token.expect("more pages");

    let second = store
        .search_messages(Some("s1"), Some("rust"), TimeRange::default(), 2, Some(token))
        .await
        .unwrap();
    assert_eq!(second.hits.len(), 2);
    assert_ne!(first.hits[0].message_id, second.hits[0].message_id);
}

#[tokio::test]
async fn test_zero_batch_size_still_advances_the_scan() {
    let store = new_store();
    seed_messages(&store, "s1", 3).await;

    let stream = store.list_messages(
        "s1",
        ListOptions {
            batch_size: Some(0),
            ..Default::default()
        },
    );
    let hits: Vec<Message> = tokio::time::timeout(
        Duration::from_secs(2),
        stream.collect::<std::result::Result<_, _>>(),
    )
    .await
    .expect("scan must terminate")
    .unwrap();
    assert_eq!(hits.len(), 3);
}

#[tokio::test]
async fn test_paginated_listing_applies_column_filter() {
    let store = new_store();
    for i in 0..6i64 {
        let mut msg = message_at("s1", &format!("m{i}"), (i + 1) * 1000);
        let kind = if i % 2 == 0 { "note" } else { "draft" };
        msg.metadata.put("kind", kind).unwrap();
        store.put_message(&msg).await.unwrap();
    }
    let filter = ColumnPredicate::new("kind", CompareOp::Eq, "note");

    // Filtered-out rows still consume page_size, so the first page of 4
    // read rows yields only the two matching ones
    let first = store
        .list_messages_paginated(
            "s1",
            TimeRange::default(),
            Direction::Forward,
            4,
            None,
            Some(filter.clone()),
        )
        .await
        .unwrap();
    let times: Vec<i64> = first.hits.iter().map(|m| m.create_time).collect();
    assert_eq!(times, vec![1000, 3000]);

    let second = store
        .list_messages_paginated(
            "s1",
            TimeRange::default(),
            Direction::Forward,
            4,
            first.next_key,
            Some(filter),
        )
        .await
        .unwrap();
    let times: Vec<i64> = second.hits.iter().map(|m| m.create_time).collect();
    assert_eq!(times, vec![5000]);
    assert!(second.next_key.is_none());
}

#[tokio::test]
async fn test_recent_sessions_pagination_applies_column_filter() {
    let store = new_store();
    for i in 0..4i64 {
        let mut session = Session::with_time("u1", format!("s{i}"), (i + 1) * 10);
        session.metadata.put("starred", i % 2 == 0).unwrap();
        store.put_session(&session).await.unwrap();
    }

    let page = store
        .list_recent_sessions_paginated(
            "u1",
            TimeRange::default(),
            10,
            None,
            Some(ColumnPredicate::new("starred", CompareOp::Eq, true)),
        )
        .await
        .unwrap();
    let ids: Vec<&str> = page.hits.iter().map(|s| s.session_id.as_str()).collect();
    assert_eq!(ids, vec!["s2", "s0"]);
}

#[tokio::test]
async fn test_chunk_failure_reports_committed_count() {
    let backend = FlakyBackend::new(
        InMemoryTableStore::new()
            .with_index(
                DEFAULT_MESSAGE_TABLE,
                DEFAULT_MESSAGE_SECONDARY_INDEX,
                &["session_id", "message_id", "create_time"],
            ),
    )
    .failing_batch_writes_after(1);
    let store = MemoryStore::new(backend);
    seed_messages(&store, "s1", 450).await;

    // First 200-op chunk lands, the second is refused
    let err = store.delete_messages("s1").await.unwrap_err();
    match err {
        TablememError::BatchFailed { applied, .. } => assert_eq!(applied, 200),
        other => panic!("expected BatchFailed, got {other:?}"),
    }

    let leftover: Vec<Message> = store
        .list_messages("s1", ListOptions::default())
        .collect::<std::result::Result<_, _>>()
        .await
        .unwrap();
    assert_eq!(leftover.len(), 250);
}

#[tokio::test]
async fn test_mid_scan_failure_ends_the_stream_with_one_error() {
    let backend = FlakyBackend::new(InMemoryTableStore::new()).failing_range_queries_after(1);
    let store = MemoryStore::new(backend);
    seed_messages(&store, "s1", 10).await;

    let items: Vec<tablemem::Result<Message>> = store
        .list_messages(
            "s1",
            ListOptions {
                batch_size: Some(4),
                ..Default::default()
            },
        )
        .collect()
        .await;

    assert_eq!(items.len(), 5);
    assert!(items[..4].iter().all(|item| item.is_ok()));
    assert!(matches!(items[4], Err(TablememError::Store { .. })));
}

#[tokio::test]
async fn test_validation_rejects_blank_keys_and_reserved_metadata() {
    let store = new_store();
    let err = store
        .put_session(&Session::with_time("", "s1", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, TablememError::Validation(_)));

    let mut msg = message_at("s1", "m1", 1);
    msg.metadata.put("create_time", 5i64).unwrap();
    let err = store.put_message(&msg).await.unwrap_err();
    assert!(matches!(err, TablememError::Validation(_)));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Any page size walks the whole range exactly once, in order
    #[test]
    fn prop_pagination_reassembles_the_range(n in 0usize..60, page_size in 1usize..17) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let store = new_store();
            seed_messages(&store, "s1", n).await;

            let mut collected = Vec::new();
            let mut next_key = None;
            loop {
                let page = store
                    .list_messages_paginated(
                        "s1",
                        TimeRange::default(),
                        Direction::Forward,
                        page_size,
                        next_key,
                        None,
                    )
                    .await
                    .unwrap();
                collected.extend(page.hits);
                match page.next_key {
                    Some(key) => next_key = Some(key),
                    None => break,
                }
            }
            prop_assert_eq!(collected.len(), n);
            let times: Vec<i64> = collected.iter().map(|m| m.create_time).collect();
            let mut sorted = times.clone();
            sorted.sort_unstable();
            prop_assert_eq!(times, sorted);
            Ok(())
        })?;
    }
}
