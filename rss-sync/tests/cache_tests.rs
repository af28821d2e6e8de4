use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rss_sync::{QueryCache, QueryKey, ReadOptions, ResourceType, SyncError};

type Fetch = Pin<Box<dyn Future<Output = Result<usize, SyncError>> + Send>>;

fn options() -> ReadOptions {
    ReadOptions {
        stale_time: Duration::from_secs(30),
        placeholder_previous: false,
        retry: true,
    }
}

fn page_key(page: u32) -> QueryKey {
    QueryKey::new(ResourceType::Articles).with("page", page)
}

// Each call returns the number of calls made so far.
fn counting(
    calls: Arc<AtomicUsize>,
    delay: Duration,
) -> impl Fn() -> Fetch + Send + Sync + 'static {
    move || {
        let calls = calls.clone();
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            Ok(calls.fetch_add(1, Ordering::SeqCst) + 1)
        })
    }
}

// Fails with `first_error` on the first call, succeeds afterwards.
fn failing_once(
    calls: Arc<AtomicUsize>,
    first_error: SyncError,
) -> impl Fn() -> Fetch + Send + Sync + 'static {
    move || {
        let calls = calls.clone();
        let first_error = first_error.clone();
        Box::pin(async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n == 1 {
                Err(first_error)
            } else {
                Ok(n)
            }
        })
    }
}

#[tokio::test(start_paused = true)]
async fn concurrent_reads_share_one_fetch() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let (a, b) = tokio::join!(
        cache.read(
            page_key(1),
            options(),
            counting(calls.clone(), Duration::from_millis(50))
        ),
        cache.read(
            page_key(1),
            options(),
            counting(calls.clone(), Duration::from_millis(50))
        ),
    );

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(a.data, Some(1));
    assert_eq!(b.data, Some(1));
}

#[tokio::test(start_paused = true)]
async fn fresh_entries_are_served_until_stale_time_elapses() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let fetch = || counting(calls.clone(), Duration::ZERO);

    assert_eq!(cache.read(page_key(1), options(), fetch()).await.data, Some(1));
    assert_eq!(cache.read(page_key(1), options(), fetch()).await.data, Some(1));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_secs(31)).await;
    assert_eq!(cache.read(page_key(1), options(), fetch()).await.data, Some(2));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn invalidation_marks_stale_without_dropping_data() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    cache
        .read(page_key(1), options(), counting(calls.clone(), Duration::ZERO))
        .await;
    assert_eq!(cache.invalidate(ResourceType::Articles).await, 1);

    let state = cache.entry_state(&page_key(1)).await.unwrap();
    assert!(state.is_stale);
    assert!(state.has_data);
    assert_eq!(cache.peek::<usize>(&page_key(1)).await, Some(1));

    let refreshed = cache
        .read(page_key(1), options(), counting(calls.clone(), Duration::ZERO))
        .await;
    assert_eq!(refreshed.data, Some(2));
    assert!(!cache.entry_state(&page_key(1)).await.unwrap().is_stale);
}

#[tokio::test(start_paused = true)]
async fn invalidation_only_touches_its_resource() {
    let cache = QueryCache::new();
    cache.write(page_key(1), 1usize).await;
    cache
        .write(QueryKey::new(ResourceType::Digests), Vec::<u8>::new())
        .await;

    cache.invalidate(ResourceType::Digests).await;

    assert!(!cache.entry_state(&page_key(1)).await.unwrap().is_stale);
    assert!(
        cache
            .entry_state(&QueryKey::new(ResourceType::Digests))
            .await
            .unwrap()
            .is_stale
    );
}

#[tokio::test(start_paused = true)]
async fn failed_refetch_keeps_previous_data() {
    let cache = QueryCache::new();
    cache.write(page_key(1), 7usize).await;
    cache.invalidate(ResourceType::Articles).await;

    let calls = Arc::new(AtomicUsize::new(0));
    let result = cache
        .read(
            page_key(1),
            options(),
            failing_once(calls.clone(), SyncError::Validation("bad filter".into())),
        )
        .await;

    assert_eq!(result.data, Some(7));
    assert_eq!(result.error, Some(SyncError::Validation("bad filter".into())));
    // validation errors are not worth a retry
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let state = cache.entry_state(&page_key(1)).await.unwrap();
    assert!(state.last_error.is_some());
}

#[tokio::test(start_paused = true)]
async fn network_errors_are_retried_once() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let result = cache
        .read(
            page_key(1),
            options(),
            failing_once(calls.clone(), SyncError::Network("connection reset".into())),
        )
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(result.data, Some(2));
    assert!(!result.is_error());
}

#[tokio::test(start_paused = true)]
async fn retry_can_be_disabled() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let no_retry = ReadOptions {
        retry: false,
        ..options()
    };

    let result = cache
        .read(
            page_key(1),
            no_retry,
            failing_once(calls.clone(), SyncError::Network("timeout".into())),
        )
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(result.data, None);
    assert!(result.is_error());
}

#[tokio::test(start_paused = true)]
async fn fetch_invalidated_mid_flight_stores_data_but_stays_stale() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let reader = {
        let cache = cache.clone();
        let fetch = counting(calls.clone(), Duration::from_millis(100));
        tokio::spawn(async move { cache.read(page_key(1), options(), fetch).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    cache.invalidate(ResourceType::Articles).await;

    let result = reader.await.unwrap();
    assert_eq!(result.data, Some(1));
    let state = cache.entry_state(&page_key(1)).await.unwrap();
    assert!(state.has_data);
    assert!(state.is_stale);
}

#[tokio::test(start_paused = true)]
async fn placeholder_serves_previous_key_while_fetching() {
    let cache = QueryCache::new();
    cache
        .read(page_key(1), options(), || async { Ok::<_, SyncError>("page one".to_string()) })
        .await;

    let with_placeholder = ReadOptions {
        placeholder_previous: true,
        ..options()
    };
    let result = cache
        .read(page_key(2), with_placeholder, || async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, SyncError>("page two".to_string())
        })
        .await;

    assert!(result.is_placeholder);
    assert!(result.is_loading);
    assert_eq!(result.data.as_deref(), Some("page one"));

    let settled = cache.settled::<String>(&page_key(2)).await;
    assert_eq!(settled.as_deref(), Some("page two"));
}

#[tokio::test(start_paused = true)]
async fn placeholder_read_reports_failed_background_refresh() {
    let cache = QueryCache::new();
    cache.write(page_key(1), 7usize).await;
    cache.invalidate(ResourceType::Articles).await;

    let with_placeholder = ReadOptions {
        placeholder_previous: true,
        ..options()
    };
    let unavailable = || async {
        Err::<usize, _>(SyncError::Server {
            status: 503,
            detail: "unavailable".into(),
        })
    };

    let first = cache.read(page_key(1), with_placeholder, unavailable).await;
    assert!(first.is_placeholder);
    assert!(!first.is_error());
    let err = cache.settled_error(&page_key(1)).await;
    assert!(matches!(err, Some(SyncError::Server { status: 503, .. })));

    let second = cache.read(page_key(1), with_placeholder, unavailable).await;
    assert_eq!(second.data, Some(7));
    assert!(second.is_placeholder);
    assert!(second.is_error());
}

#[tokio::test]
async fn write_then_update_patches_in_place() {
    let cache = QueryCache::new();
    cache.write(page_key(1), vec![1, 2, 3]).await;

    let patched = cache
        .update::<Vec<i32>, _>(&page_key(1), |items| items.retain(|n| *n != 2))
        .await;
    assert!(patched);
    assert_eq!(cache.peek::<Vec<i32>>(&page_key(1)).await, Some(vec![1, 3]));

    let missing = cache
        .update::<Vec<i32>, _>(&page_key(9), |items| items.clear())
        .await;
    assert!(!missing);
}
