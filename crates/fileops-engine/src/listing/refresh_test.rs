//! Tests for debounced background refreshes.

use super::*;
use crate::cloud::{InMemoryProvider, InjectedFailure, ProviderOp, RetryPolicy};
use crate::errors::ErrorCode;
use crate::events::EngineEvent;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

struct Fixture {
    provider: Arc<InMemoryProvider>,
    lister: Arc<Lister>,
    refresh: RefreshCoordinator,
    events: UnboundedReceiver<EngineEvent>,
}

fn fixture(timeout: Duration) -> Fixture {
    let provider = InMemoryProvider::new().with_remote("gdrive", "drive");
    provider.add_file("gdrive", "docs/a.txt", b"a");
    let provider = Arc::new(provider);
    let gateway = Arc::new(CloudGateway::new(
        Arc::clone(&provider) as Arc<dyn crate::cloud::CloudProvider>,
        4,
        RetryPolicy::new(1, Duration::from_millis(10)),
    ));
    let cache = ListingCache::new(Duration::from_secs(5), Duration::from_secs(300), 64);
    let lister = Arc::new(Lister::new(cache, gateway));
    let (tx, events) = unbounded_channel();
    let refresh = RefreshCoordinator::new(
        Arc::clone(&lister),
        Arc::new(tx),
        Duration::from_millis(250),
        timeout,
    );
    Fixture {
        provider,
        lister,
        refresh,
        events,
    }
}

fn docs() -> PathRef {
    PathRef::cloud("gdrive", "docs")
}

#[tokio::test(start_paused = true)]
async fn test_requests_within_debounce_coalesce_into_one_fetch() {
    let mut f = fixture(Duration::from_secs(15));
    assert_eq!(f.refresh.request(&docs(), false), RefreshRequest::Scheduled);
    assert_eq!(f.refresh.request(&docs(), false), RefreshRequest::Coalesced);
    assert_eq!(f.refresh.request(&docs(), false), RefreshRequest::Coalesced);

    let event = f.events.recv().await.unwrap();
    match event {
        EngineEvent::RefreshComplete(e) => {
            assert_eq!(e.folder, docs());
            assert_eq!(e.entry_count, Some(1));
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(f.provider.calls_for(ProviderOp::List, "gdrive:docs"), 1);
    assert_eq!(f.refresh.pending_count(), 0);
    assert!(
        f.lister
            .cache()
            .peek(&ScopeKey::for_folder(&docs(), false))
            .is_some()
    );
}

#[tokio::test(start_paused = true)]
async fn test_navigating_away_during_debounce_skips_fetch() {
    let mut f = fixture(Duration::from_secs(15));
    f.refresh.request(&docs(), false);
    tokio::time::sleep(Duration::from_millis(50)).await;
    f.refresh.cancel_folder(&docs());

    assert!(matches!(f.events.recv().await.unwrap(), EngineEvent::RefreshCancelled(_)));
    assert_eq!(f.provider.calls(ProviderOp::List), 0);
}

#[tokio::test(start_paused = true)]
async fn test_navigating_away_during_fetch_discards_result() {
    let mut f = fixture(Duration::from_secs(15));
    f.provider.set_latency(Duration::from_millis(500));
    f.refresh.request(&docs(), true);
    // Past the debounce, inside the provider call
    tokio::time::sleep(Duration::from_millis(400)).await;
    f.refresh.cancel_folder(&docs());

    assert!(matches!(f.events.recv().await.unwrap(), EngineEvent::RefreshCancelled(_)));
    assert_eq!(f.provider.calls(ProviderOp::List), 1, "the provider call still completed");
    assert!(
        f.lister
            .cache()
            .peek(&ScopeKey::for_folder(&docs(), true))
            .is_none(),
        "a cancelled refresh must not write to the cache"
    );
}

#[tokio::test(start_paused = true)]
async fn test_timeout_marks_listing_stale() {
    let mut f = fixture(Duration::from_millis(100));
    f.provider.set_latency(Duration::from_secs(1));
    f.refresh.request(&docs(), false);
    match f.events.recv().await.unwrap() {
        EngineEvent::RefreshStale(e) => assert_eq!(e.error.unwrap().code, ErrorCode::Timeout),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_provider_failure_marks_listing_stale() {
    let mut f = fixture(Duration::from_secs(15));
    f.provider
        .fail_next(ProviderOp::List, 1, InjectedFailure::stderr("permission denied"));
    f.refresh.request(&docs(), false);
    match f.events.recv().await.unwrap() {
        EngineEvent::RefreshStale(e) => assert_eq!(e.error.unwrap().code, ErrorCode::PermissionDenied),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_request_after_fetch_started_schedules_a_new_refresh() {
    let mut f = fixture(Duration::from_secs(15));
    f.provider.set_latency(Duration::from_millis(500));
    assert_eq!(f.refresh.request(&docs(), false), RefreshRequest::Scheduled);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(f.refresh.request(&docs(), false), RefreshRequest::Scheduled);

    for _ in 0..2 {
        assert!(matches!(f.events.recv().await.unwrap(), EngineEvent::RefreshComplete(_)));
    }
    assert_eq!(f.provider.calls(ProviderOp::List), 2);
}
