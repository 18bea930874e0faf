//! Full sync pipeline runs against scripted ports: step ordering, retry
//! budgets, cancellation, and the final bookkeeping.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use driftline_core::offline::StoredRequest;
use driftline_core::testing::{
    InMemoryRequestStore, InMemorySyncStore, MockApiClient, RecordingReconciler,
    StaticSessionViews,
};
use driftline_core::{ApiClient, OfflineQueueConfig, OfflineRequestQueue, SyncConfig, SyncService};
use driftline_domain::{
    ChannelId, ChannelListQuery, ChannelPage, ChatEvent, DriftlineError, Endpoint, EndpointPath,
    ErrorPayload, HttpMethod, MissingEventsPayload, QueuedRequest, Result, Token, UserInfo,
};
use serde_json::{json, Value};
use tokio::sync::Semaphore;

struct Harness {
    sync: Arc<SyncService>,
    api: Arc<MockApiClient>,
    store: Arc<InMemorySyncStore>,
    views: Arc<StaticSessionViews>,
    requests: Arc<InMemoryRequestStore>,
    reconciler: Arc<RecordingReconciler>,
}

fn harness() -> Harness {
    let api = Arc::new(MockApiClient::default());
    let store = Arc::new(InMemorySyncStore::default());
    let views = Arc::new(StaticSessionViews::default());
    let requests = Arc::new(InMemoryRequestStore::default());
    let reconciler = Arc::new(RecordingReconciler::default());
    let offline = Arc::new(OfflineRequestQueue::new(
        Arc::clone(&api) as Arc<dyn ApiClient>,
        Arc::clone(&requests) as _,
        Arc::clone(&reconciler) as _,
        OfflineQueueConfig::default(),
    ));
    let sync = Arc::new(SyncService::new(
        Arc::clone(&api) as _,
        Arc::clone(&store) as _,
        Arc::clone(&views) as _,
        offline,
        SyncConfig::default(),
    ));
    Harness { sync, api, store, views, requests, reconciler }
}

fn message_event(channel: &str, at: DateTime<Utc>) -> ChatEvent {
    ChatEvent {
        event_type: "message.new".into(),
        channel_id: Some(channel.into()),
        created_at: at,
        payload: json!({"text": "hello"}),
    }
}

fn events_response(events: Vec<ChatEvent>) -> Result<Value> {
    Ok(serde_json::to_value(MissingEventsPayload { events }).unwrap())
}

fn page_response(ids: &[&str]) -> Result<Value> {
    let page = ChannelPage {
        channel_ids: ids.iter().map(|id| ChannelId::from(*id)).collect(),
        payload: json!({}),
    };
    Ok(serde_json::to_value(page).unwrap())
}

fn send_message(channel: &str, message: &str) -> Endpoint {
    Endpoint::new(
        EndpointPath::SendMessage { channel_id: channel.into(), message_id: message.into() },
        HttpMethod::Post,
    )
    .with_body(json!({"text": "queued while offline"}))
}

fn recovery_paths(api: &MockApiClient) -> Vec<&'static str> {
    api.recovery_requests.lock().iter().map(|endpoint| endpoint.path.name()).collect()
}

#[tokio::test]
async fn the_pipeline_applies_events_watches_and_refetches_in_order() {
    let harness = harness();
    let since = Utc::now() - chrono::Duration::minutes(30);
    *harness.store.channels.lock() = vec!["messaging:1".into()];
    *harness.store.pending_connection.lock() = Some(since);
    *harness.views.watched.lock() = vec!["messaging:1".into(), "messaging:2".into()];
    *harness.views.queries.lock() = vec![ChannelListQuery::new("mine")];

    let newest = Utc::now() - chrono::Duration::minutes(5);
    harness
        .api
        .queue_recovery_response(events_response(vec![message_event("messaging:1", newest)]));
    harness.api.queue_recovery_response(Ok(json!({})));
    harness.api.queue_recovery_response(page_response(&["messaging:3"]));

    harness.sync.sync_local_state().await.unwrap();

    assert_eq!(recovery_paths(&harness.api), vec!["missing_events", "watch_channel", "channels"]);

    // messaging:1 was covered by the event sync, so only messaging:2 needs
    // an explicit watch.
    let watch = harness.api.recovery_requests.lock()[1].clone();
    assert!(matches!(
        watch.path,
        EndpointPath::WatchChannel { channel_id } if channel_id.as_str() == "messaging:2"
    ));

    assert_eq!(harness.store.applied.lock().len(), 1);
    assert_eq!(harness.store.replaced.lock().len(), 1);
    assert_eq!(*harness.store.last_received_event.lock(), Some(newest));
    assert!(harness.store.last_sync.lock().is_some());
    assert_eq!(*harness.store.pending_connection.lock(), None);
    assert_eq!(harness.api.recovery_enters.load(Ordering::SeqCst), 1);
    assert_eq!(harness.api.recovery_exits.load(Ordering::SeqCst), 1);
    assert!(harness.api.requests.lock().is_empty());
}

#[tokio::test]
async fn a_stubborn_watch_step_is_skipped_not_fatal() {
    let harness = harness();
    *harness.views.watched.lock() = vec!["messaging:9".into()];
    *harness.views.queries.lock() = vec![ChannelListQuery::new("mine")];

    for _ in 0..3 {
        harness
            .api
            .queue_recovery_response(Err(DriftlineError::ConnectionFailure("flaky".into())));
    }
    harness.api.queue_recovery_response(page_response(&["messaging:1"]));

    harness.sync.sync_local_state().await.unwrap();

    // The initial attempt plus two retries, then the pipeline moves on.
    assert_eq!(
        recovery_paths(&harness.api),
        vec!["watch_channel", "watch_channel", "watch_channel", "channels"]
    );
    assert_eq!(harness.store.replaced.lock().len(), 1);
    assert!(harness.store.last_sync.lock().is_some());
}

#[tokio::test]
async fn permanent_step_errors_are_not_retried() {
    let harness = harness();
    *harness.views.watched.lock() = vec!["messaging:9".into()];
    harness.api.queue_recovery_response(Err(DriftlineError::Api(ErrorPayload {
        code: 4,
        message: "input error".into(),
        status_code: 400,
    })));

    harness.sync.sync_local_state().await.unwrap();

    assert_eq!(harness.api.recovery_requests.lock().len(), 1);
    assert!(harness.store.last_sync.lock().is_some());
}

#[tokio::test]
async fn too_many_events_counts_as_a_completed_sync() {
    let harness = harness();
    *harness.store.channels.lock() = vec!["messaging:1".into()];
    *harness.store.pending_connection.lock() = Some(Utc::now() - chrono::Duration::days(2));
    harness.api.queue_recovery_response(Err(DriftlineError::Api(ErrorPayload {
        code: 16,
        message: "Too many events to sync since the last connection".into(),
        status_code: 400,
    })));

    harness.sync.sync_local_state().await.unwrap();

    assert_eq!(harness.api.recovery_requests.lock().len(), 1);
    assert!(harness.store.applied.lock().is_empty());
    assert!(harness.store.last_sync.lock().is_some());
    assert_eq!(*harness.store.pending_connection.lock(), None);
}

#[tokio::test]
async fn no_pending_marker_skips_the_event_step() {
    let harness = harness();
    *harness.store.channels.lock() = vec!["messaging:1".into()];

    harness.sync.sync_local_state().await.unwrap();

    assert!(harness.api.recovery_requests.lock().is_empty());
    assert!(harness.store.last_sync.lock().is_some());
    assert_eq!(harness.api.recovery_enters.load(Ordering::SeqCst), 1);
    assert_eq!(harness.api.recovery_exits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn queued_requests_replay_during_the_pipeline() {
    let harness = harness();
    let request = QueuedRequest::new(send_message("messaging:1", "m1"));
    harness.requests.insert_raw(StoredRequest::from(&request));

    harness.sync.sync_local_state().await.unwrap();

    assert!(harness.requests.is_empty());
    assert_eq!(harness.reconciler.sent.lock().len(), 1);
    assert_eq!(recovery_paths(&harness.api), vec!["send_message"]);
}

#[tokio::test]
async fn event_sync_propagates_api_failures_unretried() {
    let harness = harness();
    *harness.store.channels.lock() = vec!["messaging:1".into()];
    *harness.store.last_received_event.lock() = Some(Utc::now() - chrono::Duration::minutes(10));
    harness.api.queue_request_response(Err(DriftlineError::ConnectionFailure("offline".into())));

    let err = harness.sync.sync_existing_channels_events().await.unwrap_err();

    assert!(err.is_connection_failure());
    assert_eq!(harness.api.requests.lock().len(), 1);
    assert!(harness.api.recovery_requests.lock().is_empty());
}

#[tokio::test]
async fn the_last_connection_instant_is_recorded() {
    let harness = harness();
    assert_eq!(harness.sync.last_connection_at(), None);

    let at = Utc::now();
    harness.sync.record_last_connection(at);

    assert_eq!(harness.sync.last_connection_at(), Some(at));
}

/// Network double that parks every recovery call until the test releases
/// it, so two runs can be held in flight at once.
struct GatedApi {
    inner: MockApiClient,
    gate: Semaphore,
}

#[async_trait]
impl ApiClient for GatedApi {
    async fn request(&self, endpoint: &Endpoint) -> Result<Value> {
        self.inner.request(endpoint).await
    }

    async fn recovery_request(&self, endpoint: &Endpoint) -> Result<Value> {
        let _permit = self.gate.acquire().await.unwrap();
        self.inner.recovery_request(endpoint).await
    }

    async fn fetch_guest_token(&self, user_info: &UserInfo) -> Result<Token> {
        self.inner.fetch_guest_token(user_info).await
    }

    fn enter_recovery_mode(&self) {
        self.inner.enter_recovery_mode();
    }

    fn exit_recovery_mode(&self) {
        self.inner.exit_recovery_mode();
    }

    fn enter_token_fetch_mode(&self) {
        self.inner.enter_token_fetch_mode();
    }

    fn exit_token_fetch_mode(&self) {
        self.inner.exit_token_fetch_mode();
    }

    fn flush_request_queue(&self) {
        self.inner.flush_request_queue();
    }
}

#[tokio::test]
async fn a_new_run_cancels_the_one_in_flight() {
    let api = Arc::new(GatedApi { inner: MockApiClient::default(), gate: Semaphore::new(0) });
    let store = Arc::new(InMemorySyncStore::default());
    *store.channels.lock() = vec!["messaging:1".into()];
    *store.pending_connection.lock() = Some(Utc::now() - chrono::Duration::minutes(10));

    let offline = Arc::new(OfflineRequestQueue::new(
        Arc::clone(&api) as Arc<dyn ApiClient>,
        Arc::new(InMemoryRequestStore::default()) as _,
        Arc::new(RecordingReconciler::default()) as _,
        OfflineQueueConfig::default(),
    ));
    let sync = Arc::new(SyncService::new(
        Arc::clone(&api) as Arc<dyn ApiClient>,
        Arc::clone(&store) as _,
        Arc::new(StaticSessionViews::default()) as _,
        offline,
        SyncConfig::default(),
    ));

    let first = {
        let sync = Arc::clone(&sync);
        tokio::spawn(async move { sync.sync_local_state().await })
    };
    tokio::task::yield_now().await;

    let second = {
        let sync = Arc::clone(&sync);
        tokio::spawn(async move { sync.sync_local_state().await })
    };
    tokio::task::yield_now().await;

    api.gate.add_permits(2);

    let first = first.await.unwrap();
    assert!(matches!(first, Err(DriftlineError::Cancelled)));
    second.await.unwrap().unwrap();

    // Only the surviving run performed the final bookkeeping, and both
    // left recovery mode behind them.
    assert!(store.last_sync.lock().is_some());
    assert_eq!(*store.pending_connection.lock(), None);
    assert_eq!(api.inner.recovery_enters.load(Ordering::SeqCst), 2);
    assert_eq!(api.inner.recovery_exits.load(Ordering::SeqCst), 2);
}
