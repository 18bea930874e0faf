//! Mock port implementations shared by unit and integration tests.
//!
//! Every mock records the calls it receives and answers from a scripted
//! response queue, falling back to a benign default once the queue runs
//! dry.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use driftline_domain::{
    ChannelId, ChannelListQuery, ChannelPage, DisconnectSource, DriftlineError, Endpoint,
    EnvironmentState, MessageId, MissingEventsPayload, QueuedRequest, Result, Token, UserInfo,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::ports::{SessionDelegate, TokenProvider};
use crate::connection::ports::Transport;
use crate::network_ports::ApiClient;
use crate::offline::ports::{MessageReconciler, RequestStore, StoredRequest};
use crate::session::SessionPorts;
use crate::sync::ports::{ActiveSessionViews, SyncStore};

/// Scriptable network client double.
///
/// Responses are queued per lane and consumed in order; an exhausted queue
/// answers `Ok(json!({}))`. Every call and mode switch is recorded.
#[derive(Default)]
pub struct MockApiClient {
    pub requests: Mutex<Vec<Endpoint>>,
    pub recovery_requests: Mutex<Vec<Endpoint>>,
    pub guest_requests: Mutex<Vec<UserInfo>>,
    pub recovery_enters: AtomicUsize,
    pub recovery_exits: AtomicUsize,
    pub token_fetch_enters: AtomicUsize,
    pub token_fetch_exits: AtomicUsize,
    pub flushes: AtomicUsize,
    request_responses: Mutex<VecDeque<Result<Value>>>,
    recovery_responses: Mutex<VecDeque<Result<Value>>>,
    guest_tokens: Mutex<VecDeque<Result<Token>>>,
}

impl MockApiClient {
    pub fn queue_request_response(&self, response: Result<Value>) {
        self.request_responses.lock().push_back(response);
    }

    pub fn queue_recovery_response(&self, response: Result<Value>) {
        self.recovery_responses.lock().push_back(response);
    }

    pub fn queue_guest_token(&self, token: Result<Token>) {
        self.guest_tokens.lock().push_back(token);
    }
}

#[async_trait]
impl ApiClient for MockApiClient {
    async fn request(&self, endpoint: &Endpoint) -> Result<Value> {
        self.requests.lock().push(endpoint.clone());
        self.request_responses.lock().pop_front().unwrap_or_else(|| Ok(json!({})))
    }

    async fn recovery_request(&self, endpoint: &Endpoint) -> Result<Value> {
        self.recovery_requests.lock().push(endpoint.clone());
        self.recovery_responses.lock().pop_front().unwrap_or_else(|| Ok(json!({})))
    }

    async fn fetch_guest_token(&self, user_info: &UserInfo) -> Result<Token> {
        self.guest_requests.lock().push(user_info.clone());
        self.guest_tokens
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(Token::new("guest-token", user_info.id.clone(), None)))
    }

    fn enter_recovery_mode(&self) {
        self.recovery_enters.fetch_add(1, Ordering::SeqCst);
    }

    fn exit_recovery_mode(&self) {
        self.recovery_exits.fetch_add(1, Ordering::SeqCst);
    }

    fn enter_token_fetch_mode(&self) {
        self.token_fetch_enters.fetch_add(1, Ordering::SeqCst);
    }

    fn exit_token_fetch_mode(&self) {
        self.token_fetch_exits.fetch_add(1, Ordering::SeqCst);
    }

    fn flush_request_queue(&self) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Transport double recording lifecycle calls and endpoint repoints.
#[derive(Default)]
pub struct MockTransport {
    pub connects: AtomicUsize,
    pub disconnects: Mutex<Vec<DisconnectSource>>,
    pub endpoints: Mutex<Vec<(Token, UserInfo)>>,
    connect_results: Mutex<VecDeque<Result<()>>>,
}

impl MockTransport {
    pub fn queue_connect_result(&self, result: Result<()>) {
        self.connect_results.lock().push_back(result);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.connect_results.lock().pop_front().unwrap_or(Ok(()))
    }

    async fn disconnect(&self, source: DisconnectSource) -> Result<()> {
        self.disconnects.lock().push(source);
        Ok(())
    }

    fn update_endpoint(&self, token: &Token, connect_as: &UserInfo) {
        self.endpoints.lock().push((token.clone(), connect_as.clone()));
    }
}

/// Session delegate double counting logouts and environment transitions.
#[derive(Default)]
pub struct MockSessionDelegate {
    pub logouts: AtomicUsize,
    pub environments: Mutex<Vec<EnvironmentState>>,
    logout_results: Mutex<VecDeque<Result<()>>>,
}

impl MockSessionDelegate {
    pub fn queue_logout_result(&self, result: Result<()>) {
        self.logout_results.lock().push_back(result);
    }
}

#[async_trait]
impl SessionDelegate for MockSessionDelegate {
    async fn log_out_current_user(&self) -> Result<()> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        self.logout_results.lock().pop_front().unwrap_or(Ok(()))
    }

    async fn environment_did_change(&self, environment: EnvironmentState) {
        self.environments.lock().push(environment);
    }
}

/// Scriptable token provider.
///
/// Scripted results are consumed in order; once exhausted, every further
/// fetch answers with the fallback.
pub struct MockTokenProvider {
    pub calls: AtomicUsize,
    script: Mutex<VecDeque<Result<Token>>>,
    fallback: Result<Token>,
}

impl MockTokenProvider {
    pub fn succeeding(token: Token) -> Self {
        Self::scripted(Vec::new(), Ok(token))
    }

    pub fn failing() -> Self {
        Self::scripted(
            Vec::new(),
            Err(DriftlineError::ConnectionFailure("token backend unreachable".into())),
        )
    }

    pub fn scripted(script: Vec<Result<Token>>, fallback: Result<Token>) -> Self {
        Self { calls: AtomicUsize::new(0), script: Mutex::new(script.into()), fallback }
    }
}

#[async_trait]
impl TokenProvider for MockTokenProvider {
    async fn fetch_token(&self) -> Result<Token> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script.lock().pop_front().unwrap_or_else(|| self.fallback.clone())
    }
}

/// In-memory rendition of the sync-facing store slice.
#[derive(Default)]
pub struct InMemorySyncStore {
    pub channels: Mutex<Vec<ChannelId>>,
    pub pending_connection: Mutex<Option<DateTime<Utc>>>,
    pub last_sync: Mutex<Option<DateTime<Utc>>>,
    pub last_received_event: Mutex<Option<DateTime<Utc>>>,
    pub applied: Mutex<Vec<MissingEventsPayload>>,
    pub replaced: Mutex<Vec<(ChannelListQuery, ChannelPage)>>,
}

#[async_trait]
impl SyncStore for InMemorySyncStore {
    async fn channel_ids(&self) -> Result<Vec<ChannelId>> {
        Ok(self.channels.lock().clone())
    }

    async fn pending_connection_at(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(*self.pending_connection.lock())
    }

    async fn set_pending_connection_at(&self, at: Option<DateTime<Utc>>) -> Result<()> {
        *self.pending_connection.lock() = at;
        Ok(())
    }

    async fn last_sync_at(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(*self.last_sync.lock())
    }

    async fn set_last_sync_at(&self, at: DateTime<Utc>) -> Result<()> {
        *self.last_sync.lock() = Some(at);
        Ok(())
    }

    async fn last_received_event_at(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(*self.last_received_event.lock())
    }

    async fn set_last_received_event_at(&self, at: DateTime<Utc>) -> Result<()> {
        *self.last_received_event.lock() = Some(at);
        Ok(())
    }

    async fn apply_events(&self, payload: &MissingEventsPayload) -> Result<()> {
        self.applied.lock().push(payload.clone());
        Ok(())
    }

    async fn replace_query_results(
        &self,
        query: &ChannelListQuery,
        page: &ChannelPage,
    ) -> Result<()> {
        self.replaced.lock().push((query.clone(), page.clone()));
        Ok(())
    }
}

/// Preset snapshot of active views.
#[derive(Default)]
pub struct StaticSessionViews {
    pub channels: Mutex<Vec<ChannelId>>,
    pub watched: Mutex<Vec<ChannelId>>,
    pub queries: Mutex<Vec<ChannelListQuery>>,
}

impl ActiveSessionViews for StaticSessionViews {
    fn channel_ids(&self) -> Vec<ChannelId> {
        self.channels.lock().clone()
    }

    fn watched_channel_ids(&self) -> Vec<ChannelId> {
        self.watched.lock().clone()
    }

    fn list_queries(&self) -> Vec<ChannelListQuery> {
        self.queries.lock().clone()
    }
}

/// In-memory offline request store preserving enqueue order.
#[derive(Default)]
pub struct InMemoryRequestStore {
    records: Mutex<Vec<StoredRequest>>,
}

impl InMemoryRequestStore {
    /// Injects a raw record, bypassing the typed enqueue path.
    pub fn insert_raw(&self, record: StoredRequest) {
        self.records.lock().push(record);
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Ids still queued, in order.
    pub fn remaining_ids(&self) -> Vec<Uuid> {
        self.records.lock().iter().map(|record| record.id).collect()
    }
}

#[async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn enqueue(&self, request: &QueuedRequest) -> Result<()> {
        self.records.lock().push(StoredRequest::from(request));
        Ok(())
    }

    async fn all_queued(&self) -> Result<Vec<StoredRequest>> {
        Ok(self.records.lock().clone())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.records.lock().retain(|record| record.id != id);
        Ok(())
    }
}

/// Records reconciliation callbacks for assertions.
#[derive(Default)]
pub struct RecordingReconciler {
    pub sent: Mutex<Vec<(ChannelId, Value)>>,
    pub edited: Mutex<Vec<MessageId>>,
    pub deleted: Mutex<Vec<MessageId>>,
}

#[async_trait]
impl MessageReconciler for RecordingReconciler {
    async fn save_successfully_sent_message(
        &self,
        channel_id: &ChannelId,
        payload: &Value,
    ) -> Result<()> {
        self.sent.lock().push((channel_id.clone(), payload.clone()));
        Ok(())
    }

    async fn save_successfully_edited_message(&self, message_id: &MessageId) -> Result<()> {
        self.edited.lock().push(message_id.clone());
        Ok(())
    }

    async fn save_successfully_deleted_message(&self, message_id: &MessageId) -> Result<()> {
        self.deleted.lock().push(message_id.clone());
        Ok(())
    }
}

/// Complete set of mock ports for facade and integration tests.
#[derive(Default)]
pub struct SessionFixture {
    pub api: Arc<MockApiClient>,
    pub transport: Arc<MockTransport>,
    pub delegate: Arc<MockSessionDelegate>,
    pub sync_store: Arc<InMemorySyncStore>,
    pub views: Arc<StaticSessionViews>,
    pub request_store: Arc<InMemoryRequestStore>,
    pub reconciler: Arc<RecordingReconciler>,
}

impl SessionFixture {
    /// Port bundle for `ChatSession::new`, sharing these mock instances.
    pub fn ports(&self) -> SessionPorts {
        SessionPorts {
            api: Arc::clone(&self.api) as Arc<dyn ApiClient>,
            transport: Arc::clone(&self.transport) as Arc<dyn Transport>,
            delegate: Arc::clone(&self.delegate) as Arc<dyn SessionDelegate>,
            sync_store: Arc::clone(&self.sync_store) as Arc<dyn SyncStore>,
            views: Arc::clone(&self.views) as Arc<dyn ActiveSessionViews>,
            request_store: Arc::clone(&self.request_store) as Arc<dyn RequestStore>,
            reconciler: Arc::clone(&self.reconciler) as Arc<dyn MessageReconciler>,
        }
    }
}
