//! End-to-end facade scenarios: transport events flowing through the
//! session event loop into the lifecycle subsystems.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use driftline_core::testing::{MockTokenProvider, SessionFixture};
use driftline_core::{ChatSession, SessionConfig, TransportEvent};
use driftline_domain::{
    ConnectionState, DisconnectSource, Endpoint, EndpointPath, ErrorPayload, HttpMethod, Token,
    UserId, UserInfo,
};
use serde_json::json;
use tokio::sync::mpsc;

fn session(fixture: &SessionFixture) -> ChatSession {
    ChatSession::new(fixture.ports(), SessionConfig::default())
}

/// Lets the loop task and anything it spawned run to quiescence.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

fn connected(id: &str) -> TransportEvent {
    TransportEvent::from(ConnectionState::Connected { connection_id: id.into() })
}

fn dropped() -> TransportEvent {
    TransportEvent::from(ConnectionState::Disconnected {
        source: DisconnectSource::SystemInitiated,
    })
}

fn expired_token_drop() -> TransportEvent {
    TransportEvent::from(ConnectionState::Disconnected {
        source: DisconnectSource::ServerInitiated {
            error: Some(ErrorPayload {
                code: 40,
                message: "token expired".into(),
                status_code: 401,
            }),
        },
    })
}

#[tokio::test(start_paused = true)]
async fn connected_events_run_a_sync_and_stamp_the_connection() {
    let fixture = SessionFixture::default();
    let mut session = session(&fixture);
    let (events, rx) = mpsc::unbounded_channel();
    session.start(rx).await.unwrap();

    events.send(connected("c-1")).unwrap();
    settle().await;

    assert!(session.connection_state().is_connected());
    assert_eq!(fixture.api.recovery_enters.load(Ordering::SeqCst), 1);
    assert_eq!(fixture.api.recovery_exits.load(Ordering::SeqCst), 1);
    assert!(fixture.sync_store.last_sync.lock().is_some());

    session.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn disconnects_record_a_pending_marker_once() {
    let fixture = SessionFixture::default();
    let mut session = session(&fixture);
    let (events, rx) = mpsc::unbounded_channel();
    session.start(rx).await.unwrap();

    events.send(dropped()).unwrap();
    settle().await;
    let first_marker = *fixture.sync_store.pending_connection.lock();
    assert!(first_marker.is_some());

    // A second drop keeps the oldest marker so the eventual catch-up
    // window covers the whole gap.
    events.send(dropped()).unwrap();
    settle().await;
    assert_eq!(*fixture.sync_store.pending_connection.lock(), first_marker);

    session.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn an_expired_token_disconnect_refreshes_and_reconnects() {
    let fixture = SessionFixture::default();
    let mut session = session(&fixture);
    let (events, rx) = mpsc::unbounded_channel();
    session.start(rx).await.unwrap();

    let provider = Arc::new(MockTokenProvider::succeeding(Token::new("jwt-leia", "leia", None)));
    session.connect_user(UserInfo::new("leia"), Arc::clone(&provider) as _).await.unwrap();
    settle().await;
    let connects_after_login = fixture.transport.connects.load(Ordering::SeqCst);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

    events.send(expired_token_drop()).unwrap();
    settle().await;

    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    assert_eq!(fixture.transport.endpoints.lock().len(), 2);
    assert!(fixture.transport.connects.load(Ordering::SeqCst) > connects_after_login);
    assert!(fixture.sync_store.pending_connection.lock().is_some());

    session.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn queued_writes_replay_on_the_next_sync() {
    let fixture = SessionFixture::default();
    let mut session = session(&fixture);
    let (events, rx) = mpsc::unbounded_channel();
    session.start(rx).await.unwrap();

    let send = Endpoint::new(
        EndpointPath::SendMessage { channel_id: "messaging:1".into(), message_id: "m1".into() },
        HttpMethod::Post,
    )
    .with_body(json!({"text": "typed in a tunnel"}));
    session.queue_offline_request(send).await.unwrap();
    assert_eq!(fixture.request_store.len(), 1);

    events.send(connected("c-2")).unwrap();
    settle().await;

    assert!(fixture.request_store.is_empty());
    assert_eq!(fixture.reconciler.sent.lock().len(), 1);

    session.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn log_out_disconnects_then_clears_identity() {
    let fixture = SessionFixture::default();
    let mut session = session(&fixture);
    let (_events, rx) = mpsc::unbounded_channel();
    session.start(rx).await.unwrap();

    let provider = Arc::new(MockTokenProvider::succeeding(Token::new("jwt-leia", "leia", None)));
    session.connect_user(UserInfo::new("leia"), provider).await.unwrap();
    assert_eq!(session.current_user_id(), Some(UserId::new("leia")));

    session.log_out_user().await.unwrap();

    assert_eq!(session.current_user_id(), None);
    assert_eq!(fixture.api.flushes.load(Ordering::SeqCst), 1);

    session.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn stop_tears_the_loop_down() {
    let fixture = SessionFixture::default();
    let mut session = session(&fixture);
    let (events, rx) = mpsc::unbounded_channel();
    session.start(rx).await.unwrap();
    assert!(session.is_running());

    session.stop().await.unwrap();
    assert!(!session.is_running());

    settle().await;
    assert!(events.send(connected("c-9")).is_err());
}

#[tokio::test(start_paused = true)]
async fn dropping_a_running_session_cancels_the_loop() {
    let fixture = SessionFixture::default();
    let mut session = session(&fixture);
    let (events, rx) = mpsc::unbounded_channel();
    session.start(rx).await.unwrap();

    drop(session);
    settle().await;

    assert!(events.send(connected("c-9")).is_err());
}
