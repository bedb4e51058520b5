use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use url::Url;
use vanguard_realtime::{
    ChannelEvent, ChannelKind, ChannelStatus, CommandError, EventSink, Identity, RealtimeConfig,
    RealtimeHandle, RealtimeService, Transport, TransportError, TransportLink,
};

#[derive(Debug, Clone, Default)]
struct FakeLink {
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl FakeLink {
    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl TransportLink for FakeLink {
    fn send_text(&self, text: String) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
struct Connection {
    url: Url,
    sink: EventSink,
    link: FakeLink,
}

impl Connection {
    fn emit(&self, event: ChannelEvent) {
        self.sink.emit(event);
    }
}

#[derive(Clone, Default)]
struct FakeTransport {
    connections: Arc<Mutex<Vec<Connection>>>,
    refuse: Arc<AtomicBool>,
}

impl FakeTransport {
    fn count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    fn latest(&self, kind: ChannelKind) -> Connection {
        self.connections
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|c| c.sink.kind() == kind)
            .cloned()
            .expect("No connection for kind")
    }

    fn all(&self) -> Vec<Connection> {
        self.connections.lock().unwrap().clone()
    }
}

impl Transport for FakeTransport {
    fn connect(&self, url: &Url, sink: EventSink) -> Result<Box<dyn TransportLink>, TransportError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Unknown("refused".to_string()));
        }

        let link = FakeLink::default();
        self.connections.lock().unwrap().push(Connection {
            url: url.clone(),
            sink,
            link: link.clone(),
        });

        Ok(Box::new(link))
    }
}

struct Harness {
    transport: FakeTransport,
    handle: RealtimeHandle,
    join: JoinHandle<()>,
}

impl Harness {
    fn new(config: RealtimeConfig) -> Self {
        Self::with_transport(config, FakeTransport::default())
    }

    fn with_transport(config: RealtimeConfig, transport: FakeTransport) -> Self {
        let service = RealtimeService::new(config, Arc::new(transport.clone()));
        let handle = service.handle();
        let join = service.start();

        Self {
            transport,
            handle,
            join,
        }
    }

    async fn settle(&self) {
        self.handle.flush().await.unwrap();
    }

    async fn started(user_id: &str) -> Self {
        let harness = Self::new(config());
        harness.handle.start(user_id).unwrap();
        harness.settle().await;
        harness
    }

    async fn close_chat(&self) {
        self.transport
            .latest(ChannelKind::Chat)
            .emit(ChannelEvent::Closed { code: Some(1006) });
        self.settle().await;
    }

    async fn wait(&self, ms: u64) {
        sleep(Duration::from_millis(ms)).await;
        self.settle().await;
    }
}

fn config() -> RealtimeConfig {
    RealtimeConfig::new(Url::parse("http://localhost:8001").unwrap())
}

#[test_log::test(tokio::test(start_paused = true))]
async fn authenticated_identity_opens_both_channels_and_connects_on_chat_open() {
    let harness = Harness::new(config());

    harness
        .handle
        .bind_identity(Identity::authenticated("u1"))
        .unwrap();
    harness.settle().await;

    let urls = harness
        .transport
        .all()
        .into_iter()
        .map(|c| c.url.to_string())
        .collect::<Vec<_>>();
    assert_eq!(
        urls,
        vec![
            "ws://localhost:8001/ws/chat/u1".to_string(),
            "ws://localhost:8001/ws/notifications/u1".to_string(),
        ]
    );

    let state = harness.handle.state();
    assert_eq!(state.user_id.as_deref(), Some("u1"));
    assert_eq!(state.chat.status, ChannelStatus::Connecting);
    assert!(!harness.handle.connected());

    harness
        .transport
        .latest(ChannelKind::Chat)
        .emit(ChannelEvent::Opened);
    harness.settle().await;

    assert!(harness.handle.connected());
    assert_eq!(harness.handle.state().chat.status, ChannelStatus::Open);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn notifications_open_alone_is_not_connected() {
    let harness = Harness::started("u1").await;

    harness
        .transport
        .latest(ChannelKind::Notifications)
        .emit(ChannelEvent::Opened);
    harness.settle().await;

    assert!(!harness.handle.connected());
    assert_eq!(
        harness.handle.state().notifications.status,
        ChannelStatus::Open
    );
}

#[test_log::test(tokio::test(start_paused = true))]
async fn inactive_identities_never_connect() {
    let harness = Harness::new(config());

    harness
        .handle
        .bind_identity(Identity {
            user_id: Some("u1".to_string()),
            is_authenticated: false,
        })
        .unwrap();
    harness
        .handle
        .bind_identity(Identity {
            user_id: None,
            is_authenticated: true,
        })
        .unwrap();
    harness.settle().await;

    assert_eq!(harness.transport.count(), 0);
    assert_eq!(harness.handle.state().user_id, None);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn unexpected_chat_close_reopens_pair_after_two_seconds() {
    let harness = Harness::started("u1").await;
    harness
        .transport
        .latest(ChannelKind::Chat)
        .emit(ChannelEvent::Opened);
    let first_notifications = harness.transport.latest(ChannelKind::Notifications);

    harness.close_chat().await;

    assert_eq!(harness.handle.state().reconnect_attempts, 1);
    assert!(!harness.handle.connected());
    assert_eq!(harness.transport.count(), 2);

    harness.wait(1999).await;
    assert_eq!(harness.transport.count(), 2);

    harness.wait(2).await;
    assert_eq!(harness.transport.count(), 4);
    assert!(first_notifications.link.is_closed());

    let state = harness.handle.state();
    assert_eq!(state.chat.status, ChannelStatus::Connecting);
    assert_eq!(state.notifications.status, ChannelStatus::Connecting);
    assert_eq!(
        harness.transport.latest(ChannelKind::Chat).url.as_str(),
        "ws://localhost:8001/ws/chat/u1"
    );
}

#[test_log::test(tokio::test(start_paused = true))]
async fn gives_up_after_five_consecutive_failures() {
    let harness = Harness::started("u1").await;

    for attempt in 1..=5 {
        harness.close_chat().await;
        assert_eq!(harness.handle.state().reconnect_attempts, attempt);

        harness.wait(30_001).await;
        assert_eq!(harness.transport.count(), 2 + 2 * attempt as usize);
    }

    harness.close_chat().await;
    harness.wait(120_000).await;

    let state = harness.handle.state();
    assert_eq!(state.reconnect_attempts, 5);
    assert!(!state.connected);
    assert_eq!(harness.transport.count(), 12);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn backoff_doubles_between_attempts() {
    let harness = Harness::started("u1").await;

    harness.close_chat().await;
    harness.wait(2001).await;
    assert_eq!(harness.transport.count(), 4);

    harness.close_chat().await;
    harness.wait(3999).await;
    assert_eq!(harness.transport.count(), 4);
    harness.wait(2).await;
    assert_eq!(harness.transport.count(), 6);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn chat_open_resets_attempts() {
    let harness = Harness::started("u1").await;

    harness.close_chat().await;
    harness.wait(2001).await;
    assert_eq!(harness.handle.state().reconnect_attempts, 1);

    harness
        .transport
        .latest(ChannelKind::Notifications)
        .emit(ChannelEvent::Opened);
    harness.settle().await;
    assert_eq!(harness.handle.state().reconnect_attempts, 1);

    harness
        .transport
        .latest(ChannelKind::Chat)
        .emit(ChannelEvent::Opened);
    harness.settle().await;

    assert_eq!(harness.handle.state().reconnect_attempts, 0);
    assert!(harness.handle.connected());
}

#[test_log::test(tokio::test(start_paused = true))]
async fn closes_while_reconnect_is_pending_share_one_attempt() {
    let harness = Harness::started("u1").await;

    harness.close_chat().await;
    harness
        .transport
        .latest(ChannelKind::Notifications)
        .emit(ChannelEvent::Closed { code: None });
    harness.settle().await;

    assert_eq!(harness.handle.state().reconnect_attempts, 1);

    harness.wait(2001).await;
    assert_eq!(harness.transport.count(), 4);

    harness.wait(60_000).await;
    assert_eq!(harness.transport.count(), 4);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn losing_identity_cancels_pending_reconnect() {
    let harness = Harness::started("u1").await;
    let first = harness.transport.all();

    harness.close_chat().await;
    harness.handle.stop().unwrap();
    harness.settle().await;

    harness.wait(60_000).await;

    assert_eq!(harness.transport.count(), 2);
    assert!(first[1].link.is_closed());

    let state = harness.handle.state();
    assert_eq!(state.user_id, None);
    assert_eq!(state.chat.socket, None);
    assert_eq!(state.notifications.socket, None);
    assert!(!state.connected);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn events_from_discarded_sockets_are_ignored() {
    let harness = Harness::started("u1").await;
    let old_chat = harness.transport.latest(ChannelKind::Chat);

    harness.handle.stop().unwrap();
    harness.settle().await;

    old_chat.emit(ChannelEvent::Closed { code: Some(1000) });
    harness.settle().await;
    harness.wait(60_000).await;

    assert_eq!(harness.handle.state().reconnect_attempts, 0);
    assert_eq!(harness.transport.count(), 2);

    harness.handle.start("u1").unwrap();
    harness.settle().await;

    old_chat.emit(ChannelEvent::Opened);
    harness.settle().await;

    assert!(!harness.handle.connected());
}

#[test_log::test(tokio::test(start_paused = true))]
async fn rebinding_an_identity_reopens_the_pair() {
    let harness = Harness::started("u1").await;
    let first = harness.transport.all();
    harness.close_chat().await;

    harness.handle.start("u1").unwrap();
    harness.settle().await;

    assert_eq!(harness.transport.count(), 4);
    assert!(first[1].link.is_closed());
    assert_eq!(harness.handle.state().reconnect_attempts, 0);

    harness.wait(60_000).await;
    assert_eq!(harness.transport.count(), 4);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn switching_users_reconnects_with_new_endpoints() {
    let harness = Harness::started("u1").await;

    harness.handle.start("u2").unwrap();
    harness.settle().await;

    assert_eq!(
        harness.transport.latest(ChannelKind::Chat).url.as_str(),
        "ws://localhost:8001/ws/chat/u2"
    );
    assert_eq!(
        harness.transport.latest(ChannelKind::Notifications).url.as_str(),
        "ws://localhost:8001/ws/notifications/u2"
    );
    assert_eq!(harness.handle.state().user_id.as_deref(), Some("u2"));
}

#[test_log::test(tokio::test(start_paused = true))]
async fn sends_are_dropped_until_chat_is_open() {
    let harness = Harness::started("u1").await;
    let chat = harness.transport.latest(ChannelKind::Chat);

    harness
        .handle
        .send_chat_message(json!({"content": "too early"}))
        .unwrap();
    harness.settle().await;
    assert_eq!(chat.link.sent(), Vec::<String>::new());

    chat.emit(ChannelEvent::Opened);
    harness
        .handle
        .send_chat_message(json!({"conversation_id": "c1", "content": "hello"}))
        .unwrap();
    harness.handle.send_typing_indicator("c1").unwrap();
    harness.settle().await;

    let sent = chat
        .link
        .sent()
        .iter()
        .map(|text| serde_json::from_str::<Value>(text).unwrap())
        .collect::<Vec<_>>();
    assert_eq!(
        sent,
        vec![
            json!({"conversation_id": "c1", "content": "hello"}),
            json!({"type": "typing", "conversation_id": "c1"}),
        ]
    );
    assert!(
        harness
            .transport
            .latest(ChannelKind::Notifications)
            .link
            .sent()
            .is_empty()
    );
}

#[test_log::test(tokio::test(start_paused = true))]
async fn inbound_frames_are_broadcast_with_their_channel() {
    let harness = Harness::started("u1").await;
    let mut inbound = harness.handle.subscribe();

    harness
        .transport
        .latest(ChannelKind::Notifications)
        .emit(ChannelEvent::Message(r#"{"type":"rank_up"}"#.to_string()));
    harness.settle().await;

    let frame = inbound.recv().await.unwrap();
    assert_eq!(frame.kind, ChannelKind::Notifications);
    assert_eq!(frame.json().unwrap(), json!({"type": "rank_up"}));
}

#[test_log::test(tokio::test(start_paused = true))]
async fn errors_do_not_change_status_or_trigger_reconnect() {
    let harness = Harness::started("u1").await;
    let chat = harness.transport.latest(ChannelKind::Chat);
    chat.emit(ChannelEvent::Opened);

    chat.emit(ChannelEvent::Errored("boom".to_string()));
    harness.settle().await;

    assert!(harness.handle.connected());
    assert_eq!(harness.handle.state().reconnect_attempts, 0);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn refused_connections_leave_channels_empty_without_retrying() {
    let transport = FakeTransport::default();
    transport.refuse.store(true, Ordering::SeqCst);
    let harness = Harness::with_transport(config(), transport);

    harness.handle.start("u1").unwrap();
    harness.settle().await;
    harness.wait(60_000).await;

    let state = harness.handle.state();
    assert_eq!(state.user_id.as_deref(), Some("u1"));
    assert_eq!(state.chat.socket, None);
    assert_eq!(state.reconnect_attempts, 0);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn unsupported_backend_scheme_opens_nothing() {
    let harness = Harness::new(RealtimeConfig::new(
        Url::parse("ftp://files.example").unwrap(),
    ));

    harness.handle.start("u1").unwrap();
    harness.settle().await;

    assert_eq!(harness.transport.count(), 0);
    assert_eq!(harness.handle.state().chat.socket, None);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn connect_timeout_counts_as_unexpected_close() {
    let harness = Harness::new(config().with_connect_timeout(Duration::from_secs(10)));
    harness.handle.start("u1").unwrap();
    harness.settle().await;
    let chat = harness.transport.latest(ChannelKind::Chat);

    harness.wait(10_001).await;

    assert!(chat.link.is_closed());
    assert_eq!(harness.handle.state().reconnect_attempts, 1);
    assert_eq!(harness.transport.count(), 2);

    harness.wait(2_000).await;
    assert_eq!(harness.transport.count(), 4);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn connect_timeout_is_ignored_once_open() {
    let harness = Harness::new(config().with_connect_timeout(Duration::from_secs(10)));
    harness.handle.start("u1").unwrap();
    harness.settle().await;
    for kind in ChannelKind::PAIR {
        harness.transport.latest(kind).emit(ChannelEvent::Opened);
    }
    harness.settle().await;

    harness.wait(60_000).await;

    assert!(harness.handle.connected());
    assert_eq!(harness.transport.count(), 2);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn state_changes_are_observable() {
    let harness = Harness::started("u1").await;
    let mut state = harness.handle.watch_state();
    state.borrow_and_update();

    harness
        .transport
        .latest(ChannelKind::Chat)
        .emit(ChannelEvent::Opened);

    state.changed().await.unwrap();
    assert!(state.borrow().connected);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn shutdown_closes_channels_and_rejects_commands() {
    let harness = Harness::started("u1").await;
    let connections = harness.transport.all();

    harness.handle.shutdown();
    harness.join.await.unwrap();

    assert!(connections.iter().all(|c| c.link.is_closed()));
    assert_eq!(harness.handle.state().user_id, None);
    assert!(matches!(
        harness.handle.start("u1"),
        Err(CommandError::Stopped)
    ));
    assert!(matches!(
        harness.handle.flush().await,
        Err(CommandError::Stopped)
    ));
}

#[test_log::test(tokio::test(start_paused = true))]
async fn dropping_every_handle_stops_the_service() {
    let Harness {
        transport,
        handle,
        join,
    } = Harness::started("u1").await;
    let chat = transport.latest(ChannelKind::Chat);
    let extra = handle.clone();

    drop(handle);
    let_tasks_run().await;
    assert!(!join.is_finished());

    drop(extra);
    tokio::time::timeout(Duration::from_secs(600), join)
        .await
        .expect("service kept running after every handle was dropped")
        .unwrap();

    assert!(chat.link.is_closed());
    assert!(transport.latest(ChannelKind::Notifications).link.is_closed());

    sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.count(), 2);
}

async fn let_tasks_run() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}
