//! Owns the channel pair and reacts to everything that happens to it.
//!
//! The manager is plain synchronous state. It is driven by the event loop in
//! [`crate::service`], which feeds it commands, transport events and timer
//! firings one at a time.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::select;
use tokio::sync::{broadcast, watch};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::channel::{
    ChannelEvent, ChannelKind, ChannelSocket, ChannelStatus, SocketId, Transition,
};
use crate::config::RealtimeConfig;
use crate::envelope::{InboundFrame, MessageEnvelope};
use crate::reconnect::{ReconnectCoordinator, TimerId};
use crate::service::{Command, Event};
use crate::state::{ChannelSnapshot, ConnectionState, Identity};
use crate::transport::{EventSink, Transport};

pub struct ConnectionLifecycleManager {
    config: RealtimeConfig,
    transport: Arc<dyn Transport>,
    user_id: Option<String>,
    chat: Option<ChannelSocket>,
    notifications: Option<ChannelSocket>,
    chat_timeout: Option<CancellationToken>,
    notifications_timeout: Option<CancellationToken>,
    reconnect: ReconnectCoordinator,
    next_socket: u64,
    events: flume::Sender<Event>,
    state_tx: watch::Sender<ConnectionState>,
    inbound_tx: broadcast::Sender<InboundFrame>,
}

impl ConnectionLifecycleManager {
    pub(crate) fn new(
        config: RealtimeConfig,
        transport: Arc<dyn Transport>,
        events: flume::Sender<Event>,
        state_tx: watch::Sender<ConnectionState>,
        inbound_tx: broadcast::Sender<InboundFrame>,
    ) -> Self {
        let reconnect = ReconnectCoordinator::new(
            config.backoff,
            config.max_reconnect_attempts,
            events.clone(),
        );

        Self {
            config,
            transport,
            user_id: None,
            chat: None,
            notifications: None,
            chat_timeout: None,
            notifications_timeout: None,
            reconnect,
            next_socket: 0,
            events,
            state_tx,
            inbound_tx,
        }
    }

    pub(crate) fn process(&mut self, event: Event) {
        match event {
            Event::Command(command) => self.process_command(command),
            Event::Channel {
                kind,
                socket,
                event,
            } => self.on_channel_event(kind, socket, event),
            Event::ReconnectDue(id) => self.on_reconnect_due(id),
            Event::ConnectTimeout { kind, socket } => self.on_connect_timeout(kind, socket),
        }

        self.publish();
    }

    fn process_command(&mut self, command: Command) {
        match command {
            Command::BindIdentity(identity) => self.bind_identity(&identity),
            Command::SendChatMessage(payload) => {
                self.send_chat_message(payload);
            }
            Command::SendTypingIndicator(conversation_id) => {
                self.send_typing_indicator(conversation_id);
            }
            Command::Flush(tx) => {
                if tx.send(()).is_err() {
                    log::trace!("process_command: Flush waiter went away");
                }
            }
        }
    }

    /// An active identity tears down whatever is open and opens a fresh pair
    /// with a reset attempt counter, even when it is the identity already
    /// bound. Anything else closes the pair.
    pub fn bind_identity(&mut self, identity: &Identity) {
        if let Some(user_id) = identity.active_user() {
            let user_id = user_id.to_string();
            log::info!("bind_identity: Connecting realtime channels for user {user_id}");
            self.close_pair();
            self.reconnect.reset();
            self.open_pair(&user_id);
        } else {
            if let Some(user_id) = self.user_id.take() {
                log::info!("bind_identity: Identity lost, disconnecting user {user_id}");
            }
            self.close_pair();
        }
    }

    /// Opens chat, then notifications, replacing any existing sockets.
    pub fn open_pair(&mut self, user_id: &str) {
        self.user_id = Some(user_id.to_string());

        for kind in ChannelKind::PAIR {
            self.open_channel(kind, user_id);
        }
    }

    fn open_channel(&mut self, kind: ChannelKind, user_id: &str) {
        self.cancel_connect_timeout(kind);
        if let Some(mut previous) = self.slot_mut(kind).take() {
            previous.close();
        }

        self.next_socket += 1;
        let id = SocketId::new(self.next_socket);
        let sink = EventSink::new(kind, id, self.events.clone());

        match ChannelSocket::open(
            kind,
            id,
            user_id,
            &self.config.base_url,
            self.transport.as_ref(),
            sink,
        ) {
            Ok(socket) => {
                if let Some(timeout) = self.config.connect_timeout {
                    *self.timeout_slot_mut(kind) =
                        Some(self.schedule_connect_timeout(kind, id, timeout));
                }
                *self.slot_mut(kind) = Some(socket);
            }
            Err(e) => {
                log::error!("open_channel: Failed to open {kind} channel: {e}");
            }
        }
    }

    #[allow(clippy::redundant_pub_crate)]
    fn schedule_connect_timeout(
        &self,
        kind: ChannelKind,
        socket: SocketId,
        timeout: Duration,
    ) -> CancellationToken {
        let token = CancellationToken::new();

        tokio::spawn({
            let tx = self.events.clone();
            let token = token.clone();

            async move {
                select!(
                    () = sleep(timeout) => {
                        if tx.send(Event::ConnectTimeout { kind, socket }).is_err() {
                            log::trace!("connect timeout: service stopped");
                        }
                    }
                    () = token.cancelled() => {
                        log::trace!("connect timeout: Cancelled for {kind} socket {socket}");
                    }
                );
            }
        });

        token
    }

    fn cancel_connect_timeout(&mut self, kind: ChannelKind) {
        if let Some(token) = self.timeout_slot_mut(kind).take() {
            token.cancel();
        }
    }

    /// Cancels any pending reconnect, then closes chat and notifications and
    /// discards both handles.
    pub fn close_pair(&mut self) {
        self.reconnect.cancel();

        for kind in ChannelKind::PAIR {
            self.cancel_connect_timeout(kind);
            if let Some(mut socket) = self.slot_mut(kind).take() {
                socket.close();
            }
        }
    }

    pub(crate) fn shutdown(&mut self) {
        self.user_id = None;
        self.close_pair();
        self.publish();
    }

    /// Returns whether the payload was handed to an open chat socket.
    pub fn send_chat_message(&self, payload: Value) -> bool {
        self.send_on_chat(&MessageEnvelope::Chat(payload))
    }

    pub fn send_typing_indicator(&self, conversation_id: String) -> bool {
        self.send_on_chat(&MessageEnvelope::typing(conversation_id))
    }

    fn send_on_chat(&self, envelope: &MessageEnvelope) -> bool {
        self.chat.as_ref().map_or_else(
            || {
                log::debug!("send_on_chat: No chat socket, dropping envelope");
                false
            },
            |chat| chat.send(envelope),
        )
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.slot(ChannelKind::Chat)
            .is_some_and(ChannelSocket::is_open)
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState {
            user_id: self.user_id.clone(),
            chat: ChannelSnapshot::from(self.slot(ChannelKind::Chat)),
            notifications: ChannelSnapshot::from(self.slot(ChannelKind::Notifications)),
            connected: self.is_connected(),
            reconnect_attempts: self.reconnect.attempts(),
        }
    }

    fn publish(&self) {
        let state = self.state();
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    const fn slot(&self, kind: ChannelKind) -> Option<&ChannelSocket> {
        match kind {
            ChannelKind::Chat => self.chat.as_ref(),
            ChannelKind::Notifications => self.notifications.as_ref(),
        }
    }

    const fn slot_mut(&mut self, kind: ChannelKind) -> &mut Option<ChannelSocket> {
        match kind {
            ChannelKind::Chat => &mut self.chat,
            ChannelKind::Notifications => &mut self.notifications,
        }
    }

    const fn timeout_slot_mut(&mut self, kind: ChannelKind) -> &mut Option<CancellationToken> {
        match kind {
            ChannelKind::Chat => &mut self.chat_timeout,
            ChannelKind::Notifications => &mut self.notifications_timeout,
        }
    }

    /// The socket for `kind`, but only if it is still the instance `id`.
    fn current_mut(&mut self, kind: ChannelKind, id: SocketId) -> Option<&mut ChannelSocket> {
        self.slot_mut(kind).as_mut().filter(|socket| socket.id() == id)
    }

    fn on_channel_event(&mut self, kind: ChannelKind, id: SocketId, event: ChannelEvent) {
        let Some(socket) = self.current_mut(kind, id) else {
            log::trace!("on_channel_event: Ignoring {event:?} from discarded {kind} socket {id}");
            return;
        };

        let transition = socket.apply(&event);

        match event {
            ChannelEvent::Errored(error) => {
                log::warn!("on_channel_event: {kind} socket {id} error: {error}");
            }
            ChannelEvent::Message(text) => {
                vanguard_logging::debug_or_trace!(
                    ("on_channel_event: Message on {kind} socket {id}"),
                    ("on_channel_event: Message on {kind} socket {id} text={text}")
                );
                if self.inbound_tx.send(InboundFrame { kind, text }).is_err() {
                    log::trace!("on_channel_event: No inbound subscribers");
                }
            }
            ChannelEvent::Opened | ChannelEvent::Closed { .. } => {}
        }

        match transition {
            Transition::Opened => {
                log::info!("on_channel_event: {kind} channel open (socket {id})");
                self.cancel_connect_timeout(kind);
                if kind == ChannelKind::Chat {
                    self.reconnect.reset();
                }
            }
            Transition::Closed => {
                log::warn!("on_channel_event: {kind} channel closed unexpectedly (socket {id})");
                self.cancel_connect_timeout(kind);
                self.reconnect.on_close();
            }
            Transition::Unchanged => {}
        }
    }

    fn on_reconnect_due(&mut self, id: TimerId) {
        if !self.reconnect.fire(id) {
            return;
        }

        match self.user_id.clone() {
            Some(user_id) => {
                log::info!(
                    "on_reconnect_due: Reopening channel pair (attempt {})",
                    self.reconnect.attempts()
                );
                self.open_pair(&user_id);
            }
            None => {
                log::debug!("on_reconnect_due: No user bound, not reopening");
            }
        }
    }

    fn on_connect_timeout(&mut self, kind: ChannelKind, id: SocketId) {
        let timeout = self.config.connect_timeout;
        let Some(socket) = self
            .current_mut(kind, id)
            .filter(|socket| socket.status() == ChannelStatus::Connecting)
        else {
            return;
        };

        log::warn!("on_connect_timeout: {kind} socket {id} did not open within {timeout:?}");
        socket.close();
        self.timeout_slot_mut(kind).take();
        self.reconnect.on_close();
    }

    #[cfg(test)]
    fn connect_timeout(&self, kind: ChannelKind) -> Option<&CancellationToken> {
        match kind {
            ChannelKind::Chat => self.chat_timeout.as_ref(),
            ChannelKind::Notifications => self.notifications_timeout.as_ref(),
        }
    }
}
