//! The single event loop that owns the [`ConnectionLifecycleManager`].
//!
//! Commands from [`RealtimeHandle`], transport events and timer firings are
//! all funnelled through one queue and handled in arrival order, so the
//! manager never sees two of them at once.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::select;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::channel::{ChannelEvent, ChannelKind, SocketId};
use crate::config::RealtimeConfig;
use crate::envelope::InboundFrame;
use crate::manager::ConnectionLifecycleManager;
use crate::reconnect::TimerId;
use crate::state::{ConnectionState, Identity};
use crate::transport::Transport;

#[derive(Debug)]
pub(crate) enum Command {
    BindIdentity(Identity),
    SendChatMessage(Value),
    SendTypingIndicator(String),
    Flush(flume::Sender<()>),
}

#[derive(Debug)]
pub(crate) enum Event {
    Command(Command),
    Channel {
        kind: ChannelKind,
        socket: SocketId,
        event: ChannelEvent,
    },
    ReconnectDue(TimerId),
    ConnectTimeout {
        kind: ChannelKind,
        socket: SocketId,
    },
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Realtime service has stopped")]
    Stopped,
}

impl<T> From<flume::SendError<T>> for CommandError {
    fn from(_value: flume::SendError<T>) -> Self {
        Self::Stopped
    }
}

impl From<flume::RecvError> for CommandError {
    fn from(_value: flume::RecvError) -> Self {
        Self::Stopped
    }
}

/// Cancels the service once the last [`RealtimeHandle`] is gone.
#[derive(Debug)]
struct HandleGuard {
    token: CancellationToken,
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        if !self.token.is_cancelled() {
            log::debug!("drop: Last realtime handle dropped, stopping service");
            self.token.cancel();
        }
    }
}

pub struct RealtimeService {
    manager: ConnectionLifecycleManager,
    token: CancellationToken,
    guard: Arc<HandleGuard>,
    sender: flume::Sender<Event>,
    receiver: flume::Receiver<Event>,
    state: watch::Receiver<ConnectionState>,
    inbound: broadcast::Sender<InboundFrame>,
}

impl RealtimeService {
    #[must_use]
    pub fn new(config: RealtimeConfig, transport: Arc<dyn Transport>) -> Self {
        let (sender, receiver) = flume::unbounded();
        let (state_tx, state) = watch::channel(ConnectionState::default());
        let (inbound, _) = broadcast::channel(config.inbound_buffer.max(1));

        let manager = ConnectionLifecycleManager::new(
            config,
            transport,
            sender.clone(),
            state_tx,
            inbound.clone(),
        );

        let token = CancellationToken::new();

        Self {
            manager,
            guard: Arc::new(HandleGuard {
                token: token.clone(),
            }),
            token,
            sender,
            receiver,
            state,
            inbound,
        }
    }

    #[must_use]
    pub fn handle(&self) -> RealtimeHandle {
        RealtimeHandle {
            sender: self.sender.clone(),
            token: self.token.clone(),
            _guard: self.guard.clone(),
            state: self.state.clone(),
            inbound: self.inbound.clone(),
        }
    }

    /// Spawns the event loop on the current tokio runtime.
    ///
    /// The loop runs until [`RealtimeHandle::shutdown`] is called or every
    /// handle has been dropped. Starting a service without a live handle
    /// stops it straight away.
    ///
    /// # Panics
    ///
    /// * If called outside of a tokio runtime
    #[must_use]
    pub fn start(self) -> JoinHandle<()> {
        let Self {
            manager,
            token,
            guard,
            receiver,
            ..
        } = self;
        drop(guard);

        tokio::spawn(run(manager, token, receiver))
    }
}

#[allow(clippy::redundant_pub_crate)]
async fn run(
    mut manager: ConnectionLifecycleManager,
    token: CancellationToken,
    receiver: flume::Receiver<Event>,
) {
    log::debug!("run: Started realtime service");

    loop {
        let event = select!(
            () = token.cancelled() => {
                log::debug!("run: Realtime service was cancelled");
                break;
            }
            event = receiver.recv_async() => event,
        );

        match event {
            Ok(event) => {
                log::trace!("run: Received {event:?}");
                manager.process(event);
            }
            Err(e) => {
                log::debug!("run: Event queue closed: {e:?}");
                break;
            }
        }
    }

    manager.shutdown();

    log::debug!("run: Stopped realtime service");
}

/// Cheap, cloneable front door to a running [`RealtimeService`].
#[derive(Debug, Clone)]
pub struct RealtimeHandle {
    sender: flume::Sender<Event>,
    token: CancellationToken,
    _guard: Arc<HandleGuard>,
    state: watch::Receiver<ConnectionState>,
    inbound: broadcast::Sender<InboundFrame>,
}

impl RealtimeHandle {
    fn send_command(&self, command: Command) -> Result<(), CommandError> {
        if self.token.is_cancelled() {
            return Err(CommandError::Stopped);
        }
        Ok(self.sender.send(Event::Command(command))?)
    }

    /// Opens the channel pair for an authenticated identity with a user id,
    /// closes it otherwise.
    ///
    /// # Errors
    ///
    /// * If the service has stopped
    pub fn bind_identity(&self, identity: Identity) -> Result<(), CommandError> {
        self.send_command(Command::BindIdentity(identity))
    }

    /// # Errors
    ///
    /// * If the service has stopped
    pub fn start(&self, user_id: impl Into<String>) -> Result<(), CommandError> {
        self.bind_identity(Identity::authenticated(user_id))
    }

    /// # Errors
    ///
    /// * If the service has stopped
    pub fn stop(&self) -> Result<(), CommandError> {
        self.bind_identity(Identity::anonymous())
    }

    /// Queues `payload` for the chat channel. It is dropped if chat is not
    /// open when the command is processed.
    ///
    /// # Errors
    ///
    /// * If the service has stopped
    pub fn send_chat_message(&self, payload: Value) -> Result<(), CommandError> {
        self.send_command(Command::SendChatMessage(payload))
    }

    /// # Errors
    ///
    /// * If the service has stopped
    pub fn send_typing_indicator(
        &self,
        conversation_id: impl Into<String>,
    ) -> Result<(), CommandError> {
        self.send_command(Command::SendTypingIndicator(conversation_id.into()))
    }

    /// Resolves once every event queued before this call has been handled.
    ///
    /// # Errors
    ///
    /// * If the service has stopped
    pub async fn flush(&self) -> Result<(), CommandError> {
        let (tx, rx) = flume::bounded(1);
        self.send_command(Command::Flush(tx))?;
        Ok(rx.recv_async().await?)
    }

    #[must_use]
    pub fn connected(&self) -> bool {
        self.state.borrow().connected
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Frames received on either channel from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<InboundFrame> {
        self.inbound.subscribe()
    }

    /// Stops the event loop. Both channels are closed on the way out.
    pub fn shutdown(&self) {
        self.token.cancel();
    }
}
