//! One logical duplex connection and its state machine.
//!
//! ```text
//! Idle --open--> Connecting --Opened--> Open
//!                    |                    |
//!                    +------Closed--------+--> Closed
//! ```
//!
//! `Errored` and `Message` events never change the status, and `Closed` is
//! terminal: a closed socket is discarded and a fresh one with a new
//! [`SocketId`] is created for the next attempt.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;
use url::Url;

use crate::envelope::MessageEnvelope;
use crate::transport::{EndpointError, EventSink, Transport, TransportError, TransportLink, endpoint_url};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChannelKind {
    Chat,
    Notifications,
}

impl ChannelKind {
    /// The pair, in the order it is opened and closed.
    pub const PAIR: [Self; 2] = [Self::Chat, Self::Notifications];
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelStatus {
    #[default]
    Idle,
    Connecting,
    Open,
    Closed,
}

/// Identifies one connection instance. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SocketId(u64);

impl SocketId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SocketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a transport reports about a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened,
    Closed { code: Option<u16> },
    Errored(String),
    Message(String),
}

#[derive(Debug, Error)]
pub enum OpenChannelError {
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Result of feeding an event to [`ChannelSocket::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Opened,
    Closed,
    Unchanged,
}

#[derive(Debug)]
pub struct ChannelSocket {
    kind: ChannelKind,
    id: SocketId,
    url: Url,
    status: ChannelStatus,
    link: Option<Box<dyn TransportLink>>,
}

impl ChannelSocket {
    /// Starts a connection for `kind`/`user_id` and returns in `Connecting`.
    ///
    /// # Errors
    ///
    /// * If the endpoint url cannot be built from `base_url`
    /// * If the transport refuses to start the connection
    pub fn open(
        kind: ChannelKind,
        id: SocketId,
        user_id: &str,
        base_url: &Url,
        transport: &dyn Transport,
        sink: EventSink,
    ) -> Result<Self, OpenChannelError> {
        let url = endpoint_url(base_url, kind, user_id)?;
        log::debug!("open: Connecting {kind} socket {id} to '{url}'");
        let link = transport.connect(&url, sink)?;

        Ok(Self {
            kind,
            id,
            url,
            status: ChannelStatus::Connecting,
            link: Some(link),
        })
    }

    #[must_use]
    pub const fn kind(&self) -> ChannelKind {
        self.kind
    }

    #[must_use]
    pub const fn id(&self) -> SocketId {
        self.id
    }

    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub const fn status(&self) -> ChannelStatus {
        self.status
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == ChannelStatus::Open
    }

    /// Advances the state machine.
    pub fn apply(&mut self, event: &ChannelEvent) -> Transition {
        match (self.status, event) {
            (ChannelStatus::Connecting, ChannelEvent::Opened) => {
                self.status = ChannelStatus::Open;
                Transition::Opened
            }
            (ChannelStatus::Connecting | ChannelStatus::Open, ChannelEvent::Closed { .. }) => {
                self.status = ChannelStatus::Closed;
                self.link.take();
                Transition::Closed
            }
            (status, ChannelEvent::Opened | ChannelEvent::Closed { .. }) => {
                log::debug!(
                    "apply: Ignoring {event:?} for {} socket {} in status {status}",
                    self.kind,
                    self.id
                );
                Transition::Unchanged
            }
            (_, ChannelEvent::Errored(_) | ChannelEvent::Message(_)) => Transition::Unchanged,
        }
    }

    /// Requests termination and drops the link. No-op once closed.
    pub fn close(&mut self) {
        if let Some(link) = self.link.take() {
            log::debug!("close: Closing {} socket {}", self.kind, self.id);
            link.close();
        }
        self.status = ChannelStatus::Closed;
    }

    /// Transmits `envelope` if the socket is open. Otherwise the envelope is
    /// dropped. Returns whether it was handed to the transport.
    pub fn send(&self, envelope: &MessageEnvelope) -> bool {
        let Some(link) = self.link.as_ref().filter(|_| self.is_open()) else {
            log::debug!(
                "send: Dropping envelope, {} socket {} is {}",
                self.kind,
                self.id,
                self.status
            );
            return false;
        };

        let text = match envelope.to_text() {
            Ok(text) => text,
            Err(e) => {
                log::error!("send: Failed to serialize envelope: {e:?}");
                return false;
            }
        };

        vanguard_logging::debug_or_trace!(
            ("send: Sending frame on {} socket {}", self.kind, self.id),
            ("send: Sending frame on {} socket {} text={text}", self.kind, self.id)
        );

        match link.send_text(text) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("send: Transport rejected frame on {} socket {}: {e:?}", self.kind, self.id);
                false
            }
        }
    }
}
