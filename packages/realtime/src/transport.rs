//! The seam between the channel state machines and a socket implementation.
//!
//! A [`Transport`] starts a connection and reports everything that happens to
//! it through the [`EventSink`] it was given. The returned [`TransportLink`]
//! is the only way back in: send a text frame or ask for the connection to
//! close. Neither call blocks.

use thiserror::Error;
use url::Url;

use crate::channel::{ChannelEvent, ChannelKind, SocketId};
use crate::service::Event;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EndpointError {
    #[error("Unsupported backend scheme '{0}'")]
    UnsupportedScheme(String),
    #[error("Backend url '{0}' cannot be used as a base")]
    CannotBeABase(String),
    #[error("Empty user id")]
    EmptyUserId,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("No async runtime available to drive the connection")]
    NoRuntime,
    #[error("Connection is closed")]
    Closed,
    #[error("Unknown {0:?}")]
    Unknown(String),
}

/// Builds `{base}/ws/{kind}/{user_id}` with the scheme mapped to its
/// websocket counterpart (`https` to `wss`, `http` to `ws`).
///
/// # Errors
///
/// * If the base scheme is not http(s) or ws(s)
/// * If the base url cannot carry a path
/// * If `user_id` is empty
pub fn endpoint_url(base: &Url, kind: ChannelKind, user_id: &str) -> Result<Url, EndpointError> {
    if user_id.is_empty() {
        return Err(EndpointError::EmptyUserId);
    }

    let scheme = match base.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => return Err(EndpointError::UnsupportedScheme(other.to_string())),
    };

    let mut url = base.clone();
    url.set_scheme(scheme)
        .map_err(|()| EndpointError::UnsupportedScheme(base.scheme().to_string()))?;
    url.set_query(None);
    url.set_fragment(None);

    url.path_segments_mut()
        .map_err(|()| EndpointError::CannotBeABase(base.to_string()))?
        .pop_if_empty()
        .extend(["ws", kind.as_ref(), user_id]);

    Ok(url)
}

/// Where a transport reports the life of one connection instance.
#[derive(Debug, Clone)]
pub struct EventSink {
    kind: ChannelKind,
    socket: SocketId,
    tx: flume::Sender<Event>,
}

impl EventSink {
    pub(crate) const fn new(kind: ChannelKind, socket: SocketId, tx: flume::Sender<Event>) -> Self {
        Self { kind, socket, tx }
    }

    #[must_use]
    pub const fn kind(&self) -> ChannelKind {
        self.kind
    }

    #[must_use]
    pub const fn socket(&self) -> SocketId {
        self.socket
    }

    /// Reports `event`. Events emitted after the service stopped are dropped.
    pub fn emit(&self, event: ChannelEvent) {
        if self
            .tx
            .send(Event::Channel {
                kind: self.kind,
                socket: self.socket,
                event,
            })
            .is_err()
        {
            log::trace!(
                "emit: service stopped, dropping event for {} socket {}",
                self.kind,
                self.socket
            );
        }
    }
}

pub trait Transport: Send + Sync {
    /// Starts connecting to `url` and returns immediately.
    ///
    /// # Errors
    ///
    /// * If the connection cannot even be attempted
    fn connect(&self, url: &Url, sink: EventSink) -> Result<Box<dyn TransportLink>, TransportError>;
}

pub trait TransportLink: Send + Sync {
    /// Queues a text frame.
    ///
    /// # Errors
    ///
    /// * If the connection is already gone
    fn send_text(&self, text: String) -> Result<(), TransportError>;

    /// Requests termination. Calling it more than once is harmless.
    fn close(&self);
}

impl core::fmt::Debug for dyn TransportLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{TransportLink}}")
    }
}
