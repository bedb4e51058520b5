//! [`Transport`] over real websockets, backed by `tokio-tungstenite`.
//!
//! Each connection runs in its own task: connect, report `Opened`, then pump
//! outbound frames, inbound frames and keep-alive pings until either side
//! goes away, and finally report `Closed`.

use std::time::Duration;

use futures_channel::mpsc::{UnboundedReceiver, UnboundedSender};
use futures_util::StreamExt as _;
use tokio::select;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::channel::ChannelEvent;
use crate::transport::{EventSink, Transport, TransportError, TransportLink};

pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WsTransport {
    ping_interval: Option<Duration>,
}

impl Default for WsTransport {
    fn default() -> Self {
        Self {
            ping_interval: Some(DEFAULT_PING_INTERVAL),
        }
    }
}

impl WsTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` disables keep-alive pings.
    #[must_use]
    pub const fn with_ping_interval(mut self, interval: Option<Duration>) -> Self {
        self.ping_interval = interval;
        self
    }
}

enum Outbound {
    Text(String),
    Ping,
}

struct WsLink {
    sender: UnboundedSender<Outbound>,
    close_token: CancellationToken,
}

impl TransportLink for WsLink {
    fn send_text(&self, text: String) -> Result<(), TransportError> {
        self.sender
            .unbounded_send(Outbound::Text(text))
            .map_err(|e| {
                if e.is_disconnected() {
                    TransportError::Closed
                } else {
                    TransportError::Unknown(e.to_string())
                }
            })
    }

    fn close(&self) {
        self.close_token.cancel();
    }
}

impl Transport for WsTransport {
    fn connect(
        &self,
        url: &Url,
        sink: EventSink,
    ) -> Result<Box<dyn TransportLink>, TransportError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| TransportError::NoRuntime)?;

        let (sender, receiver) = futures_channel::mpsc::unbounded();
        let close_token = CancellationToken::new();

        runtime.spawn(run_connection(
            url.clone(),
            sink,
            receiver,
            sender.clone(),
            close_token.clone(),
            self.ping_interval,
        ));

        Ok(Box::new(WsLink {
            sender,
            close_token,
        }))
    }
}

#[allow(clippy::redundant_pub_crate)]
async fn run_connection(
    url: Url,
    sink: EventSink,
    receiver: UnboundedReceiver<Outbound>,
    pinger: UnboundedSender<Outbound>,
    close_token: CancellationToken,
    ping_interval: Option<Duration>,
) {
    let kind = sink.kind();
    let id = sink.socket();

    log::debug!("run_connection: Connecting {kind} socket {id} to '{url}'...");

    let connected = select!(
        resp = connect_async(url.as_str()) => resp,
        () = close_token.cancelled() => {
            log::debug!("run_connection: Cancelling connect for {kind} socket {id}");
            sink.emit(ChannelEvent::Closed { code: None });
            return;
        }
    );

    let ws_stream = match connected {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            log::error!("run_connection: Failed to connect {kind} socket {id}: {e:?}");
            sink.emit(ChannelEvent::Errored(e.to_string()));
            sink.emit(ChannelEvent::Closed { code: None });
            return;
        }
    };

    log::debug!("run_connection: WebSocket handshake completed for {kind} socket {id}");
    sink.emit(ChannelEvent::Opened);

    let (write, mut read) = ws_stream.split();

    let ws_writer = receiver
        .map(|message| match message {
            Outbound::Text(text) => {
                vanguard_logging::debug_or_trace!(
                    ("run_connection: Sending text frame"),
                    ("run_connection: Sending text frame text={text}")
                );
                Ok(Message::Text(text.into()))
            }
            Outbound::Ping => {
                log::trace!("run_connection: Sending ping");
                Ok(Message::Ping(Vec::new().into()))
            }
        })
        .forward(write);

    let ws_reader = async {
        while let Some(message) = read.next().await {
            match message {
                Ok(Message::Text(text)) => sink.emit(ChannelEvent::Message(text.to_string())),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => sink.emit(ChannelEvent::Message(text)),
                    Err(_) => {
                        log::warn!("run_connection: Dropping non-UTF-8 binary frame");
                    }
                },
                Ok(Message::Close(frame)) => {
                    log::debug!("run_connection: Received close frame {frame:?}");
                    return frame.map(|frame| u16::from(frame.code));
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {
                    log::trace!("run_connection: Received control frame");
                }
                Err(e) => {
                    log::error!("run_connection: Read error on {kind} socket {id}: {e:?}");
                    sink.emit(ChannelEvent::Errored(e.to_string()));
                    return None;
                }
            }
        }
        None
    };

    let keep_alive = async {
        let Some(interval) = ping_interval else {
            return std::future::pending::<()>().await;
        };
        loop {
            sleep(interval).await;
            if let Err(e) = pinger.unbounded_send(Outbound::Ping) {
                log::error!("run_connection: Pinger send error: {e:?}");
                break;
            }
        }
    };

    let code = select!(
        () = close_token.cancelled() => {
            log::debug!("run_connection: Closing {kind} socket {id} on request");
            None
        }
        result = ws_writer => {
            if let Err(e) = result {
                log::error!("run_connection: Write error on {kind} socket {id}: {e:?}");
                sink.emit(ChannelEvent::Errored(e.to_string()));
            }
            None
        }
        code = ws_reader => code,
        () = keep_alive => None,
    );

    log::info!("run_connection: {kind} socket {id} closed (code={code:?})");
    sink.emit(ChannelEvent::Closed { code });
}
