//! Client-side realtime connections for Vanguard.
//!
//! A signed-in user holds two websocket channels to the backend, `chat` and
//! `notifications`. This crate keeps that pair open for as long as an
//! authenticated identity is bound, reopens both together with exponential
//! backoff when either drops, and gives up after a bounded number of
//! attempts.
//!
//! # Examples
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use vanguard_realtime::{RealtimeConfig, RealtimeService, WsTransport};
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let service = RealtimeService::new(RealtimeConfig::from_env()?, Arc::new(WsTransport::new()));
//! let handle = service.handle();
//! let _join = service.start();
//!
//! handle.start("user-42")?;
//! handle.send_chat_message(serde_json::json!({ "conversation_id": "c1", "content": "hi" }))?;
//!
//! let mut inbound = handle.subscribe();
//! while let Ok(frame) = inbound.recv().await {
//!     println!("{}: {}", frame.kind, frame.text);
//! }
//! # Ok(())
//! # }
//! ```

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

pub mod backoff;
pub mod channel;
pub mod config;
pub mod envelope;
pub mod manager;
pub mod reconnect;
pub mod service;
pub mod state;
pub mod transport;
pub mod ws;

pub use backoff::BackoffPolicy;
pub use channel::{ChannelEvent, ChannelKind, ChannelSocket, ChannelStatus, SocketId};
pub use config::{ConfigError, RealtimeConfig};
pub use envelope::{InboundFrame, MessageEnvelope, TypingIndicator};
pub use manager::ConnectionLifecycleManager;
pub use reconnect::{ReconnectCoordinator, ReconnectDecision};
pub use service::{CommandError, RealtimeHandle, RealtimeService};
pub use state::{ChannelSnapshot, ConnectionState, Identity};
pub use transport::{EndpointError, EventSink, Transport, TransportError, TransportLink};
pub use ws::WsTransport;
