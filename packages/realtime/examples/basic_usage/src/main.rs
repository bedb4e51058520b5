#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Connects the chat and notifications channels for one user and prints
//! every inbound frame until interrupted.
//!
//! ```text
//! VANGUARD_BACKEND_URL=http://localhost:8001 \
//!     cargo run -p vanguard_realtime_basic_usage_example -- --user-id 42 --message hello
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde_json::json;
use tokio::select;
use tokio::sync::broadcast::error::RecvError;
use url::Url;
use vanguard_realtime::{RealtimeConfig, RealtimeService, WsTransport};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(long)]
    user_id: String,

    /// Overrides `VANGUARD_BACKEND_URL`.
    #[arg(long)]
    backend_url: Option<Url>,

    /// Sent on the chat channel once it opens.
    #[arg(long)]
    message: Option<String>,

    #[arg(long, default_value = "general")]
    conversation_id: String,

    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[allow(clippy::redundant_pub_crate)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = Args::parse();

    let _layer = vanguard_logging::init(args.log_file.take())?;

    let mut config = RealtimeConfig::from_env()?;
    if let Some(url) = args.backend_url.take() {
        config.base_url = url;
    }

    log::info!("Connecting to {} as user {}", config.base_url, args.user_id);

    let service = RealtimeService::new(config, Arc::new(WsTransport::new()));
    let handle = service.handle();
    let join = service.start();

    let mut inbound = handle.subscribe();
    let mut state = handle.watch_state();

    handle.start(args.user_id.clone())?;

    loop {
        select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = state.borrow_and_update().clone();
                println!(
                    "chat={} notifications={} connected={} attempts={}",
                    current.chat.status,
                    current.notifications.status,
                    current.connected,
                    current.reconnect_attempts,
                );

                if current.connected {
                    if let Some(message) = args.message.take() {
                        handle.send_typing_indicator(args.conversation_id.clone())?;
                        handle.send_chat_message(json!({
                            "conversation_id": args.conversation_id,
                            "content": message,
                        }))?;
                    }
                }
            }
            frame = inbound.recv() => match frame {
                Ok(frame) => println!("[{}] {}", frame.kind, frame.text),
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("Skipped {skipped} inbound frames");
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted, shutting down");
                break;
            }
        }
    }

    handle.shutdown();
    join.await?;

    Ok(())
}
