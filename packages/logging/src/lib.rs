#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Logging setup shared by Vanguard binaries.
//!
//! Libraries in the workspace only talk to the [`log`] facade. Binaries call
//! [`init`] once at startup to install a `free_log_client` layer whose filter
//! comes from `VANGUARD_LOG`, then `RUST_LOG`, then a build-dependent default.

#[cfg(feature = "macros")]
mod macros;

pub use log;

#[cfg(feature = "free_log")]
pub use free_log_client;

#[cfg(feature = "free_log")]
use free_log_client::FreeLogLayer;
#[cfg(feature = "free_log")]
use thiserror::Error;

#[cfg(debug_assertions)]
pub const DEFAULT_LOG_LEVEL: &str = "vanguard=trace";
#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_LEVEL: &str = "vanguard=info";

#[cfg(feature = "free_log")]
#[derive(Debug, Error)]
pub enum InitError {
    #[error(transparent)]
    Logs(#[from] free_log_client::LogsInitError),
    #[error(transparent)]
    BuildLogsConfig(#[from] free_log_client::BuildLogsConfigError),
    #[error(transparent)]
    BuildFileWriterConfig(#[from] free_log_client::BuildFileWriterConfigError),
}

/// Resolves the env filter directive: `VANGUARD_LOG`, then `RUST_LOG`, then
/// [`DEFAULT_LOG_LEVEL`].
#[cfg(feature = "free_log")]
#[must_use]
pub fn env_filter() -> String {
    vanguard_env_utils::default_env(
        "VANGUARD_LOG",
        &vanguard_env_utils::default_env("RUST_LOG", DEFAULT_LOG_LEVEL),
    )
}

/// Installs the global logger.
///
/// When `log_file` is given, debug-level output is also written to that file.
///
/// # Errors
///
/// * If the file writer config is invalid
/// * If the logger fails to initialize
#[cfg(feature = "free_log")]
pub fn init(log_file: Option<std::path::PathBuf>) -> Result<FreeLogLayer, InitError> {
    let mut logs_config = free_log_client::LogsConfig::builder();

    if let Some(log_file) = log_file {
        logs_config = logs_config.with_file_writer(
            free_log_client::FileWriterConfig::builder()
                .file_path(log_file)
                .log_level(free_log_client::Level::Debug),
        )?;
    }

    let layer = free_log_client::init(logs_config.env_filter(env_filter()))?;

    Ok(layer)
}
