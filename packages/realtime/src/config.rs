//! Connection manager configuration.

use std::time::Duration;

use thiserror::Error;
use url::Url;
use vanguard_env_utils::{
    ParseEnvError, ProcessEnv, VarSource, default_env_from, default_env_parse_from,
    option_env_parse_from,
};

use crate::backoff::{BackoffPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY};
use crate::reconnect::DEFAULT_MAX_ATTEMPTS;

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8001";
pub const DEFAULT_INBOUND_BUFFER: usize = 256;

pub const BACKEND_URL_VAR: &str = "VANGUARD_BACKEND_URL";
pub const MAX_RECONNECT_ATTEMPTS_VAR: &str = "VANGUARD_WS_MAX_RECONNECT_ATTEMPTS";
pub const BACKOFF_BASE_MS_VAR: &str = "VANGUARD_WS_BACKOFF_BASE_MS";
pub const BACKOFF_MAX_MS_VAR: &str = "VANGUARD_WS_BACKOFF_MAX_MS";
pub const CONNECT_TIMEOUT_MS_VAR: &str = "VANGUARD_WS_CONNECT_TIMEOUT_MS";
pub const INBOUND_BUFFER_VAR: &str = "VANGUARD_WS_INBOUND_BUFFER";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid backend url '{url}': {source}")]
    InvalidBackendUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error(transparent)]
    Env(#[from] ParseEnvError),
    #[error("Inbound buffer size must be greater than zero")]
    ZeroInboundBuffer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeConfig {
    /// Backend origin. Its scheme is mapped to `ws`/`wss` per channel.
    pub base_url: Url,
    pub max_reconnect_attempts: u32,
    pub backoff: BackoffPolicy,
    /// `None` leaves a socket in `Connecting` for as long as the transport
    /// stays silent.
    pub connect_timeout: Option<Duration>,
    /// Capacity of the inbound frame broadcast. Slow subscribers lag past it.
    pub inbound_buffer: usize,
}

impl RealtimeConfig {
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            max_reconnect_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffPolicy::default(),
            connect_timeout: None,
            inbound_buffer: DEFAULT_INBOUND_BUFFER,
        }
    }

    /// Loads the config from the process environment.
    ///
    /// # Errors
    ///
    /// * If a variable is set to an unparseable value
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(&ProcessEnv)
    }

    /// # Errors
    ///
    /// * If a variable is set to an unparseable value
    pub fn from_source(source: &impl VarSource) -> Result<Self, ConfigError> {
        let url = default_env_from(source, BACKEND_URL_VAR, DEFAULT_BACKEND_URL);
        let base_url = Url::parse(&url)
            .map_err(|source| ConfigError::InvalidBackendUrl { url, source })?;

        let base_ms = default_env_parse_from(
            source,
            BACKOFF_BASE_MS_VAR,
            duration_millis(DEFAULT_BASE_DELAY),
        )?;
        let max_ms = default_env_parse_from(
            source,
            BACKOFF_MAX_MS_VAR,
            duration_millis(DEFAULT_MAX_DELAY),
        )?;
        let inbound_buffer =
            default_env_parse_from(source, INBOUND_BUFFER_VAR, DEFAULT_INBOUND_BUFFER)?;

        if inbound_buffer == 0 {
            return Err(ConfigError::ZeroInboundBuffer);
        }

        Ok(Self {
            base_url,
            max_reconnect_attempts: default_env_parse_from(
                source,
                MAX_RECONNECT_ATTEMPTS_VAR,
                DEFAULT_MAX_ATTEMPTS,
            )?,
            backoff: BackoffPolicy::new(
                Duration::from_millis(base_ms),
                Duration::from_millis(max_ms),
            ),
            connect_timeout: option_env_parse_from::<u64>(source, CONNECT_TIMEOUT_MS_VAR)?
                .map(Duration::from_millis),
            inbound_buffer,
        })
    }

    #[must_use]
    pub const fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    #[must_use]
    pub const fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub const fn with_inbound_buffer(mut self, size: usize) -> Self {
        self.inbound_buffer = if size == 0 { 1 } else { size };
        self
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test_log::test]
    fn from_source_uses_defaults_when_nothing_is_set() {
        let config = RealtimeConfig::from_source(&BTreeMap::<&str, &str>::new()).unwrap();

        assert_eq!(config.base_url.as_str(), "http://localhost:8001/");
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.backoff, BackoffPolicy::default());
        assert_eq!(config.connect_timeout, None);
        assert_eq!(config.inbound_buffer, 256);
    }

    #[test_log::test]
    fn from_source_reads_every_variable() {
        let vars = BTreeMap::from([
            (BACKEND_URL_VAR, "https://api.vanguard.example"),
            (MAX_RECONNECT_ATTEMPTS_VAR, "3"),
            (BACKOFF_BASE_MS_VAR, "500"),
            (BACKOFF_MAX_MS_VAR, "10000"),
            (CONNECT_TIMEOUT_MS_VAR, "15000"),
            (INBOUND_BUFFER_VAR, "32"),
        ]);

        let config = RealtimeConfig::from_source(&vars).unwrap();

        assert_eq!(config.base_url.as_str(), "https://api.vanguard.example/");
        assert_eq!(config.max_reconnect_attempts, 3);
        assert_eq!(
            config.backoff,
            BackoffPolicy::new(Duration::from_millis(500), Duration::from_millis(10_000))
        );
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(15)));
        assert_eq!(config.inbound_buffer, 32);
    }

    #[test_log::test]
    fn from_source_treats_blank_url_as_unset() {
        let vars = BTreeMap::from([(BACKEND_URL_VAR, ""), (INBOUND_BUFFER_VAR, " ")]);

        let config = RealtimeConfig::from_source(&vars).unwrap();

        assert_eq!(config.base_url.as_str(), "http://localhost:8001/");
        assert_eq!(config.inbound_buffer, 256);
    }

    #[test_log::test]
    fn from_source_rejects_bad_url() {
        let vars = BTreeMap::from([(BACKEND_URL_VAR, "not a url")]);

        assert!(matches!(
            RealtimeConfig::from_source(&vars),
            Err(ConfigError::InvalidBackendUrl { .. })
        ));
    }

    #[test_log::test]
    fn from_source_rejects_bad_number() {
        let vars = BTreeMap::from([(MAX_RECONNECT_ATTEMPTS_VAR, "five")]);

        assert!(matches!(
            RealtimeConfig::from_source(&vars),
            Err(ConfigError::Env(_))
        ));
    }

    #[test_log::test]
    fn from_source_rejects_zero_inbound_buffer() {
        let vars = BTreeMap::from([(INBOUND_BUFFER_VAR, "0")]);

        assert!(matches!(
            RealtimeConfig::from_source(&vars),
            Err(ConfigError::ZeroInboundBuffer)
        ));
    }

    #[test_log::test]
    fn builder_methods_override_defaults() {
        let config = RealtimeConfig::new(Url::parse("http://localhost").unwrap())
            .with_max_reconnect_attempts(2)
            .with_connect_timeout(Duration::from_secs(3))
            .with_inbound_buffer(0);

        assert_eq!(config.max_reconnect_attempts, 2);
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(3)));
        assert_eq!(config.inbound_buffer, 1);
    }
}
