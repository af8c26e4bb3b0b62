//! Agent configuration.

use anyhow::{Context, Result};
use monster_sync_proto::Endpoints;
use monster_sync_transport::RetryPolicy;
use std::str::FromStr;
use std::time::Duration;

/// Default sync server.
pub const DEFAULT_SERVER_URL: &str = "https://amadare-mhw-sync.herokuapp.com";

/// Sync configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Server base URL (`http` or `https`)
    pub server_url: String,

    /// Display name announced after connecting
    pub player_name: Option<String>,

    /// Connect retry policy
    pub connect: RetryPolicy,

    /// Push throttling
    pub push: PushConfig,

    /// How long to wait alone in a session before disconnecting
    pub player_wait_timeout: Duration,

    /// Version probe request timeout
    pub version_timeout: Duration,
}

/// Push throttling configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushConfig {
    /// Cadence at which the host produces snapshots
    pub scan_interval: Duration,

    /// Added on top of the scan interval
    pub slack: Duration,

    /// Lower bound for the pause between sends
    pub floor: Duration,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_millis(150),
            slack: Duration::from_millis(50),
            floor: Duration::from_millis(250),
        }
    }
}

impl PushConfig {
    /// Pause after each send attempt: `max(scan_interval + slack, floor)`.
    #[must_use]
    pub fn throttle(&self) -> Duration {
        (self.scan_interval + self.slack).max(self.floor)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            player_name: None,
            connect: RetryPolicy::default(),
            push: PushConfig::default(),
            player_wait_timeout: Duration::from_secs(180),
            version_timeout: Duration::from_secs(10),
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `MONSTER_SYNC_SERVER_URL`: Server base URL
    /// - `MONSTER_SYNC_PLAYER_NAME`: Display name
    /// - `MONSTER_SYNC_CONNECT_ATTEMPTS`: Connect attempts before giving up
    /// - `MONSTER_SYNC_CONNECT_DELAY_MS`: Pause between connect attempts
    /// - `MONSTER_SYNC_SCAN_INTERVAL_MS`: Host scan cadence
    /// - `MONSTER_SYNC_PLAYER_WAIT_SECS`: Alone-in-session timeout
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set but cannot be parsed, or the server
    /// URL is not a valid http/https URL.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("MONSTER_SYNC_SERVER_URL") {
            config.server_url = url;
        }

        if let Ok(name) = std::env::var("MONSTER_SYNC_PLAYER_NAME") {
            if !name.trim().is_empty() {
                config.player_name = Some(name);
            }
        }

        if let Some(attempts) = parse_var::<u32>("MONSTER_SYNC_CONNECT_ATTEMPTS")? {
            config.connect.max_attempts = attempts.max(1);
        }

        if let Some(ms) = parse_var::<u64>("MONSTER_SYNC_CONNECT_DELAY_MS")? {
            config.connect.retry_delay = Duration::from_millis(ms);
        }

        if let Some(ms) = parse_var::<u64>("MONSTER_SYNC_SCAN_INTERVAL_MS")? {
            config.push.scan_interval = Duration::from_millis(ms);
        }

        if let Some(secs) = parse_var::<u64>("MONSTER_SYNC_PLAYER_WAIT_SECS")? {
            config.player_wait_timeout = Duration::from_secs(secs);
        }

        config.endpoints()?;

        Ok(config)
    }

    /// Endpoints derived from `server_url`.
    ///
    /// # Errors
    ///
    /// Returns error if `server_url` is not a valid http/https URL.
    pub fn endpoints(&self) -> Result<Endpoints> {
        Endpoints::from_base_url(&self.server_url)
            .with_context(|| format!("Invalid MONSTER_SYNC_SERVER_URL '{}'", self.server_url))
    }
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid {name}")),
        Err(_) => Ok(None),
    }
}
