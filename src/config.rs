//! Configuration for the usage tracker.

use crate::tracker::{random_client_id, QueueConfig, SessionOptions, DEFAULT_ENDPOINT, DEFAULT_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration, stored as JSON. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tracking / property id, e.g. `UA-XXXX-Y`
    pub tracking_id: Option<String>,

    /// Anonymous client id, generated once per install and then reused
    pub client_id: Option<String>,

    /// Optional session fields sent with every hit
    pub session: SessionOptions,

    /// Collection endpoint
    pub endpoint: String,

    /// Per-request timeout
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,

    /// Pending queue sizing
    pub queue: QueueConfig,

    /// Path for storing delivery stats
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("usage-tracker");

        Self {
            tracking_id: None,
            client_id: None,
            session: SessionOptions::default(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            request_timeout: DEFAULT_TIMEOUT,
            queue: QueueConfig::default(),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults if absent.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("usage-tracker")
            .join("config.json")
    }

    /// Path of the persisted delivery stats.
    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("delivery.json")
    }

    /// Return the stored client id, generating one if none exists yet.
    ///
    /// Returns `true` in the second slot when a new id was generated and the
    /// config needs saving.
    pub fn ensure_client_id(&mut self) -> (String, bool) {
        match self.client_id {
            Some(ref id) => (id.clone(), false),
            None => {
                let id = random_client_id();
                self.client_id = Some(id.clone());
                (id, true)
            }
        }
    }

    /// Point the config at a (new) property, keeping the stored client id.
    ///
    /// Returns the client id, generated only if none was stored.
    pub fn reinitialize(
        &mut self,
        tracking_id: String,
        session: SessionOptions,
        endpoint: Option<String>,
    ) -> String {
        self.tracking_id = Some(tracking_id);
        self.session = session;
        if let Some(endpoint) = endpoint {
            self.endpoint = endpoint;
        }
        let (client_id, _) = self.ensure_client_id();
        client_id
    }

    /// How long to wait for `pending` hits to go out before giving up.
    ///
    /// One request timeout per hit plus a second of slack, saturating
    /// instead of overflowing.
    pub fn flush_budget(&self, pending: usize) -> Duration {
        let hits = u32::try_from(pending.max(1)).unwrap_or(u32::MAX);
        self.request_timeout
            .checked_mul(hits)
            .unwrap_or(Duration::MAX)
            .saturating_add(Duration::from_secs(1))
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration, in seconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
