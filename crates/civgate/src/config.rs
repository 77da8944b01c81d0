//! Server configuration loaded from a TOML file.
//!
//! Every section and field is optional; whatever a file leaves out keeps
//! its default. A minimal file:
//!
//! ```toml
//! [network]
//! bind = "0.0.0.0:5556"
//!
//! [session]
//! slot_count = 16
//! first_access_level = "admin"
//!
//! [settings]
//! maxplayers = 8
//! allowtake = "HAhad"
//!
//! [logging]
//! level = "debug"
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use civgate_session::{SessionConfig, SettingValue, Settings};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Everything the server binary reads at startup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub network: NetworkConfig,
    pub session: SessionConfig,
    /// Initial values of game settings, by setting name.
    pub settings: BTreeMap<String, SettingValue>,
    pub logging: LoggingConfig,
}

/// Listener and connection timeouts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to listen on, e.g. `"0.0.0.0:5556"`.
    pub bind: String,
    /// Seconds a new connection has to send its join request.
    pub handshake_timeout_secs: u64,
    /// Seconds of silence after which an established connection is
    /// considered dead. Clients send heartbeats well within this.
    pub ping_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5556".to_string(),
            handshake_timeout_secs: 5,
            ping_timeout_secs: 60,
        }
    }
}

impl NetworkConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set (`"info"`, `"civgate=debug"`, ...).
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Reads and parses a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&text)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Builds the settings store with the configured initial values
    /// applied over the defaults.
    pub fn initial_settings(&self) -> Result<Settings, ConfigError> {
        let mut settings = Settings::default();
        for (name, value) in &self.settings {
            settings
                .set_initial(name, value.clone())
                .map_err(|source| ConfigError::Setting {
                    name: name.clone(),
                    source,
                })?;
        }
        Ok(settings)
    }
}
