//! # sb-config
//!
//! Layered settings for the Story-Board binary.
//!
//! Sources, lowest precedence first:
//! 1. built-in defaults
//! 2. `config/story-board.toml` (optional)
//! 3. `STORY_BOARD__<SECTION>__<KEY>` environment variables (after `.env` is read)

use std::time::Duration;

use config::{Config, Environment, File};
use sb_core::CascadeDepth;
use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;

pub const ENV_PREFIX: &str = "STORY_BOARD";
pub const DEFAULT_CONFIG_FILE: &str = "config/story-board";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    #[serde(default)]
    pub cascade: CascadeSettings,
    #[serde(default)]
    pub log: LogSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// Backend URL, e.g. `sqlite://data/story-board.db`. May embed credentials.
    #[serde(deserialize_with = "deserialize_secret")]
    pub url: SecretString,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_max_idle")]
    pub max_idle: usize,
    /// Connections open at once; further acquires wait up to the connect timeout.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CascadeSettings {
    #[serde(default)]
    pub depth: CascadeDepth,
    /// Upper bound for a whole cascade, in milliseconds. Unset means no bound.
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(SecretString::from(raw))
}

fn default_connect_timeout_secs() -> u64 {
    20
}

fn default_idle_timeout_secs() -> u64 {
    300
}

fn default_max_idle() -> usize {
    16
}

fn default_max_connections() -> usize {
    64
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl DatabaseSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Zero disables idle expiry.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }
}

impl CascadeSettings {
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }
}

impl Settings {
    /// Reads `.env`, the optional config file and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_overrides(std::iter::empty())
    }

    /// Like [`Settings::load`], with `(key, value)` pairs (e.g. from CLI
    /// flags) taking precedence over every other source.
    pub fn load_with_overrides<I>(overrides: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (&'static str, String)>,
    {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
            Err(err) if err.not_found() => {}
            Err(err) => tracing::warn!(error = %err, "ignoring unreadable .env"),
        }

        let mut builder = Config::builder()
            .add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));
        for (key, value) in overrides {
            builder = builder.set_override(key, value)?;
        }
        Self::from_config(builder.build()?)
    }

    /// Deserializes and validates an already-assembled `config::Config`.
    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.connect_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "database.connect_timeout_secs",
                reason: "must be greater than zero".into(),
            });
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid {
                key: "database.max_connections",
                reason: "must be greater than zero".into(),
            });
        }
        if self.cascade.deadline_ms == Some(0) {
            return Err(ConfigError::Invalid {
                key: "cascade.deadline_ms",
                reason: "must be greater than zero when set".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn base() -> config::ConfigBuilder<config::builder::DefaultState> {
        Config::builder()
            .set_override("database.url", "sqlite://test.db")
            .unwrap()
    }

    #[test]
    fn test_defaults_apply() {
        let settings = Settings::from_config(base().build().unwrap()).unwrap();
        assert_eq!(settings.database.url.expose_secret(), "sqlite://test.db");
        assert_eq!(settings.database.connect_timeout(), Duration::from_secs(20));
        assert_eq!(settings.database.max_idle, 16);
        assert_eq!(settings.database.max_connections, 64);
        assert_eq!(settings.cascade.depth, CascadeDepth::Shallow);
        assert_eq!(settings.cascade.deadline(), None);
        assert_eq!(settings.log.filter, "info");
    }

    #[test]
    fn test_overrides() {
        let config = base()
            .set_override("cascade.depth", "transitive")
            .unwrap()
            .set_override("cascade.deadline_ms", 1500)
            .unwrap()
            .set_override("database.idle_timeout_secs", 0)
            .unwrap()
            .build()
            .unwrap();
        let settings = Settings::from_config(config).unwrap();
        assert_eq!(settings.cascade.depth, CascadeDepth::Transitive);
        assert_eq!(settings.cascade.deadline(), Some(Duration::from_millis(1500)));
        assert_eq!(settings.database.idle_timeout(), None);
    }

    #[test]
    fn test_zero_connect_timeout_rejected() {
        let config = base()
            .set_override("database.connect_timeout_secs", 0)
            .unwrap()
            .build()
            .unwrap();
        assert!(matches!(
            Settings::from_config(config),
            Err(ConfigError::Invalid { key: "database.connect_timeout_secs", .. })
        ));
    }

    #[test]
    fn test_zero_max_connections_rejected() {
        let config = base()
            .set_override("database.max_connections", 0)
            .unwrap()
            .build()
            .unwrap();
        assert!(matches!(
            Settings::from_config(config),
            Err(ConfigError::Invalid { key: "database.max_connections", .. })
        ));
    }

    #[test]
    fn test_missing_url_fails() {
        let config = Config::builder().build().unwrap();
        assert!(matches!(Settings::from_config(config), Err(ConfigError::Load(_))));
    }
}
