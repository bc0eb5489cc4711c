//! Configuration for cardflow.
//!
//! Settings are read from `.cardflow/cardflow.toml` and then overridden by
//! environment variables (a `.env` file is honoured by the binary).
//!
//! # Configuration File Format
//!
//! ```toml
//! [positions]
//! min_position = 1000
//! max_position = 999999000
//! default_increment = 1000
//! rebalance_threshold = 100
//!
//! [subscriptions]
//! max_per_user = 10
//! timeout_secs = 3600
//! channel_capacity = 64
//!
//! [events]
//! queue_size = 100
//! publish_timeout_ms = 5000
//! cleanup_interval_secs = 300
//!
//! [moves]
//! max_retries = 3
//!
//! [server]
//! port = 3141
//! db_path = ".cardflow/board.db"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Directory holding the config file and the default database.
pub const CONFIG_DIR: &str = ".cardflow";
pub const CONFIG_FILE: &str = "cardflow.toml";

pub const ENV_MAX_SUBSCRIPTIONS_PER_USER: &str = "CARDFLOW_MAX_SUBSCRIPTIONS_PER_USER";
pub const ENV_SUBSCRIPTION_TIMEOUT_SECS: &str = "CARDFLOW_SUBSCRIPTION_TIMEOUT_SECS";
pub const ENV_EVENT_QUEUE_SIZE: &str = "CARDFLOW_EVENT_QUEUE_SIZE";
pub const ENV_CLEANUP_INTERVAL_SECS: &str = "CARDFLOW_CLEANUP_INTERVAL_SECS";
pub const ENV_PUBLISH_TIMEOUT_MS: &str = "CARDFLOW_PUBLISH_TIMEOUT_MS";
pub const ENV_PORT: &str = "CARDFLOW_PORT";
pub const ENV_DB_PATH: &str = "CARDFLOW_DB_PATH";

/// Integer position range and spacing for cards in a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionSettings {
    #[serde(default = "default_min_position")]
    pub min_position: i64,
    #[serde(default = "default_max_position")]
    pub max_position: i64,
    #[serde(default = "default_increment")]
    pub default_increment: i64,
    /// Gap below which a column is respaced.
    #[serde(default = "default_rebalance_threshold")]
    pub rebalance_threshold: i64,
}

fn default_min_position() -> i64 {
    1000
}

fn default_max_position() -> i64 {
    999_999_000
}

fn default_increment() -> i64 {
    1000
}

fn default_rebalance_threshold() -> i64 {
    100
}

impl Default for PositionSettings {
    fn default() -> Self {
        Self {
            min_position: default_min_position(),
            max_position: default_max_position(),
            default_increment: default_increment(),
            rebalance_threshold: default_rebalance_threshold(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionSettings {
    #[serde(default = "default_max_per_user")]
    pub max_per_user: usize,
    /// Inactivity after which cleanup drops a subscription.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Buffer size of each subscription's delivery channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_max_per_user() -> usize {
    10
}

fn default_timeout_secs() -> u64 {
    3600
}

fn default_channel_capacity() -> usize {
    64
}

impl SubscriptionSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            max_per_user: default_max_per_user(),
            timeout_secs: default_timeout_secs(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSettings {
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    /// How long `publish` waits on a full queue before failing.
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_queue_size() -> usize {
    100
}

fn default_publish_timeout_ms() -> u64 {
    5000
}

fn default_cleanup_interval_secs() -> u64 {
    300
}

impl EventSettings {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    /// Never zero: `tokio::time::interval` panics on a zero period.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            queue_size: default_queue_size(),
            publish_timeout_ms: default_publish_timeout_ms(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveSettings {
    /// Re-reads after a concurrent modification before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    3
}

impl Default for MoveSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

fn default_port() -> u16 {
    3141
}

fn default_db_path() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("board.db")
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: default_port(),
            db_path: default_db_path(),
        }
    }
}

/// Root of `cardflow.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardflowConfig {
    #[serde(default)]
    pub positions: PositionSettings,
    #[serde(default)]
    pub subscriptions: SubscriptionSettings,
    #[serde(default)]
    pub events: EventSettings,
    #[serde(default)]
    pub moves: MoveSettings,
    #[serde(default)]
    pub server: ServerSettings,
}

impl CardflowConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse cardflow.toml")
    }

    /// Load `<config_dir>/cardflow.toml`, or defaults if the file is missing.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// File (if any) under `project_dir`, then environment overrides.
    pub fn resolve(project_dir: &Path) -> Result<Self> {
        let mut config = Self::load_or_default(&project_dir.join(CONFIG_DIR))?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize cardflow.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply overrides from `lookup` (normally the process environment).
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        override_from(&lookup, ENV_MAX_SUBSCRIPTIONS_PER_USER, &mut self.subscriptions.max_per_user);
        override_from(&lookup, ENV_SUBSCRIPTION_TIMEOUT_SECS, &mut self.subscriptions.timeout_secs);
        override_from(&lookup, ENV_EVENT_QUEUE_SIZE, &mut self.events.queue_size);
        override_from(&lookup, ENV_CLEANUP_INTERVAL_SECS, &mut self.events.cleanup_interval_secs);
        override_from(&lookup, ENV_PUBLISH_TIMEOUT_MS, &mut self.events.publish_timeout_ms);
        override_from(&lookup, ENV_PORT, &mut self.server.port);
        if let Some(path) = lookup(ENV_DB_PATH) {
            self.server.db_path = PathBuf::from(path);
        }
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let p = &self.positions;

        if p.min_position >= p.max_position {
            warnings.push(format!(
                "positions.min_position ({}) must be below max_position ({})",
                p.min_position, p.max_position
            ));
        }
        if p.default_increment <= 0 {
            warnings.push("positions.default_increment must be positive".to_string());
        }
        if p.rebalance_threshold < 0 || p.rebalance_threshold >= p.default_increment {
            warnings.push(format!(
                "positions.rebalance_threshold ({}) should be between 0 and default_increment ({})",
                p.rebalance_threshold, p.default_increment
            ));
        }
        if self.subscriptions.max_per_user == 0 {
            warnings.push("subscriptions.max_per_user is 0: nobody can subscribe".to_string());
        }
        if self.subscriptions.channel_capacity == 0 {
            warnings.push("subscriptions.channel_capacity must be at least 1".to_string());
        }
        if self.events.queue_size == 0 {
            warnings.push("events.queue_size must be at least 1".to_string());
        }
        if self.events.cleanup_interval_secs == 0 {
            warnings.push(
                "events.cleanup_interval_secs is 0; cleanup will run every second".to_string(),
            );
        }

        warnings
    }
}

fn override_from<T, F>(lookup: &F, key: &str, target: &mut T)
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(_) => tracing::warn!(key, value = %raw, "Ignoring unparseable environment override"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_parse_empty_uses_defaults() {
        let config = CardflowConfig::parse("").unwrap();
        assert_eq!(config.positions.min_position, 1000);
        assert_eq!(config.positions.max_position, 999_999_000);
        assert_eq!(config.positions.default_increment, 1000);
        assert_eq!(config.positions.rebalance_threshold, 100);
        assert_eq!(config.subscriptions.max_per_user, 10);
        assert_eq!(config.subscriptions.timeout(), Duration::from_secs(3600));
        assert_eq!(config.events.queue_size, 100);
        assert_eq!(config.events.publish_timeout(), Duration::from_secs(5));
        assert_eq!(config.events.cleanup_interval(), Duration::from_secs(300));
        assert_eq!(config.moves.max_retries, 3);
        assert_eq!(config.server.port, 3141);
    }

    #[test]
    fn test_parse_partial_sections() {
        let content = r#"
[subscriptions]
max_per_user = 3

[events]
queue_size = 8
"#;
        let config = CardflowConfig::parse(content).unwrap();
        assert_eq!(config.subscriptions.max_per_user, 3);
        assert_eq!(config.subscriptions.timeout_secs, 3600);
        assert_eq!(config.events.queue_size, 8);
        assert_eq!(config.events.publish_timeout_ms, 5000);
    }

    #[test]
    fn test_env_overrides_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_MAX_SUBSCRIPTIONS_PER_USER, "25"),
            (ENV_EVENT_QUEUE_SIZE, "not-a-number"),
            (ENV_DB_PATH, "/tmp/board.db"),
        ]);
        let mut config = CardflowConfig::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.subscriptions.max_per_user, 25);
        assert_eq!(config.events.queue_size, 100);
        assert_eq!(config.server.db_path, PathBuf::from("/tmp/board.db"));
    }

    #[test]
    fn test_zero_cleanup_interval_is_clamped() {
        let mut config = CardflowConfig::default();
        config.apply_env(|key| (key == ENV_CLEANUP_INTERVAL_SECS).then(|| "0".to_string()));
        assert_eq!(config.events.cleanup_interval_secs, 0);
        assert_eq!(config.events.cleanup_interval(), Duration::from_secs(1));
        assert!(
            config
                .validate()
                .iter()
                .any(|w| w.contains("cleanup_interval_secs"))
        );
    }

    #[test]
    fn test_validate_default_is_clean() {
        assert!(CardflowConfig::default().validate().is_empty());
    }

    #[test]
    fn test_validate_flags_inverted_range() {
        let mut config = CardflowConfig::default();
        config.positions.min_position = 5000;
        config.positions.max_position = 1000;
        config.events.queue_size = 0;
        let warnings = config.validate();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("min_position"));
    }

    #[test]
    fn test_load_and_save() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        let mut config = CardflowConfig::default();
        config.subscriptions.max_per_user = 4;
        config.save(&path).unwrap();

        let loaded = CardflowConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempdir().unwrap();
        let config = CardflowConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config, CardflowConfig::default());
    }
}
