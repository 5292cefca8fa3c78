//! Configuration — one immutable snapshot loaded at startup.
//!
//! Deserialized from a JSON file; no hot-reload. Channel identifiers accept
//! both JSON numbers and strings since operators paste raw ids, `@handles`,
//! and links interchangeably.

use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};

use crate::delivery::DeliveryConfig;
use crate::error::ConfigError;

/// Root configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub accounts: Vec<AccountConfig>,
    #[serde(deserialize_with = "id_list")]
    pub source_channels: Vec<String>,
    #[serde(deserialize_with = "id_value")]
    pub target_channel: String,

    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    #[serde(default)]
    pub rotation: RotationConfig,
    #[serde(default)]
    pub delays: DelayConfig,
    #[serde(default)]
    pub files: FileConfig,
    #[serde(default)]
    pub ad_filter: AdFilterConfig,
    #[serde(default)]
    pub quality_filter: QualityFilterConfig,
    #[serde(default = "default_true")]
    pub dedup_enabled: bool,
    #[serde(default)]
    pub delivery: DeliveryTuning,
}

/// One credential entry.
#[derive(Debug, Deserialize)]
pub struct AccountConfig {
    pub name: String,
    pub token: SecretString,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Account rotation knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct RotationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Forwards on one account before switching to the next.
    #[serde(default = "default_rotation_threshold")]
    pub threshold: u32,
    #[serde(default = "default_switch_delay_secs")]
    pub switch_delay_secs: u64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_rotation_threshold(),
            switch_delay_secs: default_switch_delay_secs(),
        }
    }
}

/// Outbound throttle delays.
#[derive(Debug, Clone, Deserialize)]
pub struct DelayConfig {
    #[serde(default = "default_delay_single_secs")]
    pub single_secs: u64,
    #[serde(default = "default_delay_group_secs")]
    pub group_secs: u64,
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            single_secs: default_delay_single_secs(),
            group_secs: default_delay_group_secs(),
        }
    }
}

/// Persisted file locations.
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    #[serde(default = "default_ledger_file")]
    pub ledger: String,
    #[serde(default = "default_dedup_file")]
    pub dedup: String,
    #[serde(default = "default_log_file")]
    pub log: String,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            ledger: default_ledger_file(),
            dedup: default_dedup_file(),
            log: default_log_file(),
        }
    }
}

/// Ad filter thresholds and lists.
#[derive(Debug, Clone, Deserialize)]
pub struct AdFilterConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Non-link regex patterns; any match drops the message.
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default = "default_min_message_length")]
    pub min_message_length: usize,
    #[serde(default = "default_max_links")]
    pub max_links_per_message: usize,
}

impl Default for AdFilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            keywords: Vec::new(),
            patterns: Vec::new(),
            min_message_length: default_min_message_length(),
            max_links_per_message: default_max_links(),
        }
    }
}

/// Content-quality filter thresholds and lists.
#[derive(Debug, Clone, Deserialize)]
pub struct QualityFilterConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub meaningless_words: Vec<String>,
    #[serde(default = "default_max_repeat_chars")]
    pub max_repeat_chars: usize,
    #[serde(default = "default_min_meaningful_length")]
    pub min_meaningful_length: usize,
    #[serde(default = "default_max_symbol_ratio")]
    pub max_symbol_ratio: f64,
}

impl Default for QualityFilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            meaningless_words: Vec::new(),
            max_repeat_chars: default_max_repeat_chars(),
            min_meaningful_length: default_min_meaningful_length(),
            max_symbol_ratio: default_max_symbol_ratio(),
        }
    }
}

/// Delivery retry/backoff tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryTuning {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_flood_margin_secs")]
    pub flood_margin_secs: u64,
}

impl Default for DeliveryTuning {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_secs: default_backoff_base_secs(),
            flood_margin_secs: default_flood_margin_secs(),
        }
    }
}

impl Config {
    /// Read and parse the config file, then validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let body = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config =
            serde_json::from_str(&body).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Check the whole snapshot, reporting every problem at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.accounts.is_empty() {
            errors.push("no accounts configured".to_string());
        }
        if !self.accounts.iter().any(|a| a.enabled) {
            errors.push("no enabled accounts".to_string());
        }
        for account in &self.accounts {
            if account.name.trim().is_empty() {
                errors.push("account with empty name".to_string());
            }
        }
        if self.source_channels.is_empty() {
            errors.push("no source channels configured".to_string());
        }
        if self.target_channel.trim().is_empty() {
            errors.push("no target channel configured".to_string());
        }
        if self.rotation.threshold == 0 {
            errors.push("rotation.threshold must be greater than zero".to_string());
        }
        if self.max_reconnect_attempts == 0 {
            errors.push("max_reconnect_attempts must be greater than zero".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn switch_delay(&self) -> Duration {
        Duration::from_secs(self.rotation.switch_delay_secs)
    }

    pub fn delivery_config(&self) -> DeliveryConfig {
        DeliveryConfig {
            max_retries: self.delivery.max_retries,
            backoff_base: Duration::from_secs(self.delivery.backoff_base_secs),
            flood_margin: Duration::from_secs(self.delivery.flood_margin_secs),
            delay_single: Duration::from_secs(self.delays.single_secs),
            delay_group: Duration::from_secs(self.delays.group_secs),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_health_check_interval_secs() -> u64 {
    300
}
fn default_max_reconnect_attempts() -> u32 {
    10
}
fn default_reconnect_delay_secs() -> u64 {
    60
}
fn default_rotation_threshold() -> u32 {
    500
}
fn default_switch_delay_secs() -> u64 {
    5
}
fn default_delay_single_secs() -> u64 {
    2
}
fn default_delay_group_secs() -> u64 {
    4
}
fn default_ledger_file() -> String {
    "forward_history.json".to_string()
}
fn default_dedup_file() -> String {
    "dedup_history.json".to_string()
}
fn default_log_file() -> String {
    "tg_relay.log".to_string()
}
fn default_min_message_length() -> usize {
    10
}
fn default_max_links() -> usize {
    3
}
fn default_max_repeat_chars() -> usize {
    3
}
fn default_min_meaningful_length() -> usize {
    5
}
fn default_max_symbol_ratio() -> f64 {
    0.5
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_secs() -> u64 {
    2
}
fn default_flood_margin_secs() -> u64 {
    5
}

/// Accept a JSON string or number as a channel identifier.
fn id_value<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    value_to_id::<D>(value)
}

/// Accept a list of JSON strings or numbers as channel identifiers.
fn id_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Vec::<serde_json::Value>::deserialize(deserializer)?;
    values.into_iter().map(value_to_id::<D>).collect()
}

fn value_to_id<'de, D>(value: serde_json::Value) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "channel identifier must be a string or number, got {other}"
        ))),
    }
}
