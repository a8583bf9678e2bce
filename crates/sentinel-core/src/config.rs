//! Layered configuration (§4.11): compiled-in defaults, overridden by an
//! optional YAML file, overridden by `SENTINEL__*` environment variables.
//! Secrets (the classifier API key) are loadable only from file or
//! environment — never given a compiled-in default — and are never
//! serialized back out or logged.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentinelConfig {
    pub source: SourceSettings,
    pub engines: EngineSettings,
    pub classifier: ClassifierSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSettings {
    /// Path to the external event-producing process. `None` means events
    /// only arrive via the inline push channel (e.g. in tests or `replay`).
    pub process_path: Option<String>,
    pub process_args: Vec<String>,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_true")]
    pub command_injection_enabled: bool,
    #[serde(default = "default_true")]
    pub filesystem_exposure_enabled: bool,
    #[serde(default = "default_true")]
    pub tool_poisoning_enabled: bool,
    #[serde(default = "default_true")]
    pub data_exfiltration_enabled: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            command_injection_enabled: true,
            filesystem_exposure_enabled: true,
            tool_poisoning_enabled: true,
            data_exfiltration_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierSettings {
    pub endpoint: String,
    pub model: String,
    /// Never given a compiled-in default; must come from file or
    /// environment (`SENTINEL__CLASSIFIER__API_KEY`).
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_inter_request_delay_secs")]
    pub inter_request_delay_secs: u64,
}

impl ClassifierSettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_secs(self.base_delay_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn inter_request_delay(&self) -> Duration {
        Duration::from_secs(self.inter_request_delay_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_secs() -> u64 {
    2
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_inter_request_delay_secs() -> u64 {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            source: SourceSettings {
                process_path: None,
                process_args: Vec::new(),
                channel_capacity: default_channel_capacity(),
            },
            engines: EngineSettings::default(),
            classifier: ClassifierSettings {
                endpoint: "https://api.mistral.ai/v1/chat/completions".to_string(),
                model: "mistral-medium-latest".to_string(),
                api_key: String::new(),
                max_retries: default_max_retries(),
                base_delay_secs: default_base_delay_secs(),
                timeout_secs: default_timeout_secs(),
                inter_request_delay_secs: default_inter_request_delay_secs(),
            },
            logging: LoggingSettings::default(),
        }
    }
}

impl SentinelConfig {
    /// Load defaults, then merge an optional YAML file, then merge
    /// `SENTINEL__*` environment overrides (`SENTINEL__CLASSIFIER__API_KEY`,
    /// `SENTINEL__LOGGING__LEVEL`, ...). The file path is optional — a
    /// standalone run with only environment overrides is valid.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let defaults = config::Config::try_from(&Self::default()).context("serializing default config")?;

        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("SENTINEL")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .context("building layered configuration")?
            .try_deserialize()
            .context("deserializing configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_do_not_carry_a_classifier_api_key() {
        let config = SentinelConfig::default();
        assert!(config.classifier.api_key.is_empty());
    }

    #[test]
    fn load_with_no_file_falls_back_to_defaults() {
        let config = SentinelConfig::load(None).expect("should build from defaults + env");
        assert_eq!(config.classifier.model, "mistral-medium-latest");
        assert!(config.engines.command_injection_enabled);
    }
}
