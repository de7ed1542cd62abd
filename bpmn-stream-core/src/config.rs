//! Engine configuration
//!
//! Loaded from YAML, then overridden by `BPMN_STREAM_*` environment variables.
//!
//! ```yaml
//! partition_count: 2
//! processes_dir: processes
//! log:
//!   backpressure_limit: 1000
//! processor:
//!   timer_check_interval_ms: 100
//! monitor:
//!   grace_period_ms: 50
//!   idle_threshold: 2
//! ```

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Env var naming the config file.
pub const CONFIG_PATH_ENV: &str = "BPMN_STREAM_CONFIG";

/// Default config file location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/engine.yaml";

fn default_partition_count() -> u16 {
    1
}

fn default_processes_dir() -> String {
    "processes".to_string()
}

fn default_backpressure_limit() -> i64 {
    1000
}

fn default_timer_check_interval_ms() -> u64 {
    100
}

fn default_grace_period_ms() -> u64 {
    50
}

fn default_idle_threshold() -> u32 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default = "default_partition_count")]
    pub partition_count: u16,
    /// Directory of YAML process definitions loaded at startup.
    #[serde(default = "default_processes_dir")]
    pub processes_dir: String,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogConfig {
    /// Maximum number of committed but unprocessed records before client
    /// writes are rejected.
    #[serde(default = "default_backpressure_limit")]
    pub backpressure_limit: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessorConfig {
    /// How often the due-date checker looks for timers to trigger. `0`
    /// disables the periodic check; timers then only fire on request.
    #[serde(default = "default_timer_check_interval_ms")]
    pub timer_check_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorConfig {
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    /// Consecutive caught-up checks before idle listeners fire.
    #[serde(default = "default_idle_threshold")]
    pub idle_threshold: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            partition_count: default_partition_count(),
            processes_dir: default_processes_dir(),
            log: LogConfig::default(),
            processor: ProcessorConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            backpressure_limit: default_backpressure_limit(),
        }
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            timer_check_interval_ms: default_timer_check_interval_ms(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period_ms(),
            idle_threshold: default_idle_threshold(),
        }
    }
}

impl ProcessorConfig {
    pub fn timer_check_interval(&self) -> Duration {
        Duration::from_millis(self.timer_check_interval_ms)
    }
}

impl MonitorConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

impl EngineConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_yaml::from_str(yaml).context("Failed to parse engine config YAML")?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config = Self::from_yaml_str(&yaml)?;
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        info!(path = %path.display(), "Loaded engine config");
        Ok(config)
    }

    /// Resolve the config file from `BPMN_STREAM_CONFIG`, falling back to
    /// `config/engine.yaml`, and to defaults (plus env overrides) if neither
    /// exists.
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Self::load(path);
        }
        if Path::new(DEFAULT_CONFIG_PATH).exists() {
            return Self::load(DEFAULT_CONFIG_PATH);
        }
        let mut config = Self::default();
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Apply `BPMN_STREAM_*` overrides using `lookup` to read variables.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<()> {
        fn parse<T: std::str::FromStr>(name: &str, raw: String) -> Result<T> {
            raw.trim()
                .parse()
                .map_err(|_| anyhow!("Invalid value for {name}: {raw:?}"))
        }

        if let Some(v) = lookup("BPMN_STREAM_PARTITION_COUNT") {
            self.partition_count = parse("BPMN_STREAM_PARTITION_COUNT", v)?;
        }
        if let Some(v) = lookup("BPMN_STREAM_PROCESSES_DIR") {
            self.processes_dir = v;
        }
        if let Some(v) = lookup("BPMN_STREAM_BACKPRESSURE_LIMIT") {
            self.log.backpressure_limit = parse("BPMN_STREAM_BACKPRESSURE_LIMIT", v)?;
        }
        if let Some(v) = lookup("BPMN_STREAM_TIMER_CHECK_INTERVAL_MS") {
            self.processor.timer_check_interval_ms =
                parse("BPMN_STREAM_TIMER_CHECK_INTERVAL_MS", v)?;
        }
        if let Some(v) = lookup("BPMN_STREAM_IDLE_GRACE_PERIOD_MS") {
            self.monitor.grace_period_ms = parse("BPMN_STREAM_IDLE_GRACE_PERIOD_MS", v)?;
        }
        if let Some(v) = lookup("BPMN_STREAM_IDLE_THRESHOLD") {
            self.monitor.idle_threshold = parse("BPMN_STREAM_IDLE_THRESHOLD", v)?;
        }
        self.validate()
    }

    fn validate(&self) -> Result<()> {
        if self.partition_count == 0 {
            return Err(anyhow!("partition_count must be at least 1"));
        }
        if self.log.backpressure_limit <= 0 {
            return Err(anyhow!("log.backpressure_limit must be positive"));
        }
        if self.monitor.idle_threshold == 0 {
            return Err(anyhow!("monitor.idle_threshold must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_from_empty_yaml() {
        let config = EngineConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.monitor.grace_period(), Duration::from_millis(50));
        assert_eq!(config.monitor.idle_threshold, 2);
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r#"
partition_count: 3
monitor:
  idle_threshold: 4
"#;
        let config = EngineConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.partition_count, 3);
        assert_eq!(config.monitor.idle_threshold, 4);
        assert_eq!(config.monitor.grace_period_ms, 50);
        assert_eq!(config.log.backpressure_limit, 1000);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("BPMN_STREAM_PARTITION_COUNT", "4"),
            ("BPMN_STREAM_IDLE_GRACE_PERIOD_MS", "10"),
        ]);
        let mut config = EngineConfig::default();
        config
            .apply_env_overrides(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.partition_count, 4);
        assert_eq!(config.monitor.grace_period_ms, 10);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(EngineConfig::from_yaml_str("partition_count: 0").is_err());
        let mut config = EngineConfig::default();
        let err = config
            .apply_env_overrides(|name| {
                (name == "BPMN_STREAM_IDLE_THRESHOLD").then(|| "many".to_string())
            })
            .unwrap_err();
        assert!(err.to_string().contains("BPMN_STREAM_IDLE_THRESHOLD"));
    }
}
