//! ---
//! mlink_section: "01-core-functionality"
//! mlink_subsection: "module"
//! mlink_type: "source"
//! mlink_scope: "code"
//! mlink_description: "Configuration loading for processes embedding the bridge."
//! mlink_version: "v0.0.0-prealpha"
//! mlink_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    "0.0.0.0:9898"
        .parse()
        .expect("valid default metrics address")
}

fn default_reply_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_max_frame_bytes() -> usize {
    1024 * 1024
}

/// Primary configuration object for a process embedding the bridge.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Logging sink configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Metrics endpoint configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Bridge messaging tunables.
    #[serde(default)]
    pub messaging: MessagingConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    /// Parsed and validated configuration.
    pub config: AppConfig,
    /// Path the configuration was read from.
    pub source: PathBuf,
}

impl AppConfig {
    /// Environment variable overriding the configuration path.
    pub const ENV_CONFIG_PATH: &'static str = "MLINK_CONFIG";

    /// Load configuration from disk, respecting the `MLINK_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.messaging.validate()
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Logging sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory receiving the rolling daily log files.
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    /// Format of the stdout layer.
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// Optional file name prefix; defaults to the service name.
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

/// Metrics endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether the embedding process should expose Prometheus metrics.
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    /// Listen address for the metrics endpoint.
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}

/// Bridge messaging tunables.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingConfig {
    /// Reply deadline applied when a caller passes no explicit timeout,
    /// expressed in milliseconds in configuration files.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_reply_timeout")]
    pub default_reply_timeout: Duration,
    /// Inbound frames larger than this are rejected before decoding.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            default_reply_timeout: default_reply_timeout(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl MessagingConfig {
    /// Validate messaging tunables.
    pub fn validate(&self) -> Result<()> {
        if self.default_reply_timeout.is_zero() {
            return Err(anyhow!("messaging.default_reply_timeout must be positive"));
        }
        if self.max_frame_bytes == 0 {
            return Err(anyhow!("messaging.max_frame_bytes must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    // Serializes the tests that read or write MLINK_CONFIG.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn empty_document_yields_defaults() {
        let config: AppConfig = "".parse().expect("defaults apply");
        assert_eq!(config.messaging.default_reply_timeout, Duration::from_secs(5));
        assert_eq!(config.messaging.max_frame_bytes, 1024 * 1024);
        assert!(config.metrics.enabled);
        assert_eq!(config.logging.format, LogFormat::StructuredJson);
    }

    #[test]
    fn messaging_section_overrides_apply() {
        let config: AppConfig = r#"
            [messaging]
            default_reply_timeout = 250
            max_frame_bytes = 4096

            [logging]
            format = "pretty"
        "#
        .parse()
        .expect("valid overrides");
        assert_eq!(
            config.messaging.default_reply_timeout,
            Duration::from_millis(250)
        );
        assert_eq!(config.messaging.max_frame_bytes, 4096);
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn zero_timeout_fails_validation() {
        let err = r#"
            [messaging]
            default_reply_timeout = 0
        "#
        .parse::<AppConfig>()
        .expect_err("zero timeout rejected");
        assert!(err.to_string().contains("default_reply_timeout"));
    }

    #[test]
    fn load_prefers_the_environment_override() {
        let _guard = ENV_LOCK.lock().expect("env lock");
        let mut env_file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(env_file, "[messaging]\nmax_frame_bytes = 2048").expect("write config");

        std::env::set_var(AppConfig::ENV_CONFIG_PATH, env_file.path());
        let loaded = AppConfig::load_with_source::<&Path>(&[]).expect("env override");
        std::env::remove_var(AppConfig::ENV_CONFIG_PATH);

        assert_eq!(loaded.source, env_file.path());
        assert_eq!(loaded.config.messaging.max_frame_bytes, 2048);
    }

    #[test]
    fn load_reports_missing_candidates() {
        let _guard = ENV_LOCK.lock().expect("env lock");
        let err = AppConfig::load(&["/definitely/not/here.toml"])
            .expect_err("nothing to load");
        assert!(err.to_string().contains("no configuration files found"));
    }
}
