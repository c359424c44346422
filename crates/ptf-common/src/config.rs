//! ---
//! ptf_section: "01-core-functionality"
//! ptf_subsection: "module"
//! ptf_type: "source"
//! ptf_scope: "code"
//! ptf_description: "Shared primitives and utilities for the core runtime."
//! ptf_version: "v0.0.0-prealpha"
//! ptf_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_write_file() -> bool {
    true
}

fn default_watchdog_threshold() -> Duration {
    Duration::from_secs(120)
}

fn default_retry_attempts() -> u32 {
    1
}

/// Primary configuration object for the framework.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameworkConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Static per-assembly parallelization overrides keyed by assembly name.
    #[serde(default)]
    pub assemblies: IndexMap<String, ScopeSettings>,
}

/// Metadata describing where a [`FrameworkConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedFrameworkConfig {
    pub config: FrameworkConfig,
    pub source: PathBuf,
}

impl FrameworkConfig {
    pub const ENV_CONFIG_PATH: &str = "PTF_CONFIG";

    /// Load configuration from disk, respecting the `PTF_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedFrameworkConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedFrameworkConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedFrameworkConfig {
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
        let config = toml::from_str::<FrameworkConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Static override for an assembly, if one is configured.
    pub fn assembly(&self, name: &str) -> Option<&ScopeSettings> {
        self.assemblies.get(name)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.execution.validate()?;
        for (name, settings) in &self.assemblies {
            settings
                .validate()
                .with_context(|| format!("assembly '{}' has invalid settings", name))?;
        }
        Ok(())
    }
}

impl std::str::FromStr for FrameworkConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: FrameworkConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Knobs consumed by the orchestrator while running case groups.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Elapsed time after which a still-running case is reported once.
    #[serde(default = "default_watchdog_threshold", rename = "watchdog_threshold_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub watchdog_threshold: Duration,
    /// Overrides the processor count used when no scope specifies a degree.
    #[serde(default)]
    pub host_degree: Option<usize>,
    /// Attempts per case unless the method metadata says otherwise.
    #[serde(default = "default_retry_attempts")]
    pub default_retry_attempts: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            watchdog_threshold: default_watchdog_threshold(),
            host_degree: None,
            default_retry_attempts: default_retry_attempts(),
        }
    }
}

impl ExecutionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.watchdog_threshold.is_zero() {
            return Err(anyhow!("watchdog threshold must be greater than zero"));
        }
        if self.host_degree == Some(0) {
            return Err(anyhow!("host degree must be at least 1 when set"));
        }
        if self.default_retry_attempts == 0 {
            return Err(anyhow!("default retry attempts must be at least 1"));
        }
        Ok(())
    }

    /// Effective host default degree: the override, else the processor count.
    pub fn host_default_degree(&self) -> usize {
        self.host_degree.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

/// Parallelization settings attached to an assembly, class, or method.
///
/// * `enabled = Some(true)` requests full parallelization,
///   `Some(false)` disables it and `None` leaves the decision to the next scope.
/// * `degree = None` means "use the processor count", `Some(0)` defers to
///   unbounded host scheduling and any positive value becomes a limiter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeSettings {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub degree: Option<i64>,
}

impl ScopeSettings {
    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            degree: None,
        }
    }

    pub fn with_degree(mut self, degree: i64) -> Self {
        self.degree = Some(degree);
        self
    }

    pub fn is_disabled(&self) -> bool {
        self.enabled == Some(false)
    }

    pub fn is_enabled_override(&self) -> bool {
        self.enabled == Some(true)
    }

    pub fn validate(&self) -> Result<()> {
        match self.degree {
            Some(degree) if degree < 0 => Err(anyhow!(
                "degree of parallelism must be zero or positive, got {}",
                degree
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    /// Whether a rolling log file is written next to stdout output.
    #[serde(default = "default_write_file")]
    pub write_file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            write_file: default_write_file(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = FrameworkConfig::default();
        config.validate().expect("defaults validate");
        assert_eq!(config.execution.watchdog_threshold, Duration::from_secs(120));
        assert_eq!(config.execution.default_retry_attempts, 1);
        assert!(config.execution.host_default_degree() >= 1);
    }

    #[test]
    fn parses_toml_with_assembly_overrides() {
        let config: FrameworkConfig = r#"
            [execution]
            watchdog_threshold_secs = 30
            host_degree = 3

            [assemblies."Sample.Tests"]
            enabled = true
            degree = 4
        "#
        .parse()
        .expect("valid config");
        assert_eq!(config.execution.watchdog_threshold, Duration::from_secs(30));
        assert_eq!(config.execution.host_default_degree(), 3);
        let settings = config.assembly("Sample.Tests").expect("override present");
        assert!(settings.is_enabled_override());
        assert_eq!(settings.degree, Some(4));
    }

    #[test]
    fn rejects_negative_degree() {
        let err = r#"
            [assemblies.broken]
            degree = -1
        "#
        .parse::<FrameworkConfig>()
        .expect_err("negative degree rejected");
        assert!(format!("{err:#}").contains("zero or positive"));
    }

    #[test]
    fn rejects_zero_watchdog() {
        let err = "[execution]\nwatchdog_threshold_secs = 0\n"
            .parse::<FrameworkConfig>()
            .expect_err("zero watchdog rejected");
        assert!(err.to_string().contains("watchdog"));
    }

    #[test]
    fn loads_first_existing_candidate() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ptf.toml");
        fs::write(&path, "[execution]\ndefault_retry_attempts = 3\n").expect("write config");
        let missing = dir.path().join("missing.toml");

        let loaded = FrameworkConfig::load_with_source(&[missing, path.clone()])
            .expect("config loads");
        assert_eq!(loaded.source, path);
        assert_eq!(loaded.config.execution.default_retry_attempts, 3);
    }
}
