//! Configuration management for the WindowKeeper daemon.
//!
//! Configuration is loaded from TOML files in the following locations (in order):
//! 1. `%APPDATA%/windowkeeper/config.toml` (Windows standard)
//! 2. `~/.config/windowkeeper/config.toml` (Unix-style, for WSL compatibility)
//! 3. `./config.toml` (current directory, for development)

use anyhow::{Context, Result};
use directories::ProjectDirs;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use windowkeeper_core::EngineConfig;

const RETENTION_RANGE: (u64, u64) = (1, 300);
const THRESHOLD_RANGE: (f64, f64) = (1.0, 10_000.0);
const HISTORY_RANGE: (usize, usize) = (10, 10_000);
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for WindowKeeper.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Window tracking and restore tuning.
    pub tracking: TrackingConfig,
    /// Behavior configuration.
    pub behavior: BehaviorConfig,
    /// Diagnostic history kept for IPC queries.
    pub diagnostics: DiagnosticsConfig,
}

/// Tracking-related configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Seconds after a restore during which large moves are reverted.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Center displacement in pixels at or above which a move is reverted.
    #[serde(default = "default_restore_threshold")]
    pub restore_threshold_px: f64,

    /// Title patterns (regex) of windows that are never tracked.
    #[serde(default)]
    pub exclude_titles: Vec<String>,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
            restore_threshold_px: default_restore_threshold(),
            exclude_titles: Vec::new(),
        }
    }
}

/// Behavior-related configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Whether to show the system tray icon.
    #[serde(default = "default_true")]
    pub show_tray_icon: bool,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            show_tray_icon: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Number of recent log entries kept for `logs` queries.
    #[serde(default = "default_history_size")]
    pub history_size: usize,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            history_size: default_history_size(),
        }
    }
}

// Default value functions for serde
fn default_retention_secs() -> u64 {
    10
}

fn default_restore_threshold() -> f64 {
    100.0
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_history_size() -> usize {
    500
}

/// A configuration value that was out of range or unusable.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
}

impl ConfigWarning {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl Config {
    /// Load configuration from standard locations.
    ///
    /// Tries the following locations in order:
    /// 1. `%APPDATA%/windowkeeper/config.toml`
    /// 2. `~/.config/windowkeeper/config.toml`
    /// 3. `./config.toml`
    ///
    /// Returns default config if no file is found.
    pub fn load() -> Result<Self> {
        let paths = config_paths();

        for path in &paths {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::load_from_path(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific path.
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Clamp out-of-range values and drop unusable ones.
    ///
    /// Returns one warning per corrected field; an empty list means the
    /// configuration was used as written.
    pub fn validate(&mut self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        let tracking = &mut self.tracking;
        let (min, max) = RETENTION_RANGE;
        if !(min..=max).contains(&tracking.retention_secs) {
            let clamped = tracking.retention_secs.clamp(min, max);
            warnings.push(ConfigWarning::new(
                "tracking.retention_secs",
                format!(
                    "{} is outside {}..={}, using {}",
                    tracking.retention_secs, min, max, clamped
                ),
            ));
            tracking.retention_secs = clamped;
        }

        let (min, max) = THRESHOLD_RANGE;
        if !tracking.restore_threshold_px.is_finite() {
            warnings.push(ConfigWarning::new(
                "tracking.restore_threshold_px",
                format!(
                    "{} is not a number, using {}",
                    tracking.restore_threshold_px,
                    default_restore_threshold()
                ),
            ));
            tracking.restore_threshold_px = default_restore_threshold();
        } else if !(min..=max).contains(&tracking.restore_threshold_px) {
            let clamped = tracking.restore_threshold_px.clamp(min, max);
            warnings.push(ConfigWarning::new(
                "tracking.restore_threshold_px",
                format!(
                    "{} is outside {}..={}, using {}",
                    tracking.restore_threshold_px, min, max, clamped
                ),
            ));
            tracking.restore_threshold_px = clamped;
        }

        tracking.exclude_titles.retain(|pattern| match Regex::new(pattern) {
            Ok(_) => true,
            Err(e) => {
                warnings.push(ConfigWarning::new(
                    "tracking.exclude_titles",
                    format!("ignoring invalid pattern '{}': {}", pattern, e),
                ));
                false
            }
        });

        let level = self.behavior.log_level.to_ascii_lowercase();
        if LOG_LEVELS.contains(&level.as_str()) {
            self.behavior.log_level = level;
        } else {
            warnings.push(ConfigWarning::new(
                "behavior.log_level",
                format!(
                    "unknown level '{}', using {}",
                    self.behavior.log_level,
                    default_log_level()
                ),
            ));
            self.behavior.log_level = default_log_level();
        }

        let (min, max) = HISTORY_RANGE;
        let history = &mut self.diagnostics.history_size;
        if !(min..=max).contains(&*history) {
            let clamped = (*history).clamp(min, max);
            warnings.push(ConfigWarning::new(
                "diagnostics.history_size",
                format!("{} is outside {}..={}, using {}", history, min, max, clamped),
            ));
            *history = clamped;
        }

        warnings
    }

    /// Engine settings derived from the `[tracking]` section.
    ///
    /// Patterns that fail to compile are skipped; [`Config::validate`] has
    /// already reported them.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            retention: Duration::from_secs(self.tracking.retention_secs),
            displacement_threshold: self.tracking.restore_threshold_px,
            excluded_titles: self
                .tracking
                .exclude_titles
                .iter()
                .filter_map(|pattern| Regex::new(pattern).ok())
                .collect(),
        }
    }
}

/// Get all possible config file paths in priority order.
pub fn config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // 1. Windows standard: %APPDATA%/windowkeeper/config.toml
    if let Some(proj_dirs) = ProjectDirs::from("com", "windowkeeper", "windowkeeper") {
        paths.push(proj_dirs.config_dir().join("config.toml"));
    }

    // 2. Unix-style: ~/.config/windowkeeper/config.toml
    if let Some(home) = dirs_home() {
        paths.push(home.join(".config").join("windowkeeper").join("config.toml"));
    }

    // 3. Current directory: ./config.toml
    paths.push(PathBuf::from("config.toml"));

    paths
}

/// Get the user's home directory.
fn dirs_home() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.tracking.retention_secs, 10);
        assert_eq!(config.tracking.restore_threshold_px, 100.0);
        assert!(config.tracking.exclude_titles.is_empty());
        assert_eq!(config.behavior.log_level, "info");
        assert!(config.behavior.show_tray_icon);
        assert_eq!(config.diagnostics.history_size, 500);
    }

    #[test]
    fn test_defaults_match_engine_defaults() {
        let engine = Config::default().engine_config();
        let reference = EngineConfig::default();
        assert_eq!(engine.retention, reference.retention);
        assert_eq!(engine.displacement_threshold, reference.displacement_threshold);
        assert!(engine.excluded_titles.is_empty());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.tracking.retention_secs, config.tracking.retention_secs);
        assert_eq!(parsed.behavior.log_level, config.behavior.log_level);
    }

    #[test]
    fn test_config_partial_parse() {
        // Config with only some fields should use defaults for the rest
        let toml_str = r#"
            [tracking]
            retention_secs = 30
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.tracking.retention_secs, 30);
        assert_eq!(config.tracking.restore_threshold_px, 100.0); // default
        assert_eq!(config.diagnostics.history_size, 500); // default
    }

    #[test]
    fn test_exclude_titles_parse() {
        let toml_str = r#"
            [tracking]
            exclude_titles = ["^Task Manager$", "Picture-in-Picture"]
        "#;
        let mut config: Config = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_empty());

        let engine = config.engine_config();
        assert_eq!(engine.excluded_titles.len(), 2);
        assert!(engine.excluded_titles[0].is_match("Task Manager"));
        assert!(!engine.excluded_titles[0].is_match("Task Manager - Details"));
    }

    #[test]
    fn test_validate_clamps_ranges() {
        let mut config = Config::default();
        config.tracking.retention_secs = 0;
        config.tracking.restore_threshold_px = 50_000.0;
        config.diagnostics.history_size = 1;

        let warnings = config.validate();
        let fields: Vec<_> = warnings.iter().map(|w| w.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "tracking.retention_secs",
                "tracking.restore_threshold_px",
                "diagnostics.history_size"
            ]
        );
        assert_eq!(config.tracking.retention_secs, 1);
        assert_eq!(config.tracking.restore_threshold_px, 10_000.0);
        assert_eq!(config.diagnostics.history_size, 10);
    }

    #[test]
    fn test_validate_rejects_nan_threshold() {
        let mut config = Config::default();
        config.tracking.restore_threshold_px = f64::NAN;
        let warnings = config.validate();
        assert_eq!(warnings.len(), 1);
        assert_eq!(config.tracking.restore_threshold_px, 100.0);
    }

    #[test]
    fn test_validate_drops_invalid_regex() {
        let mut config = Config::default();
        config.tracking.exclude_titles = vec!["(unclosed".to_string(), "ok".to_string()];

        let warnings = config.validate();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field, "tracking.exclude_titles");
        assert!(warnings[0].message.contains("(unclosed"));
        assert_eq!(config.tracking.exclude_titles, vec!["ok".to_string()]);
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = Config::default();
        config.behavior.log_level = "DEBUG".to_string();
        assert!(config.validate().is_empty());
        assert_eq!(config.behavior.log_level, "debug");

        config.behavior.log_level = "verbose".to_string();
        let warnings = config.validate();
        assert_eq!(warnings.len(), 1);
        assert_eq!(config.behavior.log_level, "info");
    }

    #[test]
    fn test_validate_default_is_clean() {
        let mut config = Config::default();
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_config_paths_not_empty() {
        let paths = config_paths();
        assert!(!paths.is_empty());
        assert!(paths.last().unwrap().ends_with("config.toml"));
    }
}
