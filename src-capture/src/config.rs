//! Configuration management for framecap.
//!
//! Handles loading and saving capture settings to platform-standard config directories:
//! - Linux: `~/.config/framecap/config.json`
//! - macOS: `~/Library/Application Support/framecap/config.json`
//! - Windows: `%APPDATA%\framecap\config.json`

use directories::ProjectDirs;
use framecap_common::security::validation::MAX_DIMENSION;
use framecap_common::{Compression, FrameSize};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// How automatic captures read the framebuffer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReadbackMode {
    /// Whole-frame synchronous read in the draw phase
    #[default]
    Blocking,
    /// Same two-frame asynchronous path as manual captures
    Split,
}

impl ReadbackMode {
    /// Convert from string representation.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "blocking" => Some(Self::Blocking),
            "split" => Some(Self::Split),
            _ => None,
        }
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blocking => "blocking",
            Self::Split => "split",
        }
    }
}

/// Output-related configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OutputConfig {
    /// Screenshot directory. If None, uses `./screenshots`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
}

/// Readback pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of transfer buffers.
    pub transfer_buffers: usize,
    /// Largest frame the shared segment can hold.
    pub max_width: u32,
    pub max_height: u32,
    /// Map attempts before a pending read is abandoned.
    pub map_retry_limit: u32,
    /// Ticks a request may spend between issue and hand-off.
    pub stage_timeout_ticks: u64,
    /// Automatic captures waiting behind the current one.
    pub auto_queue_limit: usize,
    pub auto_readback: ReadbackMode,
    /// Main-thread time allowed per capture, in microseconds.
    pub budget_us: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            transfer_buffers: 2,
            max_width: 3840,
            max_height: 2160,
            map_retry_limit: 3,
            stage_timeout_ticks: 8,
            auto_queue_limit: 4,
            auto_readback: ReadbackMode::Blocking,
            budget_us: 2000,
        }
    }
}

impl PipelineConfig {
    pub fn max_frame(&self) -> FrameSize {
        FrameSize::new(self.max_width, self.max_height)
    }
}

/// Encode worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_count")]
    pub count: usize,
    /// Explicit path to the encoder binary. None means search next to the
    /// current executable, then PATH.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoder_path: Option<String>,
    #[serde(default = "default_encode_timeout_ms")]
    pub encode_timeout_ms: u64,
    #[serde(default)]
    pub compression: Compression,
}

fn default_worker_count() -> usize {
    2
}

fn default_encode_timeout_ms() -> u64 {
    10_000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            encoder_path: None,
            encode_timeout_ms: default_encode_timeout_ms(),
            compression: Compression::Fast,
        }
    }
}

/// Capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Master switch; when off every request is rejected.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
}

fn default_enabled() -> bool {
    true
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            output: OutputConfig::default(),
            pipeline: PipelineConfig::default(),
            workers: WorkerConfig::default(),
        }
    }
}

impl CaptureConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that the settings describe a usable pipeline.
    pub fn validate(&self) -> Result<(), String> {
        if self.pipeline.transfer_buffers == 0 {
            return Err("pipeline.transfer_buffers must be at least 1".to_string());
        }
        if self.workers.count == 0 {
            return Err("workers.count must be at least 1".to_string());
        }
        for (field, value) in [
            ("pipeline.max_width", self.pipeline.max_width),
            ("pipeline.max_height", self.pipeline.max_height),
        ] {
            if value == 0 || value > MAX_DIMENSION {
                return Err(format!(
                    "{} must be between 1 and {} (got {})",
                    field, MAX_DIMENSION, value
                ));
            }
        }
        if self.pipeline.stage_timeout_ticks == 0 {
            return Err("pipeline.stage_timeout_ticks must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Get the path to the config file.
pub fn config_path() -> Result<PathBuf, String> {
    let proj_dirs =
        ProjectDirs::from("", "", "framecap").ok_or("Could not determine config directory")?;
    Ok(proj_dirs.config_dir().join("config.json"))
}

/// Load configuration from disk.
/// Returns default config if file doesn't exist or is invalid.
pub fn load_config() -> CaptureConfig {
    let path = match config_path() {
        Ok(path) => path,
        Err(e) => {
            warn!("Failed to get config path: {}", e);
            return CaptureConfig::default();
        }
    };

    if !path.exists() {
        debug!("No config file found, using defaults");
        return CaptureConfig::default();
    }

    match fs::read_to_string(&path) {
        Ok(contents) => match serde_json::from_str::<CaptureConfig>(&contents) {
            Ok(config) => {
                info!("Loaded config from {:?}", path);
                config
            }
            Err(e) => {
                warn!("Failed to parse config file: {}. Using defaults.", e);
                CaptureConfig::default()
            }
        },
        Err(e) => {
            warn!("Failed to read config file: {}. Using defaults.", e);
            CaptureConfig::default()
        }
    }
}

/// Save configuration to disk.
/// Creates the config directory if it doesn't exist.
pub fn save_config(config: &CaptureConfig) -> Result<PathBuf, String> {
    let path = config_path()?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }

    let json = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;

    fs::write(&path, json).map_err(|e| format!("Failed to write config file: {}", e))?;

    info!("Saved config to {:?}", path);
    Ok(path)
}

/// Get the configured screenshot directory, falling back to `./screenshots`.
pub fn screenshot_dir(config: &CaptureConfig) -> PathBuf {
    match &config.output.directory {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from("screenshots"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CaptureConfig::default();
        assert!(config.enabled);
        assert!(config.output.directory.is_none());
        assert_eq!(config.pipeline.transfer_buffers, 2);
        assert_eq!(config.pipeline.max_frame(), FrameSize::new(3840, 2160));
        assert_eq!(config.pipeline.auto_readback, ReadbackMode::Blocking);
        assert_eq!(config.pipeline.budget_us, 2000);
        assert_eq!(config.workers.count, 2);
        assert_eq!(config.workers.compression, Compression::Fast);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let mut config = CaptureConfig::default();
        config.output.directory = Some("/custom/shots".to_string());
        config.pipeline.auto_readback = ReadbackMode::Split;
        config.workers.encoder_path = Some("/opt/framecap-encoder".to_string());

        let json = serde_json::to_string(&config).unwrap();
        let parsed: CaptureConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.output.directory, Some("/custom/shots".to_string()));
        assert_eq!(parsed.pipeline.auto_readback, ReadbackMode::Split);
        assert_eq!(
            parsed.workers.encoder_path,
            Some("/opt/framecap-encoder".to_string())
        );
    }

    #[test]
    fn test_empty_optionals_not_serialized() {
        let json = serde_json::to_string(&CaptureConfig::default()).unwrap();
        assert!(!json.contains("directory"));
        assert!(!json.contains("encoder_path"));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let json = r#"{"pipeline": {"transfer_buffers": 3}, "workers": {"count": 4}}"#;
        let parsed: CaptureConfig = serde_json::from_str(json).unwrap();

        assert!(parsed.enabled);
        assert_eq!(parsed.pipeline.transfer_buffers, 3);
        assert_eq!(parsed.pipeline.map_retry_limit, 3);
        assert_eq!(parsed.workers.count, 4);
        assert_eq!(parsed.workers.encode_timeout_ms, 10_000);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = CaptureConfig::default();
        config.pipeline.transfer_buffers = 0;
        assert!(config.validate().is_err());

        let mut config = CaptureConfig::default();
        config.workers.count = 0;
        assert!(config.validate().is_err());

        let mut config = CaptureConfig::default();
        config.pipeline.max_width = MAX_DIMENSION + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_readback_mode_from_str() {
        assert_eq!(ReadbackMode::from_str("split"), Some(ReadbackMode::Split));
        assert_eq!(
            ReadbackMode::from_str("BLOCKING"),
            Some(ReadbackMode::Blocking)
        );
        assert_eq!(ReadbackMode::from_str("async"), None);
        assert_eq!(ReadbackMode::Split.as_str(), "split");
    }

    #[test]
    fn test_screenshot_dir_fallback() {
        let mut config = CaptureConfig::default();
        assert_eq!(screenshot_dir(&config), PathBuf::from("screenshots"));
        config.output.directory = Some(String::new());
        assert_eq!(screenshot_dir(&config), PathBuf::from("screenshots"));
        config.output.directory = Some("/var/shots".to_string());
        assert_eq!(screenshot_dir(&config), PathBuf::from("/var/shots"));
    }
}
