use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub capture: CaptureConfig,
    #[serde(default)]
    pub detect: DetectConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    pub url: String,
    #[serde(default)]
    pub mode: CaptureMode,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: f64,
    #[serde(default = "default_quality")]
    pub quality: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Frames discarded right after the source opens, while the sensor settles.
    #[serde(default)]
    pub skip_frames: u32,
}

/// How frames are pulled from the camera endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// Long-lived `multipart/x-mixed-replace` stream.
    #[default]
    Mjpeg,
    /// One HTTP request per frame.
    Polling,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectConfig {
    /// Block size in pixels of one reduced grid cell.
    #[serde(default = "default_scale")]
    pub scale: u32,
    #[serde(default = "default_threshold")]
    pub threshold: u32,
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
    /// Bottom rows of the reduced grid left out of diffing.
    #[serde(default)]
    pub lower_scan_cutoff: u32,
    #[serde(default)]
    pub debug: DebugMode,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            scale: default_scale(),
            threshold: default_threshold(),
            multiplier: default_multiplier(),
            lower_scan_cutoff: 0,
            debug: DebugMode::default(),
        }
    }
}

/// Selects between the binary detection stream and the terminal heat map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum DebugMode {
    /// Binary records on stdout, nothing drawn.
    #[default]
    #[serde(rename = "off")]
    Silent,
    /// Draw the luminance of the current frame.
    #[serde(rename = "current")]
    VisualizeCurrent,
    /// Draw the weighted difference against the previous frame.
    #[serde(rename = "diff")]
    VisualizeDiff,
}

impl DebugMode {
    pub fn is_visual(self) -> bool {
        !matches!(self, DebugMode::Silent)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleConfig {
    /// Seconds between capture sessions. Zero runs a single session.
    #[serde(default)]
    pub loop_secs: u64,
    #[serde(default)]
    pub offset_secs: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.detect.scale == 0 {
            return Err(ConfigError::Invalid("detect.scale must be at least 1".into()));
        }
        if self.capture.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "capture.timeout_secs must be at least 1".into(),
            ));
        }
        if !(self.capture.fps > 0.0) {
            return Err(ConfigError::Invalid("capture.fps must be positive".into()));
        }
        let reduced_height = self.capture.height / self.detect.scale + 1;
        if self.detect.lower_scan_cutoff >= reduced_height {
            return Err(ConfigError::Invalid(format!(
                "detect.lower_scan_cutoff ({}) must be below the reduced height ({reduced_height})",
                self.detect.lower_scan_cutoff
            )));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_width() -> u32 {
    384
}
fn default_height() -> u32 {
    288
}
fn default_fps() -> f64 {
    10.0
}
fn default_quality() -> u32 {
    80
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_scale() -> u32 {
    10
}
fn default_threshold() -> u32 {
    10
}
fn default_multiplier() -> u32 {
    1
}
fn default_log_level() -> String {
    "info".into()
}
