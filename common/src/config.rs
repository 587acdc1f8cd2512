use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub alignment: AlignmentConfig,
    #[serde(default)]
    pub difference: DifferenceConfig,
    #[serde(default)]
    pub flicker: FlickerConfig,
    #[serde(default)]
    pub segmentation: SegmentationConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureSource {
    Mjpeg,
    V4l2,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_capture_source")]
    pub source: CaptureSource,
    #[serde(default)]
    pub device_index: u32,
    #[serde(default = "default_stream_url")]
    pub url: String,
    #[serde(default = "default_capture_width")]
    pub width: u32,
    #[serde(default = "default_capture_height")]
    pub height: u32,
    /// Back-to-back read failures after which the device is treated as gone.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
}

/// Comparison visualization selected for the output view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    None,
    Overlay,
    Difference,
    Ssim,
    Flicker,
    ExternalSegmentation,
}

impl Mode {
    pub const ALL: [Mode; 6] = [
        Mode::None,
        Mode::Overlay,
        Mode::Difference,
        Mode::Ssim,
        Mode::Flicker,
        Mode::ExternalSegmentation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::None => "none",
            Mode::Overlay => "overlay",
            Mode::Difference => "difference",
            Mode::Ssim => "ssim",
            Mode::Flicker => "flicker",
            Mode::ExternalSegmentation => "external_segmentation",
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        match wanted.as_str() {
            "segmentation" | "segment" => Ok(Mode::ExternalSegmentation),
            other => Self::ALL
                .into_iter()
                .find(|m| m.as_str() == other)
                .ok_or_else(|| ConfigError::Invalid(format!("unknown mode {s:?}"))),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProcessingConfig {
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub color_normalization: bool,
    #[serde(default)]
    pub alignment: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlignmentConfig {
    #[serde(default = "default_max_features")]
    pub max_features: usize,
    #[serde(default = "default_pyramid_levels")]
    pub pyramid_levels: u32,
    #[serde(default = "default_scale_factor")]
    pub scale_factor: f32,
    #[serde(default = "default_fast_threshold")]
    pub fast_threshold: u8,
    /// Cap on the number of best matches handed to the estimator.
    /// `None` feeds every cross-checked match.
    #[serde(default)]
    pub match_limit: Option<usize>,
    #[serde(default = "default_reproj_threshold")]
    pub ransac_reproj_threshold: f64,
    #[serde(default = "default_ransac_max_iters")]
    pub ransac_max_iters: usize,
    #[serde(default = "default_ransac_confidence")]
    pub ransac_confidence: f64,
    #[serde(default = "default_min_inliers")]
    pub min_inliers: usize,
    #[serde(default)]
    pub seed: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DifferenceConfig {
    #[serde(default = "default_diff_threshold")]
    pub threshold: u8,
    #[serde(default = "default_min_area")]
    pub min_area: f64,
    #[serde(default = "default_highlight")]
    pub highlight: [u8; 3],
    /// Side in pixels of the square open/close kernel applied to the mask.
    /// Must be odd; 0 disables it.
    #[serde(default)]
    pub morph_kernel: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlickerConfig {
    #[serde(default = "default_flicker_delay_ms")]
    pub delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SegmentationConfig {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default = "default_segmentation_args")]
    pub args: Vec<String>,
    #[serde(default = "default_resize_factor")]
    pub resize_factor: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisplayConfig {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_view_width")]
    pub width: u32,
    #[serde(default = "default_view_height")]
    pub height: u32,
    #[serde(default = "default_rotate_180")]
    pub rotate_180: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: default_capture_source(),
            device_index: 0,
            url: default_stream_url(),
            width: default_capture_width(),
            height: default_capture_height(),
            max_consecutive_failures: default_max_consecutive_failures(),
        }
    }
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            max_features: default_max_features(),
            pyramid_levels: default_pyramid_levels(),
            scale_factor: default_scale_factor(),
            fast_threshold: default_fast_threshold(),
            match_limit: None,
            ransac_reproj_threshold: default_reproj_threshold(),
            ransac_max_iters: default_ransac_max_iters(),
            ransac_confidence: default_ransac_confidence(),
            min_inliers: default_min_inliers(),
            seed: 0,
        }
    }
}

impl Default for DifferenceConfig {
    fn default() -> Self {
        Self {
            threshold: default_diff_threshold(),
            min_area: default_min_area(),
            highlight: default_highlight(),
            morph_kernel: 0,
        }
    }
}

impl Default for FlickerConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_flicker_delay_ms(),
        }
    }
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: default_segmentation_args(),
            resize_factor: default_resize_factor(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            width: default_view_width(),
            height: default_view_height(),
            rotate_180: default_rotate_180(),
        }
    }
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
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(ConfigError::Invalid(
                "capture width and height must be non-zero".into(),
            ));
        }
        if self.display.width == 0 || self.display.height == 0 {
            return Err(ConfigError::Invalid(
                "display width and height must be non-zero".into(),
            ));
        }
        if self.alignment.pyramid_levels == 0 {
            return Err(ConfigError::Invalid("pyramid_levels must be at least 1".into()));
        }
        if self.alignment.scale_factor <= 1.0 {
            return Err(ConfigError::Invalid(format!(
                "scale_factor must be > 1.0, got {}",
                self.alignment.scale_factor
            )));
        }
        if self.difference.morph_kernel % 2 == 0 && self.difference.morph_kernel != 0 {
            return Err(ConfigError::Invalid(format!(
                "morph_kernel must be 0 or an odd side length, got {}",
                self.difference.morph_kernel
            )));
        }
        if !(self.segmentation.resize_factor > 0.0) {
            return Err(ConfigError::Invalid("resize_factor must be positive".into()));
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
fn default_capture_source() -> CaptureSource {
    CaptureSource::Mjpeg
}
fn default_stream_url() -> String {
    "http://127.0.0.1:8080/stream".into()
}
fn default_capture_width() -> u32 {
    2560
}
fn default_capture_height() -> u32 {
    1440
}
fn default_max_consecutive_failures() -> u32 {
    500
}
fn default_max_features() -> usize {
    500
}
fn default_pyramid_levels() -> u32 {
    8
}
fn default_scale_factor() -> f32 {
    1.2
}
fn default_fast_threshold() -> u8 {
    20
}
fn default_reproj_threshold() -> f64 {
    3.0
}
fn default_ransac_max_iters() -> usize {
    2000
}
fn default_ransac_confidence() -> f64 {
    0.995
}
fn default_min_inliers() -> usize {
    8
}
fn default_diff_threshold() -> u8 {
    50
}
fn default_min_area() -> f64 {
    400.0
}
fn default_highlight() -> [u8; 3] {
    [255, 0, 0]
}
fn default_flicker_delay_ms() -> u64 {
    200
}
fn default_segmentation_args() -> Vec<String> {
    ["{frame}", "{reference}", "{output}", "{scale}"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_resize_factor() -> f32 {
    0.5
}
fn default_tick_ms() -> u64 {
    10
}
fn default_view_width() -> u32 {
    1280
}
fn default_view_height() -> u32 {
    720
}
fn default_rotate_180() -> bool {
    true
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.capture.source, CaptureSource::Mjpeg);
        assert_eq!(config.capture.width, 2560);
        assert_eq!(config.processing.mode, Mode::None);
        assert!(!config.processing.alignment);
        assert_eq!(config.alignment.match_limit, None);
        assert_eq!(config.difference.threshold, 50);
        assert_eq!(config.flicker.delay_ms, 200);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn sections_override_defaults() {
        let config = Config::parse(
            r#"
            [capture]
            source = "v4l2"
            device_index = 1

            [processing]
            mode = "external_segmentation"
            alignment = true

            [alignment]
            match_limit = 50
            "#,
        )
        .unwrap();
        assert_eq!(config.capture.source, CaptureSource::V4l2);
        assert_eq!(config.capture.device_index, 1);
        assert_eq!(config.processing.mode, Mode::ExternalSegmentation);
        assert!(config.processing.alignment);
        assert_eq!(config.alignment.match_limit, Some(50));
    }

    #[test]
    fn rejects_even_morph_kernel() {
        let err = Config::parse("[difference]\nmorph_kernel = 4\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        let config = Config::parse("[difference]\nmorph_kernel = 5\n").unwrap();
        assert_eq!(config.difference.morph_kernel, 5);
    }

    #[test]
    fn rejects_unknown_mode() {
        assert!(Config::parse("[processing]\nmode = \"sparkle\"\n").is_err());
    }

    #[test]
    fn mode_parses_from_text() {
        assert_eq!("SSIM".parse::<Mode>().unwrap(), Mode::Ssim);
        assert_eq!("segmentation".parse::<Mode>().unwrap(), Mode::ExternalSegmentation);
        assert_eq!("external-segmentation".parse::<Mode>().unwrap(), Mode::ExternalSegmentation);
        assert!("blend".parse::<Mode>().is_err());
    }

    #[test]
    fn mode_u8_roundtrip_covers_all() {
        for mode in Mode::ALL {
            assert_eq!(Mode::from_u8(mode.to_u8()), Some(mode));
        }
        assert_eq!(Mode::from_u8(42), None);
    }

    #[test]
    fn example_config_parses() {
        let config = Config::parse(include_str!("../../config.example.toml")).unwrap();
        assert_eq!(config.difference.morph_kernel, 0);
        assert!(config.segmentation.command.is_none());
        assert!(config.display.rotate_180);
    }
}
