use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::timeline::AspectRatio;

/// Encoder settings handed to the compositing engine.
///
/// `preset` is the x264 speed/quality label ("ultrafast" … "veryslow") and
/// `crf` the constant rate factor (0 = lossless, 51 = worst).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    pub preset: String,
    pub crf: u8,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            preset: "medium".into(),
            crf: 23,
        }
    }
}

const PRESETS: &[&str] = &[
    "ultrafast",
    "superfast",
    "veryfast",
    "faster",
    "fast",
    "medium",
    "slow",
    "slower",
    "veryslow",
    "placebo",
];

/// Rendering options: overlay styling defaults, encoder settings and the
/// retry budget.
///
/// All values default to what the pipeline ships with. Range-checked setters
/// return `Result` so bad values are caught before any process is spawned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Overlay size as a fraction of the canvas dimensions, in (0, 1].
    pub default_scale: f64,
    /// Alpha multiplier applied to every overlay, in [0, 1].
    pub default_opacity: f64,
    /// Fade-in length in seconds.
    pub fade_in: f64,
    /// Fade-out length in seconds.
    pub fade_out: f64,
    #[serde(flatten)]
    pub encoding: EncodingConfig,
    /// Number of degraded re-renders after the first failure.
    pub max_retries: u32,
    /// Compositing engine binary.
    pub ffmpeg: PathBuf,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            default_scale: 0.4,
            default_opacity: 0.85,
            fade_in: 0.3,
            fade_out: 0.3,
            encoding: EncodingConfig::default(),
            max_retries: 2,
            ffmpeg: PathBuf::from("ffmpeg"),
        }
    }
}

impl RenderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON config file. Missing keys keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: RenderConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_scale(mut self, scale: f64) -> Result<Self> {
        check_scale(scale)?;
        self.default_scale = scale;
        Ok(self)
    }

    pub fn default_opacity(mut self, opacity: f64) -> Result<Self> {
        check_opacity(opacity)?;
        self.default_opacity = opacity;
        Ok(self)
    }

    pub fn fades(mut self, fade_in: f64, fade_out: f64) -> Result<Self> {
        check_fade(fade_in)?;
        check_fade(fade_out)?;
        self.fade_in = fade_in;
        self.fade_out = fade_out;
        Ok(self)
    }

    pub fn preset(mut self, preset: &str) -> Result<Self> {
        check_preset(preset)?;
        self.encoding.preset = preset.to_string();
        Ok(self)
    }

    pub fn crf(mut self, crf: u8) -> Result<Self> {
        check_crf(crf)?;
        self.encoding.crf = crf;
        Ok(self)
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn ffmpeg(mut self, program: impl Into<PathBuf>) -> Self {
        self.ffmpeg = program.into();
        self
    }

    /// Check every field, e.g. after deserializing.
    pub fn validate(&self) -> Result<()> {
        check_scale(self.default_scale)?;
        check_opacity(self.default_opacity)?;
        check_fade(self.fade_in)?;
        check_fade(self.fade_out)?;
        check_preset(&self.encoding.preset)?;
        check_crf(self.encoding.crf)
    }
}

fn check_scale(scale: f64) -> Result<()> {
    if scale > 0.0 && scale <= 1.0 {
        Ok(())
    } else {
        Err(Error::InvalidOption(format!(
            "default_scale must be in (0, 1], got {scale}"
        )))
    }
}

fn check_opacity(opacity: f64) -> Result<()> {
    if (0.0..=1.0).contains(&opacity) {
        Ok(())
    } else {
        Err(Error::InvalidOption(format!(
            "default_opacity must be in [0, 1], got {opacity}"
        )))
    }
}

fn check_fade(seconds: f64) -> Result<()> {
    if seconds.is_finite() && seconds >= 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidOption(format!(
            "fade length must be a non-negative number of seconds, got {seconds}"
        )))
    }
}

fn check_preset(preset: &str) -> Result<()> {
    if PRESETS.contains(&preset) {
        Ok(())
    } else {
        Err(Error::InvalidOption(format!(
            "unknown encoding preset \"{preset}\", expected one of {}",
            PRESETS.join(", ")
        )))
    }
}

fn check_crf(crf: u8) -> Result<()> {
    if crf <= 51 {
        Ok(())
    } else {
        Err(Error::InvalidOption(format!("crf must be 0..=51, got {crf}")))
    }
}

/// Anti-spam spacing: at most `max_per_interval` insertions every
/// `min_interval` seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpacingRule {
    pub min_interval: f64,
    pub max_per_interval: u32,
}

impl Default for SpacingRule {
    fn default() -> Self {
        Self {
            min_interval: 10.0,
            max_per_interval: 1,
        }
    }
}

impl SpacingRule {
    pub fn new(min_interval: f64, max_per_interval: u32) -> Result<Self> {
        if !(min_interval.is_finite() && min_interval >= 0.0) {
            return Err(Error::InvalidOption(format!(
                "min_interval must be a non-negative number of seconds, got {min_interval}"
            )));
        }
        if max_per_interval == 0 {
            return Err(Error::InvalidOption(
                "max_per_interval must be at least 1".into(),
            ));
        }
        Ok(Self {
            min_interval,
            max_per_interval,
        })
    }

    /// Minimum gap in seconds between two kept insertions.
    pub fn min_gap(&self) -> f64 {
        self.min_interval / self.max_per_interval.max(1) as f64
    }
}

/// Constraints an input video must satisfy before processing.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoLimits {
    pub max_file_size_mb: f64,
    pub max_duration_secs: f64,
    pub supported_aspect_ratios: Vec<AspectRatio>,
}

impl Default for VideoLimits {
    fn default() -> Self {
        Self {
            max_file_size_mb: 500.0,
            max_duration_secs: 300.0,
            supported_aspect_ratios: vec![AspectRatio::Portrait, AspectRatio::Landscape],
        }
    }
}

/// Where downloaded stock assets are stored, defaulting to
/// ~/.cache/overlayer/assets.
pub fn resolve_asset_dir(dir: Option<PathBuf>) -> PathBuf {
    dir.unwrap_or_else(|| {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from(".cache"))
            .join("overlayer")
            .join("assets")
    })
}
