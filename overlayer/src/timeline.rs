//! The render plan: validated decisions bound to concrete assets, positioned
//! and styled, in timestamp order.
//!
//! A [`Timeline`] is built fresh for every render attempt and never mutated
//! afterwards.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RenderConfig;
use crate::decision::{AssetKind, InsertionDecision, InsertionKind, Position};
use crate::error::Error;

/// Distance in pixels between a corner overlay and the canvas edges.
pub const EDGE_MARGIN: u32 = 20;

/// Supported output canvas shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "16:9")]
    Landscape,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Portrait => "9:16",
            AspectRatio::Landscape => "16:9",
        }
    }

    /// Stock-media orientation filter matching this canvas.
    pub fn orientation(&self) -> &'static str {
        match self {
            AspectRatio::Portrait => "portrait",
            AspectRatio::Landscape => "landscape",
        }
    }

    /// Classify pixel dimensions. Tall phone formats (ratio ≤ 0.6) are
    /// portrait, square-ish video (ratio 0.9–1.1) is unsupported, everything
    /// else is treated as landscape.
    pub fn detect(width: u32, height: u32) -> Option<Self> {
        let ratio = if height > 0 {
            width as f64 / height as f64
        } else {
            1.0
        };

        if (0.5..=0.6).contains(&ratio) {
            Some(AspectRatio::Portrait)
        } else if (1.7..=1.8).contains(&ratio) {
            Some(AspectRatio::Landscape)
        } else if (0.9..=1.1).contains(&ratio) {
            None
        } else if ratio < 0.5 {
            Some(AspectRatio::Portrait)
        } else {
            Some(AspectRatio::Landscape)
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "9:16" => Ok(AspectRatio::Portrait),
            "16:9" => Ok(AspectRatio::Landscape),
            other => Err(Error::InvalidOption(format!(
                "unsupported aspect ratio \"{other}\", use 9:16 or 16:9"
            ))),
        }
    }
}

/// Pixel size of the base video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Full-HD canvas for an aspect ratio, for when the source cannot be
    /// probed.
    pub fn for_aspect(aspect: AspectRatio) -> Self {
        match aspect {
            AspectRatio::Portrait => Self::new(1080, 1920),
            AspectRatio::Landscape => Self::new(1920, 1080),
        }
    }
}

/// Overlay position as compositing-engine expressions (`W`/`H` are the
/// canvas size, `w`/`h` the overlay size).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionCoordinates {
    pub x: String,
    pub y: String,
}

impl PositionCoordinates {
    pub fn resolve(position: Position) -> Self {
        let near = EDGE_MARGIN.to_string();
        let far_x = format!("W-w-{EDGE_MARGIN}");
        let far_y = format!("H-h-{EDGE_MARGIN}");
        let (x, y) = match position {
            Position::TopLeft => (near.clone(), near),
            Position::TopRight => (far_x, near),
            Position::BottomLeft => (near, far_y),
            Position::BottomRight => (far_x, far_y),
            Position::Center => ("(W-w)/2".to_string(), "(H-h)/2".to_string()),
        };
        Self { x, y }
    }
}

/// Alpha fade lengths in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub fade_in: f64,
    pub fade_out: f64,
}

impl Default for Transition {
    fn default() -> Self {
        Self {
            fade_in: 0.3,
            fade_out: 0.3,
        }
    }
}

impl Transition {
    /// Shrink both fades proportionally so they never overlap inside a
    /// `duration`-long overlay.
    pub fn fitted(self, duration: f64) -> Self {
        let total = self.fade_in + self.fade_out;
        if total <= duration || total <= 0.0 {
            return self;
        }
        let factor = duration.max(0.0) / total;
        Self {
            fade_in: self.fade_in * factor,
            fade_out: self.fade_out * factor,
        }
    }
}

/// One row of the render plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineInsertion {
    /// `ins_000`, `ins_001`, … in timeline order.
    pub id: String,
    pub timestamp: f64,
    pub duration: f64,
    pub asset_path: PathBuf,
    pub asset_kind: AssetKind,
    pub kind: InsertionKind,
    pub position: PositionCoordinates,
    /// Fraction of the canvas dimensions.
    pub scale: f64,
    pub opacity: f64,
    pub transition: Transition,
    /// Confidence of the originating decision.
    pub confidence: f64,
}

impl TimelineInsertion {
    pub fn end(&self) -> f64 {
        self.timestamp + self.duration
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl Complexity {
    /// Low up to 5 insertions, medium up to 10, high beyond.
    pub fn from_count(count: usize) -> Self {
        match count {
            0..=5 => Complexity::Low,
            6..=10 => Complexity::Medium,
            _ => Complexity::High,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineMetadata {
    pub total_insertions: usize,
    /// Latest end time over all insertions, 0 when empty.
    pub total_duration_covered: f64,
    pub complexity: Complexity,
}

/// The complete render plan for one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    pub base_video: PathBuf,
    pub aspect_ratio: AspectRatio,
    pub insertions: Vec<TimelineInsertion>,
    pub metadata: TimelineMetadata,
}

impl Timeline {
    /// Build the plan from decisions. Pure; no I/O.
    ///
    /// Decisions without a resolved asset are skipped. Styling comes from
    /// `config`, not from the decision. Insertions are ordered by timestamp
    /// (ties keep input order) and numbered in that order.
    pub fn build(
        base_video: &Path,
        aspect_ratio: AspectRatio,
        decisions: &[InsertionDecision],
        config: &RenderConfig,
    ) -> Self {
        let mut bound: Vec<(&InsertionDecision, &Path)> = decisions
            .iter()
            .filter_map(|d| match d.asset_path.as_deref() {
                Some(path) => Some((d, path)),
                None => {
                    debug!(word = %d.word, timestamp = d.timestamp, "skipping decision without asset");
                    None
                }
            })
            .collect();
        bound.sort_by(|(a, _), (b, _)| a.timestamp.total_cmp(&b.timestamp));

        let transition = Transition {
            fade_in: config.fade_in,
            fade_out: config.fade_out,
        };

        let insertions: Vec<TimelineInsertion> = bound
            .into_iter()
            .enumerate()
            .map(|(idx, (decision, path))| TimelineInsertion {
                id: format!("ins_{idx:03}"),
                timestamp: decision.timestamp,
                duration: decision.duration,
                asset_path: path.to_path_buf(),
                asset_kind: decision.asset_kind.unwrap_or(AssetKind::Image),
                kind: decision.kind,
                position: PositionCoordinates::resolve(decision.position),
                scale: config.default_scale,
                opacity: config.default_opacity,
                transition: transition.fitted(decision.duration),
                confidence: decision.confidence,
            })
            .collect();

        let total_duration_covered = insertions
            .iter()
            .map(TimelineInsertion::end)
            .fold(0.0, f64::max);

        let metadata = TimelineMetadata {
            total_insertions: insertions.len(),
            total_duration_covered,
            complexity: Complexity::from_count(insertions.len()),
        };

        Timeline {
            base_video: base_video.to_path_buf(),
            aspect_ratio,
            insertions,
            metadata,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.insertions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.insertions.len()
    }

    /// Format as pretty-printed JSON.
    pub fn to_json_pretty(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
