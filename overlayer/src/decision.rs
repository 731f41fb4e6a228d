use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Shortest and longest overlay a decision may ask for, in seconds.
pub const MIN_DURATION: f64 = 0.5;
pub const MAX_DURATION: f64 = 5.0;

fn default_duration() -> f64 {
    1.5
}

/// Semantic category of the spoken entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    SupernaturalBeing,
    Location,
    Person,
    Object,
    Concept,
    Event,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::SupernaturalBeing => "supernatural_being",
            EntityType::Location => "location",
            EntityType::Person => "person",
            EntityType::Object => "object",
            EntityType::Concept => "concept",
            EntityType::Event => "event",
        }
    }

    /// Plain-words search query used when the decision's own query finds
    /// nothing.
    pub fn fallback_query(&self) -> &'static str {
        match self {
            EntityType::SupernaturalBeing => "supernatural being",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stylistic category of the wanted visual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualStyle {
    HorrorAtmospheric,
    NeutralCultural,
    Educational,
    Cinematic,
    Documentary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsertionKind {
    #[default]
    Overlay,
    Cutaway,
}

/// Symbolic placement of an overlay on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Position {
    TopLeft,
    #[default]
    TopRight,
    BottomLeft,
    BottomRight,
    Center,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Image,
    Video,
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetKind::Image => write!(f, "image"),
            AssetKind::Video => write!(f, "video"),
        }
    }
}

/// One timed instruction to overlay a visual asset on the source video.
///
/// Produced by a decision provider; `asset_path` and `asset_kind` are filled
/// in once the asset has been downloaded. Decisions without an asset never
/// reach the timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertionDecision {
    pub word: String,
    /// Seconds into the source video.
    pub timestamp: f64,
    pub confidence: f64,
    pub entity_type: EntityType,
    pub visual_style: VisualStyle,
    #[serde(default)]
    pub search_query: String,
    /// Overlay length in seconds, within [`MIN_DURATION`, `MAX_DURATION`].
    #[serde(default = "default_duration")]
    pub duration: f64,
    #[serde(rename = "insertion_type", default)]
    pub kind: InsertionKind,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_path: Option<PathBuf>,
    #[serde(
        rename = "asset_type",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub asset_kind: Option<AssetKind>,
}

impl InsertionDecision {
    /// Verify the value ranges a provider must respect.
    pub fn check(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(Error::InvalidDecision(format!(
                "confidence {} for \"{}\" is outside [0, 1]",
                self.confidence, self.word
            )));
        }
        if !(MIN_DURATION..=MAX_DURATION).contains(&self.duration) {
            return Err(Error::InvalidDecision(format!(
                "duration {}s for \"{}\" is outside [{MIN_DURATION}, {MAX_DURATION}]",
                self.duration, self.word
            )));
        }
        if !self.timestamp.is_finite() {
            return Err(Error::InvalidDecision(format!(
                "timestamp for \"{}\" is not a number",
                self.word
            )));
        }
        Ok(())
    }

    /// Attach a downloaded asset.
    pub fn with_asset(mut self, path: impl Into<PathBuf>, kind: AssetKind) -> Self {
        self.asset_path = Some(path.into());
        self.asset_kind = Some(kind);
        self
    }

    pub fn end(&self) -> f64 {
        self.timestamp + self.duration
    }
}

/// A candidate the provider considered and turned down. Informational only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedInsertion {
    pub word: String,
    pub timestamp: f64,
    pub confidence: f64,
    pub reasoning: String,
}

/// Complete provider output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Decisions {
    pub insertions: Vec<InsertionDecision>,
    #[serde(default)]
    pub rejected: Vec<RejectedInsertion>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Decisions {
    /// Load a decisions document (`{"insertions": [...], ...}`) from disk.
    ///
    /// Every insertion is range-checked; the first bad one fails the load.
    pub fn from_json_file(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let decisions: Decisions = serde_json::from_str(&raw)?;
        for insertion in &decisions.insertions {
            insertion.check()?;
        }
        Ok(decisions)
    }

    pub fn filter_by_confidence(&self, threshold: f64) -> Vec<InsertionDecision> {
        self.insertions
            .iter()
            .filter(|i| i.confidence >= threshold)
            .cloned()
            .collect()
    }

    pub fn summary(&self) -> DecisionSummary {
        let mut entity_types = BTreeMap::new();
        let mut visual_styles = BTreeMap::new();
        for ins in &self.insertions {
            *entity_types.entry(ins.entity_type).or_insert(0) += 1;
            *visual_styles.entry(ins.visual_style).or_insert(0) += 1;
        }

        let confidences = self.insertions.iter().map(|i| i.confidence);
        let (avg, min, max) = if self.insertions.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            let n = self.insertions.len() as f64;
            (
                confidences.clone().sum::<f64>() / n,
                confidences.clone().fold(f64::INFINITY, f64::min),
                confidences.fold(f64::NEG_INFINITY, f64::max),
            )
        };

        DecisionSummary {
            total_insertions: self.insertions.len(),
            total_rejected: self.rejected.len(),
            avg_confidence: avg,
            min_confidence: min,
            max_confidence: max,
            entity_types,
            visual_styles,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionSummary {
    pub total_insertions: usize,
    pub total_rejected: usize,
    pub avg_confidence: f64,
    pub min_confidence: f64,
    pub max_confidence: f64,
    pub entity_types: BTreeMap<EntityType, usize>,
    pub visual_styles: BTreeMap<VisualStyle, usize>,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn decision(word: &str, timestamp: f64, confidence: f64) -> InsertionDecision {
        InsertionDecision {
            word: word.into(),
            timestamp,
            confidence,
            entity_type: EntityType::Object,
            visual_style: VisualStyle::Documentary,
            search_query: format!("{word} stock footage"),
            duration: 1.5,
            kind: InsertionKind::Overlay,
            position: Position::TopRight,
            reasoning: String::new(),
            asset_path: None,
            asset_kind: None,
        }
    }

    #[test]
    fn test_deserialize_provider_shape() {
        let json = r#"{
            "word": "kuntilanak",
            "timestamp": 12.4,
            "confidence": 0.92,
            "entity_type": "supernatural_being",
            "visual_style": "horror_atmospheric",
            "search_query": "dark forest ghost",
            "duration": 2.0,
            "insertion_type": "cutaway",
            "position": "bottom-left",
            "reasoning": "culturally specific reference"
        }"#;
        let d: InsertionDecision = serde_json::from_str(json).unwrap();
        assert_eq!(d.entity_type, EntityType::SupernaturalBeing);
        assert_eq!(d.visual_style, VisualStyle::HorrorAtmospheric);
        assert_eq!(d.kind, InsertionKind::Cutaway);
        assert_eq!(d.position, Position::BottomLeft);
        assert!(d.asset_path.is_none());
        assert!(d.check().is_ok());
    }

    #[test]
    fn test_deserialize_defaults() {
        let json = r#"{
            "word": "temple",
            "timestamp": 3.0,
            "confidence": 0.8,
            "entity_type": "location",
            "visual_style": "documentary"
        }"#;
        let d: InsertionDecision = serde_json::from_str(json).unwrap();
        assert_eq!(d.duration, 1.5);
        assert_eq!(d.kind, InsertionKind::Overlay);
        assert_eq!(d.position, Position::TopRight);
        assert_eq!(d.asset_kind, None);
    }

    #[test]
    fn test_check_rejects_out_of_range() {
        let mut d = decision("a", 1.0, 1.2);
        assert!(matches!(d.check(), Err(Error::InvalidDecision(_))));
        d.confidence = 0.9;
        d.duration = 0.2;
        assert!(d.check().is_err());
        d.duration = 5.5;
        assert!(d.check().is_err());
        d.duration = 5.0;
        assert!(d.check().is_ok());
    }

    #[test]
    fn test_with_asset() {
        let d = decision("a", 1.0, 0.9).with_asset("/tmp/a.mp4", AssetKind::Video);
        assert_eq!(d.asset_path, Some(PathBuf::from("/tmp/a.mp4")));
        assert_eq!(d.asset_kind, Some(AssetKind::Video));
        let json = serde_json::to_string(&d).unwrap();
        assert!(json.contains(r#""asset_type":"video""#));
    }

    #[test]
    fn test_filter_by_confidence() {
        let decisions = Decisions {
            insertions: vec![
                decision("a", 1.0, 0.6),
                decision("b", 12.0, 0.75),
                decision("c", 24.0, 0.9),
            ],
            ..Default::default()
        };
        let kept = decisions.filter_by_confidence(0.75);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].word, "b");
        assert_eq!(kept[1].word, "c");
    }

    #[test]
    fn test_summary() {
        let mut b = decision("b", 12.0, 0.7);
        b.entity_type = EntityType::Location;
        let decisions = Decisions {
            insertions: vec![decision("a", 1.0, 0.9), b, decision("c", 24.0, 0.8)],
            rejected: vec![RejectedInsertion {
                word: "um".into(),
                timestamp: 4.0,
                confidence: 0.1,
                reasoning: "filler".into(),
            }],
            metadata: serde_json::Value::Null,
        };
        let s = decisions.summary();
        assert_eq!(s.total_insertions, 3);
        assert_eq!(s.total_rejected, 1);
        assert!((s.avg_confidence - 0.8).abs() < 1e-9);
        assert_eq!(s.min_confidence, 0.7);
        assert_eq!(s.max_confidence, 0.9);
        assert_eq!(s.entity_types[&EntityType::Object], 2);
        assert_eq!(s.entity_types[&EntityType::Location], 1);
    }

    #[test]
    fn test_summary_empty() {
        let s = Decisions::default().summary();
        assert_eq!(s.total_insertions, 0);
        assert_eq!(s.avg_confidence, 0.0);
        assert!(s.entity_types.is_empty());
    }

    #[test]
    fn test_from_json_file() {
        let tmp = std::env::temp_dir().join("overlayer_test_decisions.json");
        std::fs::write(
            &tmp,
            r#"{"insertions": [{"word": "moon", "timestamp": 1.0, "confidence": 0.9,
                "entity_type": "object", "visual_style": "cinematic",
                "asset_path": "/tmp/moon.jpg", "asset_type": "image"}]}"#,
        )
        .unwrap();
        let d = Decisions::from_json_file(&tmp).unwrap();
        assert_eq!(d.insertions.len(), 1);
        assert_eq!(d.insertions[0].asset_kind, Some(AssetKind::Image));
        assert!(d.rejected.is_empty());
        std::fs::remove_file(&tmp).ok();
    }
}
