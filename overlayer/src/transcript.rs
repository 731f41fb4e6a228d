use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A single word with timing and optional confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Word {
    #[serde(alias = "word")]
    pub text: String,
    pub start: f64,
    pub end: f64,
    #[serde(default, alias = "confidence", skip_serializing_if = "Option::is_none")]
    pub probability: Option<f32>,
}

/// A transcript segment (sentence/phrase).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(default)]
    pub words: Option<Vec<Word>>,
}

/// Transcription provider output, as consumed by the decision provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub segments: Vec<Segment>,
    pub language: String,
    /// Source duration in seconds.
    pub duration: f64,
}

impl Transcript {
    /// Read a transcript JSON document.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Flat, time-ordered view of every word.
    pub fn words(&self) -> impl Iterator<Item = &Word> {
        self.segments
            .iter()
            .filter_map(|s| s.words.as_deref())
            .flatten()
    }

    /// Words whose start falls inside `[start, end]`.
    pub fn words_in_range(&self, start: f64, end: f64) -> Vec<&Word> {
        self.words()
            .filter(|w| start <= w.start && w.start <= end)
            .collect()
    }

    pub fn summary(&self) -> TranscriptSummary {
        let total_words = self.words().count();
        let words_per_minute = if self.duration > 0.0 {
            ((total_words as f64 / self.duration) * 60.0 * 10.0).round() / 10.0
        } else {
            0.0
        };
        TranscriptSummary {
            total_segments: self.segments.len(),
            total_words,
            duration: self.duration,
            language: self.language.clone(),
            words_per_minute,
        }
    }

    /// Format as JSON.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Format as pretty-printed JSON.
    pub fn to_json_pretty(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptSummary {
    pub total_segments: usize,
    pub total_words: usize,
    pub duration: f64,
    pub language: String,
    pub words_per_minute: f64,
}
