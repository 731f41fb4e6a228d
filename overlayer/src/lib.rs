//! Timed visual overlays for talking-head video: insertion decisions in,
//! composited video out.
//!
//! **overlayer** takes a list of [`InsertionDecision`]s (a word, a timestamp,
//! a downloaded stock asset), filters them for spacing and bounds, lays them
//! out on a [`Timeline`], compiles the timeline into a single ffmpeg
//! filter graph and renders it. A failed render is retried with fewer
//! overlays; if every attempt fails the source is copied unchanged, so a
//! render call always leaves a playable file behind.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use overlayer::{media, AspectRatio, Decisions, RenderConfig, RenderOutcome};
//!
//! # fn main() -> overlayer::Result<()> {
//! let decisions = Decisions::from_json_file("decisions.json".as_ref())?;
//! let video = Path::new("talk.mp4");
//! let canvas = media::source_canvas(Path::new("ffprobe"), video, AspectRatio::Portrait);
//! let outcome = overlayer::render(
//!     video,
//!     AspectRatio::Portrait,
//!     canvas,
//!     &decisions.insertions,
//!     "talk_enhanced.mp4".as_ref(),
//!     &RenderConfig::default(),
//! )?;
//! if let RenderOutcome::Fallback { .. } = outcome {
//!     eprintln!("rendering failed, output is a copy of the source");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! With the `fetch` feature (enabled by default) the crate also ships thin
//! clients for the collaborators that produce decisions: [`llm`] asks a
//! language model which words deserve a visual, [`assets`] finds and
//! downloads stock media for them.

#[cfg(feature = "fetch")]
pub mod assets;
pub mod config;
pub mod decision;
pub mod error;
pub mod filter_graph;
#[cfg(feature = "fetch")]
pub mod llm;
pub mod media;
pub mod progress;
pub mod render;
pub mod retry;
pub mod timeline;
pub mod transcript;
pub mod validate;

pub use config::{EncodingConfig, RenderConfig, SpacingRule, VideoLimits};
pub use decision::{
    AssetKind, Decisions, EntityType, InsertionDecision, InsertionKind, Position,
    RejectedInsertion, VisualStyle,
};
pub use error::{Error, Result};
pub use filter_graph::FilterGraph;
pub use media::VideoInfo;
pub use render::{Compositor, FfmpegCompositor};
pub use retry::{render_with_retry, RenderOutcome};
pub use timeline::{AspectRatio, Canvas, Timeline};
pub use transcript::{Segment, Transcript, Word};

use std::path::{Path, PathBuf};

/// Render with ffmpeg, retrying and falling back as described in [`retry`].
///
/// `canvas` is the frame size of `base_video`; overlay scales are fractions
/// of it. [`media::source_canvas`] probes it.
pub fn render(
    base_video: &Path,
    aspect_ratio: AspectRatio,
    canvas: Canvas,
    decisions: &[InsertionDecision],
    output: &Path,
    config: &RenderConfig,
) -> Result<RenderOutcome> {
    config.validate()?;
    let mut compositor = FfmpegCompositor::new(config.clone(), canvas);
    render_with_retry(
        &mut compositor,
        base_video,
        aspect_ratio,
        decisions,
        output,
        config,
    )
}

/// [`render`] on the blocking thread pool, reporting whole-percent progress
/// of each attempt to `on_progress`.
pub async fn render_async(
    base_video: PathBuf,
    aspect_ratio: AspectRatio,
    canvas: Canvas,
    decisions: Vec<InsertionDecision>,
    output: PathBuf,
    config: RenderConfig,
    on_progress: impl FnMut(u8) + Send + 'static,
) -> Result<RenderOutcome> {
    config.validate()?;
    tokio::task::spawn_blocking(move || {
        let mut compositor =
            FfmpegCompositor::new(config.clone(), canvas).on_progress(on_progress);
        render_with_retry(
            &mut compositor,
            &base_video,
            aspect_ratio,
            &decisions,
            &output,
            &config,
        )
    })
    .await
    .map_err(|e| Error::render(format!("render task failed: {e}"), ""))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_rejects_invalid_config() {
        let config = RenderConfig {
            default_scale: 0.0,
            ..RenderConfig::default()
        };
        let result = render(
            Path::new("/tmp/base.mp4"),
            AspectRatio::Portrait,
            Canvas::new(1080, 1920),
            &[],
            Path::new("/tmp/out.mp4"),
            &config,
        );
        assert!(matches!(result, Err(Error::InvalidOption(_))));
    }

    #[tokio::test]
    async fn test_render_async_passthrough() {
        let dir = std::env::temp_dir().join("overlayer_test_lib_passthrough");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let base = dir.join("base.mp4");
        std::fs::write(&base, b"source").unwrap();

        let outcome = render_async(
            base.clone(),
            AspectRatio::Landscape,
            Canvas::new(1280, 720),
            Vec::new(),
            dir.join("out.mp4"),
            RenderConfig::default(),
            |_| {},
        )
        .await
        .unwrap();

        assert!(matches!(outcome, RenderOutcome::Passthrough { .. }));
        assert_eq!(std::fs::read(outcome.output()).unwrap(), b"source");
        std::fs::remove_dir_all(&dir).ok();
    }
}
