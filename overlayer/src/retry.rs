//! Retry with graduated degradation.
//!
//! A failed render is retried with fewer insertions: first the more confident
//! half, then only the single most confident one. When every attempt fails
//! the untouched source is copied to the output path, so the caller always
//! ends up with a playable file.

use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::config::RenderConfig;
use crate::decision::InsertionDecision;
use crate::error::{Error, Result};
use crate::render::{copy_source, Compositor};
use crate::timeline::{AspectRatio, Timeline};

/// Result of one render attempt, as seen by the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Rendered(PathBuf),
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderState {
    /// `attempt` counts from 0; `decisions` is the set to render this time.
    Attempting {
        attempt: u32,
        decisions: Vec<InsertionDecision>,
    },
    Succeeded(PathBuf),
    /// Retries are exhausted; the source is to be copied to this path.
    Fallback(PathBuf),
}

impl RenderState {
    pub fn start(decisions: Vec<InsertionDecision>) -> Self {
        RenderState::Attempting {
            attempt: 0,
            decisions,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RenderState::Attempting { .. })
    }

    /// Next state after an attempt. Terminal states are returned unchanged.
    pub fn advance(self, outcome: AttemptOutcome, output: &Path, max_retries: u32) -> Self {
        let (attempt, decisions) = match self {
            RenderState::Attempting { attempt, decisions } => (attempt, decisions),
            terminal => return terminal,
        };
        match outcome {
            AttemptOutcome::Rendered(path) => RenderState::Succeeded(path),
            AttemptOutcome::Failed if attempt < max_retries => {
                let next = attempt + 1;
                RenderState::Attempting {
                    attempt: next,
                    decisions: reduce(next, &decisions),
                }
            }
            AttemptOutcome::Failed => RenderState::Fallback(output.to_path_buf()),
        }
    }
}

/// Insertion set for retry number `attempt` (1-based).
///
/// Retry 1 keeps the more confident half (at least one), later retries keep
/// the single most confident decision. Equal confidences keep input order.
pub fn reduce(attempt: u32, current: &[InsertionDecision]) -> Vec<InsertionDecision> {
    let mut ranked: Vec<&InsertionDecision> = current.iter().collect();
    ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let keep = if attempt <= 1 {
        (current.len() / 2).max(1)
    } else {
        1
    };
    ranked.into_iter().take(keep).cloned().collect()
}

/// What [`render_with_retry`] left at the output path.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderOutcome {
    /// Overlays were composited, possibly after degradation.
    Composited {
        output: PathBuf,
        attempts: u32,
        insertions: usize,
    },
    /// Nothing to overlay; the source was copied as is.
    Passthrough { output: PathBuf },
    /// Every attempt failed; the source was copied as is.
    Fallback { output: PathBuf, attempts: u32 },
}

impl RenderOutcome {
    pub fn output(&self) -> &Path {
        match self {
            RenderOutcome::Composited { output, .. }
            | RenderOutcome::Passthrough { output }
            | RenderOutcome::Fallback { output, .. } => output,
        }
    }
}

/// Render `decisions` over `base_video`, degrading on failure.
///
/// Render failures never escape: they end in [`RenderOutcome::Fallback`].
/// An error is returned only when the source itself cannot be copied.
pub fn render_with_retry<C: Compositor + ?Sized>(
    compositor: &mut C,
    base_video: &Path,
    aspect_ratio: AspectRatio,
    decisions: &[InsertionDecision],
    output: &Path,
    config: &RenderConfig,
) -> Result<RenderOutcome> {
    let usable: Vec<InsertionDecision> = decisions
        .iter()
        .filter(|d| d.asset_path.is_some())
        .cloned()
        .collect();

    if usable.is_empty() {
        warn!("no insertions with assets, copying source video");
        let output = copy_source(base_video, output)?;
        return Ok(RenderOutcome::Passthrough { output });
    }

    let mut state = RenderState::start(usable);
    let mut insertions = 0;
    let mut attempts = 0;

    loop {
        state = match state {
            RenderState::Attempting { attempt, decisions } => {
                let timeline = Timeline::build(base_video, aspect_ratio, &decisions, config);
                attempts = attempt + 1;
                insertions = timeline.len();
                if attempt > 0 {
                    warn!(attempt, insertions, "retrying render with fewer insertions");
                }

                let outcome = match compositor.composite(&timeline, output) {
                    Ok(path) => AttemptOutcome::Rendered(path),
                    Err(e) => {
                        warn!(attempt = attempts, error = %e, "render attempt failed");
                        if let Error::Render { stderr, .. } = &e {
                            debug!(stderr = %stderr, "engine diagnostics");
                        }
                        AttemptOutcome::Failed
                    }
                };
                RenderState::Attempting { attempt, decisions }.advance(
                    outcome,
                    output,
                    config.max_retries,
                )
            }
            RenderState::Succeeded(output) => {
                info!(attempts, insertions, path = %output.display(), "render succeeded");
                return Ok(RenderOutcome::Composited {
                    output,
                    attempts,
                    insertions,
                });
            }
            RenderState::Fallback(output) => {
                error!(attempts, "all rendering attempts failed, copying source video");
                let output = copy_source(base_video, &output)?;
                return Ok(RenderOutcome::Fallback { output, attempts });
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::tests::decision;
    use crate::decision::AssetKind;

    /// Fails the first `failures` attempts, then writes the output.
    struct ScriptedCompositor {
        failures: usize,
        seen: Vec<usize>,
    }

    impl ScriptedCompositor {
        fn failing(failures: usize) -> Self {
            Self {
                failures,
                seen: Vec::new(),
            }
        }
    }

    impl Compositor for ScriptedCompositor {
        fn composite(&mut self, timeline: &Timeline, output: &Path) -> Result<PathBuf> {
            self.seen.push(timeline.len());
            if self.seen.len() <= self.failures {
                // Leave a partial file behind like a crashed encoder would.
                std::fs::write(output, b"partial")?;
                return Err(Error::render("ffmpeg exited with code 1", "boom"));
            }
            std::fs::write(output, b"composited")?;
            Ok(output.to_path_buf())
        }
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("overlayer_test_retry_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn source(dir: &Path) -> PathBuf {
        let base = dir.join("base.mp4");
        std::fs::write(&base, b"original source bytes").unwrap();
        base
    }

    fn with_assets(confidences: &[f64]) -> Vec<InsertionDecision> {
        confidences
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                decision(&format!("w{i}"), i as f64 * 10.0, c)
                    .with_asset(format!("/tmp/w{i}.jpg"), AssetKind::Image)
            })
            .collect()
    }

    fn words(decisions: &[InsertionDecision]) -> Vec<&str> {
        decisions.iter().map(|d| d.word.as_str()).collect()
    }

    #[test]
    fn test_reduce_first_retry_keeps_top_half() {
        let set = with_assets(&[0.7, 0.9, 0.8, 0.95]);
        assert_eq!(words(&reduce(1, &set)), ["w3", "w1"]);
    }

    #[test]
    fn test_reduce_ties_keep_input_order() {
        let set = with_assets(&[0.8, 0.8, 0.8, 0.8]);
        assert_eq!(words(&reduce(1, &set)), ["w0", "w1"]);
        assert_eq!(words(&reduce(2, &set)), ["w0"]);
    }

    #[test]
    fn test_reduce_never_empties() {
        let set = with_assets(&[0.8]);
        assert_eq!(reduce(1, &set).len(), 1);
        assert!(reduce(1, &[]).is_empty());
    }

    #[test]
    fn test_advance_transitions() {
        let out = Path::new("/tmp/out.mp4");
        let state = RenderState::start(with_assets(&[0.9, 0.8, 0.7, 0.6]));

        let state = state.advance(AttemptOutcome::Failed, out, 2);
        match &state {
            RenderState::Attempting { attempt, decisions } => {
                assert_eq!(*attempt, 1);
                assert_eq!(decisions.len(), 2);
            }
            other => panic!("unexpected state {other:?}"),
        }

        let state = state.advance(AttemptOutcome::Failed, out, 2);
        match &state {
            RenderState::Attempting { attempt, decisions } => {
                assert_eq!(*attempt, 2);
                assert_eq!(words(decisions), ["w0"]);
            }
            other => panic!("unexpected state {other:?}"),
        }

        let state = state.advance(AttemptOutcome::Failed, out, 2);
        assert_eq!(state, RenderState::Fallback(out.to_path_buf()));
        assert!(state.is_terminal());

        // Terminal states absorb further outcomes.
        let state = state.advance(AttemptOutcome::Rendered(PathBuf::from("/x")), out, 2);
        assert_eq!(state, RenderState::Fallback(out.to_path_buf()));
    }

    #[test]
    fn test_advance_success() {
        let out = Path::new("/tmp/out.mp4");
        let state = RenderState::start(with_assets(&[0.9]))
            .advance(AttemptOutcome::Rendered(out.to_path_buf()), out, 2);
        assert_eq!(state, RenderState::Succeeded(out.to_path_buf()));
    }

    #[test]
    fn test_advance_zero_retries_falls_back_immediately() {
        let out = Path::new("/tmp/out.mp4");
        let state =
            RenderState::start(with_assets(&[0.9, 0.8])).advance(AttemptOutcome::Failed, out, 0);
        assert_eq!(state, RenderState::Fallback(out.to_path_buf()));
    }

    #[test]
    fn test_render_first_attempt_succeeds() {
        let dir = scratch_dir("first");
        let base = source(&dir);
        let output = dir.join("out.mp4");
        let mut compositor = ScriptedCompositor::failing(0);

        let outcome = render_with_retry(
            &mut compositor,
            &base,
            AspectRatio::Portrait,
            &with_assets(&[0.9, 0.8, 0.7]),
            &output,
            &RenderConfig::default(),
        )
        .unwrap();

        assert_eq!(
            outcome,
            RenderOutcome::Composited {
                output: output.clone(),
                attempts: 1,
                insertions: 3,
            }
        );
        assert_eq!(compositor.seen, [3]);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_render_degrades_monotonically() {
        let dir = scratch_dir("degrade");
        let base = source(&dir);
        let output = dir.join("out.mp4");
        let mut compositor = ScriptedCompositor::failing(2);

        let outcome = render_with_retry(
            &mut compositor,
            &base,
            AspectRatio::Landscape,
            &with_assets(&[0.6, 0.9, 0.7, 0.8, 0.75, 0.65]),
            &output,
            &RenderConfig::default(),
        )
        .unwrap();

        assert_eq!(compositor.seen, [6, 3, 1]);
        assert!(matches!(
            outcome,
            RenderOutcome::Composited {
                attempts: 3,
                insertions: 1,
                ..
            }
        ));
        assert_eq!(std::fs::read(&output).unwrap(), b"composited");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_render_exhaustion_copies_source() {
        let dir = scratch_dir("exhausted");
        let base = source(&dir);
        let output = dir.join("out.mp4");
        let mut compositor = ScriptedCompositor::failing(usize::MAX);

        let outcome = render_with_retry(
            &mut compositor,
            &base,
            AspectRatio::Portrait,
            &with_assets(&[0.9, 0.8, 0.7, 0.6]),
            &output,
            &RenderConfig::default(),
        )
        .unwrap();

        assert_eq!(compositor.seen, [4, 2, 1]);
        assert_eq!(
            outcome,
            RenderOutcome::Fallback {
                output: output.clone(),
                attempts: 3,
            }
        );
        assert_eq!(std::fs::read(&output).unwrap(), std::fs::read(&base).unwrap());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_render_respects_max_retries() {
        let dir = scratch_dir("max_retries");
        let base = source(&dir);
        let output = dir.join("out.mp4");
        let mut compositor = ScriptedCompositor::failing(usize::MAX);
        let config = RenderConfig::default().max_retries(0);

        let outcome = render_with_retry(
            &mut compositor,
            &base,
            AspectRatio::Portrait,
            &with_assets(&[0.9, 0.8]),
            &output,
            &config,
        )
        .unwrap();

        assert_eq!(compositor.seen, [2]);
        assert!(matches!(outcome, RenderOutcome::Fallback { attempts: 1, .. }));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_render_empty_is_passthrough() {
        let dir = scratch_dir("empty");
        let base = source(&dir);
        let output = dir.join("out.mp4");
        let mut compositor = ScriptedCompositor::failing(0);

        // Decisions without assets count as empty.
        let outcome = render_with_retry(
            &mut compositor,
            &base,
            AspectRatio::Portrait,
            &[decision("unresolved", 3.0, 0.9)],
            &output,
            &RenderConfig::default(),
        )
        .unwrap();

        assert!(compositor.seen.is_empty());
        assert_eq!(outcome, RenderOutcome::Passthrough { output: output.clone() });
        assert_eq!(outcome.output(), output);
        assert_eq!(std::fs::read(&output).unwrap(), std::fs::read(&base).unwrap());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_render_missing_source_is_error() {
        let dir = scratch_dir("missing");
        let mut compositor = ScriptedCompositor::failing(0);
        let result = render_with_retry(
            &mut compositor,
            &dir.join("absent.mp4"),
            AspectRatio::Portrait,
            &[],
            &dir.join("out.mp4"),
            &RenderConfig::default(),
        );
        assert!(matches!(result, Err(Error::VideoNotFound { .. })));
        std::fs::remove_dir_all(&dir).ok();
    }
}
