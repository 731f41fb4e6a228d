//! Compiles a [`Timeline`] into an ffmpeg `-filter_complex` graph.
//!
//! Every insertion becomes its own processing chain ending in a named layer
//! `overlay_<i>`, which is then composited onto the running base with a
//! time-gated `overlay`. Layer `i` reads engine input `i + 1`; input 0 is
//! the source video. The final base is labelled [`OUTPUT_LABEL`].

use std::fmt;
use std::path::PathBuf;

use tracing::debug;

use crate::decision::AssetKind;
use crate::error::{Error, Result};
use crate::timeline::{Canvas, Timeline, TimelineInsertion};

/// Stream label of the source video's frames.
pub const BASE_LABEL: &str = "0:v";

/// Label of the finished video stream.
pub const OUTPUT_LABEL: &str = "outv";

/// A secondary engine input. `FilterGraph::inputs[i]` feeds layer `i`.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerInput {
    pub path: PathBuf,
    pub kind: AssetKind,
}

/// A compiled graph together with the inputs it expects, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterGraph {
    pub description: String,
    pub inputs: Vec<LayerInput>,
}

impl FilterGraph {
    pub fn output_label(&self) -> &'static str {
        OUTPUT_LABEL
    }

    pub fn layer_count(&self) -> usize {
        self.inputs.len()
    }
}

impl fmt::Display for FilterGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

/// Compile `timeline` for a `canvas`-sized source.
///
/// An empty timeline is rejected: callers copy the source instead of
/// rendering.
pub fn compile(timeline: &Timeline, canvas: Canvas) -> Result<FilterGraph> {
    if timeline.is_empty() {
        return Err(Error::InvalidTimeline(
            "cannot compile a timeline without insertions".into(),
        ));
    }
    if canvas.width == 0 || canvas.height == 0 {
        return Err(Error::InvalidTimeline(format!(
            "canvas must be non-empty, got {}x{}",
            canvas.width, canvas.height
        )));
    }

    let last = timeline.insertions.len() - 1;
    let mut filters = Vec::with_capacity(timeline.insertions.len() * 2);
    let mut inputs = Vec::with_capacity(timeline.insertions.len());
    let mut base = BASE_LABEL.to_string();

    for (idx, insertion) in timeline.insertions.iter().enumerate() {
        let layer = format!("overlay_{idx}");
        filters.push(layer_chain(idx + 1, insertion, canvas, &layer)?);

        let next = if idx == last {
            OUTPUT_LABEL.to_string()
        } else {
            format!("tmp_{idx}")
        };
        filters.push(format!(
            "[{base}][{layer}]overlay=x={x}:y={y}:enable='between(t,{start},{end})'[{next}]",
            x = insertion.position.x,
            y = insertion.position.y,
            start = fmt_num(insertion.timestamp),
            end = fmt_num(insertion.end()),
        ));

        inputs.push(LayerInput {
            path: insertion.asset_path.clone(),
            kind: insertion.asset_kind,
        });
        base = next;
    }

    let description = filters.join(";");
    debug!(
        layers = inputs.len(),
        len = description.len(),
        "compiled filter graph"
    );

    Ok(FilterGraph {
        description,
        inputs,
    })
}

/// Per-asset chain: scale, fades, zero-based timestamps, exact length,
/// alpha format, opacity, then a shift so the layer's first frame lands on
/// the insertion timestamp.
fn layer_chain(
    input_index: usize,
    insertion: &TimelineInsertion,
    canvas: Canvas,
    label: &str,
) -> Result<String> {
    let width = (insertion.scale * canvas.width as f64).floor() as u32;
    let height = (insertion.scale * canvas.height as f64).floor() as u32;
    if width == 0 || height == 0 {
        return Err(Error::InvalidTimeline(format!(
            "{} scales to an empty {width}x{height} overlay",
            insertion.id
        )));
    }

    let duration = insertion.duration;
    let fade = insertion.transition;
    let mut steps = vec![format!("scale={width}:{height}")];

    // A still image is a single frame; repeat it so fades and trim have a
    // stream to work on.
    if insertion.asset_kind == AssetKind::Image {
        steps.push("loop=loop=-1:size=1:start=0".to_string());
    }
    if fade.fade_in > 0.0 {
        steps.push(format!("fade=t=in:st=0:d={}:alpha=1", fmt_num(fade.fade_in)));
    }
    if fade.fade_out > 0.0 {
        steps.push(format!(
            "fade=t=out:st={}:d={}:alpha=1",
            fmt_num(duration - fade.fade_out),
            fmt_num(fade.fade_out)
        ));
    }
    steps.push("setpts=PTS-STARTPTS".to_string());
    steps.push(format!("trim=duration={}", fmt_num(duration)));
    steps.push("format=rgba".to_string());
    steps.push(format!("colorchannelmixer=aa={}", fmt_num(insertion.opacity)));
    steps.push(format!("setpts=PTS+{}/TB", fmt_num(insertion.timestamp)));

    Ok(format!("[{input_index}:v]{}[{label}]", steps.join(",")))
}

/// Shortest decimal form with at most millisecond precision.
pub(crate) fn fmt_num(value: f64) -> String {
    let fixed = format!("{value:.3}");
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    if trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}
