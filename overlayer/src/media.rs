//! Media inspection via ffprobe, input limits and thumbnails.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::VideoLimits;
use crate::error::{Error, Result};
use crate::render::ensure_parent_dir;
use crate::timeline::{AspectRatio, Canvas};

/// Frame rate assumed when ffprobe reports none or `0/0`.
const DEFAULT_FRAME_RATE: f64 = 30.0;

/// Width of extracted thumbnails; height follows the source aspect.
const THUMBNAIL_WIDTH: u32 = 480;

/// Properties of the first video stream and its container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    /// `None` for shapes the pipeline does not handle (e.g. square).
    pub aspect_ratio: Option<AspectRatio>,
    /// Seconds.
    pub duration: f64,
    /// Bytes.
    pub file_size: u64,
    pub frame_rate: f64,
    pub codec: String,
    pub bit_rate: u64,
}

impl VideoInfo {
    pub fn file_size_mb(&self) -> f64 {
        self.file_size as f64 / (1024.0 * 1024.0)
    }

    /// The frame as a compositing canvas; `None` when no dimensions were
    /// reported.
    pub fn canvas(&self) -> Option<Canvas> {
        (self.width > 0 && self.height > 0).then(|| Canvas::new(self.width, self.height))
    }
}

#[derive(Debug, Default, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    #[serde(default)]
    format: ProbeFormat,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    codec_name: Option<String>,
}

// ffprobe prints container numbers as strings.
#[derive(Debug, Default, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
}

/// Canvas matching the frame size of `path`, or the Full-HD canvas for
/// `aspect` when the video cannot be probed.
pub fn source_canvas(ffprobe: &Path, path: &Path, aspect: AspectRatio) -> Canvas {
    match probe_with(ffprobe, path) {
        Ok(info) => {
            if let Some(canvas) = info.canvas() {
                return canvas;
            }
            warn!(path = %path.display(), "probe reported no frame size, using default canvas");
        }
        Err(e) => warn!(error = %e, "cannot probe source, using default canvas"),
    }
    Canvas::for_aspect(aspect)
}

/// Inspect `path` with the `ffprobe` on PATH.
pub fn probe(path: &Path) -> Result<VideoInfo> {
    probe_with(Path::new("ffprobe"), path)
}

pub fn probe_with(ffprobe: &Path, path: &Path) -> Result<VideoInfo> {
    if !path.exists() {
        return Err(Error::VideoNotFound {
            path: path.to_path_buf(),
        });
    }
    debug!(path = %path.display(), "probing video");

    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height,r_frame_rate,codec_name",
            "-show_entries",
            "format=duration,size,bit_rate",
            "-of",
            "json",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ToolNotFound(ffprobe.display().to_string())
            } else {
                Error::Probe(format!("failed to run {}: {e}", ffprobe.display()))
            }
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Probe(format!("ffprobe failed: {}", stderr.trim())));
    }

    let mut info = parse_probe_output(&String::from_utf8_lossy(&output.stdout))?;
    if info.file_size == 0 {
        info.file_size = std::fs::metadata(path)?.len();
    }

    info!(
        width = info.width,
        height = info.height,
        duration_secs = format!("{:.1}", info.duration),
        aspect = info.aspect_ratio.map(|a| a.as_str()).unwrap_or("unsupported"),
        "probed video"
    );
    Ok(info)
}

/// Build [`VideoInfo`] from ffprobe's JSON output.
pub fn parse_probe_output(json: &str) -> Result<VideoInfo> {
    let probe: ProbeOutput = serde_json::from_str(json)
        .map_err(|e| Error::Probe(format!("unreadable ffprobe output: {e}")))?;

    let stream = probe
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| Error::Probe("no video stream found".into()))?;

    let width = stream.width.unwrap_or(0);
    let height = stream.height.unwrap_or(0);
    let number = |field: &Option<String>| {
        field
            .as_deref()
            .and_then(|v| v.trim().parse::<f64>().ok())
    };

    Ok(VideoInfo {
        width,
        height,
        aspect_ratio: AspectRatio::detect(width, height),
        duration: number(&probe.format.duration).unwrap_or(0.0),
        file_size: number(&probe.format.size).unwrap_or(0.0) as u64,
        frame_rate: stream
            .r_frame_rate
            .as_deref()
            .map(parse_frame_rate)
            .unwrap_or(DEFAULT_FRAME_RATE),
        codec: stream.codec_name.unwrap_or_else(|| "unknown".into()),
        bit_rate: number(&probe.format.bit_rate).unwrap_or(0.0) as u64,
    })
}

/// Parse a rational like `30000/1001`, rounded to two decimals.
pub fn parse_frame_rate(value: &str) -> f64 {
    let rate = match value.split_once('/') {
        Some((num, den)) => match (num.trim().parse::<f64>(), den.trim().parse::<f64>()) {
            (Ok(n), Ok(d)) if d != 0.0 => n / d,
            _ => DEFAULT_FRAME_RATE,
        },
        None => value.trim().parse().unwrap_or(DEFAULT_FRAME_RATE),
    };
    if rate > 0.0 {
        (rate * 100.0).round() / 100.0
    } else {
        DEFAULT_FRAME_RATE
    }
}

/// Reject inputs that are too large, too long or of an unsupported shape.
pub fn check_limits(info: &VideoInfo, limits: &VideoLimits) -> Result<()> {
    let size_mb = info.file_size_mb();
    if size_mb > limits.max_file_size_mb {
        return Err(Error::UnsupportedVideo(format!(
            "file size ({size_mb:.2}MB) exceeds limit ({}MB)",
            limits.max_file_size_mb
        )));
    }

    if info.duration > limits.max_duration_secs {
        return Err(Error::UnsupportedVideo(format!(
            "duration ({:.1}s) exceeds limit ({}s)",
            info.duration, limits.max_duration_secs
        )));
    }

    match info.aspect_ratio {
        Some(aspect) if limits.supported_aspect_ratios.contains(&aspect) => Ok(()),
        _ => {
            let supported: Vec<&str> = limits
                .supported_aspect_ratios
                .iter()
                .map(AspectRatio::as_str)
                .collect();
            Err(Error::UnsupportedVideo(format!(
                "{}x{} aspect ratio not supported, use: {}",
                info.width,
                info.height,
                supported.join(", ")
            )))
        }
    }
}

/// Settle the canvas aspect ratio for `info`: `requested` when given,
/// otherwise the detected one.
///
/// The result is written back into `info` so [`check_limits`] judges the
/// ratio that will actually be rendered.
pub fn resolve_aspect(
    info: &mut VideoInfo,
    requested: Option<AspectRatio>,
) -> Result<AspectRatio> {
    let aspect = requested.or(info.aspect_ratio).ok_or_else(|| {
        Error::UnsupportedVideo(format!(
            "cannot pick a canvas for {}x{}, choose an aspect ratio explicitly",
            info.width, info.height
        ))
    })?;
    info.aspect_ratio = Some(aspect);
    Ok(aspect)
}

/// Extract one frame at `timestamp` seconds as a 480px-wide JPEG.
pub fn create_thumbnail(
    ffmpeg: &Path,
    video: &Path,
    output: &Path,
    timestamp: f64,
) -> Result<PathBuf> {
    if !video.exists() {
        return Err(Error::VideoNotFound {
            path: video.to_path_buf(),
        });
    }
    ensure_parent_dir(output)?;

    let result = Command::new(ffmpeg)
        .args(["-nostdin", "-y", "-ss", &format!("{timestamp:.3}"), "-i"])
        .arg(video)
        .args([
            "-frames:v",
            "1",
            "-vf",
            &format!("scale={THUMBNAIL_WIDTH}:-1"),
            "-q:v",
            "2",
        ])
        .arg(output)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .output()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ToolNotFound(ffmpeg.display().to_string())
            } else {
                Error::render(format!("failed to run {}: {e}", ffmpeg.display()), "")
            }
        })?;

    if !result.status.success() {
        return Err(Error::render(
            "thumbnail extraction failed",
            String::from_utf8_lossy(&result.stderr),
        ));
    }
    if !output.exists() {
        return Err(Error::render(
            format!("thumbnail {} was not created", output.display()),
            String::from_utf8_lossy(&result.stderr),
        ));
    }

    info!(path = %output.display(), "thumbnail created");
    Ok(output.to_path_buf())
}

/// Whether `tool -version` runs successfully.
pub fn is_tool_on_path(tool: impl AsRef<Path>) -> bool {
    Command::new(tool.as_ref())
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
