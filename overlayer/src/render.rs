//! Render executor: runs a compiled filter graph through ffmpeg.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, info, warn};

use crate::config::{EncodingConfig, RenderConfig};
use crate::error::{Error, Result};
use crate::filter_graph::{self, FilterGraph};
use crate::progress::{self, ProgressParser};
use crate::timeline::{Canvas, Timeline};

/// Lines of engine diagnostics kept for error reports.
const STDERR_TAIL_LINES: usize = 40;

/// Progress callback, called with a whole percentage in 0..=100.
pub type ProgressFn = Box<dyn FnMut(u8) + Send>;

/// Turns a timeline into a finished video file.
pub trait Compositor {
    /// Render `timeline` over its base video into `output`.
    fn composite(&mut self, timeline: &Timeline, output: &Path) -> Result<PathBuf>;
}

/// [`Compositor`] backed by the ffmpeg command-line tool.
pub struct FfmpegCompositor {
    config: RenderConfig,
    canvas: Canvas,
    on_progress: Option<ProgressFn>,
}

impl FfmpegCompositor {
    pub fn new(config: RenderConfig, canvas: Canvas) -> Self {
        Self {
            config,
            canvas,
            on_progress: None,
        }
    }

    pub fn on_progress(mut self, callback: impl FnMut(u8) + Send + 'static) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }
}

impl Compositor for FfmpegCompositor {
    fn composite(&mut self, timeline: &Timeline, output: &Path) -> Result<PathBuf> {
        info!(
            insertions = timeline.len(),
            complexity = ?timeline.metadata.complexity,
            "building filter graph"
        );
        let graph = filter_graph::compile(timeline, self.canvas)?;
        let callback = self.on_progress.as_mut().map(|f| f.as_mut() as &mut dyn FnMut(u8));
        execute(
            &self.config.ffmpeg,
            &timeline.base_video,
            &graph,
            output,
            &self.config.encoding,
            callback,
        )
    }
}

/// Full ffmpeg argument list: base input, one input per layer in graph
/// order, the graph, stream mapping and encoder settings.
pub fn build_args(
    base_video: &Path,
    graph: &FilterGraph,
    output: &Path,
    encoding: &EncodingConfig,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-nostdin", "-y", "-i"].iter().map(OsString::from).collect();
    args.push(base_video.into());

    for input in &graph.inputs {
        args.push("-i".into());
        args.push(input.path.as_os_str().to_owned());
    }

    let output_map = format!("[{}]", graph.output_label());
    let crf = encoding.crf.to_string();
    for arg in [
        "-filter_complex",
        graph.description.as_str(),
        "-map",
        output_map.as_str(),
        // Optional: a source without audio is fine.
        "-map",
        "0:a?",
        "-c:v",
        "libx264",
        "-preset",
        encoding.preset.as_str(),
        "-crf",
        crf.as_str(),
        "-pix_fmt",
        "yuv420p",
        "-c:a",
        "aac",
        "-b:a",
        "192k",
        "-movflags",
        "+faststart",
    ] {
        args.push(arg.into());
    }

    args.push(output.into());
    args
}

/// Run `graph` with `program` and verify `output` was written.
///
/// Reads the engine's stderr line by line until it closes, feeding the
/// progress parser. A non-zero exit or a missing output file is an
/// [`Error::Render`] carrying the tail of the engine's diagnostics.
pub fn execute(
    program: &Path,
    base_video: &Path,
    graph: &FilterGraph,
    output: &Path,
    encoding: &EncodingConfig,
    mut on_progress: Option<&mut dyn FnMut(u8)>,
) -> Result<PathBuf> {
    if !base_video.exists() {
        return Err(Error::VideoNotFound {
            path: base_video.to_path_buf(),
        });
    }
    if same_file(base_video, output) {
        return Err(Error::InvalidOption(format!(
            "output {} would overwrite the source video",
            output.display()
        )));
    }
    ensure_parent_dir(output)?;
    // A stale file from an earlier attempt must not pass the output check.
    if output.exists() {
        std::fs::remove_file(output)?;
    }

    let args = build_args(base_video, graph, output, encoding);
    debug!(program = %program.display(), ?args, "ffmpeg command");

    let mut child = Command::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ToolNotFound(program.display().to_string())
            } else {
                Error::render(format!("failed to run {}: {e}", program.display()), "")
            }
        })?;

    let mut parser = ProgressParser::new();
    let mut last_percent: Option<u8> = None;
    let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);

    if let Some(stderr) = child.stderr.take() {
        let read = progress::for_each_line(BufReader::new(stderr), |line| {
            if let Some(percent) = parser.feed(line) {
                if let Some(mark) = progress::crossed_decile(last_percent, percent) {
                    info!(percent = mark, "rendering progress");
                }
                last_percent = Some(percent);
                if let Some(callback) = on_progress.as_mut() {
                    callback(percent);
                }
            }
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line.to_string());
        });
        if let Err(e) = read {
            warn!(error = %e, "failed reading ffmpeg diagnostics");
        }
    }

    let status = child.wait()?;
    let stderr = tail.into_iter().collect::<Vec<_>>().join("\n");

    if !status.success() {
        let message = match status.code() {
            Some(code) => format!("ffmpeg exited with code {code}"),
            None => "ffmpeg was terminated by a signal".to_string(),
        };
        return Err(Error::render(message, stderr));
    }

    if !output.exists() {
        return Err(Error::render(
            format!("output file {} was not created", output.display()),
            stderr,
        ));
    }

    let size_mb = std::fs::metadata(output)?.len() as f64 / (1024.0 * 1024.0);
    info!(
        path = %output.display(),
        size_mb = format!("{size_mb:.2}"),
        "rendering complete"
    );
    Ok(output.to_path_buf())
}

/// Copy the source verbatim to `output`.
pub fn copy_source(base_video: &Path, output: &Path) -> Result<PathBuf> {
    if !base_video.exists() {
        return Err(Error::VideoNotFound {
            path: base_video.to_path_buf(),
        });
    }
    ensure_parent_dir(output)?;
    if !same_file(base_video, output) {
        std::fs::copy(base_video, output)?;
    }
    Ok(output.to_path_buf())
}

pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::tests::decision;
    use crate::decision::AssetKind;
    use crate::timeline::AspectRatio;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("overlayer_test_render_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn graph_for(base: &Path) -> FilterGraph {
        let decisions = vec![
            decision("moon", 2.0, 0.9).with_asset("/tmp/moon.jpg", AssetKind::Image),
            decision("river", 8.0, 0.8).with_asset("/tmp/river.mp4", AssetKind::Video),
        ];
        let timeline = Timeline::build(
            base,
            AspectRatio::Portrait,
            &decisions,
            &RenderConfig::default(),
        );
        filter_graph::compile(&timeline, Canvas::new(1080, 1920)).unwrap()
    }

    #[test]
    fn test_build_args_input_order_and_mapping() {
        let base = Path::new("/tmp/base.mp4");
        let graph = graph_for(base);
        let args: Vec<String> = build_args(
            base,
            &graph,
            Path::new("/tmp/out/final.mp4"),
            &EncodingConfig::default(),
        )
        .into_iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();

        let inputs: Vec<&str> = args
            .windows(2)
            .filter(|w| w[0] == "-i")
            .map(|w| w[1].as_str())
            .collect();
        assert_eq!(inputs, ["/tmp/base.mp4", "/tmp/moon.jpg", "/tmp/river.mp4"]);

        let pos = |flag: &str| args.iter().position(|a| a == flag).unwrap();
        assert_eq!(args[pos("-filter_complex") + 1], graph.description);
        assert_eq!(args[pos("-preset") + 1], "medium");
        assert_eq!(args[pos("-crf") + 1], "23");
        assert!(args.contains(&"[outv]".to_string()));
        assert!(args.contains(&"0:a?".to_string()));
        assert_eq!(args.last().unwrap(), "/tmp/out/final.mp4");
    }

    #[test]
    fn test_execute_missing_base() {
        let dir = scratch_dir("missing_base");
        let base = dir.join("nope.mp4");
        let graph = graph_for(&base);
        let result = execute(
            Path::new("ffmpeg"),
            &base,
            &graph,
            &dir.join("out.mp4"),
            &EncodingConfig::default(),
            None,
        );
        assert!(matches!(result, Err(Error::VideoNotFound { .. })));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_execute_engine_not_found() {
        let dir = scratch_dir("no_engine");
        let base = dir.join("base.mp4");
        std::fs::write(&base, b"video").unwrap();
        let result = execute(
            Path::new("/nonexistent/ffmpeg"),
            &base,
            &graph_for(&base),
            &dir.join("out.mp4"),
            &EncodingConfig::default(),
            None,
        );
        assert!(matches!(result, Err(Error::ToolNotFound(_))));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_execute_refuses_to_overwrite_source() {
        let dir = scratch_dir("overwrite");
        let base = dir.join("base.mp4");
        std::fs::write(&base, b"video").unwrap();
        let result = execute(
            Path::new("ffmpeg"),
            &base,
            &graph_for(&base),
            &base,
            &EncodingConfig::default(),
            None,
        );
        assert!(matches!(result, Err(Error::InvalidOption(_))));
        assert_eq!(std::fs::read(&base).unwrap(), b"video");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[cfg(unix)]
    #[test]
    fn test_execute_nonzero_exit_is_render_error() {
        let dir = scratch_dir("nonzero");
        let base = dir.join("base.mp4");
        std::fs::write(&base, b"video").unwrap();
        let result = execute(
            Path::new("false"),
            &base,
            &graph_for(&base),
            &dir.join("out.mp4"),
            &EncodingConfig::default(),
            None,
        );
        match result {
            Err(Error::Render { message, .. }) => assert!(message.contains("code 1")),
            other => panic!("expected render error, got {other:?}"),
        }
        std::fs::remove_dir_all(&dir).ok();
    }

    #[cfg(unix)]
    #[test]
    fn test_execute_missing_output_is_render_error() {
        let dir = scratch_dir("no_output");
        let base = dir.join("base.mp4");
        let output = dir.join("out.mp4");
        std::fs::write(&base, b"video").unwrap();
        // Left over from an earlier attempt; must not count as output.
        std::fs::write(&output, b"stale").unwrap();
        let result = execute(
            Path::new("true"),
            &base,
            &graph_for(&base),
            &output,
            &EncodingConfig::default(),
            None,
        );
        match result {
            Err(Error::Render { message, .. }) => assert!(message.contains("was not created")),
            other => panic!("expected render error, got {other:?}"),
        }
        assert!(!output.exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[cfg(unix)]
    fn stand_in_engine(dir: &Path, script: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-ffmpeg");
        std::fs::write(&path, format!("#!/bin/sh\n{script}")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn test_execute_reports_progress_across_skipped_deciles() {
        let dir = scratch_dir("progress");
        let base = dir.join("base.mp4");
        let output = dir.join("out.mp4");
        std::fs::write(&base, b"video").unwrap();
        let engine = stand_in_engine(
            &dir,
            r#"echo "  Duration: 00:00:10.00, start: 0.000000" >&2
for t in 01.50 03.50 05.50 07.50 09.50; do
  printf 'frame=1 fps=30 time=00:00:%s bitrate=1k\r' "$t" >&2
done
for last; do :; done
printf rendered > "$last"
"#,
        );

        let mut seen = Vec::new();
        let mut record = |p: u8| seen.push(p);
        let result = execute(
            &engine,
            &base,
            &graph_for(&base),
            &output,
            &EncodingConfig::default(),
            Some(&mut record),
        );
        assert_eq!(result.unwrap(), output);
        assert_eq!(seen, [15, 35, 55, 75, 95]);

        let mut last = None;
        let marks: Vec<u8> = seen
            .iter()
            .filter_map(|&p| {
                let mark = progress::crossed_decile(last, p);
                last = Some(p);
                mark
            })
            .collect();
        assert_eq!(marks, [10, 30, 50, 70, 90]);
        assert_eq!(std::fs::read(&output).unwrap(), b"rendered");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_copy_source_is_byte_identical() {
        let dir = scratch_dir("copy");
        let base = dir.join("base.mp4");
        let bytes: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        std::fs::write(&base, &bytes).unwrap();
        let out = copy_source(&base, &dir.join("nested/out/final.mp4")).unwrap();
        assert_eq!(std::fs::read(out).unwrap(), bytes);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_copy_source_missing() {
        let result = copy_source(Path::new("/nonexistent/base.mp4"), Path::new("/tmp/x.mp4"));
        assert!(matches!(result, Err(Error::VideoNotFound { .. })));
    }
}
