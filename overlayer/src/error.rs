use std::path::PathBuf;

/// All errors that can occur in overlayer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("invalid decision: {0}")]
    InvalidDecision(String),

    #[error("invalid timeline: {0}")]
    InvalidTimeline(String),

    #[error("video not found: {path}")]
    VideoNotFound { path: PathBuf },

    #[error("unsupported video: {0}")]
    UnsupportedVideo(String),

    #[error("probe error: {0}")]
    Probe(String),

    /// The compositing engine exited non-zero or produced no output file.
    /// `stderr` holds the tail of the engine's diagnostic stream.
    #[error("render error: {message}")]
    Render { message: String, stderr: String },

    #[error("{0} not found — install with: apt install ffmpeg")]
    ToolNotFound(String),

    #[cfg(feature = "fetch")]
    #[error("asset fetch error: {0}")]
    AssetFetch(String),

    #[cfg(feature = "fetch")]
    #[error("language model error: {0}")]
    Llm(String),

    #[cfg(feature = "fetch")]
    #[error("rate limited by {0}")]
    RateLimited(String),

    #[cfg(feature = "fetch")]
    #[error("{0} not set in environment")]
    MissingApiKey(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "fetch")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn render(message: impl Into<String>, stderr: impl Into<String>) -> Self {
        Error::Render {
            message: message.into(),
            stderr: stderr.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_invalid_option() {
        let e = Error::InvalidOption("scale must be in (0, 1]".into());
        assert_eq!(e.to_string(), "invalid option: scale must be in (0, 1]");
    }

    #[test]
    fn test_error_display_video_not_found() {
        let e = Error::VideoNotFound {
            path: PathBuf::from("/tmp/raw_video.mp4"),
        };
        assert!(e.to_string().contains("/tmp/raw_video.mp4"));
    }

    #[test]
    fn test_error_render_keeps_stderr_out_of_display() {
        let e = Error::render("ffmpeg exited with code 1", "Invalid argument\n");
        assert_eq!(e.to_string(), "render error: ffmpeg exited with code 1");
        match e {
            Error::Render { stderr, .. } => assert!(stderr.contains("Invalid argument")),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_error_display_tool_not_found() {
        let e = Error::ToolNotFound("ffprobe".into());
        let msg = e.to_string();
        assert!(msg.contains("ffprobe"));
        assert!(msg.contains("apt install ffmpeg"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<String>("invalid json").unwrap_err();
        let e: Error = json_err.into();
        assert!(matches!(e, Error::Json(_)));
    }

    #[test]
    fn test_error_debug_impl() {
        let e = Error::InvalidTimeline("no insertions".into());
        let debug = format!("{:?}", e);
        assert!(debug.contains("InvalidTimeline"));
    }
}
