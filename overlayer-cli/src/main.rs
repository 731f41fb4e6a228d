use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use overlayer::{
    filter_graph, media, validate, AspectRatio, Canvas, Decisions, Error, RenderConfig,
    RenderOutcome, SpacingRule, Timeline, VideoInfo, VideoLimits,
};

#[derive(Parser)]
#[command(
    name = "overlayer",
    version,
    about = "Overlay timed stock visuals on talking-head video"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the timeline and filter graph for a decisions file without rendering.
    Plan(PlanArgs),
    /// Render a decisions file over a video.
    Render(RenderArgs),
    /// Full pipeline: transcript -> model decisions -> stock assets -> render.
    Run(RunArgs),
    /// Check that ffmpeg and ffprobe are installed.
    Check,
}

#[derive(Args)]
struct CommonArgs {
    /// Source video.
    #[arg(short, long)]
    video: PathBuf,

    /// Canvas aspect ratio ("9:16" or "16:9"). Detected from the video if omitted.
    #[arg(short, long)]
    aspect: Option<String>,

    /// JSON render config (scale, opacity, fades, preset, crf, retries).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Minimum decision confidence.
    #[arg(long, default_value = "0.75")]
    threshold: f64,
}

#[derive(Args)]
struct PlanArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Insertion decisions (JSON).
    #[arg(short, long)]
    decisions: PathBuf,

    /// Source duration in seconds; skips probing the video.
    #[arg(long)]
    duration: Option<f64>,
}

#[derive(Args)]
struct RenderArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Insertion decisions (JSON) with resolved asset paths.
    #[arg(short, long)]
    decisions: PathBuf,

    /// Output video.
    #[arg(short, long)]
    output: PathBuf,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Transcript JSON (segments with word timestamps).
    #[arg(short, long)]
    transcript: PathBuf,

    /// Output video.
    #[arg(short, long)]
    output: PathBuf,

    /// System prompt for the decision model.
    #[arg(short, long, default_value = "prompts/visual_insertion.md")]
    prompt: PathBuf,

    /// Model name.
    #[arg(short, long, default_value = overlayer::llm::DEFAULT_MODEL)]
    model: String,

    /// Where downloaded stock assets are kept (default: ~/.cache/overlayer/assets).
    #[arg(long)]
    asset_dir: Option<PathBuf>,

    /// Also write the resolved decisions to this file.
    #[arg(long)]
    save_decisions: Option<PathBuf>,

    /// Skip the thumbnail next to the output.
    #[arg(long)]
    no_thumbnail: bool,

    /// Search stock photos instead of stock footage.
    #[arg(long)]
    photos: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("overlayer=info".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Command::Plan(args) => plan(args),
        Command::Render(args) => render(args).await,
        Command::Run(args) => run(args).await,
        Command::Check => check(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        if let Error::Render { stderr, .. } = &e {
            if !stderr.is_empty() {
                eprintln!("{stderr}");
            }
        }
        std::process::exit(1);
    }
}

fn plan(args: PlanArgs) -> overlayer::Result<()> {
    let config = load_config(args.common.config.as_deref())?;
    let decisions = Decisions::from_json_file(&args.decisions)?;

    let requested = parse_aspect(args.common.aspect.as_deref())?;
    let (aspect, duration, canvas) = match (requested, args.duration) {
        (Some(aspect), Some(duration)) => {
            let canvas = media::source_canvas(Path::new("ffprobe"), &args.common.video, aspect);
            (aspect, duration, canvas)
        }
        (requested, duration) => {
            let mut info = media::probe(&args.common.video)?;
            let aspect = media::resolve_aspect(&mut info, requested)?;
            let canvas = info.canvas().unwrap_or_else(|| Canvas::for_aspect(aspect));
            (aspect, duration.unwrap_or(info.duration), canvas)
        }
    };

    let confident = validate::filter_confidence(&decisions.insertions, args.common.threshold);
    let kept = validate::validate(&confident, &SpacingRule::default(), duration);
    let timeline = Timeline::build(&args.common.video, aspect, &kept, &config);

    println!("{}", timeline.to_json_pretty()?);
    if timeline.is_empty() {
        eprintln!("No insertions with assets; rendering would copy the source unchanged.");
        return Ok(());
    }

    let graph = filter_graph::compile(&timeline, canvas)?;
    eprintln!();
    eprintln!(
        "Filter graph ({} layers, {}x{} canvas):",
        graph.layer_count(),
        canvas.width,
        canvas.height
    );
    eprintln!("{graph}");
    Ok(())
}

async fn render(args: RenderArgs) -> overlayer::Result<()> {
    let config = load_config(args.common.config.as_deref())?;
    let (info, aspect) = probe_checked(&args.common)?;
    let canvas = info.canvas().unwrap_or_else(|| Canvas::for_aspect(aspect));

    let decisions = Decisions::from_json_file(&args.decisions)?;
    let confident = validate::filter_confidence(&decisions.insertions, args.common.threshold);
    let kept = validate::validate(&confident, &SpacingRule::default(), info.duration);

    let outcome =
        render_with_bar(&args.common.video, aspect, canvas, kept, &args.output, config).await?;
    report(&outcome);
    Ok(())
}

async fn run(args: RunArgs) -> overlayer::Result<()> {
    use overlayer::assets::{self, MediaType, PexelsClient};
    use overlayer::llm::{self, AnthropicProvider, DecisionProvider as _};

    let config = load_config(args.common.config.as_deref())?;
    let (info, aspect) = probe_checked(&args.common)?;
    let canvas = info.canvas().unwrap_or_else(|| Canvas::for_aspect(aspect));

    let transcript = overlayer::Transcript::from_json_file(&args.transcript)?;
    let summary = transcript.summary();
    eprintln!(
        "Transcript: {} segments, {} words, {:.1}s, language: {}",
        summary.total_segments, summary.total_words, summary.duration, transcript.language
    );

    let prompt = llm::load_system_prompt(&args.prompt)?;
    let provider = AnthropicProvider::from_env(prompt)?.model(&args.model);
    let decisions = provider
        .decide(&transcript, aspect, args.common.threshold)
        .await?;

    let stats = decisions.summary();
    eprintln!(
        "Decisions: {} insertions, {} rejected, average confidence {:.2}",
        stats.total_insertions, stats.total_rejected, stats.avg_confidence
    );
    for d in &decisions.insertions {
        let context: Vec<&str> = transcript
            .words_in_range(d.timestamp - 1.0, d.timestamp + 1.0)
            .into_iter()
            .map(|w| w.text.trim())
            .collect();
        eprintln!(
            "  {:>6.1}s  {:<16} {:.2}  \"{}\"",
            d.timestamp,
            d.word,
            d.confidence,
            context.join(" ")
        );
    }

    let media_type = if args.photos {
        MediaType::Photos
    } else {
        MediaType::Videos
    };
    let pexels = PexelsClient::from_env()?
        .media_type(media_type)
        .show_progress(true);
    let asset_dir = overlayer::config::resolve_asset_dir(args.asset_dir);
    let resolved =
        assets::fetch_assets(&pexels, &decisions.insertions, &asset_dir, aspect).await?;
    eprintln!(
        "Assets: {}/{} resolved in {}",
        resolved.len(),
        decisions.insertions.len(),
        asset_dir.display()
    );

    if let Some(path) = &args.save_decisions {
        let saved = Decisions {
            insertions: resolved.clone(),
            ..decisions
        };
        std::fs::write(path, serde_json::to_string_pretty(&saved)?)?;
        eprintln!("Decisions written to {}", path.display());
    }

    let ffmpeg = config.ffmpeg.clone();
    let outcome = render_with_bar(
        &args.common.video,
        aspect,
        canvas,
        resolved,
        &args.output,
        config,
    )
    .await?;
    report(&outcome);

    if !args.no_thumbnail {
        let thumb = thumbnail_path(outcome.output());
        let at = (info.duration / 2.0).min(3.0);
        match media::create_thumbnail(&ffmpeg, outcome.output(), &thumb, at) {
            Ok(path) => eprintln!("Thumbnail: {}", path.display()),
            Err(e) => tracing::warn!(error = %e, "thumbnail failed"),
        }
    }
    Ok(())
}

fn check() -> overlayer::Result<()> {
    let mut missing = Vec::new();
    for tool in ["ffmpeg", "ffprobe"] {
        if media::is_tool_on_path(tool) {
            println!("{tool:<8} ok");
        } else {
            println!("{tool:<8} missing");
            missing.push(tool);
        }
    }
    match missing.first() {
        Some(tool) => Err(Error::ToolNotFound(tool.to_string())),
        None => Ok(()),
    }
}

fn load_config(path: Option<&Path>) -> overlayer::Result<RenderConfig> {
    match path {
        Some(path) => RenderConfig::from_json_file(path),
        None => Ok(RenderConfig::default()),
    }
}

/// Probe the source, settle the canvas aspect ratio and check it against
/// the upload limits.
fn probe_checked(common: &CommonArgs) -> overlayer::Result<(VideoInfo, AspectRatio)> {
    let mut info = media::probe(&common.video)?;
    let requested = parse_aspect(common.aspect.as_deref())?;
    let aspect = media::resolve_aspect(&mut info, requested).map_err(|_| {
        Error::UnsupportedVideo(format!(
            "cannot pick a canvas for {}x{}, pass --aspect",
            info.width, info.height
        ))
    })?;
    media::check_limits(&info, &VideoLimits::default())?;
    eprintln!(
        "Video: {}x{}, {:.1}s, {:.1} fps, {:.2} MB",
        info.width,
        info.height,
        info.duration,
        info.frame_rate,
        info.file_size_mb()
    );
    Ok((info, aspect))
}

fn parse_aspect(flag: Option<&str>) -> overlayer::Result<Option<AspectRatio>> {
    flag.map(AspectRatio::from_str).transpose()
}

async fn render_with_bar(
    video: &Path,
    aspect: AspectRatio,
    canvas: Canvas,
    decisions: Vec<overlayer::InsertionDecision>,
    output: &Path,
    config: RenderConfig,
) -> overlayer::Result<RenderOutcome> {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}% ({eta})")
            .expect("valid template")
            .progress_chars("#>-"),
    );

    let bar = pb.clone();
    let outcome = overlayer::render_async(
        video.to_path_buf(),
        aspect,
        canvas,
        decisions,
        output.to_path_buf(),
        config,
        move |percent| bar.set_position(u64::from(percent)),
    )
    .await;
    pb.finish_and_clear();
    outcome
}

fn report(outcome: &RenderOutcome) {
    match outcome {
        RenderOutcome::Composited {
            output,
            attempts,
            insertions,
        } => eprintln!(
            "Rendered {insertions} insertion(s) in {attempts} attempt(s): {}",
            output.display()
        ),
        RenderOutcome::Passthrough { output } => {
            eprintln!("No insertions; source copied to {}", output.display())
        }
        RenderOutcome::Fallback { output, attempts } => eprintln!(
            "Rendering failed after {attempts} attempt(s); source copied to {}",
            output.display()
        ),
    }
    println!("{}", outcome.output().display());
}

fn thumbnail_path(video: &Path) -> PathBuf {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".into());
    video.with_file_name(format!("{stem}_thumbnail.jpg"))
}
