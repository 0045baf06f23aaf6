use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;

use clipsmith::ffmpeg::{FfmpegLogLevel, FfmpegSink, FfmpegSource, set_ffmpeg_log_level};
use clipsmith::{
    Artifact, ColorFilter, Container, EncoderOptions, Job, Outcome, Pipeline, PipelineOptions,
    ProgressCallback, ProgressInfo, Rotation, SubtitleCue, VideoCodec, analysis,
};

const CLI_AFTER_HELP: &str = "Examples:\n  clipsmith compress input.mp4 --out small.mkv --scale 0.5 --progress\n  clipsmith filter input.mp4 --filter warm-vintage --out warm.mkv\n  clipsmith vertical input.mp4 --ratio 9:16 --out reel.mkv\n  clipsmith highlight input.mp4 --out best.webm --container webm\n  clipsmith analyze input.mp4 --json\n  clipsmith completions zsh > _clipsmith";

#[derive(Debug, Parser)]
#[command(
    name = "clipsmith",
    version,
    about = "Compress, filter, crop, subtitle and analyze short videos",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone, Default)]
struct GlobalOptions {
    /// Show additional logging output.
    #[arg(long, global = true)]
    verbose: bool,

    /// Show a progress bar.
    #[arg(long, global = true)]
    progress: bool,

    /// Allow overwriting existing output files.
    #[arg(long, global = true)]
    overwrite: bool,

    /// FFmpeg log level (quiet, panic, fatal, error, warning, info, verbose, debug, trace).
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Upper bound on a single seek, in milliseconds.
    ///
    /// Seeks decode forward from the previous keyframe; raise this for inputs
    /// with long keyframe intervals when running without --fast.
    #[arg(long, global = true, default_value_t = 150)]
    seek_timeout_ms: u64,

    /// Decode as fast as possible instead of recording in real time.
    #[arg(long, global = true)]
    fast: bool,

    /// Video codec (vp9, vp8, h264).
    #[arg(long, global = true)]
    codec: Option<String>,

    /// Output container (mkv, webm, mp4).
    #[arg(long, global = true)]
    container: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Re-encode at a reduced resolution and bit rate.
    Compress {
        input: String,
        #[arg(long)]
        out: PathBuf,
        /// Resolution scale factor in (0, 1].
        #[arg(long, default_value_t = clipsmith::pipeline::DEFAULT_COMPRESS_SCALE)]
        scale: f64,
    },
    /// Apply a color filter.
    Filter {
        input: String,
        #[arg(long)]
        out: PathBuf,
        /// Filter name, e.g. sepia, night-blue, hdr-sim.
        #[arg(long)]
        filter: String,
    },
    /// Rotate clockwise by 90, 180 or 270 degrees.
    Rotate {
        input: String,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value_t = 90)]
        degrees: u32,
    },
    /// Mirror left to right, or top to bottom with --vertical.
    Flip {
        input: String,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        vertical: bool,
    },
    /// Crop a centered portrait window.
    Vertical {
        input: String,
        #[arg(long)]
        out: PathBuf,
        /// Width/height ratio as W:H or a decimal.
        #[arg(long, default_value = "9:16")]
        ratio: String,
    },
    /// Change resolution, preserving the aspect ratio.
    Resize {
        input: String,
        #[arg(long)]
        out: PathBuf,
        /// Output height; the native height when omitted.
        #[arg(long)]
        height: Option<u32>,
    },
    /// Burn subtitle cues from a JSON file of [{"time": s, "text": "..."}].
    Subtitles {
        input: String,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        cues: PathBuf,
    },
    /// Cut a short clip at the moment with the most motion.
    Highlight {
        input: String,
        #[arg(long)]
        out: PathBuf,
        /// Clip length in seconds; chosen from the source length when omitted.
        #[arg(long)]
        duration: Option<f64>,
    },
    /// Color timeline, mood temperature and palette.
    Analyze {
        input: String,
        #[arg(long, default_value_t = analysis::DEFAULT_SAMPLE_COUNT)]
        samples: usize,
        #[arg(long, default_value_t = analysis::DEFAULT_PALETTE_SIZE)]
        k: usize,
        #[arg(long)]
        json: bool,
    },
    /// Save evenly spaced stills as PNG.
    Thumbnails {
        input: String,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value_t = 6)]
        count: usize,
    },
    /// Generate shell completion scripts.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn parse_ratio(value: &str) -> Result<f64, Box<dyn std::error::Error>> {
    let ratio = match value.split_once(':') {
        Some((width, height)) => width.trim().parse::<f64>()? / height.trim().parse::<f64>()?,
        None => value.trim().parse::<f64>()?,
    };
    if !ratio.is_finite() || ratio <= 0.0 {
        return Err(format!("invalid ratio: {value}").into());
    }
    Ok(ratio)
}

fn parse_codec(value: &str) -> Option<VideoCodec> {
    match value.to_ascii_lowercase().as_str() {
        "vp9" => Some(VideoCodec::Vp9),
        "vp8" => Some(VideoCodec::Vp8),
        "h264" | "avc" => Some(VideoCodec::H264),
        _ => None,
    }
}

fn parse_container(value: &str) -> Option<Container> {
    match value.to_ascii_lowercase().as_str() {
        "mkv" | "matroska" => Some(Container::Matroska),
        "webm" => Some(Container::WebM),
        "mp4" => Some(Container::Mp4),
        _ => None,
    }
}

fn ensure_writable_path(path: &Path, overwrite: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        if overwrite {
            eprintln!(
                "{} {}",
                "warning:".yellow().bold(),
                format!("overwriting {}", path.display()).yellow()
            );
        } else {
            return Err(format!(
                "output already exists: {} (use --overwrite to replace)",
                path.display()
            )
            .into());
        }
    }
    Ok(())
}

fn apply_global_options(global: &GlobalOptions) -> Result<(), Box<dyn std::error::Error>> {
    let default_filter = if global.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    if let Some(level) = &global.log_level {
        let parsed: FfmpegLogLevel = level.parse()?;
        set_ffmpeg_log_level(parsed);
    }
    Ok(())
}

fn pipeline_options(global: &GlobalOptions) -> Result<PipelineOptions, Box<dyn std::error::Error>> {
    let mut encoder = EncoderOptions::default();
    if let Some(codec) = &global.codec {
        encoder = encoder.codec(parse_codec(codec).ok_or(format!("unsupported --codec: {codec}"))?);
    }
    if let Some(container) = &global.container {
        encoder = encoder.container(
            parse_container(container).ok_or(format!("unsupported --container: {container}"))?,
        );
    }

    let mut options = PipelineOptions::new()
        .with_seek_timeout(Duration::from_millis(global.seek_timeout_ms))
        .with_encoder(encoder);
    if global.progress {
        options = options.with_progress(Arc::new(TerminalProgress::new()));
    }
    Ok(options)
}

struct TerminalProgress {
    bar: ProgressBar,
}

impl TerminalProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(100);
        if let Ok(style) = ProgressStyle::with_template("{bar:40.cyan/blue} {pos:>3}% {msg}") {
            bar.set_style(style);
        }
        Self { bar }
    }
}

impl ProgressCallback for TerminalProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        self.bar.set_position(info.percentage.round() as u64);
        self.bar.set_message(info.status.clone());
        if info.percentage >= 100.0 {
            self.bar.finish_and_clear();
        }
    }
}

fn job_for(command: &Commands) -> Result<Option<Job>, Box<dyn std::error::Error>> {
    let job = match command {
        Commands::Compress { scale, .. } => Job::Compress { scale: *scale },
        Commands::Filter { filter, .. } => Job::Filter(filter.parse::<ColorFilter>()?),
        Commands::Rotate { degrees, .. } => Job::Rotate(Rotation::from_degrees(*degrees)?),
        Commands::Flip { vertical, .. } => Job::Flip {
            horizontal: !vertical,
        },
        Commands::Vertical { ratio, .. } => Job::VerticalCrop {
            ratio: parse_ratio(ratio)?,
        },
        Commands::Resize { height, .. } => Job::Resize { height: *height },
        Commands::Subtitles { cues, .. } => Job::BurnSubtitles {
            cues: SubtitleCue::list_from_json(&fs::read_to_string(cues)?)?,
        },
        Commands::Highlight { duration, .. } => Job::Highlight {
            duration: duration.map(|seconds| Duration::from_secs_f64(seconds.max(0.0))),
        },
        Commands::Analyze { samples, k, .. } => Job::AnalyzeColor {
            samples: *samples,
            k: *k,
        },
        Commands::Thumbnails { count, .. } => Job::Thumbnails { count: *count },
        Commands::Completions { .. } => return Ok(None),
    };
    Ok(Some(job))
}

fn input_of(command: &Commands) -> Option<&str> {
    match command {
        Commands::Compress { input, .. }
        | Commands::Filter { input, .. }
        | Commands::Rotate { input, .. }
        | Commands::Flip { input, .. }
        | Commands::Vertical { input, .. }
        | Commands::Resize { input, .. }
        | Commands::Subtitles { input, .. }
        | Commands::Highlight { input, .. }
        | Commands::Analyze { input, .. }
        | Commands::Thumbnails { input, .. } => Some(input.as_str()),
        Commands::Completions { .. } => None,
    }
}

fn output_of(command: &Commands) -> Option<&Path> {
    match command {
        Commands::Compress { out, .. }
        | Commands::Filter { out, .. }
        | Commands::Rotate { out, .. }
        | Commands::Flip { out, .. }
        | Commands::Vertical { out, .. }
        | Commands::Resize { out, .. }
        | Commands::Subtitles { out, .. }
        | Commands::Highlight { out, .. }
        | Commands::Thumbnails { out, .. } => Some(out.as_path()),
        Commands::Analyze { .. } | Commands::Completions { .. } => None,
    }
}

fn report_artifact(artifact: &Artifact, out: &Path, input: &str, compress: bool) {
    println!(
        "{} {} ({}x{}, {} frames, {:.2}s, {} bytes{})",
        "saved".green().bold(),
        out.display(),
        artifact.width,
        artifact.height,
        artifact.frame_count,
        artifact.duration().as_secs_f64(),
        artifact.bytes.len(),
        if artifact.has_audio { ", with audio" } else { "" },
    );
    if compress && let Ok(metadata) = fs::metadata(input) {
        println!(
            "{} {:.1}%",
            "size reduction:".cyan().bold(),
            artifact.size_reduction_percent(metadata.len())
        );
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    apply_global_options(&cli.global)?;

    if let Commands::Completions { shell } = cli.command {
        let mut command = Cli::command();
        clap_complete::generate(shell, &mut command, "clipsmith", &mut std::io::stdout());
        return Ok(());
    }

    let (Some(job), Some(input)) = (job_for(&cli.command)?, input_of(&cli.command)) else {
        return Ok(());
    };
    let output = output_of(&cli.command);
    if let Some(out) = output
        && !matches!(cli.command, Commands::Thumbnails { .. })
    {
        ensure_writable_path(out, cli.global.overwrite)?;
    }

    let options = pipeline_options(&cli.global)?;
    let mut source = FfmpegSource::open(input)?;
    source.set_realtime(!cli.global.fast);

    let outcome = Pipeline::new(source, FfmpegSink::new()).run(&job, &options)?;

    match (outcome, &cli.command) {
        (Outcome::Artifact(artifact), _) => {
            if let Some(out) = output {
                artifact.save(out)?;
                report_artifact(&artifact, out, input, matches!(job, Job::Compress { .. }));
            }
        }
        (Outcome::Analysis(report), Commands::Analyze { json: true, .. }) => {
            println!("{}", serde_json::to_string_pretty(&report.to_json())?);
        }
        (Outcome::Analysis(report), _) => {
            println!(
                "{} {} ({})",
                "dominant:".cyan().bold(),
                analysis::to_hex(report.dominant_color),
                report.temperature
            );
            println!("{} {:.1}", "brightness:".cyan().bold(), report.mean_brightness);
            println!("{} {:.3}", "saturation:".cyan().bold(), report.mean_saturation);
            let palette: Vec<String> = report
                .palette
                .iter()
                .map(|cluster| format!("{} ({})", analysis::to_hex(cluster.rgb()), cluster.member_count))
                .collect();
            println!("{} {}", "palette:".cyan().bold(), palette.join(", "));
        }
        (Outcome::Thumbnails(stills), _) => {
            let directory = output.ok_or("thumbnails need --out")?;
            fs::create_dir_all(directory)?;
            for (index, still) in stills.iter().enumerate() {
                let path = directory.join(format!("thumb_{:02}.png", index + 1));
                ensure_writable_path(&path, cli.global.overwrite)?;
                still.raster.save(&path)?;
            }
            let summary = json!({
                "count": stills.len(),
                "timestamps": stills.iter().map(|still| still.timestamp.as_secs_f64()).collect::<Vec<_>>(),
            });
            println!("{} {}", "saved".green().bold(), summary);
        }
    }

    Ok(())
}

fn main() {
    if let Err(error) = run() {
        eprintln!("{} {error}", "error:".red().bold());
        std::process::exit(1);
    }
}
