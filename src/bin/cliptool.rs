use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Serialize;
use tracing::{error, info, warn};
use vigil::config::{RecorderConfig, VigilConfig};
use vigil::recorder::{
    clip_id_of, encode_video, extract_images, find_journals, read_journal, ClipReader,
    JOURNAL_EXTENSION,
};

/// Inspect clip journals and turn them into images or video.
#[derive(Parser, Debug)]
#[command(name = "cliptool")]
#[command(about = "Inspect and convert vigil clip journals")]
struct Args {
    /// Path to a clip journal or a directory containing journals
    #[arg(short, long)]
    input: PathBuf,

    /// Output base directory (defaults to recorder.path in config)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Path to vigil configuration file (for frame rate and resolution)
    #[arg(short = 'c', long, default_value = "vigil.toml")]
    config: PathBuf,

    /// Extract JPEG frames to <output>/<clip>/frames
    #[arg(long)]
    images: bool,

    /// Encode <output>/<clip>.mp4 (requires the video_encoding feature on Linux)
    #[arg(long)]
    video: bool,

    /// Print a JSON summary of each journal
    #[arg(long)]
    metadata: bool,

    /// Overwrite existing outputs instead of skipping
    #[arg(long)]
    overwrite: bool,
}

#[derive(Debug, Serialize)]
struct JournalSummary {
    clip_id: String,
    path: String,
    camera_id: String,
    fps: u32,
    width: u32,
    height: u32,
    frame_count: u32,
    pre_event_frames: u32,
    finalized: bool,
    truncated: bool,
    first_frame_at: Option<DateTime<Utc>>,
    last_frame_at: Option<DateTime<Utc>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let recorder = load_recorder_config(&args.config)?;
    let output_base = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(&recorder.path));

    let journals = collect_journals(&args.input).await?;
    if journals.is_empty() {
        return Err(anyhow!("No clip journals found at {}", args.input.display()));
    }

    // Summaries only unless an output was asked for
    let metadata = args.metadata || !(args.images || args.video);

    info!("Processing {} journal(s)", journals.len());

    for path in journals {
        if metadata {
            match summarize(&path).await {
                Ok(summary) => println!("{}", serde_json::to_string_pretty(&summary)?),
                Err(e) => error!("Failed to read {}: {}", path.display(), e),
            }
        }

        if args.images || args.video {
            if let Err(e) = convert(&path, &output_base, &recorder, &args).await {
                error!("Failed to convert {}: {}", path.display(), e);
            }
        }
    }

    Ok(())
}

fn load_recorder_config(config_path: &Path) -> Result<RecorderConfig> {
    if config_path.exists() {
        let config = VigilConfig::load_from_file(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
        Ok(config.recorder)
    } else {
        warn!(
            "Config file {} not found, using built-in defaults",
            config_path.display()
        );
        Ok(VigilConfig::default().recorder)
    }
}

async fn collect_journals(input: &Path) -> Result<Vec<PathBuf>> {
    if input.is_file() {
        if input.extension().and_then(|s| s.to_str()) == Some(JOURNAL_EXTENSION) {
            return Ok(vec![input.to_path_buf()]);
        }
        return Err(anyhow!("{} is not a .{} file", input.display(), JOURNAL_EXTENSION));
    }

    if input.is_dir() {
        return find_journals(input)
            .await
            .with_context(|| format!("Failed to read directory {}", input.display()));
    }

    Err(anyhow!(
        "Input {} is neither a clip journal nor a directory",
        input.display()
    ))
}

async fn summarize(path: &Path) -> Result<JournalSummary> {
    let mut reader = ClipReader::open(path).await?;
    let mut first = None;
    let mut last = None;
    while let Some(frame) = reader.next_frame().await? {
        first.get_or_insert(frame.timestamp);
        last = Some(frame.timestamp);
    }

    let header = reader.header();
    Ok(JournalSummary {
        clip_id: clip_id_of(path),
        path: path.display().to_string(),
        camera_id: header.camera_id.clone(),
        fps: header.fps,
        width: header.width,
        height: header.height,
        frame_count: reader.frames_read(),
        pre_event_frames: header.pre_event_frames,
        finalized: reader.is_finalized(),
        truncated: reader.is_truncated(),
        first_frame_at: first.map(DateTime::<Utc>::from),
        last_frame_at: last.map(DateTime::<Utc>::from),
    })
}

async fn convert(path: &Path, output_base: &Path, recorder: &RecorderConfig, args: &Args) -> Result<()> {
    let clip_id = clip_id_of(path);
    let (header, frames) = read_journal(path)
        .await
        .with_context(|| format!("Failed to read journal {}", path.display()))?;

    if frames.is_empty() {
        warn!("Journal {} contains no frames; skipping", path.display());
        return Ok(());
    }

    if args.images {
        let frames_dir = output_base.join(&clip_id).join("frames");
        if frames_dir.exists() {
            if !args.overwrite {
                return Err(anyhow!(
                    "Frames directory {} exists (use --overwrite to replace)",
                    frames_dir.display()
                ));
            }
            tokio::fs::remove_dir_all(&frames_dir).await?;
        }
        let written = extract_images(&frames, &frames_dir).await?;
        info!("Extracted {} frames to {}", written.len(), frames_dir.display());
    }

    if args.video {
        let video_path = output_base.join(format!("{}.mp4", clip_id));
        if video_path.exists() && !args.overwrite {
            return Err(anyhow!(
                "Video file {} exists (use --overwrite to replace)",
                video_path.display()
            ));
        }
        tokio::fs::create_dir_all(output_base).await?;

        let fps = if header.fps > 0 { header.fps } else { recorder.fps };
        encode_video(frames, video_path.clone(), fps, recorder.resolution).await?;
        info!("Wrote {}", video_path.display());
    }

    Ok(())
}
