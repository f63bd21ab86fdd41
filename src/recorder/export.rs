use super::journal::{clip_id_of, read_journal, find_journals, ClipReader, JournalHeader, JOURNAL_EXTENSION};
use super::metadata::{save_metadata, ClipMetadata};
use super::session::ClipSummary;
use crate::config::RecorderConfig;
use crate::error::RecordingError;
use crate::frame::FrameData;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[cfg(all(target_os = "linux", feature = "video_encoding"))]
use gstreamer::prelude::*;

/// What to produce from a finalized journal
#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub output_dir: PathBuf,
    pub fps: u32,
    pub resolution: (u32, u32),
    pub video_encoding: bool,
    pub keep_journal: bool,
    pub keep_images: bool,
    pub save_metadata: bool,
}

impl ExportSettings {
    pub fn from_config(config: &RecorderConfig) -> Self {
        Self {
            output_dir: PathBuf::from(&config.path),
            fps: config.fps,
            resolution: config.resolution,
            video_encoding: config.video_encoding,
            keep_journal: config.keep_journal,
            keep_images: config.keep_images,
            save_metadata: config.save_metadata,
        }
    }

    pub fn journal_dir(&self) -> PathBuf {
        self.output_dir.join("journal")
    }

    /// Whether MP4 output is both requested and compiled in
    pub fn encodes_video(&self) -> bool {
        self.video_encoding && cfg!(all(target_os = "linux", feature = "video_encoding"))
    }
}

/// A finalized (or recovered) journal waiting to become evidence
#[derive(Debug, Clone)]
pub struct ExportJob {
    pub clip_id: String,
    pub journal: PathBuf,
    pub header: JournalHeader,
    pub triggered_at: Option<SystemTime>,
    pub recovered: bool,
}

impl From<&ClipSummary> for ExportJob {
    fn from(summary: &ClipSummary) -> Self {
        Self {
            clip_id: summary.info.clip_id.clone(),
            journal: summary.journal.path.clone(),
            header: summary.journal.header.clone(),
            triggered_at: Some(summary.info.triggered_at),
            recovered: false,
        }
    }
}

/// Files produced by one export
#[derive(Debug, Clone, Default)]
pub struct ExportReport {
    pub clip_id: String,
    pub video: Option<PathBuf>,
    pub journal: Option<PathBuf>,
    pub images: Vec<PathBuf>,
    pub metadata: Option<PathBuf>,
}

impl ExportReport {
    pub fn outputs(&self) -> Vec<PathBuf> {
        self.video
            .iter()
            .chain(self.journal.iter())
            .chain(self.images.iter())
            .cloned()
            .collect()
    }
}

pub type ExportQueue = mpsc::UnboundedSender<ExportJob>;

/// Background export worker and its queue
pub struct Exporter {
    queue: Option<ExportQueue>,
    handle: JoinHandle<usize>,
}

impl Exporter {
    /// Spawn the worker on the current runtime
    pub fn spawn(settings: ExportSettings) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(export_worker(rx, settings));
        Self {
            queue: Some(tx),
            handle,
        }
    }

    pub fn queue(&self) -> Option<ExportQueue> {
        self.queue.clone()
    }

    /// Close the queue and wait up to `timeout` for queued exports.
    ///
    /// Every other queue handle must have been dropped for the worker to see
    /// the end of the queue. Returns the number of exports completed.
    pub async fn drain(mut self, timeout: Duration) -> Option<usize> {
        self.queue.take();
        info!("Waiting for queued clip exports");

        match tokio::time::timeout(timeout, &mut self.handle).await {
            Ok(Ok(done)) => Some(done),
            Ok(Err(e)) => {
                error!("Export worker failed: {}", e);
                None
            }
            Err(_) => {
                warn!(
                    "Clip exports still running after {:?}; remaining journals are recovered on next start",
                    timeout
                );
                self.handle.abort();
                None
            }
        }
    }
}

/// Background worker that turns journals into evidence files
pub async fn export_worker(mut rx: mpsc::UnboundedReceiver<ExportJob>, settings: ExportSettings) -> usize {
    info!(
        output = %settings.output_dir.display(),
        video = settings.encodes_video(),
        "Clip export worker started"
    );

    let mut completed = 0;
    while let Some(job) = rx.recv().await {
        let clip_id = job.clip_id.clone();
        match export_clip(&job, &settings).await {
            Ok(report) => {
                completed += 1;
                info!(
                    clip = %clip_id,
                    outputs = report.outputs().len(),
                    "Clip export completed"
                );
            }
            Err(e) => error!(clip = %clip_id, "Clip export failed: {}", e),
        }
    }

    info!("Clip export worker stopped");
    completed
}

/// Queue every journal left behind by a previous run
pub async fn recover_journals(
    journal_dir: &Path,
    queue: &ExportQueue,
) -> Result<usize, RecordingError> {
    let journals = find_journals(journal_dir).await?;
    if journals.is_empty() {
        debug!("No clip journals to recover");
        return Ok(0);
    }

    info!("Found {} clip journal(s) to recover", journals.len());

    let mut queued = 0;
    for path in journals {
        let header = match ClipReader::open(&path).await {
            Ok(reader) => reader.header().clone(),
            Err(e) => {
                warn!(path = %path.display(), "Skipping unreadable clip journal: {}", e);
                continue;
            }
        };

        let job = ExportJob {
            clip_id: clip_id_of(&path),
            journal: path,
            header,
            triggered_at: None,
            recovered: true,
        };

        if queue.send(job).is_err() {
            return Err(RecordingError::export("export queue closed during recovery"));
        }
        queued += 1;
    }

    Ok(queued)
}

/// Produce the evidence for one journal
pub async fn export_clip(job: &ExportJob, settings: &ExportSettings) -> Result<ExportReport, RecordingError> {
    let mut report = ExportReport {
        clip_id: job.clip_id.clone(),
        ..ExportReport::default()
    };

    let (header, frames) = read_journal(&job.journal).await?;
    debug!(clip = %job.clip_id, frames = frames.len(), "Exporting clip");

    tokio::fs::create_dir_all(&settings.output_dir)
        .await
        .map_err(|source| RecordingError::DirectoryCreation {
            path: settings.output_dir.display().to_string(),
            source,
        })?;

    if settings.keep_images && !frames.is_empty() {
        let frames_dir = settings.output_dir.join(&job.clip_id).join("frames");
        report.images = extract_images(&frames, &frames_dir).await?;
    }

    let mut keep_journal = true;
    if settings.encodes_video() && !frames.is_empty() {
        let video_path = settings.output_dir.join(format!("{}.mp4", job.clip_id));
        match encode_video(frames.clone(), video_path.clone(), settings.fps, settings.resolution).await {
            Ok(()) => {
                report.video = Some(video_path);
                keep_journal = settings.keep_journal;
            }
            Err(e) => warn!(clip = %job.clip_id, "Video encoding failed, keeping journal: {}", e),
        }
    }

    if keep_journal {
        let target = settings
            .output_dir
            .join(format!("{}.{}", job.clip_id, JOURNAL_EXTENSION));
        move_file(&job.journal, &target).await?;
        report.journal = Some(target);
    } else {
        super::journal::delete_journal(&job.journal).await?;
    }

    if settings.save_metadata {
        let metadata = ClipMetadata {
            clip_id: job.clip_id.clone(),
            camera_id: header.camera_id.clone(),
            triggered_at: job.triggered_at.map(DateTime::<Utc>::from),
            first_frame_at: frames.first().map(|f| DateTime::<Utc>::from(f.timestamp)),
            last_frame_at: frames.last().map(|f| DateTime::<Utc>::from(f.timestamp)),
            pre_event_frames: header.pre_event_frames,
            live_frames: header.frame_count.saturating_sub(header.pre_event_frames),
            total_frames: header.frame_count,
            fps: header.fps,
            resolution: settings.resolution,
            outputs: report.outputs(),
            recovered: job.recovered,
        };
        match save_metadata(&metadata, &settings.output_dir).await {
            Ok(path) => report.metadata = Some(path),
            Err(e) => warn!(clip = %job.clip_id, "Failed to save metadata: {}", e),
        }
    }

    Ok(report)
}

/// Write each frame as `<dir>/<index>.jpg`
pub async fn extract_images(frames: &[FrameData], dir: &Path) -> Result<Vec<PathBuf>, RecordingError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| RecordingError::DirectoryCreation {
            path: dir.display().to_string(),
            source,
        })?;

    let mut written = Vec::with_capacity(frames.len());
    for (index, frame) in frames.iter().enumerate() {
        let path = dir.join(format!("{:05}.jpg", index));
        tokio::fs::write(&path, frame.jpeg.as_slice())
            .await
            .map_err(|e| RecordingError::export(format!("failed to write {}: {}", path.display(), e)))?;
        written.push(path);
    }

    debug!("Extracted {} frames to {}", written.len(), dir.display());
    Ok(written)
}

/// Rename, falling back to copy and delete across file systems
async fn move_file(from: &Path, to: &Path) -> Result<(), RecordingError> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }

    tokio::fs::copy(from, to).await.map_err(|e| {
        RecordingError::export(format!(
            "failed to move {} to {}: {}",
            from.display(),
            to.display(),
            e
        ))
    })?;
    tokio::fs::remove_file(from).await.map_err(|e| {
        RecordingError::export(format!("failed to remove {}: {}", from.display(), e))
    })?;
    Ok(())
}

/// Encode frames to an H.264 MP4 at a fixed frame rate and resolution
pub async fn encode_video(
    frames: Vec<FrameData>,
    video_path: PathBuf,
    fps: u32,
    resolution: (u32, u32),
) -> Result<(), RecordingError> {
    #[cfg(all(target_os = "linux", feature = "video_encoding"))]
    {
        return run_on_encoder_thread(move || {
            encode_with_gstreamer(&frames, &video_path, fps, resolution)
        })
        .await?;
    }

    #[cfg(not(all(target_os = "linux", feature = "video_encoding")))]
    {
        let _ = (frames, video_path, fps, resolution);
        return Err(RecordingError::export(
            "video encoding not available in this build",
        ));
    }
}

/// Run `job` on a short-lived thread of its own and await the result.
///
/// The encoder lowers its thread's priority, so it must not borrow a thread
/// from the blocking pool that also serves journal writes.
#[cfg(any(test, all(target_os = "linux", feature = "video_encoding")))]
pub(super) async fn run_on_encoder_thread<T, F>(job: F) -> Result<T, RecordingError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, RecordingError> + Send + 'static,
{
    let (tx, rx) = tokio::sync::oneshot::channel();
    std::thread::Builder::new()
        .name("clip-encoder".to_string())
        .spawn(move || {
            let _ = tx.send(job());
        })
        .map_err(|e| RecordingError::export(format!("failed to start encoder thread: {}", e)))?;

    rx.await
        .map_err(|_| RecordingError::export("encoder thread exited without a result"))?
}

#[cfg(all(target_os = "linux", feature = "video_encoding"))]
fn encode_with_gstreamer(
    frames: &[FrameData],
    video_path: &Path,
    fps: u32,
    resolution: (u32, u32),
) -> Result<(), RecordingError> {
    use gstreamer::Pipeline;
    use gstreamer_app::AppSrc;

    // Lower priority for this (dedicated) thread only
    {
        use libc::{setpriority, PRIO_PROCESS};
        let _ = unsafe { setpriority(PRIO_PROCESS as u32, 0, 10) };
    }

    gstreamer::init()
        .map_err(|e| RecordingError::export(format!("failed to initialize GStreamer: {}", e)))?;

    let fps = fps.max(1);
    let pipeline_desc = format!(
        "appsrc name=src format=time is-live=false caps=image/jpeg,framerate={fps}/1 ! \
         jpegparse ! jpegdec ! videoconvert ! videoscale ! videorate ! \
         video/x-raw,format=I420,width={w},height={h},framerate={fps}/1 ! \
         x264enc speed-preset=medium key-int-max={gop} ! \
         video/x-h264,profile=high ! h264parse ! \
         mp4mux faststart=true ! filesink location={path}",
        fps = fps,
        w = resolution.0,
        h = resolution.1,
        gop = fps * 2,
        path = video_path.to_string_lossy()
    );
    debug!("Export pipeline: {}", pipeline_desc);

    let pipeline = gstreamer::parse::launch(&pipeline_desc)
        .map_err(|e| RecordingError::export(format!("failed to create pipeline: {}", e)))?
        .downcast::<Pipeline>()
        .map_err(|_| RecordingError::export("failed to downcast to Pipeline"))?;

    let appsrc = pipeline
        .by_name("src")
        .ok_or_else(|| RecordingError::export("pipeline has no appsrc"))?
        .downcast::<AppSrc>()
        .map_err(|_| RecordingError::export("failed to downcast to AppSrc"))?;

    pipeline
        .set_state(gstreamer::State::Playing)
        .map_err(|e| RecordingError::export(format!("failed to start pipeline: {}", e)))?;

    let nanos = |t: SystemTime| {
        t.duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_nanos() as u64
    };
    let default_duration = 1_000_000_000 / fps as u64;
    let base = frames.first().map(|f| nanos(f.timestamp)).unwrap_or(0);

    for (index, frame) in frames.iter().enumerate() {
        let pts = nanos(frame.timestamp).saturating_sub(base);
        let duration = frames
            .get(index + 1)
            .map(|next| nanos(next.timestamp).saturating_sub(nanos(frame.timestamp)))
            .filter(|d| *d > 0)
            .unwrap_or(default_duration);

        let mut buffer = gstreamer::Buffer::from_mut_slice(frame.jpeg.to_vec());
        if let Some(buffer_ref) = buffer.get_mut() {
            buffer_ref.set_pts(gstreamer::ClockTime::from_nseconds(pts));
            buffer_ref.set_duration(gstreamer::ClockTime::from_nseconds(duration));
        }

        appsrc
            .push_buffer(buffer)
            .map_err(|e| RecordingError::export(format!("failed to push buffer: {:?}", e)))?;
    }

    appsrc
        .end_of_stream()
        .map_err(|e| RecordingError::export(format!("failed to signal EOS: {:?}", e)))?;

    let bus = pipeline
        .bus()
        .ok_or_else(|| RecordingError::export("pipeline has no bus"))?;
    let mut outcome = Err(RecordingError::export("timed out waiting for encoder"));
    for msg in bus.iter_timed(gstreamer::ClockTime::from_seconds(60)) {
        match msg.view() {
            gstreamer::MessageView::Eos(..) => {
                outcome = Ok(());
                break;
            }
            gstreamer::MessageView::Error(err) => {
                outcome = Err(RecordingError::export(format!(
                    "encoder error: {} ({})",
                    err.error(),
                    err.debug().map(|d| d.to_string()).unwrap_or_default()
                )));
                break;
            }
            _ => {}
        }
    }

    let _ = pipeline.set_state(gstreamer::State::Null);
    if outcome.is_ok() {
        info!(
            frames = frames.len(),
            path = %video_path.display(),
            "Encoded clip video"
        );
    }
    outcome
}
