use super::export::{ExportJob, ExportQueue};
use super::session::{ClipInfo, ClipSummary, RecordingSession};
use crate::config::RecorderConfig;
use crate::error::{RecordingError, VigilError};
use crate::frame::FrameData;
use crate::ring_buffer::{FrameBuffer, FrameBufferBuilder, FrameBufferStats};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Recording,
}

/// Transitions caused by one frame
#[derive(Debug, Default)]
pub struct RecorderStep {
    pub started: Option<ClipInfo>,
    pub finished: Option<ClipSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecorderStats {
    pub clips_started: u64,
    pub clips_finished: u64,
    pub frames_recorded: u64,
    /// Triggers absorbed by an ongoing recording
    pub triggers_absorbed: u64,
    pub write_failures: u64,
}

/// Pre-event buffer plus an Idle/Recording state machine.
///
/// The buffer is fed with every frame regardless of state. A trigger while
/// Idle opens a journal seeded with the buffered frames; while Recording
/// every frame is appended until `recording_seconds` after the trigger.
/// Triggers during a recording neither open a second clip nor extend it.
pub struct EventRecorder {
    buffer: FrameBuffer,
    session: Option<RecordingSession>,
    exports: Option<ExportQueue>,
    journal_dir: PathBuf,
    fps: u32,
    duration: Duration,
    stats: RecorderStats,
}

impl EventRecorder {
    pub fn new(
        buffer: FrameBuffer,
        journal_dir: impl Into<PathBuf>,
        fps: u32,
        duration: Duration,
        exports: Option<ExportQueue>,
    ) -> Self {
        Self {
            buffer,
            session: None,
            exports,
            journal_dir: journal_dir.into(),
            fps,
            duration,
            stats: RecorderStats::default(),
        }
    }

    pub fn from_config(
        config: &RecorderConfig,
        exports: Option<ExportQueue>,
    ) -> Result<Self, VigilError> {
        let buffer = FrameBufferBuilder::new()
            .fps(config.fps)
            .pre_event_seconds(config.pre_event_seconds)
            .build()?;

        Ok(Self::new(
            buffer,
            Path::new(&config.path).join("journal"),
            config.fps,
            Duration::from_secs(config.recording_seconds as u64),
            exports,
        ))
    }

    pub fn state(&self) -> RecorderState {
        if self.session.is_some() {
            RecorderState::Recording
        } else {
            RecorderState::Idle
        }
    }

    /// Feed one frame; `triggered` is whether this frame's alert set is non-empty.
    ///
    /// The frame time is the clock of the state machine. The frame always ends
    /// up in the pre-event buffer. On a write failure the open recording is
    /// closed as far as possible and the error returned; the recorder is Idle
    /// afterwards.
    pub async fn on_frame(
        &mut self,
        frame: FrameData,
        triggered: bool,
    ) -> Result<RecorderStep, RecordingError> {
        let outcome = self.advance(&frame, triggered).await;
        self.buffer.push(frame);
        outcome
    }

    async fn advance(
        &mut self,
        frame: &FrameData,
        triggered: bool,
    ) -> Result<RecorderStep, RecordingError> {
        let now = frame.timestamp;
        let mut step = RecorderStep::default();

        step.finished = self.close_due(now).await?;

        match self.session.as_mut() {
            Some(session) => {
                if triggered {
                    self.stats.triggers_absorbed += 1;
                    debug!(clip = %session.info().clip_id, "Trigger absorbed by ongoing recording");
                }
                if let Err(e) = session.append(frame).await {
                    self.abort(now).await;
                    return Err(e);
                }
                self.stats.frames_recorded += 1;
            }
            None if triggered => {
                let pre_event = self.buffer.snapshot();
                let pre_event_count = pre_event.len() as u64;
                let session = RecordingSession::start(
                    &self.journal_dir,
                    self.fps,
                    self.duration,
                    pre_event,
                    frame,
                )
                .await
                .inspect_err(|_| self.stats.write_failures += 1)?;

                self.stats.clips_started += 1;
                self.stats.frames_recorded += pre_event_count + 1;
                step.started = Some(session.info().clone());
                self.session = Some(session);
            }
            None => {}
        }

        Ok(step)
    }

    /// Close the open recording if its window has passed at `now`.
    ///
    /// Called for every frame and from a timer, so a camera that goes quiet
    /// after a trigger still gets its clip finalized and exported.
    pub async fn close_due(&mut self, now: SystemTime) -> Result<Option<ClipSummary>, RecordingError> {
        if !self.session.as_ref().is_some_and(|s| s.is_due(now)) {
            return Ok(None);
        }
        match self.session.take() {
            Some(session) => {
                let summary = session.finish(now).await;
                self.complete(summary).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Finalize any open recording; used on every exit path
    pub async fn shutdown(&mut self, now: SystemTime) -> Result<Option<ClipSummary>, RecordingError> {
        match self.session.take() {
            Some(session) => {
                info!(clip = %session.info().clip_id, "Finalizing recording on shutdown");
                let summary = session.finish(now).await;
                self.complete(summary).map(Some)
            }
            None => Ok(None),
        }
    }

    fn complete(
        &mut self,
        summary: Result<ClipSummary, RecordingError>,
    ) -> Result<ClipSummary, RecordingError> {
        let summary = summary.inspect_err(|_| self.stats.write_failures += 1)?;
        self.stats.clips_finished += 1;

        info!(
            clip = %summary.info.clip_id,
            camera = %summary.info.camera_id,
            frames = summary.total_frames,
            pre_event = summary.info.pre_event_frames,
            "Recording finished"
        );

        self.queue_export(ExportJob::from(&summary));
        Ok(summary)
    }

    /// Best-effort close after a failed write
    async fn abort(&mut self, now: SystemTime) {
        self.stats.write_failures += 1;
        let Some(session) = self.session.take() else {
            return;
        };

        let clip_id = session.info().clip_id.clone();
        match session.finish(now).await {
            Ok(summary) => {
                warn!(clip = %clip_id, frames = summary.total_frames, "Recording cut short by write failure");
                self.stats.clips_finished += 1;
                self.queue_export(ExportJob::from(&summary));
            }
            Err(e) => error!(
                clip = %clip_id,
                "Failed to finalize recording, journal left for recovery: {}", e
            ),
        }
    }

    fn queue_export(&self, job: ExportJob) {
        let Some(queue) = &self.exports else {
            debug!(clip = %job.clip_id, "No export worker, journal kept in place");
            return;
        };
        let clip_id = job.clip_id.clone();
        if queue.send(job).is_err() {
            warn!(clip = %clip_id, "Export queue closed, journal left for recovery");
        }
    }

    pub fn session(&self) -> Option<&ClipInfo> {
        self.session.as_ref().map(|s| s.info())
    }

    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    pub fn buffer_stats(&self) -> FrameBufferStats {
        self.buffer.stats()
    }

    pub fn stats(&self) -> &RecorderStats {
        &self.stats
    }

    pub fn journal_dir(&self) -> &Path {
        &self.journal_dir
    }
}
