use super::core::{EventRecorder, RecorderStats, RecorderStep};
use super::export::ExportQueue;
use super::session::ClipSummary;
use crate::config::RecorderConfig;
use crate::error::VigilError;
use crate::frame::FrameData;
use std::collections::HashMap;
use std::time::SystemTime;
use tracing::{debug, warn};

/// How frames map to recorders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderLayout {
    /// One buffer and recorder for every camera; concurrent incidents on
    /// different cameras end up in the same clip
    Shared,
    /// One buffer and recorder per camera identity
    PerCamera,
}

/// The node's recorders, either one shared or one per camera
pub struct RecorderBank {
    config: RecorderConfig,
    exports: Option<ExportQueue>,
    shared: Option<EventRecorder>,
    per_camera: HashMap<String, EventRecorder>,
}

impl RecorderBank {
    pub fn new(config: &RecorderConfig, exports: Option<ExportQueue>) -> Result<Self, VigilError> {
        let shared = if config.shard_by_camera {
            None
        } else {
            Some(EventRecorder::from_config(config, exports.clone())?)
        };

        Ok(Self {
            config: config.clone(),
            exports,
            shared,
            per_camera: HashMap::new(),
        })
    }

    pub fn layout(&self) -> RecorderLayout {
        if self.shared.is_some() {
            RecorderLayout::Shared
        } else {
            RecorderLayout::PerCamera
        }
    }

    fn recorder_for(&mut self, camera_id: &str) -> Result<&mut EventRecorder, VigilError> {
        if let Some(shared) = self.shared.as_mut() {
            return Ok(shared);
        }

        if !self.per_camera.contains_key(camera_id) {
            debug!(camera = camera_id, "Creating recorder for camera");
            let recorder = EventRecorder::from_config(&self.config, self.exports.clone())?;
            self.per_camera.insert(camera_id.to_string(), recorder);
        }

        self.per_camera
            .get_mut(camera_id)
            .ok_or_else(|| VigilError::system("recorder missing after insert"))
    }

    pub async fn on_frame(
        &mut self,
        frame: FrameData,
        triggered: bool,
    ) -> Result<RecorderStep, VigilError> {
        let recorder = self.recorder_for(&frame.camera_id)?;
        Ok(recorder.on_frame(frame, triggered).await?)
    }

    /// Close every recording whose window has passed at `now`
    pub async fn close_due(&mut self, now: SystemTime) -> Vec<ClipSummary> {
        let mut finished = Vec::new();
        let recorders = self.shared.iter_mut().chain(self.per_camera.values_mut());
        for recorder in recorders {
            match recorder.close_due(now).await {
                Ok(Some(summary)) => finished.push(summary),
                Ok(None) => {}
                Err(e) => warn!("Failed to close finished recording: {}", e),
            }
        }
        finished
    }

    /// Finalize every open recording
    pub async fn shutdown(&mut self, now: SystemTime) -> Vec<ClipSummary> {
        let mut finished = Vec::new();
        let recorders = self.shared.iter_mut().chain(self.per_camera.values_mut());
        for recorder in recorders {
            match recorder.shutdown(now).await {
                Ok(Some(summary)) => finished.push(summary),
                Ok(None) => {}
                Err(e) => warn!("Failed to finalize recording on shutdown: {}", e),
            }
        }
        finished
    }

    /// Recorder for `camera_id` if one exists
    pub fn recorder(&self, camera_id: &str) -> Option<&EventRecorder> {
        self.shared.as_ref().or_else(|| self.per_camera.get(camera_id))
    }

    pub fn is_recording(&self) -> bool {
        self.shared
            .iter()
            .chain(self.per_camera.values())
            .any(|r| r.session().is_some())
    }

    /// Statistics summed over all recorders
    pub fn stats(&self) -> RecorderStats {
        self.shared
            .iter()
            .chain(self.per_camera.values())
            .map(|r| r.stats())
            .fold(RecorderStats::default(), |mut total, s| {
                total.clips_started += s.clips_started;
                total.clips_finished += s.clips_finished;
                total.frames_recorded += s.frames_recorded;
                total.triggers_absorbed += s.triggers_absorbed;
                total.write_failures += s.write_failures;
                total
            })
    }
}

