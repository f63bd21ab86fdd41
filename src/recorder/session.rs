use super::journal::{ClipJournal, FinalizedJournal, JournalHeader};
use crate::error::RecordingError;
use crate::frame::FrameData;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info};

/// Identity of a clip at the moment its recording starts
#[derive(Debug, Clone, PartialEq)]
pub struct ClipInfo {
    pub clip_id: String,
    pub camera_id: String,
    /// Timestamp of the frame that triggered the recording
    pub triggered_at: SystemTime,
    pub end_time: SystemTime,
    pub pre_event_frames: u32,
}

/// A finished recording whose journal is closed and ready for export
#[derive(Debug, Clone)]
pub struct ClipSummary {
    pub info: ClipInfo,
    pub finished_at: SystemTime,
    pub total_frames: u32,
    pub journal: FinalizedJournal,
}

impl ClipSummary {
    pub fn live_frames(&self) -> u32 {
        self.total_frames.saturating_sub(self.info.pre_event_frames)
    }
}

/// Clip id `YYYYmmdd_HHMMSS_mmm_<camera>` from the trigger time (UTC)
pub fn clip_id_for(triggered_at: SystemTime, camera_id: &str) -> String {
    let stamp = DateTime::<Utc>::from(triggered_at).format("%Y%m%d_%H%M%S_%3f");
    format!("{}_{}", stamp, camera_slug(camera_id))
}

/// Camera identity reduced to characters safe in file names
pub fn camera_slug(camera_id: &str) -> String {
    let slug: String = camera_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    let slug = slug.trim_matches('_');
    if slug.is_empty() {
        "camera".to_string()
    } else {
        slug.to_string()
    }
}

/// An open recording: a journal plus the time it must stop
pub struct RecordingSession {
    info: ClipInfo,
    journal: ClipJournal,
}

impl RecordingSession {
    /// Open a journal for `trigger`, flush `pre_event` into it, then the
    /// trigger frame itself
    pub async fn start(
        journal_dir: &Path,
        fps: u32,
        duration: Duration,
        pre_event: Vec<FrameData>,
        trigger: &FrameData,
    ) -> Result<Self, RecordingError> {
        let clip_id = clip_id_for(trigger.timestamp, &trigger.camera_id);
        let header = JournalHeader::new(&trigger.camera_id, fps, trigger.width, trigger.height);
        let mut journal = ClipJournal::create(journal_dir, &clip_id, header).await?;

        for frame in &pre_event {
            journal.append(frame).await?;
        }
        journal.mark_pre_event();
        journal.append(trigger).await?;

        let info = ClipInfo {
            clip_id,
            camera_id: trigger.camera_id.clone(),
            triggered_at: trigger.timestamp,
            end_time: trigger.timestamp + duration,
            pre_event_frames: pre_event.len() as u32,
        };

        info!(
            clip = %info.clip_id,
            camera = %info.camera_id,
            pre_event = info.pre_event_frames,
            "Recording started"
        );

        Ok(Self { info, journal })
    }

    /// Whether the session must end at `now`
    pub fn is_due(&self, now: SystemTime) -> bool {
        now >= self.info.end_time
    }

    pub async fn append(&mut self, frame: &FrameData) -> Result<(), RecordingError> {
        self.journal.append(frame).await
    }

    pub async fn finish(self, now: SystemTime) -> Result<ClipSummary, RecordingError> {
        let total_frames = self.journal.frame_count();
        let journal = self.journal.finalize().await?;

        debug!(clip = %self.info.clip_id, total_frames, "Recording stopped");

        Ok(ClipSummary {
            info: self.info,
            finished_at: now,
            total_frames,
            journal,
        })
    }

    pub fn info(&self) -> &ClipInfo {
        &self.info
    }

    pub fn journal_path(&self) -> PathBuf {
        self.journal.path().to_path_buf()
    }

    pub fn frame_count(&self) -> u32 {
        self.journal.frame_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_id_format() {
        let at = SystemTime::UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);
        assert_eq!(clip_id_for(at, "Front Door"), "20231114_221320_123_Front_Door");
    }

    #[test]
    fn test_camera_slug() {
        assert_eq!(camera_slug("cam-01"), "cam-01");
        assert_eq!(camera_slug("../etc/passwd"), "etc_passwd");
        assert_eq!(camera_slug("Cámara desconocida"), "C_mara_desconocida");
        assert_eq!(camera_slug("///"), "camera");
    }
}
