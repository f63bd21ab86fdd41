use crate::error::RecordingError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// JSON sidecar describing an exported clip
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClipMetadata {
    pub clip_id: String,
    pub camera_id: String,
    /// Time of the triggering frame; unknown for clips recovered after a crash
    pub triggered_at: Option<DateTime<Utc>>,
    pub first_frame_at: Option<DateTime<Utc>>,
    pub last_frame_at: Option<DateTime<Utc>>,
    pub pre_event_frames: u32,
    pub live_frames: u32,
    pub total_frames: u32,
    pub fps: u32,
    pub resolution: (u32, u32),
    /// Files produced for this clip
    pub outputs: Vec<PathBuf>,
    pub recovered: bool,
}

pub fn metadata_path(output_dir: &Path, clip_id: &str) -> PathBuf {
    output_dir.join("metadata").join(format!("{}.json", clip_id))
}

pub(crate) async fn save_metadata(
    metadata: &ClipMetadata,
    output_dir: &Path,
) -> Result<PathBuf, RecordingError> {
    let json = serde_json::to_string_pretty(metadata).map_err(|e| {
        RecordingError::export(format!("failed to serialize metadata: {}", e))
    })?;

    let path = metadata_path(output_dir, &metadata.clip_id);
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .await
            .map_err(|source| RecordingError::DirectoryCreation {
                path: dir.display().to_string(),
                source,
            })?;
    }

    fs::write(&path, json).await.map_err(|e| {
        RecordingError::export(format!("failed to write {}: {}", path.display(), e))
    })?;

    debug!("Saved metadata to {}", path.display());
    Ok(path)
}
