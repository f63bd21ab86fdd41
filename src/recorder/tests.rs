use super::export::run_on_encoder_thread;
use super::*;
use crate::config::RecorderConfig;
use crate::error::RecordingError;
use crate::frame::test_support::frame_at;
use crate::ring_buffer::FrameBuffer;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

fn test_recorder(dir: &Path, exports: Option<ExportQueue>) -> EventRecorder {
    // 4 frames of pre-event footage, 1s of live capture
    EventRecorder::new(FrameBuffer::new(4), dir.join("journal"), 2, Duration::from_secs(1), exports)
}

fn test_config(dir: &Path, shard_by_camera: bool) -> RecorderConfig {
    RecorderConfig {
        fps: 2,
        pre_event_seconds: 2,
        recording_seconds: 1,
        path: dir.to_string_lossy().to_string(),
        resolution: (32, 24),
        video_encoding: false,
        keep_journal: false,
        keep_images: true,
        save_metadata: true,
        shard_by_camera,
    }
}

fn test_settings(dir: &Path) -> ExportSettings {
    ExportSettings::from_config(&test_config(dir, false))
}

#[tokio::test]
async fn test_trigger_flushes_buffer_before_live_frames() {
    let temp_dir = TempDir::new().unwrap();
    let mut recorder = test_recorder(temp_dir.path(), None);

    for id in 0..6 {
        let step = recorder.on_frame(frame_at(id, id * 100, "cam"), false).await.unwrap();
        assert!(step.started.is_none());
    }
    assert_eq!(recorder.state(), RecorderState::Idle);

    let step = recorder.on_frame(frame_at(6, 600, "cam"), true).await.unwrap();
    let started = step.started.expect("recording should start");
    assert_eq!(started.pre_event_frames, 4);
    assert_eq!(recorder.state(), RecorderState::Recording);

    let mut finished = None;
    for id in 7..=16 {
        let step = recorder.on_frame(frame_at(id, id * 100, "cam"), false).await.unwrap();
        if let Some(summary) = step.finished {
            finished = Some((id, summary));
        }
    }

    let (finished_on, summary) = finished.expect("recording should finish");
    assert_eq!(finished_on, 16);
    assert_eq!(recorder.state(), RecorderState::Idle);
    assert_eq!(summary.total_frames, 14);
    assert_eq!(summary.live_frames(), 10);

    let (header, frames) = read_journal(&summary.journal.path).await.unwrap();
    assert_eq!(header.frame_count, 14);
    assert_eq!(header.pre_event_frames, 4);
    let ids: Vec<u64> = frames.iter().map(|f| f.id).collect();
    assert_eq!(ids, (2..=15).collect::<Vec<u64>>());
}

#[tokio::test]
async fn test_second_trigger_is_absorbed() {
    let temp_dir = TempDir::new().unwrap();
    let mut recorder = test_recorder(temp_dir.path(), None);

    let first = recorder.on_frame(frame_at(0, 0, "cam"), true).await.unwrap();
    let info = first.started.unwrap();

    let second = recorder.on_frame(frame_at(1, 500, "cam"), true).await.unwrap();
    assert!(second.started.is_none());
    assert_eq!(recorder.session().map(|s| s.end_time), Some(info.end_time));
    assert_eq!(recorder.stats().triggers_absorbed, 1);

    // Ends one second after the first trigger, not the second
    let step = recorder.on_frame(frame_at(2, 1000, "cam"), false).await.unwrap();
    assert!(step.finished.is_some());
    assert_eq!(recorder.stats().clips_started, 1);

    let journals = find_journals(&temp_dir.path().join("journal")).await.unwrap();
    assert_eq!(journals.len(), 1);
}

#[tokio::test]
async fn test_trigger_on_closing_frame_starts_new_clip() {
    let temp_dir = TempDir::new().unwrap();
    let mut recorder = test_recorder(temp_dir.path(), None);

    recorder.on_frame(frame_at(0, 0, "cam"), true).await.unwrap();
    let step = recorder.on_frame(frame_at(1, 1000, "cam"), true).await.unwrap();

    assert!(step.finished.is_some());
    assert!(step.started.is_some());
    assert_eq!(recorder.state(), RecorderState::Recording);
    assert_eq!(recorder.stats().clips_started, 2);
}

#[tokio::test]
async fn test_shutdown_finalizes_open_recording() {
    let temp_dir = TempDir::new().unwrap();
    let mut recorder = test_recorder(temp_dir.path(), None);

    recorder.on_frame(frame_at(0, 0, "cam"), false).await.unwrap();
    recorder.on_frame(frame_at(1, 100, "cam"), true).await.unwrap();
    recorder.on_frame(frame_at(2, 200, "cam"), false).await.unwrap();

    let summary = recorder
        .shutdown(frame_at(3, 300, "cam").timestamp)
        .await
        .unwrap()
        .expect("open recording");
    assert_eq!(recorder.state(), RecorderState::Idle);

    let reader = ClipReader::open(&summary.journal.path).await.unwrap();
    assert!(reader.is_finalized());
    assert_eq!(reader.header().frame_count, 3);
    assert_eq!(reader.header().pre_event_frames, 1);

    assert!(recorder.shutdown(summary.finished_at).await.unwrap().is_none());
}

#[tokio::test]
async fn test_start_failure_leaves_recorder_idle() {
    let temp_dir = TempDir::new().unwrap();
    let blocker = temp_dir.path().join("not_a_dir");
    std::fs::write(&blocker, b"file").unwrap();

    let mut recorder =
        EventRecorder::new(FrameBuffer::new(4), blocker.join("journal"), 2, Duration::from_secs(1), None);

    assert!(recorder.on_frame(frame_at(0, 0, "cam"), true).await.is_err());
    assert_eq!(recorder.state(), RecorderState::Idle);
    assert_eq!(recorder.stats().write_failures, 1);
    assert_eq!(recorder.buffer().len(), 1);

    recorder.on_frame(frame_at(1, 100, "cam"), false).await.unwrap();
    assert_eq!(recorder.buffer().len(), 2);
}

#[tokio::test]
async fn test_finished_clip_is_exported() {
    let temp_dir = TempDir::new().unwrap();
    let settings = test_settings(temp_dir.path());
    let exporter = Exporter::spawn(settings.clone());

    let mut recorder = test_recorder(temp_dir.path(), exporter.queue());
    recorder.on_frame(frame_at(0, 0, "Front Door"), false).await.unwrap();
    let started = recorder
        .on_frame(frame_at(1, 100, "Front Door"), true)
        .await
        .unwrap()
        .started
        .unwrap();
    recorder.on_frame(frame_at(2, 600, "Front Door"), false).await.unwrap();
    let finished = recorder.on_frame(frame_at(3, 1100, "Front Door"), false).await.unwrap();
    assert!(finished.finished.is_some());
    drop(recorder);

    assert_eq!(exporter.drain(Duration::from_secs(10)).await, Some(1));

    let clip_id = started.clip_id;
    assert!(clip_id.ends_with("_Front_Door"));
    let evidence = temp_dir.path().join(format!("{}.{}", clip_id, JOURNAL_EXTENSION));
    assert!(evidence.exists());
    assert!(!settings.journal_dir().join(format!("{}.clip", clip_id)).exists());

    let images = std::fs::read_dir(temp_dir.path().join(&clip_id).join("frames"))
        .unwrap()
        .count();
    assert_eq!(images, 3);

    let json = std::fs::read_to_string(metadata_path(temp_dir.path(), &clip_id)).unwrap();
    let metadata: ClipMetadata = serde_json::from_str(&json).unwrap();
    assert_eq!(metadata.camera_id, "Front Door");
    assert_eq!(metadata.pre_event_frames, 1);
    assert_eq!(metadata.live_frames, 2);
    assert_eq!(metadata.total_frames, 3);
    assert!(!metadata.recovered);
    assert!(metadata.outputs.contains(&evidence));
}

#[tokio::test]
async fn test_leftover_journals_are_recovered() {
    let temp_dir = TempDir::new().unwrap();
    let journal_dir = temp_dir.path().join("journal");

    let mut recorder = test_recorder(temp_dir.path(), None);
    recorder.on_frame(frame_at(0, 0, "cam"), true).await.unwrap();
    let summary = recorder
        .shutdown(frame_at(1, 100, "cam").timestamp)
        .await
        .unwrap()
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    assert_eq!(recover_journals(&journal_dir, &tx).await.unwrap(), 1);

    let job = rx.recv().await.unwrap();
    assert!(job.recovered);
    assert!(job.triggered_at.is_none());
    assert_eq!(job.clip_id, summary.info.clip_id);
    assert_eq!(job.header.frame_count, 1);

    let report = export_clip(&job, &test_settings(temp_dir.path())).await.unwrap();
    assert!(report.journal.is_some());
    assert!(find_journals(&journal_dir).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_recover_empty_directory() {
    let temp_dir = TempDir::new().unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();
    assert_eq!(
        recover_journals(&temp_dir.path().join("missing"), &tx).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn test_shared_bank_interleaves_cameras() {
    let temp_dir = TempDir::new().unwrap();
    let mut bank = RecorderBank::new(&test_config(temp_dir.path(), false), None).unwrap();
    assert_eq!(bank.layout(), RecorderLayout::Shared);

    let a = bank.on_frame(frame_at(0, 0, "north"), true).await.unwrap();
    let b = bank.on_frame(frame_at(1, 100, "south"), true).await.unwrap();
    assert!(a.started.is_some());
    assert!(b.started.is_none());

    let finished = bank.shutdown(frame_at(2, 200, "north").timestamp).await;
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].total_frames, 2);
}

#[tokio::test]
async fn test_sharded_bank_records_per_camera() {
    let temp_dir = TempDir::new().unwrap();
    let mut bank = RecorderBank::new(&test_config(temp_dir.path(), true), None).unwrap();
    assert_eq!(bank.layout(), RecorderLayout::PerCamera);

    bank.on_frame(frame_at(0, 0, "north"), false).await.unwrap();
    let a = bank.on_frame(frame_at(1, 100, "north"), true).await.unwrap();
    let b = bank.on_frame(frame_at(2, 100, "south"), true).await.unwrap();
    assert!(a.started.is_some());
    assert_eq!(b.started.as_ref().map(|s| s.pre_event_frames), Some(0));
    assert!(bank.is_recording());

    let finished = bank.shutdown(frame_at(3, 200, "north").timestamp).await;
    assert_eq!(finished.len(), 2);
    assert_eq!(bank.stats().clips_finished, 2);
    assert!(!bank.is_recording());
}

#[tokio::test]
async fn test_quiet_recorder_closes_on_timer() {
    let temp_dir = TempDir::new().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut recorder = test_recorder(temp_dir.path(), Some(tx));

    let started = recorder.on_frame(frame_at(0, 0, "cam"), true).await.unwrap();
    let info = started.started.unwrap();

    assert!(recorder.close_due(frame_at(1, 500, "cam").timestamp).await.unwrap().is_none());
    assert_eq!(recorder.state(), RecorderState::Recording);

    let summary = recorder
        .close_due(frame_at(2, 1_500, "cam").timestamp)
        .await
        .unwrap()
        .expect("window has passed");
    assert_eq!(summary.info.clip_id, info.clip_id);
    assert_eq!(summary.total_frames, 1);
    assert_eq!(recorder.state(), RecorderState::Idle);
    assert_eq!(recorder.stats().clips_finished, 1);

    let job = rx.try_recv().unwrap();
    assert_eq!(job.clip_id, info.clip_id);
    assert!(recorder.close_due(frame_at(3, 2_000, "cam").timestamp).await.unwrap().is_none());
}

#[tokio::test]
async fn test_sharded_bank_closes_quiet_camera() {
    let temp_dir = TempDir::new().unwrap();
    let mut bank = RecorderBank::new(&test_config(temp_dir.path(), true), None).unwrap();

    bank.on_frame(frame_at(0, 0, "north"), true).await.unwrap();
    for id in 1..=100 {
        bank.on_frame(frame_at(id, id * 100, "south"), false).await.unwrap();
    }

    // Frames for other cameras never reach the north recorder
    assert_eq!(
        bank.recorder("north").map(|r| r.state()),
        Some(RecorderState::Recording)
    );

    let finished = bank.close_due(frame_at(101, 10_000, "south").timestamp).await;
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].info.camera_id, "north");
    assert!(!bank.is_recording());
    assert!(bank.close_due(frame_at(102, 10_100, "south").timestamp).await.is_empty());
}

#[tokio::test]
async fn test_encoder_runs_on_its_own_thread() {
    let name = run_on_encoder_thread(|| Ok(std::thread::current().name().map(str::to_string)))
        .await
        .unwrap();
    assert_eq!(name.as_deref(), Some("clip-encoder"));

    let failed: Result<(), _> =
        run_on_encoder_thread(|| Err(RecordingError::export("pipeline error"))).await;
    assert!(matches!(failed, Err(RecordingError::Export { .. })));
}
