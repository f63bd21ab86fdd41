use crate::alert::{AlertEngine, AlertSet, Observation};
use crate::config::VigilConfig;
use crate::detection::{persons, Detector, PersonSighting};
use crate::frame::FrameData;
use crate::overlay::Annotator;
use crate::publisher::{AlertEvent, AlertSink};
use crate::recorder::{ClipInfo, RecorderBank, RecorderStats};
use crate::tracking::TrackRegistry;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};

/// Counters reported periodically and on shutdown
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames: u64,
    pub decode_failures: u64,
    pub detector_failures: u64,
    pub persons: u64,
    /// Frames with a non-empty alert set
    pub alert_frames: u64,
    pub alerts_published: u64,
    pub publish_failures: u64,
    pub recording_failures: u64,
    pub tracks_evicted: u64,
}

/// What one frame did to the pipeline state
#[derive(Debug, Default)]
pub struct FrameOutcome {
    pub persons: Vec<PersonSighting>,
    pub alerts: AlertSet,
    pub recording_started: Option<ClipInfo>,
    pub recording_finished: Option<String>,
    pub alert_published: bool,
    pub evicted: usize,
}

/// Per-node processing state, threaded through every frame callback.
///
/// Touched only from the consume loop, one frame at a time.
pub struct FramePipeline {
    detector: Box<dyn Detector>,
    registry: TrackRegistry,
    engine: AlertEngine,
    annotator: Annotator,
    recorders: RecorderBank,
    sink: Box<dyn AlertSink>,
    person_label: String,
    min_confidence: f32,
    stats: PipelineStats,
}

impl FramePipeline {
    pub fn new(
        config: &VigilConfig,
        detector: Box<dyn Detector>,
        annotator: Annotator,
        recorders: RecorderBank,
        sink: Box<dyn AlertSink>,
    ) -> Self {
        Self {
            detector,
            registry: TrackRegistry::new(
                Duration::try_from_secs_f64(config.alert.staleness_seconds).unwrap_or(Duration::MAX),
            ),
            engine: AlertEngine::from_config(&config.alert),
            annotator,
            recorders,
            sink,
            person_label: config.detector.person_label.clone(),
            min_confidence: config.detector.min_confidence,
            stats: PipelineStats::default(),
        }
    }

    /// Run one decoded frame through detection, tracking, alerting,
    /// recording and publishing. Per-frame failures are logged and counted;
    /// none of them stops the pipeline.
    pub async fn handle_frame(&mut self, frame: FrameData) -> FrameOutcome {
        let now = frame.timestamp;
        let camera = frame.camera_id.clone();
        self.stats.frames += 1;

        let detections = match self.detector.detect_and_track(&frame).await {
            Ok(detections) => detections,
            Err(e) => {
                warn!(frame = frame.id, camera = %camera, "Detection failed, treating frame as empty: {}", e);
                self.stats.detector_failures += 1;
                Vec::new()
            }
        };

        let sightings = persons(&detections, &self.person_label, self.min_confidence);
        self.stats.persons += sightings.len() as u64;

        let observations: Vec<Observation> = sightings
            .iter()
            .map(|person| {
                let position = person.bbox.center();
                Observation {
                    track_id: person.track_id,
                    position,
                    moved: self.registry.update(person.track_id, position, now),
                }
            })
            .collect();

        let alerts = self.engine.evaluate(&observations);
        self.registry.mark_alerts(alerts.track_ids());
        if !alerts.is_empty() {
            self.stats.alert_frames += 1;
            for track_id in alerts.track_ids() {
                debug!(camera = %camera, track_id, reasons = ?alerts.reasons(*track_id), "Track flagged");
            }
        }

        let annotated = self.annotator.annotate_or_raw(&frame, &sightings, &alerts);

        let mut outcome = FrameOutcome::default();
        match self.recorders.on_frame(annotated, !alerts.is_empty()).await {
            Ok(step) => {
                outcome.recording_finished = step.finished.map(|summary| summary.info.clip_id);
                outcome.recording_started = step.started;
            }
            Err(e) => {
                error!(frame = frame.id, camera = %camera, "Recording failed: {}", e);
                self.stats.recording_failures += 1;
            }
        }

        if let Some(clip) = &outcome.recording_started {
            outcome.alert_published = self.publish(clip).await;
        }

        outcome.evicted = self.registry.evict_stale(now);
        self.stats.tracks_evicted += outcome.evicted as u64;

        outcome.persons = sightings;
        outcome.alerts = alerts;
        outcome
    }

    /// Best-effort publish; a failed alert is logged and dropped
    async fn publish(&mut self, clip: &ClipInfo) -> bool {
        let event = AlertEvent::aggression(clip.triggered_at, clip.camera_id.clone());
        match self.sink.publish(&event).await {
            Ok(()) => {
                info!(camera = %clip.camera_id, clip = %clip.clip_id, "Aggression alert published");
                self.stats.alerts_published += 1;
                true
            }
            Err(e) => {
                warn!(camera = %clip.camera_id, clip = %clip.clip_id, "Alert lost: {}", e);
                self.stats.publish_failures += 1;
                false
            }
        }
    }

    pub fn record_decode_failure(&mut self) {
        self.stats.decode_failures += 1;
    }

    /// Close recordings whose window has passed without further frames
    pub async fn close_due_recordings(&mut self, now: SystemTime) -> usize {
        let finished = self.recorders.close_due(now).await;
        for summary in &finished {
            debug!(clip = %summary.info.clip_id, camera = %summary.info.camera_id, "Recording closed by timer");
        }
        finished.len()
    }

    /// Finalize open recordings, returning how many were closed
    pub async fn finalize_recordings(&mut self, now: SystemTime) -> usize {
        self.recorders.shutdown(now).await.len()
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn recorder_stats(&self) -> RecorderStats {
        self.recorders.stats()
    }

    pub fn registry(&self) -> &TrackRegistry {
        &self.registry
    }

    pub fn recorders(&self) -> &RecorderBank {
        &self.recorders
    }

    pub fn log_stats(&self) {
        let recorder = self.recorders.stats();
        info!(
            frames = self.stats.frames,
            decode_failures = self.stats.decode_failures,
            detector_failures = self.stats.detector_failures,
            persons = self.stats.persons,
            live_tracks = self.registry.len(),
            alert_frames = self.stats.alert_frames,
            alerts_published = self.stats.alerts_published,
            publish_failures = self.stats.publish_failures,
            clips_started = recorder.clips_started,
            clips_finished = recorder.clips_finished,
            recording_failures = self.stats.recording_failures,
            "Pipeline statistics"
        );
    }
}
