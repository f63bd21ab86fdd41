use crate::config::AlertConfig;
use crate::tracking::Position;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Why a track was flagged
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertReason {
    Speed,
    Proximity,
}

/// One person sighting in the current frame, after the registry update
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub track_id: u64,
    pub position: Position,
    /// Distance since the previous sighting, `None` for a new track
    pub moved: Option<f64>,
}

/// Track ids flagged in one frame, with the rules that flagged them
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertSet {
    reasons: BTreeMap<u64, BTreeSet<AlertReason>>,
}

impl AlertSet {
    fn flag(&mut self, track_id: u64, reason: AlertReason) {
        self.reasons.entry(track_id).or_default().insert(reason);
    }

    pub fn is_empty(&self) -> bool {
        self.reasons.is_empty()
    }

    pub fn len(&self) -> usize {
        self.reasons.len()
    }

    pub fn contains(&self, track_id: u64) -> bool {
        self.reasons.contains_key(&track_id)
    }

    /// Flagged ids in ascending order
    pub fn track_ids(&self) -> impl Iterator<Item = &u64> {
        self.reasons.keys()
    }

    pub fn reasons(&self, track_id: u64) -> Option<&BTreeSet<AlertReason>> {
        self.reasons.get(&track_id)
    }
}

/// Speed and proximity heuristics over the detections of a single frame
#[derive(Debug, Clone)]
pub struct AlertEngine {
    speed_threshold: f64,
    proximity_threshold: f64,
}

impl AlertEngine {
    pub fn new(speed_threshold: f64, proximity_threshold: f64) -> Self {
        Self {
            speed_threshold,
            proximity_threshold,
        }
    }

    pub fn from_config(config: &AlertConfig) -> Self {
        Self::new(config.speed_threshold, config.proximity_threshold)
    }

    /// Evaluate both rules over this frame's observations.
    ///
    /// Speed: a known track that moved strictly more than the threshold.
    /// Proximity: both members of every pair of distinct tracks whose centers
    /// are strictly closer than the threshold.
    pub fn evaluate(&self, observations: &[Observation]) -> AlertSet {
        let mut alerts = AlertSet::default();

        for obs in observations {
            if let Some(moved) = obs.moved {
                if moved > self.speed_threshold {
                    debug!(track_id = obs.track_id, moved, "Speed rule triggered");
                    alerts.flag(obs.track_id, AlertReason::Speed);
                }
            }
        }

        for (i, a) in observations.iter().enumerate() {
            for b in &observations[i + 1..] {
                if a.track_id == b.track_id {
                    continue;
                }
                let distance = a.position.distance(&b.position);
                if distance < self.proximity_threshold {
                    debug!(
                        track_a = a.track_id,
                        track_b = b.track_id,
                        distance,
                        "Proximity rule triggered"
                    );
                    alerts.flag(a.track_id, AlertReason::Proximity);
                    alerts.flag(b.track_id, AlertReason::Proximity);
                }
            }
        }

        alerts
    }
}
