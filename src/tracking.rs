use std::collections::HashMap;
use std::time::{Duration, SystemTime};
use tracing::{debug, trace};

/// Box center in image pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Position) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Last known state of one tracked identity
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub track_id: u64,
    pub last_position: Position,
    pub last_seen: SystemTime,
    /// Flagged by the alert rules in the frame it was last seen in
    pub in_alert: bool,
}

/// Map of live tracks keyed by the detector-assigned track id.
///
/// Holds at most one [`Track`] per id; `last_seen` never moves backwards.
pub struct TrackRegistry {
    tracks: HashMap<u64, Track>,
    staleness: Duration,
}

impl TrackRegistry {
    pub fn new(staleness: Duration) -> Self {
        Self {
            tracks: HashMap::new(),
            staleness,
        }
    }

    /// Record a sighting of `track_id` at `position`.
    ///
    /// Returns the distance moved since the previous sighting, or `None` when
    /// the track is new. A sighting older than the stored one (a redelivered
    /// frame) leaves the track unchanged and also returns `None`, so replays
    /// never report movement.
    pub fn update(&mut self, track_id: u64, position: Position, now: SystemTime) -> Option<f64> {
        match self.tracks.get_mut(&track_id) {
            Some(track) => {
                if now < track.last_seen {
                    trace!(track_id, "Ignoring out-of-order sighting");
                    return None;
                }
                let moved = track.last_position.distance(&position);
                track.last_position = position;
                track.last_seen = now;
                track.in_alert = false;
                Some(moved)
            }
            None => {
                debug!(track_id, x = position.x, y = position.y, "New track");
                self.tracks.insert(
                    track_id,
                    Track {
                        track_id,
                        last_position: position,
                        last_seen: now,
                        in_alert: false,
                    },
                );
                None
            }
        }
    }

    /// Remove tracks unseen for longer than the staleness window
    pub fn evict_stale(&mut self, now: SystemTime) -> usize {
        let staleness = self.staleness;
        let before = self.tracks.len();

        self.tracks.retain(|id, track| {
            let age = now.duration_since(track.last_seen).unwrap_or_default();
            let keep = age <= staleness;
            if !keep {
                debug!(track_id = *id, age_ms = age.as_millis() as u64, "Evicting stale track");
            }
            keep
        });

        before - self.tracks.len()
    }

    /// Set the alert flag of the given tracks for the current frame
    pub fn mark_alerts<'a>(&mut self, flagged: impl IntoIterator<Item = &'a u64>) {
        for id in flagged {
            if let Some(track) = self.tracks.get_mut(id) {
                track.in_alert = true;
            }
        }
    }

    pub fn get(&self, track_id: u64) -> Option<&Track> {
        self.tracks.get(&track_id)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn staleness(&self) -> Duration {
        self.staleness
    }
}
