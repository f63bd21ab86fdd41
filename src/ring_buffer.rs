use crate::error::VigilError;
use crate::frame::FrameData;
use std::collections::VecDeque;
use tracing::{debug, trace};

/// Rolling window of the most recent frames used as pre-event footage.
///
/// Owned by a single recorder and touched only from the consume loop, so it
/// carries no internal locking.
pub struct FrameBuffer {
    frames: VecDeque<FrameData>,
    capacity: usize,
    stats: FrameBufferStats,
}

/// Statistics for buffer monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameBufferStats {
    /// Total frames pushed to buffer
    pub frames_pushed: u64,
    /// Frames dropped because the buffer was full
    pub buffer_overruns: u64,
    /// Times the buffer contents were handed to a recording
    pub flushes: u64,
}

impl FrameBuffer {
    /// Create a buffer holding at most `capacity` frames.
    ///
    /// Use [`FrameBufferBuilder`] to derive the capacity from a frame rate and
    /// a pre-event duration with validation.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        debug!("Created frame buffer with capacity {}", capacity);

        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
            stats: FrameBufferStats::default(),
        }
    }

    /// Append a frame, evicting the oldest one when full
    pub fn push(&mut self, frame: FrameData) {
        if self.frames.len() == self.capacity {
            if let Some(evicted) = self.frames.pop_front() {
                trace!("Buffer overrun, dropping frame {}", evicted.id);
            }
            self.stats.buffer_overruns += 1;
        }
        self.frames.push_back(frame);
        self.stats.frames_pushed += 1;
    }

    /// Buffered frames, oldest first
    pub fn frames(&self) -> impl Iterator<Item = &FrameData> {
        self.frames.iter()
    }

    /// Clone out the buffered frames, oldest first, for seeding a recording
    pub fn snapshot(&mut self) -> Vec<FrameData> {
        self.stats.flushes += 1;
        self.frames.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<&FrameData> {
        self.frames.back()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> FrameBufferStats {
        self.stats.clone()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        debug!("Frame buffer cleared");
    }
}

/// Builder for creating frame buffers from recording parameters
#[derive(Default)]
pub struct FrameBufferBuilder {
    capacity: Option<usize>,
    fps: Option<u32>,
    pre_event_seconds: Option<u32>,
}

impl FrameBufferBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the capacity directly
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn fps(mut self, fps: u32) -> Self {
        self.fps = Some(fps);
        self
    }

    pub fn pre_event_seconds(mut self, seconds: u32) -> Self {
        self.pre_event_seconds = Some(seconds);
        self
    }

    /// Build the buffer; capacity is `fps × pre_event_seconds` unless set directly
    pub fn build(self) -> Result<FrameBuffer, VigilError> {
        let capacity = match (self.capacity, self.fps, self.pre_event_seconds) {
            (Some(capacity), _, _) => capacity,
            (None, Some(fps), Some(seconds)) => fps as usize * seconds as usize,
            _ => {
                return Err(VigilError::system(
                    "Frame buffer needs a capacity or fps and pre-event seconds",
                ))
            }
        };

        if capacity == 0 {
            return Err(VigilError::system(
                "Frame buffer capacity must be greater than 0",
            ));
        }

        Ok(FrameBuffer::new(capacity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::test_support::frame_at;

    #[test]
    fn test_push_until_full() {
        let mut buffer = FrameBuffer::new(3);
        assert!(buffer.is_empty());

        for id in 0..3 {
            buffer.push(frame_at(id, id * 50, "cam"));
        }

        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.stats().buffer_overruns, 0);
        assert_eq!(buffer.latest().map(|f| f.id), Some(2));
    }

    #[test]
    fn test_wraparound_keeps_newest_in_order() {
        let mut buffer = FrameBuffer::new(4);
        for id in 0..10 {
            buffer.push(frame_at(id, id * 50, "cam"));
            assert!(buffer.len() <= buffer.capacity());
        }

        let ids: Vec<u64> = buffer.frames().map(|f| f.id).collect();
        assert_eq!(ids, vec![6, 7, 8, 9]);

        let stats = buffer.stats();
        assert_eq!(stats.frames_pushed, 10);
        assert_eq!(stats.buffer_overruns, 6);
    }

    #[test]
    fn test_snapshot_does_not_drain() {
        let mut buffer = FrameBuffer::new(2);
        buffer.push(frame_at(1, 0, "cam"));
        buffer.push(frame_at(2, 50, "cam"));

        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.iter().map(|f| f.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.stats().flushes, 1);

        buffer.clear();
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_builder_derives_capacity() {
        let buffer = FrameBufferBuilder::new()
            .fps(20)
            .pre_event_seconds(3)
            .build()
            .unwrap();
        assert_eq!(buffer.capacity(), 60);

        let direct = FrameBufferBuilder::new().capacity(5).build().unwrap();
        assert_eq!(direct.capacity(), 5);
    }

    #[test]
    fn test_builder_validation() {
        assert!(FrameBufferBuilder::new().build().is_err());
        assert!(FrameBufferBuilder::new().fps(0).pre_event_seconds(3).build().is_err());
        assert!(FrameBufferBuilder::new().capacity(0).build().is_err());
    }
}
