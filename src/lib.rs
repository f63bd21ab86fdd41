pub mod alert;
pub mod app;
pub mod broker;
pub mod config;
pub mod detection;
pub mod error;
pub mod frame;
pub mod overlay;
pub mod publisher;
pub mod recorder;
pub mod retry;
pub mod ring_buffer;
pub mod source;
pub mod tracking;

pub use alert::{AlertEngine, AlertReason, AlertSet, Observation};
pub use app::{FrameOutcome, FramePipeline, PipelineStats, ProcessingNode, ShutdownReason};
pub use broker::{connect, BrokerConnection};
pub use config::VigilConfig;
pub use detection::{BoundingBox, Detection, Detector, HttpDetector, PersonSighting};
pub use error::{Result, VigilError};
pub use frame::FrameData;
pub use overlay::Annotator;
pub use publisher::{AlertEvent, AlertSink, AmqpAlertPublisher, AGGRESSION_DETECTED};
pub use recorder::{EventRecorder, RecorderBank, RecorderState};
pub use retry::RetryPolicy;
pub use ring_buffer::{FrameBuffer, FrameBufferBuilder};
pub use source::{FrameDecoder, FrameSource};
pub use tracking::{Position, Track, TrackRegistry};
