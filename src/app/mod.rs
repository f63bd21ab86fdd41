mod orchestrator;
mod pipeline;
mod runtime;
mod shutdown;
mod types;


pub use orchestrator::ProcessingNode;
pub use pipeline::{FrameOutcome, FramePipeline, PipelineStats};
pub use types::ShutdownReason;
