use std::fmt;

/// Why the consume loop stopped
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownReason {
    Signal(&'static str),
    /// The consumer was cancelled or the connection dropped
    StreamEnded,
    Error(String),
}

impl ShutdownReason {
    /// Process exit status for this reason
    pub fn exit_code(&self) -> i32 {
        match self {
            ShutdownReason::Signal(_) => 0,
            ShutdownReason::StreamEnded | ShutdownReason::Error(_) => 1,
        }
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Signal(name) => write!(f, "received {}", name),
            ShutdownReason::StreamEnded => write!(f, "frame consumer stream ended"),
            ShutdownReason::Error(message) => write!(f, "fatal error: {}", message),
        }
    }
}
