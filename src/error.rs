use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VigilError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Certificate error: {0}")]
    Certificate(#[from] CertificateError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Detection error: {0}")]
    Detection(#[from] DetectionError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Recording error: {0}")]
    Recording(#[from] RecordingError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

/// Connectivity failures while talking to the message broker
#[derive(Error, Debug, Clone)]
pub enum BrokerError {
    #[error("TLS failure: {details}")]
    Tls { details: String },

    #[error("Transport failure: {details}")]
    Transport { details: String },

    #[error("Protocol failure: {details}")]
    Protocol { details: String },

    #[error("Gave up after {attempts} connection attempts")]
    Exhausted { attempts: u32 },
}

/// Certificate material that cannot be loaded; never retried
#[derive(Error, Debug)]
pub enum CertificateError {
    #[error("No {kind} path configured")]
    Missing { kind: &'static str },

    #[error("Failed to read {kind} from {path}: {source}")]
    Read {
        kind: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid {kind} in {path}: {details}")]
    Invalid {
        kind: &'static str,
        path: PathBuf,
        details: String,
    },
}

#[derive(Error, Debug, Clone)]
pub enum DecodeError {
    #[error("Empty frame payload")]
    Empty,

    #[error("Unrecognised image payload: {details}")]
    Image { details: String },

    #[error("JPEG re-encoding failed: {details}")]
    Encode { details: String },
}

#[derive(Error, Debug, Clone)]
pub enum DetectionError {
    #[error("Detector request failed: {details}")]
    Request { details: String },

    #[error("Detector returned an unusable response: {details}")]
    Response { details: String },
}

#[derive(Error, Debug, Clone)]
pub enum PublishError {
    #[error("Failed to serialize alert: {details}")]
    Serialize { details: String },

    #[error("Broker rejected alert publish: {details}")]
    Broker { details: String },
}

#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Failed to create directory {path}: {source}")]
    DirectoryCreation {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Clip journal error: {details}")]
    Journal { details: String },

    #[error("Clip export failed: {details}")]
    Export { details: String },
}

impl VigilError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Whether the process must stop instead of skipping the current frame
    pub fn is_fatal(&self) -> bool {
        match self {
            VigilError::Config(_)
            | VigilError::Serialization(_)
            | VigilError::Certificate(_)
            | VigilError::System { .. } => true,
            VigilError::Broker(BrokerError::Exhausted { .. }) => true,
            VigilError::Broker(_) => false,
            VigilError::Io(_)
            | VigilError::Decode(_)
            | VigilError::Detection(_)
            | VigilError::Publish(_)
            | VigilError::Recording(_)
            | VigilError::Component { .. } => false,
        }
    }
}

impl RecordingError {
    pub fn journal<S: Into<String>>(details: S) -> Self {
        Self::Journal {
            details: details.into(),
        }
    }

    pub fn export<S: Into<String>>(details: S) -> Self {
        Self::Export {
            details: details.into(),
        }
    }
}

impl From<lapin::Error> for BrokerError {
    fn from(err: lapin::Error) -> Self {
        match &err {
            lapin::Error::IOError(io) => {
                let details = io.to_string();
                let lowered = details.to_lowercase();
                if lowered.contains("certificate")
                    || lowered.contains("tls")
                    || lowered.contains("handshake")
                {
                    BrokerError::Tls { details }
                } else {
                    BrokerError::Transport { details }
                }
            }
            _ => BrokerError::Protocol {
                details: err.to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, VigilError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(VigilError::from(BrokerError::Exhausted { attempts: 10 }).is_fatal());
        assert!(VigilError::from(CertificateError::Missing { kind: "CA certificate" }).is_fatal());
        assert!(!VigilError::from(BrokerError::Transport {
            details: "connection refused".to_string()
        })
        .is_fatal());
        assert!(!VigilError::from(DecodeError::Empty).is_fatal());
        assert!(!VigilError::from(PublishError::Broker {
            details: "channel closed".to_string()
        })
        .is_fatal());
        assert!(!VigilError::from(RecordingError::journal("disk full")).is_fatal());
    }

    #[test]
    fn test_lapin_io_errors_are_classified() {
        let refused = lapin::Error::IOError(std::sync::Arc::new(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        )));
        assert!(matches!(BrokerError::from(refused), BrokerError::Transport { .. }));

        let bad_cert = lapin::Error::IOError(std::sync::Arc::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "invalid peer certificate: UnknownIssuer",
        )));
        assert!(matches!(BrokerError::from(bad_cert), BrokerError::Tls { .. }));

        assert!(matches!(
            BrokerError::from(lapin::Error::ChannelsLimitReached),
            BrokerError::Protocol { .. }
        ));
    }
}
