use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VigilConfig {
    pub broker: BrokerConfig,
    pub camera: CameraConfig,
    pub detector: DetectorConfig,
    pub alert: AlertConfig,
    pub recorder: RecorderConfig,
    pub overlay: OverlayConfig,
    pub node: NodeConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BrokerConfig {
    /// Broker hostname or address
    #[serde(default = "default_broker_host")]
    pub host: String,

    /// Broker port; equal to `tls_port` selects a mutually authenticated TLS connection
    #[serde(default = "default_broker_port")]
    pub port: u16,

    #[serde(default = "default_tls_port")]
    pub tls_port: u16,

    /// Name presented for TLS verification when it differs from `host`
    #[serde(default)]
    pub tls_server_name: Option<String>,

    /// PEM bundle of trusted CA certificates
    #[serde(default)]
    pub ca_cert: Option<String>,

    /// PEM client certificate chain
    #[serde(default)]
    pub client_cert: Option<String>,

    /// PEM client private key
    #[serde(default)]
    pub client_key: Option<String>,

    /// Credentials for plain connections; TLS connections use SASL EXTERNAL
    #[serde(default = "default_username")]
    pub username: String,

    #[serde(default = "default_password")]
    pub password: String,

    #[serde(default = "default_vhost")]
    pub vhost: String,

    #[serde(default = "default_heartbeat_seconds")]
    pub heartbeat_seconds: u16,

    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// Connection attempts before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between connection attempts
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,

    /// Durable inbound queue carrying encoded frames
    #[serde(default = "default_frame_queue")]
    pub frame_queue: String,

    /// Durable outbound queue for alert events
    #[serde(default = "default_alert_queue")]
    pub alert_queue: String,

    /// Unacknowledged deliveries the broker may push at once
    #[serde(default = "default_prefetch")]
    pub prefetch: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// Identity used when a delivery carries no application id
    #[serde(default = "default_camera_id")]
    pub default_id: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DetectorConfig {
    /// HTTP endpoint of the detect-and-track service
    #[serde(default = "default_detector_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_detector_timeout_ms")]
    pub timeout_ms: u64,

    /// Class label forwarded to tracking (case-insensitive)
    #[serde(default = "default_person_label")]
    pub person_label: String,

    #[serde(default)]
    pub min_confidence: f32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AlertConfig {
    /// Pixel distance between consecutive sightings that flags a track
    #[serde(default = "default_speed_threshold")]
    pub speed_threshold: f64,

    /// Pixel distance under which two tracks in one frame are both flagged
    #[serde(default = "default_proximity_threshold")]
    pub proximity_threshold: f64,

    /// Seconds a track may go unseen before eviction
    #[serde(default = "default_staleness_seconds")]
    pub staleness_seconds: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RecorderConfig {
    /// Fixed frame rate of recorded clips and of the pre-event buffer
    #[serde(default = "default_recorder_fps")]
    pub fps: u32,

    #[serde(default = "default_pre_event_seconds")]
    pub pre_event_seconds: u32,

    /// Live capture after a trigger
    #[serde(default = "default_recording_seconds")]
    pub recording_seconds: u32,

    /// Output directory for evidence files
    #[serde(default = "default_recorder_path")]
    pub path: String,

    /// Clip resolution (width, height)
    #[serde(default = "default_resolution")]
    pub resolution: (u32, u32),

    /// Encode MP4 clips when built with the `video_encoding` feature
    #[serde(default = "default_video_encoding")]
    pub video_encoding: bool,

    /// Keep the raw journal after a successful MP4 export
    #[serde(default)]
    pub keep_journal: bool,

    /// Extract clip frames as JPEG files
    #[serde(default)]
    pub keep_images: bool,

    #[serde(default = "default_save_metadata")]
    pub save_metadata: bool,

    /// One buffer and recorder per camera identity instead of a single shared one
    #[serde(default)]
    pub shard_by_camera: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OverlayConfig {
    /// Draw person boxes onto buffered and recorded frames
    #[serde(default = "default_annotate")]
    pub annotate: bool,

    /// TrueType font used for labels; labels are skipped when it cannot be loaded
    #[serde(default = "default_font_path")]
    pub font_path: String,

    #[serde(default = "default_font_size")]
    pub font_size: f32,

    /// Stamp the frame time in the top-left corner
    #[serde(default)]
    pub timestamp: bool,

    /// IANA timezone for the stamp, local time when unset
    #[serde(default)]
    pub timezone: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NodeConfig {
    /// Interval of the periodic statistics log line
    #[serde(default = "default_stats_interval_seconds")]
    pub stats_interval_seconds: u64,

    /// Upper bound on draining queued clip exports during shutdown
    #[serde(default = "default_shutdown_timeout_seconds")]
    pub shutdown_timeout_seconds: u64,
}

/// Deployment variables read on top of the `VIGIL__*` environment layer
const DEPLOYMENT_OVERRIDES: &[(&str, &str)] = &[
    ("RABBITMQ_HOST", "broker.host"),
    ("RABBITMQ_PORT", "broker.port"),
    ("RABBITMQ_TLS_HOST", "broker.tls_server_name"),
    ("CA_CERT", "broker.ca_cert"),
    ("CLIENT_CERT", "broker.client_cert"),
    ("CLIENT_KEY", "broker.client_key"),
    ("CAMERA_ID", "camera.default_id"),
];

impl VigilConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("vigil.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_with_env(path, |name| std::env::var(name).ok())
    }

    /// Load configuration, resolving deployment variables through `lookup`
    pub fn load_with_env<P, F>(path: P, lookup: F) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let mut builder = Config::builder()
            .set_default("broker.host", default_broker_host())?
            .set_default("broker.port", default_broker_port() as i64)?
            .set_default("broker.tls_port", default_tls_port() as i64)?
            .set_default("broker.username", default_username())?
            .set_default("broker.password", default_password())?
            .set_default("broker.vhost", default_vhost())?
            .set_default("broker.heartbeat_seconds", default_heartbeat_seconds() as i64)?
            .set_default(
                "broker.connection_timeout_ms",
                default_connection_timeout_ms() as i64,
            )?
            .set_default("broker.max_attempts", default_max_attempts() as i64)?
            .set_default(
                "broker.retry_delay_seconds",
                default_retry_delay_seconds() as i64,
            )?
            .set_default("broker.frame_queue", default_frame_queue())?
            .set_default("broker.alert_queue", default_alert_queue())?
            .set_default("broker.prefetch", default_prefetch() as i64)?
            .set_default("camera.default_id", default_camera_id())?
            .set_default("detector.endpoint", default_detector_endpoint())?
            .set_default("detector.timeout_ms", default_detector_timeout_ms() as i64)?
            .set_default("detector.person_label", default_person_label())?
            .set_default("detector.min_confidence", 0.0)?
            .set_default("alert.speed_threshold", default_speed_threshold())?
            .set_default("alert.proximity_threshold", default_proximity_threshold())?
            .set_default("alert.staleness_seconds", default_staleness_seconds())?
            .set_default("recorder.fps", default_recorder_fps() as i64)?
            .set_default(
                "recorder.pre_event_seconds",
                default_pre_event_seconds() as i64,
            )?
            .set_default(
                "recorder.recording_seconds",
                default_recording_seconds() as i64,
            )?
            .set_default("recorder.path", default_recorder_path())?
            .set_default(
                "recorder.resolution",
                vec![
                    default_resolution().0 as i64,
                    default_resolution().1 as i64,
                ],
            )?
            .set_default("recorder.video_encoding", default_video_encoding())?
            .set_default("recorder.keep_journal", false)?
            .set_default("recorder.keep_images", false)?
            .set_default("recorder.save_metadata", default_save_metadata())?
            .set_default("recorder.shard_by_camera", false)?
            .set_default("overlay.annotate", default_annotate())?
            .set_default("overlay.font_path", default_font_path())?
            .set_default("overlay.font_size", default_font_size() as f64)?
            .set_default("overlay.timestamp", false)?
            .set_default(
                "node.stats_interval_seconds",
                default_stats_interval_seconds() as i64,
            )?
            .set_default(
                "node.shutdown_timeout_seconds",
                default_shutdown_timeout_seconds() as i64,
            )?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables, e.g. VIGIL__BROKER__HOST
            .add_source(Environment::with_prefix("VIGIL").separator("__"));

        for (variable, key) in DEPLOYMENT_OVERRIDES {
            let value = lookup(variable).filter(|v| !v.trim().is_empty());
            if value.is_some() {
                debug!("Applying {} to {}", variable, key);
            }
            builder = builder.set_override_option(*key, value)?;
        }

        let config: VigilConfig = builder.build()?.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config.redacted());

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.host.trim().is_empty() {
            return Err(ConfigError::Message(
                "Broker host must not be empty".to_string(),
            ));
        }

        if self.broker.max_attempts == 0 {
            return Err(ConfigError::Message(
                "Broker max_attempts must be greater than 0".to_string(),
            ));
        }

        if self.broker.frame_queue.is_empty() || self.broker.alert_queue.is_empty() {
            return Err(ConfigError::Message(
                "Broker queue names must not be empty".to_string(),
            ));
        }

        if self.broker.prefetch == 0 {
            return Err(ConfigError::Message(
                "Broker prefetch must be greater than 0".to_string(),
            ));
        }

        if !(self.alert.speed_threshold > 0.0) || !(self.alert.proximity_threshold > 0.0) {
            return Err(ConfigError::Message(
                "Alert thresholds must be greater than 0".to_string(),
            ));
        }

        if !(self.alert.staleness_seconds > 0.0) || !self.alert.staleness_seconds.is_finite() {
            return Err(ConfigError::Message(
                "Alert staleness_seconds must be a finite value greater than 0".to_string(),
            ));
        }

        if self.recorder.fps == 0 {
            return Err(ConfigError::Message(
                "Recorder fps must be greater than 0".to_string(),
            ));
        }

        if self.recorder.pre_event_seconds == 0 {
            return Err(ConfigError::Message(
                "Recorder pre_event_seconds must be greater than 0".to_string(),
            ));
        }

        if self.recorder.recording_seconds == 0 {
            return Err(ConfigError::Message(
                "Recorder recording_seconds must be greater than 0".to_string(),
            ));
        }

        if self.recorder.resolution.0 == 0 || self.recorder.resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Recorder resolution must be greater than 0".to_string(),
            ));
        }

        if let Some(tz) = &self.overlay.timezone {
            if tz.parse::<chrono_tz::Tz>().is_err() {
                return Err(ConfigError::Message(format!(
                    "Unknown overlay timezone '{}'",
                    tz
                )));
            }
        }

        Ok(())
    }

    /// Whether the configured port selects the mutually authenticated TLS transport
    pub fn uses_tls(&self) -> bool {
        self.broker.uses_tls()
    }

    /// Copy safe to log: the broker password is masked
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if !config.broker.password.is_empty() {
            config.broker.password = "********".to_string();
        }
        config
    }
}

impl BrokerConfig {
    pub fn uses_tls(&self) -> bool {
        self.port == self.tls_port
    }

    /// Name used for TLS server verification
    pub fn server_name(&self) -> &str {
        self.tls_server_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.host)
    }
}

impl RecorderConfig {
    /// Capacity of the pre-event frame buffer
    pub fn buffer_capacity(&self) -> usize {
        (self.fps as usize) * (self.pre_event_seconds as usize)
    }
}

impl Default for VigilConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig {
                host: default_broker_host(),
                port: default_broker_port(),
                tls_port: default_tls_port(),
                tls_server_name: None,
                ca_cert: None,
                client_cert: None,
                client_key: None,
                username: default_username(),
                password: default_password(),
                vhost: default_vhost(),
                heartbeat_seconds: default_heartbeat_seconds(),
                connection_timeout_ms: default_connection_timeout_ms(),
                max_attempts: default_max_attempts(),
                retry_delay_seconds: default_retry_delay_seconds(),
                frame_queue: default_frame_queue(),
                alert_queue: default_alert_queue(),
                prefetch: default_prefetch(),
            },
            camera: CameraConfig {
                default_id: default_camera_id(),
            },
            detector: DetectorConfig {
                endpoint: default_detector_endpoint(),
                timeout_ms: default_detector_timeout_ms(),
                person_label: default_person_label(),
                min_confidence: 0.0,
            },
            alert: AlertConfig {
                speed_threshold: default_speed_threshold(),
                proximity_threshold: default_proximity_threshold(),
                staleness_seconds: default_staleness_seconds(),
            },
            recorder: RecorderConfig {
                fps: default_recorder_fps(),
                pre_event_seconds: default_pre_event_seconds(),
                recording_seconds: default_recording_seconds(),
                path: default_recorder_path(),
                resolution: default_resolution(),
                video_encoding: default_video_encoding(),
                keep_journal: false,
                keep_images: false,
                save_metadata: default_save_metadata(),
                shard_by_camera: false,
            },
            overlay: OverlayConfig {
                annotate: default_annotate(),
                font_path: default_font_path(),
                font_size: default_font_size(),
                timestamp: false,
                timezone: None,
            },
            node: NodeConfig {
                stats_interval_seconds: default_stats_interval_seconds(),
                shutdown_timeout_seconds: default_shutdown_timeout_seconds(),
            },
        }
    }
}

// Default value functions
fn default_broker_host() -> String {
    "localhost".to_string()
}
fn default_broker_port() -> u16 {
    5671
}
fn default_tls_port() -> u16 {
    5671
}
fn default_username() -> String {
    "guest".to_string()
}
fn default_password() -> String {
    "guest".to_string()
}
fn default_vhost() -> String {
    "/".to_string()
}
fn default_heartbeat_seconds() -> u16 {
    600
}
fn default_connection_timeout_ms() -> u64 {
    10_000
}
fn default_max_attempts() -> u32 {
    10
}
fn default_retry_delay_seconds() -> u64 {
    5
}
fn default_frame_queue() -> String {
    "camera_frames".to_string()
}
fn default_alert_queue() -> String {
    "alerts_log".to_string()
}
fn default_prefetch() -> u16 {
    1
}

fn default_camera_id() -> String {
    "unknown camera".to_string()
}

fn default_detector_endpoint() -> String {
    "http://localhost:8000/detect".to_string()
}
fn default_detector_timeout_ms() -> u64 {
    5_000
}
fn default_person_label() -> String {
    "person".to_string()
}

fn default_speed_threshold() -> f64 {
    50.0
}
fn default_proximity_threshold() -> f64 {
    50.0
}
fn default_staleness_seconds() -> f64 {
    5.0
}

fn default_recorder_fps() -> u32 {
    20
}
fn default_pre_event_seconds() -> u32 {
    3
}
fn default_recording_seconds() -> u32 {
    5
}
fn default_recorder_path() -> String {
    "./recordings".to_string()
}
fn default_resolution() -> (u32, u32) {
    (640, 480)
}
fn default_video_encoding() -> bool {
    true
}
fn default_save_metadata() -> bool {
    true
}

fn default_annotate() -> bool {
    true
}
fn default_font_path() -> String {
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf".to_string()
}
fn default_font_size() -> f32 {
    18.0
}

fn default_stats_interval_seconds() -> u64 {
    60
}
fn default_shutdown_timeout_seconds() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_default_config() {
        let config = VigilConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.uses_tls());
        assert_eq!(config.broker.frame_queue, "camera_frames");
        assert_eq!(config.broker.alert_queue, "alerts_log");
        assert_eq!(config.recorder.buffer_capacity(), 60);
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = VigilConfig::load_with_env(dir.path().join("missing.toml"), no_env).unwrap();

        assert_eq!(config.broker.host, "localhost");
        assert_eq!(config.broker.max_attempts, 10);
        assert_eq!(config.broker.retry_delay_seconds, 5);
        assert_eq!(config.alert.speed_threshold, 50.0);
        assert_eq!(config.recorder.resolution, (640, 480));
        assert!(!config.recorder.shard_by_camera);
    }

    #[test]
    fn test_file_and_deployment_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vigil.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[broker]\nhost = \"from-file\"\nport = 5672\n\n[alert]\nproximity_threshold = 75.0\n"
        )
        .unwrap();

        let env: HashMap<&str, &str> = [
            ("RABBITMQ_HOST", "rabbitmq"),
            ("RABBITMQ_TLS_HOST", "broker.internal"),
            ("CAMERA_ID", "lobby"),
        ]
        .into_iter()
        .collect();

        let config =
            VigilConfig::load_with_env(&path, |name| env.get(name).map(|v| v.to_string()))
                .unwrap();

        assert_eq!(config.broker.host, "rabbitmq");
        assert_eq!(config.broker.port, 5672);
        assert!(!config.uses_tls());
        assert_eq!(config.broker.server_name(), "broker.internal");
        assert_eq!(config.camera.default_id, "lobby");
        assert_eq!(config.alert.proximity_threshold, 75.0);
    }

    #[test]
    fn test_port_override_parses() {
        let dir = tempfile::tempdir().unwrap();
        let config = VigilConfig::load_with_env(dir.path().join("none.toml"), |name| {
            (name == "RABBITMQ_PORT").then(|| "5672".to_string())
        })
        .unwrap();
        assert_eq!(config.broker.port, 5672);
        assert_eq!(config.broker.server_name(), "localhost");
    }

    #[test]
    fn test_config_validation() {
        let mut config = VigilConfig::default();
        config.recorder.fps = 0;
        assert!(config.validate().is_err());
        config.recorder.fps = 20;

        config.alert.proximity_threshold = 0.0;
        assert!(config.validate().is_err());
        config.alert.proximity_threshold = 50.0;

        config.broker.max_attempts = 0;
        assert!(config.validate().is_err());
        config.broker.max_attempts = 10;

        config.alert.staleness_seconds = f64::INFINITY;
        assert!(config.validate().is_err());
        config.alert.staleness_seconds = f64::NAN;
        assert!(config.validate().is_err());
        config.alert.staleness_seconds = 5.0;

        config.overlay.timezone = Some("Mars/Olympus".to_string());
        assert!(config.validate().is_err());
        config.overlay.timezone = Some("Europe/Madrid".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_redacted_config_hides_password() {
        let mut config = VigilConfig::default();
        config.broker.password = "s3cret-pass".to_string();

        let logged = format!("{:#?}", config.redacted());
        assert!(!logged.contains("s3cret-pass"));
        assert!(logged.contains("********"));
        assert_eq!(config.broker.password, "s3cret-pass");
    }

    #[test]
    fn test_print_config_round_trips_through_toml() {
        let rendered = toml::to_string_pretty(&VigilConfig::default()).unwrap();
        assert!(rendered.contains("[broker]"));
        assert!(rendered.contains("alerts_log"));
    }
}
