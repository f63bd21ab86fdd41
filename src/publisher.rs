use crate::error::PublishError;
use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tracing::{debug, info};

pub const AGGRESSION_DETECTED: &str = "AGGRESSION_DETECTED";

/// Persistent delivery mode for published alerts
const PERSISTENT: u8 = 2;

/// Alert raised once per triggered recording.
///
/// The camera identity travels as message metadata, not in the body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    /// Seconds since the Unix epoch
    pub timestamp: f64,
    pub alert_type: String,
    #[serde(skip)]
    pub camera_id: String,
}

impl AlertEvent {
    pub fn aggression(at: SystemTime, camera_id: impl Into<String>) -> Self {
        Self {
            timestamp: crate::frame::epoch_seconds(at),
            alert_type: AGGRESSION_DETECTED.to_string(),
            camera_id: camera_id.into(),
        }
    }

    /// JSON body as sent on the alert queue
    pub fn to_body(&self) -> Result<Vec<u8>, PublishError> {
        serde_json::to_vec(self).map_err(|e| PublishError::Serialize {
            details: e.to_string(),
        })
    }
}

/// Destination for alert events
#[async_trait]
pub trait AlertSink: Send {
    async fn publish(&mut self, event: &AlertEvent) -> Result<(), PublishError>;
}

/// Publishes alerts onto a durable queue through the default exchange
pub struct AmqpAlertPublisher {
    channel: Channel,
    queue: String,
}

impl AmqpAlertPublisher {
    /// Declare the durable alert queue and wrap the channel
    pub async fn bind(channel: Channel, queue: &str) -> Result<Self, lapin::Error> {
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        info!(queue, "Alert publisher ready");
        Ok(Self {
            channel,
            queue: queue.to_string(),
        })
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }
}

/// Message properties carried by every alert
pub fn alert_properties(camera_id: &str) -> BasicProperties {
    BasicProperties::default()
        .with_app_id(camera_id.into())
        .with_delivery_mode(PERSISTENT)
        .with_content_type("text".into())
}

#[async_trait]
impl AlertSink for AmqpAlertPublisher {
    async fn publish(&mut self, event: &AlertEvent) -> Result<(), PublishError> {
        let body = event.to_body()?;

        self.channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                &body,
                alert_properties(&event.camera_id),
            )
            .await
            .map_err(|e| PublishError::Broker {
                details: e.to_string(),
            })?;

        debug!(camera = %event.camera_id, queue = %self.queue, "Alert published");
        Ok(())
    }
}
