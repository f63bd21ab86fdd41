use crate::error::{BrokerError, DecodeError};
use crate::frame::{decode_frame, FrameData};
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicQosOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{Channel, Consumer};
use std::time::SystemTime;
use tracing::{debug, info, trace};

/// Turns delivery payloads into frames and assigns node-local frame ids
pub struct FrameDecoder {
    default_camera: String,
    next_id: u64,
}

impl FrameDecoder {
    pub fn new(default_camera: impl Into<String>) -> Self {
        Self {
            default_camera: default_camera.into(),
            next_id: 0,
        }
    }

    /// Camera identity from the delivery's application id, or the default
    pub fn camera_id(&self, app_id: Option<&str>) -> String {
        match app_id.map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => self.default_camera.clone(),
        }
    }

    pub fn decode(
        &mut self,
        payload: &[u8],
        app_id: Option<&str>,
        received_at: SystemTime,
    ) -> Result<FrameData, DecodeError> {
        let id = self.next_id;
        self.next_id += 1;
        let camera = self.camera_id(app_id);
        decode_frame(id, payload, &camera, received_at)
    }
}

/// Consumer bound to the durable inbound frame queue.
///
/// Deliveries arrive one at a time in queue order and must be acknowledged
/// explicitly once handled.
pub struct FrameSource {
    channel: Channel,
    consumer: Consumer,
    queue: String,
    decoder: FrameDecoder,
}

impl FrameSource {
    /// Declare the queue, limit prefetch and start a manual-ack consumer
    pub async fn bind(
        channel: Channel,
        queue: &str,
        prefetch: u16,
        default_camera: &str,
    ) -> Result<Self, BrokerError> {
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

        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await?;

        let tag = format!("vigil-{}", uuid::Uuid::new_v4());
        let consumer = channel
            .basic_consume(
                queue,
                &tag,
                BasicConsumeOptions {
                    no_ack: false,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        info!(queue, prefetch, consumer = %tag, "Consuming frames");

        Ok(Self {
            channel,
            consumer,
            queue: queue.to_string(),
            decoder: FrameDecoder::new(default_camera),
        })
    }

    /// Wait for the next delivery. `None` means the consumer was cancelled
    /// or the connection dropped.
    pub async fn next_delivery(&mut self) -> Option<Result<Delivery, BrokerError>> {
        let next = self.consumer.next().await?;
        Some(next.map_err(BrokerError::from))
    }

    /// Decode a delivery into a frame stamped with the current time
    pub fn decode(&mut self, delivery: &Delivery) -> Result<FrameData, DecodeError> {
        let app_id = delivery
            .properties
            .app_id()
            .as_ref()
            .map(|id| id.as_str());
        trace!(
            tag = delivery.delivery_tag,
            bytes = delivery.data.len(),
            redelivered = delivery.redelivered,
            "Frame delivery"
        );
        self.decoder.decode(&delivery.data, app_id, SystemTime::now())
    }

    /// Positively acknowledge a handled delivery
    pub async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        delivery
            .acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(BrokerError::from)?;
        debug!(tag = delivery.delivery_tag, "Delivery acknowledged");
        Ok(())
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub async fn close(&self) {
        if let Err(e) = self.channel.close(200, "vigil shutdown").await {
            debug!("Frame channel close: {}", e);
        }
    }
}
