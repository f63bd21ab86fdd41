use super::{FrameOutcome, FramePipeline, ProcessingNode, ShutdownReason};
use crate::error::{BrokerError, DecodeError, Result};
use crate::frame::FrameData;
use lapin::message::Delivery;
use std::future::Future;
use std::time::{Duration, SystemTime};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// How often open recordings are checked against their end time
const RECORDING_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// What became of one inbound payload
#[derive(Debug)]
pub(super) enum PayloadOutcome {
    Processed(FrameOutcome),
    Dropped(DecodeError),
}

/// SIGINT and SIGTERM, registered once for the lifetime of the loop
struct ShutdownSignals {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl ShutdownSignals {
    fn register() -> Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            return Ok(Self {
                interrupt: signal(SignalKind::interrupt())?,
                terminate: signal(SignalKind::terminate())?,
            });
        }

        #[cfg(not(unix))]
        {
            return Ok(Self {});
        }
    }

    async fn recv(&mut self) -> &'static str {
        #[cfg(unix)]
        {
            return tokio::select! {
                _ = self.interrupt.recv() => "SIGINT",
                _ = self.terminate.recv() => "SIGTERM",
            };
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            return "SIGINT";
        }
    }
}

impl ProcessingNode {
    /// Consume frames until a signal arrives or the broker goes away
    pub async fn run(&mut self) -> ShutdownReason {
        let mut signals = match ShutdownSignals::register() {
            Ok(signals) => signals,
            Err(e) => return ShutdownReason::Error(format!("failed to register signal handlers: {}", e)),
        };

        let period = Duration::from_secs(self.config.node.stats_interval_seconds.max(1));
        let mut stats_timer = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        let mut recording_timer = tokio::time::interval(RECORDING_CHECK_INTERVAL);
        recording_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(queue = %self.source.queue(), "Processing node is running");

        loop {
            tokio::select! {
                name = signals.recv() => {
                    info!("Received {}", name);
                    return ShutdownReason::Signal(name);
                }
                delivery = self.source.next_delivery() => match delivery {
                    Some(Ok(delivery)) => {
                        if let Err(e) = self.handle_delivery(delivery).await {
                            return ShutdownReason::Error(e.to_string());
                        }
                    }
                    Some(Err(e)) => return ShutdownReason::Error(e.to_string()),
                    None => return ShutdownReason::StreamEnded,
                },
                _ = recording_timer.tick() => {
                    self.pipeline.close_due_recordings(SystemTime::now()).await;
                }
                _ = stats_timer.tick() => self.pipeline.log_stats(),
            }
        }
    }

    /// Decode, process and acknowledge one delivery. Only a failed ack is
    /// returned as an error.
    pub(super) async fn handle_delivery(&mut self, delivery: Delivery) -> Result<()> {
        let decoded = self.source.decode(&delivery);
        let outcome = process_payload(&mut self.pipeline, decoded, self.source.ack(&delivery)).await?;

        match outcome {
            PayloadOutcome::Processed(frame) if frame.evicted > 0 => {
                debug!(evicted = frame.evicted, "Evicted stale tracks");
            }
            PayloadOutcome::Processed(_) => {}
            PayloadOutcome::Dropped(e) => warn!(
                tag = delivery.delivery_tag,
                bytes = delivery.data.len(),
                "Dropped undecodable frame: {}", e
            ),
        }
        Ok(())
    }
}

/// Run a decoded payload through the pipeline, then acknowledge it.
///
/// Undecodable payloads skip the pipeline but are still acknowledged so a
/// poison message cannot block the queue.
pub(super) async fn process_payload<A>(
    pipeline: &mut FramePipeline,
    decoded: std::result::Result<FrameData, DecodeError>,
    ack: A,
) -> std::result::Result<PayloadOutcome, BrokerError>
where
    A: Future<Output = std::result::Result<(), BrokerError>>,
{
    let outcome = match decoded {
        Ok(frame) => PayloadOutcome::Processed(pipeline.handle_frame(frame).await),
        Err(e) => {
            pipeline.record_decode_failure();
            PayloadOutcome::Dropped(e)
        }
    };

    ack.await?;
    Ok(outcome)
}
