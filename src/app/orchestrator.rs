use super::pipeline::FramePipeline;
use crate::broker::{self, BrokerConnection};
use crate::config::VigilConfig;
use crate::detection::HttpDetector;
use crate::error::{BrokerError, Result};
use crate::overlay::Annotator;
use crate::publisher::AmqpAlertPublisher;
use crate::recorder::{recover_journals, ExportSettings, Exporter, RecorderBank};
use crate::source::FrameSource;
use tracing::{error, info, warn};

/// One processing node: the broker connection plus everything the consume
/// loop needs
pub struct ProcessingNode {
    pub(super) config: VigilConfig,
    pub(super) connection: BrokerConnection,
    pub(super) source: FrameSource,
    pub(super) pipeline: FramePipeline,
    pub(super) exporter: Exporter,
}

impl ProcessingNode {
    /// Connect to the broker and assemble the node.
    ///
    /// Certificate problems fail immediately; connectivity failures are
    /// retried by the broker layer before giving up.
    pub async fn connect(config: VigilConfig) -> Result<Self> {
        info!(
            host = %config.broker.host,
            port = config.broker.port,
            tls = config.uses_tls(),
            "Starting processing node"
        );

        let connection = broker::connect(&config.broker).await?;

        match Self::assemble(&config, &connection).await {
            Ok((source, pipeline, exporter)) => Ok(Self {
                config,
                connection,
                source,
                pipeline,
                exporter,
            }),
            Err(e) => {
                error!("Failed to set up processing node: {}", e);
                connection.close().await;
                Err(e)
            }
        }
    }

    async fn assemble(
        config: &VigilConfig,
        connection: &BrokerConnection,
    ) -> Result<(FrameSource, FramePipeline, Exporter)> {
        let alert_channel = connection.open_channel().await?;
        let publisher = AmqpAlertPublisher::bind(alert_channel, &config.broker.alert_queue)
            .await
            .map_err(BrokerError::from)?;

        let detector = HttpDetector::new(&config.detector)?;

        let settings = ExportSettings::from_config(&config.recorder);
        let exporter = Exporter::spawn(settings.clone());
        if let Some(queue) = exporter.queue() {
            match recover_journals(&settings.journal_dir(), &queue).await {
                Ok(0) => {}
                Ok(n) => info!("Queued {} leftover clip journal(s) for export", n),
                Err(e) => warn!("Clip journal recovery failed: {}", e),
            }
        }

        let recorders = RecorderBank::new(&config.recorder, exporter.queue())?;
        let pipeline = FramePipeline::new(
            config,
            Box::new(detector),
            Annotator::new(&config.overlay),
            recorders,
            Box::new(publisher),
        );

        let frame_channel = connection.open_channel().await?;
        let source = FrameSource::bind(
            frame_channel,
            &config.broker.frame_queue,
            config.broker.prefetch,
            &config.camera.default_id,
        )
        .await?;

        Ok((source, pipeline, exporter))
    }

    pub fn config(&self) -> &VigilConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &FramePipeline {
        &self.pipeline
    }
}
