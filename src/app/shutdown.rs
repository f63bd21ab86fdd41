use super::{ProcessingNode, ShutdownReason};
use std::time::{Duration, SystemTime};
use tracing::{error, info, warn};

impl ProcessingNode {
    /// Release everything the node holds and return the exit status.
    ///
    /// Open recordings are finalized first, then queued exports get a
    /// bounded drain, then the channels and the connection are closed.
    pub async fn shutdown(self, reason: ShutdownReason) -> i32 {
        match &reason {
            ShutdownReason::Signal(_) => info!("Beginning graceful shutdown: {}", reason),
            _ => error!("Shutting down: {}", reason),
        }

        let ProcessingNode {
            config,
            connection,
            source,
            mut pipeline,
            exporter,
        } = self;

        let finalized = pipeline.finalize_recordings(SystemTime::now()).await;
        if finalized > 0 {
            info!("Finalized {} open recording(s)", finalized);
        }
        pipeline.log_stats();

        // Recorders hold export queue handles; the worker only sees the end
        // of its queue once they are gone.
        drop(pipeline);

        let timeout = Duration::from_secs(config.node.shutdown_timeout_seconds);
        match exporter.drain(timeout).await {
            Some(exported) => info!("Clip export queue drained ({} exported)", exported),
            None => warn!("Clip export queue not fully drained"),
        }

        source.close().await;
        connection.close().await;

        let exit_code = reason.exit_code();
        info!("Processing node stopped with exit code {}", exit_code);
        exit_code
    }
}
