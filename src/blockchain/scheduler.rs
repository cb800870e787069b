use crate::blockchain::processor::BatchProcessor;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Periodic batch trigger. The processor is awaited directly on this task
/// rather than spawned, so the single-flight latch is the only arbiter of
/// overlap: a tick that lands while a batch is in flight is simply dropped.
pub async fn run_scheduler(
    processor: Arc<BatchProcessor>,
    interval: Duration,
    prefetch_enabled: bool,
    shutdown: CancellationToken,
) {
    if !prefetch_enabled {
        info!("Pre-fetch batch processing is disabled; scheduler idle");
        return;
    }

    info!("Batch scheduler started, interval {:?}", interval);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so startup settles first.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                debug!("Scheduled pre-fetch batch processing triggered");
                if let Err(e) = processor.process_batch().await {
                    error!("Scheduled batch processing failed: {}", e);
                }
            }
            _ = shutdown.cancelled() => {
                info!("Shutting down batch scheduler");
                break;
            }
        }
    }
}
