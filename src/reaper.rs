use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::engine::Engine;

/// Background task that moves Held holds past their TTL to Expired, making
/// their slots visible to other clients again.
pub async fn run_reaper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;
        let expired = engine.collect_expired_holds(engine.clock_now());
        for hold_id in expired {
            match engine.expire_hold(hold_id).await {
                Ok(()) => info!("reaped expired hold {hold_id}"),
                Err(e) => {
                    // May already have confirmed or been cancelled
                    debug!("reaper skip {hold_id}: {e}");
                }
            }
        }
    }
}

/// Background task that rewrites the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        info!("compacting WAL ({appends} appends since last compaction)");
        if let Err(e) = engine.compact_wal().await {
            tracing::error!("WAL compaction failed: {e}");
        }
    }
}
