use crate::services::states::db::UploadStore;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;

/// Spawns the background task that reclaims expired uploads. Uploads whose
/// last write is older than `expiration_time` seconds are deleted in bulk,
/// chunks included.
pub fn spawn(
    storage: Arc<dyn UploadStore>,
    expiration_time: u64,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let cutoff =
                OffsetDateTime::now_utc() - time::Duration::seconds(expiration_time as i64);
            match storage.expire_files(cutoff).await {
                Ok(0) => tracing::debug!("expiration sweep found nothing to reclaim"),
                Ok(reclaimed) => tracing::info!(reclaimed, "expiration sweep deleted stale uploads"),
                Err(e) => tracing::warn!(error = %e, "expiration sweep failed"),
            }
        }
    })
}
