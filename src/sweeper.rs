use std::time::Duration;

use chrono::Utc;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{error, info};

use crate::service::TransferService;

/// Periodically delete transfers (records and blobs) that expired more than `grace` ago.
/// Only reclaims storage; expiry is enforced at redemption time regardless.
pub fn spawn(service: TransferService, every: Duration, grace: chrono::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match service.sweep(Utc::now() - grace).await {
                Ok(0) => {}
                Ok(removed) => info!("Retention sweep removed {} expired transfers", removed),
                Err(e) => error!("Retention sweep failed: {}", e),
            }
        }
    })
}
