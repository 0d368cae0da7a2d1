use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::registry::Registry;

/// Background actor dropping records that have not been refreshed within a TTL.
pub struct LocationReaper;

impl LocationReaper {
    /// How often the registry is swept for a given TTL.
    pub fn sweep_period(ttl: Duration) -> Duration {
        (ttl / 4).max(Duration::from_secs(1))
    }

    pub async fn run_actor(registry: Arc<Registry>, ttl: Duration) {
        let mut ticker = tokio::time::interval(Self::sweep_period(ttl));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Expiring locations older than {:?}", ttl);

        loop {
            ticker.tick().await;
            let expired = registry.expire(ttl, Instant::now());
            if !expired.is_empty() {
                info!("Expired {} silent publisher(s): {:?}", expired.len(), expired);
            }
        }
    }
}
