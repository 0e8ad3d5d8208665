//! Background eviction of idle source profiles.
//!
//! Runs off the hot packet path: a dedicated task wakes on a configurable
//! interval, sweeps the profile map, and prunes expired alert dedup
//! entries. Profile removal happens under the same shard locks `observe`
//! takes, so a sweep can never race a concurrent profile update.

use crate::alert::AlertManager;
use crate::score::AnomalyScorer;

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Cooperative shutdown flag shared across background tasks.
pub type ShutdownFlag = Arc<AtomicBool>;

/// Spawn the eviction sweeper. It exits after a final sweep once `shutdown`
/// is set, within one interval.
pub fn spawn_eviction_task(
    scorer: Arc<AnomalyScorer>,
    alerts: Arc<AlertManager>,
    interval_secs: u64,
    shutdown: ShutdownFlag,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = Duration::from_secs(interval_secs.max(1));

        loop {
            // Sleep in one-second increments so the shutdown flag is
            // noticed promptly rather than waiting out the full interval.
            let mut slept = Duration::ZERO;
            while slept < interval {
                if shutdown.load(Ordering::Relaxed) {
                    // Final pass so shutdown reports a clean state.
                    sweep(&scorer, &alerts);
                    return;
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
                slept += Duration::from_secs(1);
            }

            sweep(&scorer, &alerts);
        }
    })
}

fn sweep(scorer: &AnomalyScorer, alerts: &AlertManager) {
    let now = Utc::now();
    let evicted = scorer.evict_idle(now);
    alerts.prune_dedup(now);
    if evicted > 0 {
        debug!(evicted, remaining = scorer.profile_count(), "evicted idle profiles");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::sink::NullSink;
    use crate::config::ScoringConfig;
    use crate::packet::{FlagBits, PacketRecord, Protocol};
    use std::net::{IpAddr, Ipv4Addr};

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_and_honors_shutdown() {
        let cfg = ScoringConfig {
            retention_secs: 0,
            evict_interval_secs: 1,
            ..ScoringConfig::default()
        };
        let scorer = Arc::new(AnomalyScorer::new(&cfg));
        let alerts = Arc::new(AlertManager::new(60, 16, Box::new(NullSink)));
        let shutdown: ShutdownFlag = Arc::new(AtomicBool::new(false));

        let mut p = PacketRecord::new(
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)),
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)),
            40000,
            80,
            Protocol::Tcp,
            64,
            FlagBits::SYN,
        );
        // Backdate so retention 0 makes the profile immediately stale.
        p.timestamp = Utc::now() - chrono::Duration::seconds(5);
        scorer.observe(&p);
        assert_eq!(scorer.profile_count(), 1);

        let handle = spawn_eviction_task(scorer.clone(), alerts, 1, shutdown.clone());

        // Let at least one sweep run.
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(scorer.profile_count(), 0);

        shutdown.store(true, Ordering::Relaxed);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(handle.is_finished());
    }
}
