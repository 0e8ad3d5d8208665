//! Detection pipeline: worker pool, component wiring, and shutdown.
//!
//! The capture collaborator pushes records in through [`Pipeline::ingest`];
//! a fixed pool of worker tasks consumes the queue. Every packet passes
//! through exactly one rule evaluation and exactly one scorer update, and
//! is counted by the metrics aggregator only after both complete.

use crate::alert::{AlertManager, AlertSink, Detection, Submission};
use crate::config::Config;
use crate::ingest::{IngestQueue, QueueError};
use crate::metrics::Metrics;
use crate::packet::PacketRecord;
use crate::rules::{RuleEngine, RuleSet};
use crate::score::eviction::{spawn_eviction_task, ShutdownFlag};
use crate::score::AnomalyScorer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct Pipeline {
    queue: Arc<IngestQueue>,
    pub rules: Arc<RuleEngine>,
    pub scorer: Arc<AnomalyScorer>,
    pub alerts: Arc<AlertManager>,
    pub metrics: Arc<Metrics>,
    shutdown: ShutdownFlag,
    worker_count: usize,
    evict_interval_secs: u64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Pipeline {
    /// Assemble the pipeline state. Workers are not running until
    /// [`Pipeline::start`].
    pub fn new(config: &Config, ruleset: RuleSet, sink: Box<dyn AlertSink>) -> Arc<Self> {
        let metrics = Arc::new(Metrics::new(&config.metrics, config.scoring.threshold));
        let queue = Arc::new(IngestQueue::new(
            config.ingest.queue_capacity,
            config.ingest.drop_policy,
            metrics.dropped_handle(),
        ));
        let alerts = Arc::new(AlertManager::new(
            config.alerts.cooldown_secs,
            config.alerts.ring_capacity,
            sink,
        ));

        Arc::new(Self {
            queue,
            rules: Arc::new(RuleEngine::new(ruleset)),
            scorer: Arc::new(AnomalyScorer::new(&config.scoring)),
            alerts,
            metrics,
            shutdown: Arc::new(AtomicBool::new(false)),
            worker_count: config.ingest.workers.max(1),
            evict_interval_secs: config.scoring.evict_interval_secs,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the worker pool and the eviction sweeper.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());

        for worker_id in 0..self.worker_count {
            let pipeline = self.clone();
            tasks.push(tokio::spawn(async move {
                pipeline.worker_loop(worker_id).await;
            }));
        }

        tasks.push(spawn_eviction_task(
            self.scorer.clone(),
            self.alerts.clone(),
            self.evict_interval_secs,
            self.shutdown.clone(),
        ));

        info!(workers = self.worker_count, "detection pipeline started");
    }

    /// Entry point for the capture collaborator. Never blocks; a full queue
    /// under the reject-newest policy surfaces as [`QueueError::Full`] and
    /// is already counted in the dropped-packet metric.
    pub fn ingest(&self, packet: PacketRecord) -> Result<(), QueueError> {
        self.queue.enqueue(packet)
    }

    /// Upstream end-of-stream: stop accepting packets. Workers drain what
    /// is already buffered and then exit.
    pub fn capture_terminated(&self) {
        info!("capture terminated, draining queue");
        self.queue.close();
    }

    /// Close the queue, let workers drain, and reap all background tasks.
    pub async fn shutdown(&self) {
        self.queue.close();
        self.shutdown.store(true, Ordering::Relaxed);

        let tasks: Vec<JoinHandle<()>> = {
            let mut guard = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };

        for mut task in tasks {
            // Workers exit as soon as the queue drains; the sweeper within
            // one interval. Bound the wait regardless.
            if tokio::time::timeout(Duration::from_secs(10), &mut task)
                .await
                .is_err()
            {
                warn!("background task did not exit in time, aborting");
                task.abort();
            }
        }
        info!(
            packets = self.metrics.total_packets(),
            alerts = self.metrics.alert_count(),
            "pipeline shut down"
        );
    }

    async fn worker_loop(&self, worker_id: usize) {
        debug!(worker_id, "worker started");

        while let Some(packet) = self.queue.dequeue().await {
            self.process(&packet);
        }

        debug!(worker_id, "worker exiting");
    }

    /// Run one packet through rule evaluation and scoring, then count it.
    fn process(&self, packet: &PacketRecord) {
        // A record the capture layer could not fill in sanely is skipped,
        // never fatal to the worker.
        if packet.length == 0 {
            self.metrics.record_skipped();
            return;
        }

        for hit in self.rules.evaluate(packet) {
            let submission = self.alerts.submit(Detection::Hit {
                source: packet.src_addr,
                hit,
            });
            if let Submission::New(alert) = submission {
                self.metrics.record_alert(&alert);
            }
        }

        if let Some(close) = self.scorer.observe(packet) {
            self.metrics.record_window_score(close.score);
            if let Some(event) = close.event {
                if let Submission::New(alert) = self.alerts.submit(Detection::Anomaly(event)) {
                    self.metrics.record_alert(&alert);
                }
            }
        }

        // Both consumers are done; only now does the packet count.
        self.metrics.record_packet(packet);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::sink::NullSink;
    use crate::config::{AlertConfig, IngestConfig};
    use crate::packet::{FlagBits, Protocol};
    use std::net::{IpAddr, Ipv4Addr};

    fn syn_packet(src: IpAddr, dst_port: u16) -> PacketRecord {
        PacketRecord::new(
            src,
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)),
            40000,
            dst_port,
            Protocol::Tcp,
            64,
            FlagBits::SYN,
        )
    }

    fn src() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))
    }

    #[tokio::test]
    async fn test_syn_scan_folds_into_one_alert() {
        let config = Config {
            ingest: IngestConfig {
                workers: 2,
                ..IngestConfig::default()
            },
            ..Config::default()
        };
        let pipeline = Pipeline::new(&config, RuleSet::builtin(), Box::new(NullSink));
        pipeline.start();

        // Synthetic scan: 60 SYN packets to 60 distinct privileged ports.
        for port in 1..=60u16 {
            pipeline.ingest(syn_packet(src(), port)).unwrap();
        }

        pipeline.capture_terminated();
        pipeline.shutdown().await;

        assert_eq!(pipeline.metrics.total_packets(), 60);
        // One deduplicated alert carrying all 60 occurrences.
        assert_eq!(pipeline.alerts.alert_count(), 1);
        let recent = pipeline.alerts.recent(10);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].occurrences, 60);
        assert_eq!(recent[0].source, src());
    }

    #[tokio::test]
    async fn test_full_queue_counts_drops() {
        let config = Config {
            ingest: IngestConfig {
                queue_capacity: 10,
                workers: 1,
                ..IngestConfig::default()
            },
            ..Config::default()
        };
        // Workers not started: everything stays buffered.
        let pipeline = Pipeline::new(&config, RuleSet::default(), Box::new(NullSink));

        let mut rejected = 0;
        for port in 0..15u16 {
            if pipeline.ingest(syn_packet(src(), 2000 + port)).is_err() {
                rejected += 1;
            }
        }

        assert_eq!(rejected, 5);
        assert_eq!(pipeline.metrics.dropped_packets(), 5);
    }

    #[tokio::test]
    async fn test_shutdown_drains_buffered_packets() {
        let config = Config {
            ingest: IngestConfig {
                workers: 3,
                ..IngestConfig::default()
            },
            alerts: AlertConfig::default(),
            ..Config::default()
        };
        let pipeline = Pipeline::new(&config, RuleSet::default(), Box::new(NullSink));

        for i in 0..200u16 {
            pipeline
                .ingest(syn_packet(
                    IpAddr::V4(Ipv4Addr::new(10, 0, (i / 50) as u8, 9)),
                    5000 + i,
                ))
                .unwrap();
        }

        // Start workers only after the backlog exists, then terminate.
        pipeline.start();
        pipeline.capture_terminated();
        pipeline.shutdown().await;

        assert_eq!(pipeline.metrics.total_packets(), 200);
        assert_eq!(pipeline.metrics.unique_source_count(), 4);
    }

    #[tokio::test]
    async fn test_zero_length_packet_is_skipped_not_fatal() {
        let config = Config::default();
        let pipeline = Pipeline::new(&config, RuleSet::builtin(), Box::new(NullSink));
        pipeline.start();

        let mut bad = syn_packet(src(), 80);
        bad.length = 0;
        pipeline.ingest(bad).unwrap();
        pipeline.ingest(syn_packet(src(), 80)).unwrap();

        pipeline.capture_terminated();
        pipeline.shutdown().await;

        assert_eq!(pipeline.metrics.skipped_packets(), 1);
        assert_eq!(pipeline.metrics.total_packets(), 1);
    }
}
