//! Read-side aggregation for the dashboard API.
//!
//! Counters the workers touch on every packet are plain atomics; per-source
//! tallies live in a sharded map; the score series sits behind one short
//! mutex. Accessors return consistent snapshots and never hold a lock the
//! workers could block on for unbounded time.

use crate::alert::Alert;
use crate::config::{MetricsConfig, RankBy};
use crate::packet::PacketRecord;

use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct SourceCounters {
    packets: u64,
    alerts: u64,
}

/// One entry of the top-sources view.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TopSource {
    pub source: IpAddr,
    pub packets: u64,
    pub alerts: u64,
}

/// Anomaly score series with its parallel constant-threshold series.
/// The two vectors always have equal length.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreSeries {
    pub scores: Vec<f64>,
    pub threshold: Vec<f64>,
}

/// Aggregate counter snapshot for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub total_packets: u64,
    pub dropped_packets: u64,
    pub skipped_packets: u64,
    pub unique_sources: usize,
    pub alert_count: u64,
}

pub struct Metrics {
    total_packets: AtomicU64,
    /// Shared with the ingestion queue, which counts every lost packet.
    dropped: Arc<AtomicU64>,
    skipped: AtomicU64,
    alert_count: AtomicU64,
    sources: DashMap<IpAddr, SourceCounters>,
    series: Mutex<VecDeque<f64>>,
    threshold: f64,
    rank_by: RankBy,
    series_capacity: usize,
}

impl Metrics {
    pub fn new(cfg: &MetricsConfig, threshold: f64) -> Self {
        Self {
            total_packets: AtomicU64::new(0),
            dropped: Arc::new(AtomicU64::new(0)),
            skipped: AtomicU64::new(0),
            alert_count: AtomicU64::new(0),
            sources: DashMap::new(),
            series: Mutex::new(VecDeque::with_capacity(cfg.score_series_capacity)),
            threshold,
            rank_by: cfg.rank_by,
            series_capacity: cfg.score_series_capacity,
        }
    }

    /// Handle to the dropped-packet counter, given to the ingestion queue.
    pub fn dropped_handle(&self) -> Arc<AtomicU64> {
        self.dropped.clone()
    }

    /// Count one fully processed packet. Called only after both the rule
    /// engine and the anomaly scorer have seen it.
    pub fn record_packet(&self, packet: &PacketRecord) {
        self.total_packets.fetch_add(1, Ordering::Relaxed);
        self.sources
            .entry(packet.src_addr)
            .or_default()
            .packets += 1;
    }

    /// Count a packet that could not be processed and was skipped.
    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one newly created alert (folded occurrences are not new).
    pub fn record_alert(&self, alert: &Alert) {
        self.alert_count.fetch_add(1, Ordering::Relaxed);
        self.sources.entry(alert.source).or_default().alerts += 1;
    }

    /// Append one closed-window anomaly score to the series.
    pub fn record_window_score(&self, score: f64) {
        let mut series = self.series.lock().unwrap_or_else(|e| e.into_inner());
        if series.len() >= self.series_capacity {
            series.pop_front();
        }
        series.push_back(score);
    }

    pub fn total_packets(&self) -> u64 {
        self.total_packets.load(Ordering::Relaxed)
    }

    pub fn dropped_packets(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn skipped_packets(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn alert_count(&self) -> u64 {
        self.alert_count.load(Ordering::Relaxed)
    }

    pub fn unique_source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_packets: self.total_packets(),
            dropped_packets: self.dropped_packets(),
            skipped_packets: self.skipped_packets(),
            unique_sources: self.unique_source_count(),
            alert_count: self.alert_count(),
        }
    }

    /// Up to `n` sources ranked by the configured key, descending, with
    /// ties broken by ascending address.
    pub fn top_suspicious_sources(&self, n: usize) -> Vec<TopSource> {
        let mut entries: Vec<TopSource> = self
            .sources
            .iter()
            .map(|e| TopSource {
                source: *e.key(),
                packets: e.value().packets,
                alerts: e.value().alerts,
            })
            .collect();

        entries.sort_by(|a, b| {
            let key = |t: &TopSource| match self.rank_by {
                RankBy::PacketCount => t.packets,
                RankBy::AlertCount => t.alerts,
            };
            key(b).cmp(&key(a)).then_with(|| a.source.cmp(&b.source))
        });
        entries.truncate(n);
        entries
    }

    /// Consistent snapshot of the score series and the parallel threshold
    /// series. The two are built under one lock so their lengths are always
    /// equal, even mid-window.
    pub fn score_series(&self) -> ScoreSeries {
        let series = self.series.lock().unwrap_or_else(|e| e.into_inner());
        let scores: Vec<f64> = series.iter().copied().collect();
        let threshold = vec![self.threshold; scores.len()];
        ScoreSeries { scores, threshold }
    }
}
