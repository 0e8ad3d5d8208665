//! Per-source statistical anomaly scoring over tumbling windows.
//!
//! One [`SourceProfile`] is kept per observed source address in a sharded
//! map, so packets from different sources never contend on the same lock.
//! Each profile accumulates counters for the current window; when a packet
//! arrives past the window boundary the window is closed, scored against
//! the profile's moving baseline, and the counters reset.

pub mod eviction;
pub mod strategy;

pub use eviction::spawn_eviction_task;
pub use strategy::{FeatureWeights, ScoreStrategy, ZScoreStrategy};

use crate::config::ScoringConfig;
use crate::packet::PacketRecord;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::net::IpAddr;

/// Scoring requires at least this many closed windows of baseline before a
/// deviation is trusted; anything less scores neutral.
const MIN_BASELINE_WINDOWS: usize = 3;

/// Aggregated counters for one closed window of one source.
#[derive(Debug, Clone, Serialize)]
pub struct WindowStats {
    pub packets: u64,
    pub bytes: u64,
    /// Distinct destination ports contacted.
    pub dst_ports: usize,
    /// Distinct destination addresses contacted.
    pub dst_addrs: usize,
    pub window_start: DateTime<Utc>,
}

/// Emitted when a closed window's score crosses below the threshold.
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyEvent {
    pub source: IpAddr,
    pub score: f64,
    pub threshold: f64,
    pub window_end: DateTime<Utc>,
}

/// A window boundary was crossed: the closed window's score, and an event
/// if it crossed the threshold.
#[derive(Debug, Clone)]
pub struct WindowClose {
    pub source: IpAddr,
    pub score: f64,
    pub event: Option<AnomalyEvent>,
}

/// Rolling per-source traffic statistics.
///
/// Mutated only under its shard lock in the profile map; the eviction sweep
/// uses the same locks, so an update and an eviction of the same profile
/// can never interleave.
struct SourceProfile {
    window_start: DateTime<Utc>,
    packets: u64,
    bytes: u64,
    dst_ports: HashSet<u16>,
    dst_addrs: HashSet<IpAddr>,
    /// Closed-window history feeding the moving baseline, oldest first.
    baseline: VecDeque<WindowStats>,
    /// Score of the most recently closed window; neutral until one closes.
    last_score: f64,
    last_update: DateTime<Utc>,
}

impl SourceProfile {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            window_start: now,
            packets: 0,
            bytes: 0,
            dst_ports: HashSet::new(),
            dst_addrs: HashSet::new(),
            baseline: VecDeque::new(),
            last_score: 0.0,
            last_update: now,
        }
    }

    fn current_stats(&self) -> WindowStats {
        WindowStats {
            packets: self.packets,
            bytes: self.bytes,
            dst_ports: self.dst_ports.len(),
            dst_addrs: self.dst_addrs.len(),
            window_start: self.window_start,
        }
    }

    fn reset_window(&mut self, window_start: DateTime<Utc>) {
        self.window_start = window_start;
        self.packets = 0;
        self.bytes = 0;
        self.dst_ports.clear();
        self.dst_addrs.clear();
    }
}

/// Read-only view of one profile, for tests and the query API.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileSnapshot {
    pub source: IpAddr,
    pub packets: u64,
    pub bytes: u64,
    pub dst_ports: usize,
    pub dst_addrs: usize,
    pub last_score: f64,
    pub window_start: DateTime<Utc>,
}

/// Maintains source profiles and derives per-window anomaly scores.
pub struct AnomalyScorer {
    profiles: DashMap<IpAddr, SourceProfile>,
    window: Duration,
    threshold: f64,
    baseline_windows: usize,
    retention: Duration,
    strategy: Box<dyn ScoreStrategy>,
}

impl AnomalyScorer {
    pub fn new(cfg: &ScoringConfig) -> Self {
        Self::with_strategy(cfg, Box::new(ZScoreStrategy::default()))
    }

    pub fn with_strategy(cfg: &ScoringConfig, strategy: Box<dyn ScoreStrategy>) -> Self {
        Self {
            profiles: DashMap::new(),
            window: Duration::seconds(cfg.window_secs as i64),
            threshold: cfg.threshold,
            baseline_windows: cfg.baseline_windows.max(MIN_BASELINE_WINDOWS),
            retention: Duration::seconds(cfg.retention_secs as i64),
            strategy,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Update the source's profile with one packet. Returns `Some` when the
    /// packet crossed a window boundary and closed the previous window.
    ///
    /// The first closed window of a new source has no baseline and scores
    /// neutral, so a cold start can never alert.
    pub fn observe(&self, packet: &PacketRecord) -> Option<WindowClose> {
        let source = packet.src_addr;
        let mut profile = self
            .profiles
            .entry(source)
            .or_insert_with(|| SourceProfile::new(packet.timestamp));

        let mut close = None;

        if packet.timestamp >= profile.window_start + self.window {
            close = Some(self.close_window(source, &mut profile, packet.timestamp));
        }

        profile.packets += 1;
        profile.bytes += packet.length as u64;
        profile.dst_ports.insert(packet.dst_port);
        profile.dst_addrs.insert(packet.dst_addr);
        profile.last_update = packet.timestamp;

        close
    }

    fn close_window(
        &self,
        source: IpAddr,
        profile: &mut SourceProfile,
        packet_ts: DateTime<Utc>,
    ) -> WindowClose {
        let stats = profile.current_stats();
        let window_end = profile.window_start + self.window;

        profile.baseline.make_contiguous();
        let score = if profile.baseline.len() >= MIN_BASELINE_WINDOWS {
            self.strategy.score(&stats, profile.baseline.as_slices().0)
        } else {
            0.0
        };

        profile.last_score = score;
        if profile.baseline.len() >= self.baseline_windows {
            profile.baseline.pop_front();
        }
        profile.baseline.push_back(stats);

        // Advance along the per-source tumbling grid; empty gap windows are
        // skipped rather than synthesized.
        let elapsed = packet_ts - profile.window_start;
        let periods = (elapsed.num_milliseconds() / self.window.num_milliseconds()).max(1);
        let next_start = profile.window_start + self.window * periods as i32;
        profile.reset_window(next_start);

        let event = (score < self.threshold).then(|| AnomalyEvent {
            source,
            score,
            threshold: self.threshold,
            window_end,
        });

        WindowClose {
            source,
            score,
            event,
        }
    }

    /// Evict profiles idle beyond the retention period. Runs under the same
    /// shard locks as `observe`, so it cannot race a concurrent update.
    pub fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        let before = self.profiles.len();
        let retention = self.retention;
        self.profiles
            .retain(|_, p| now - p.last_update <= retention);
        before - self.profiles.len()
    }

    pub fn profile_count(&self) -> usize {
        self.profiles.len()
    }

    pub fn snapshot(&self, source: IpAddr) -> Option<ProfileSnapshot> {
        self.profiles.get(&source).map(|p| ProfileSnapshot {
            source,
            packets: p.packets,
            bytes: p.bytes,
            dst_ports: p.dst_ports.len(),
            dst_addrs: p.dst_addrs.len(),
            last_score: p.last_score,
            window_start: p.window_start,
        })
    }
}
