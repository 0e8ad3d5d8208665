//! Alert creation, deduplication, and retention.
//!
//! The manager is the single serialization point for alert state: one mutex
//! guards the dedup table, the recent-alert ring buffer, and the sink, so
//! alert ordering and occurrence counts are globally consistent.

pub mod sink;

pub use sink::{AlertSink, JsonLinesSink, SinkError};

use crate::rules::RuleHit;
use crate::score::AnomalyEvent;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::IpAddr;
use std::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

/// Alert severity, ordered least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Severity of an anomaly crossing, from how far below threshold the
    /// score fell.
    pub fn from_score(score: f64) -> Severity {
        if score < -1.0 {
            Severity::High
        } else if score < -0.7 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
        }
    }
}

pub type AlertId = Uuid;

/// Where an alert came from: a signature rule hit or an anomaly-threshold
/// crossing, never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertOrigin {
    Rule { rule_id: String },
    Anomaly { score: f64, threshold: f64 },
}

/// One logged alert. Append-only; `occurrences` is the only field that
/// changes after creation, and only while the alert is still inside its
/// deduplication cooldown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub timestamp: DateTime<Utc>,
    pub origin: AlertOrigin,
    pub source: IpAddr,
    pub severity: Severity,
    pub message: String,
    pub occurrences: u32,
}

/// A detection submitted to the manager by a pipeline worker.
#[derive(Debug, Clone)]
pub enum Detection {
    Hit { source: IpAddr, hit: RuleHit },
    Anomaly(AnomalyEvent),
}

/// Result of a submission.
#[derive(Debug, Clone)]
pub enum Submission {
    /// A new alert was created (and written to the sink).
    New(Alert),
    /// Folded into an existing alert within the cooldown window.
    Folded { id: AlertId, occurrences: u32 },
}

impl Submission {
    pub fn id(&self) -> AlertId {
        match self {
            Submission::New(a) => a.id,
            Submission::Folded { id, .. } => *id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum OriginKey {
    Rule(String),
    Anomaly,
}

struct DedupEntry {
    id: AlertId,
    first_seen: DateTime<Utc>,
    occurrences: u32,
}

struct Inner {
    dedup: HashMap<(IpAddr, OriginKey), DedupEntry>,
    ring: VecDeque<Alert>,
    seen: HashSet<AlertId>,
    alert_count: u64,
    sink: Box<dyn AlertSink>,
}

/// Receives rule hits and anomaly events, deduplicates, and persists.
pub struct AlertManager {
    inner: Mutex<Inner>,
    cooldown: Duration,
    ring_capacity: usize,
}

impl AlertManager {
    pub fn new(cooldown_secs: u64, ring_capacity: usize, sink: Box<dyn AlertSink>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                dedup: HashMap::new(),
                ring: VecDeque::with_capacity(ring_capacity),
                seen: HashSet::new(),
                alert_count: 0,
                sink,
            }),
            cooldown: Duration::seconds(cooldown_secs as i64),
            ring_capacity,
        }
    }

    /// Submit a detection, stamping it with the current time.
    pub fn submit(&self, detection: Detection) -> Submission {
        self.submit_at(detection, Utc::now())
    }

    /// Submit a detection at an explicit time.
    ///
    /// Repeated identical detections from the same source within the
    /// cooldown fold into the prior alert with an incremented occurrence
    /// count. A sink write failure is logged and ignored; the alert is
    /// always retained in the ring buffer.
    pub fn submit_at(&self, detection: Detection, now: DateTime<Utc>) -> Submission {
        let (source, origin_key, origin, severity, message) = match detection {
            Detection::Hit { source, hit } => (
                source,
                OriginKey::Rule(hit.rule_id.clone()),
                AlertOrigin::Rule {
                    rule_id: hit.rule_id,
                },
                hit.severity,
                hit.description,
            ),
            Detection::Anomaly(ev) => (
                ev.source,
                OriginKey::Anomaly,
                AlertOrigin::Anomaly {
                    score: ev.score,
                    threshold: ev.threshold,
                },
                Severity::from_score(ev.score),
                format!(
                    "anomaly score {:.4} below threshold {:.2}",
                    ev.score, ev.threshold
                ),
            ),
        };

        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let inner = &mut *guard;

        let key = (source, origin_key);
        if let Some(entry) = inner.dedup.get_mut(&key) {
            if now - entry.first_seen <= self.cooldown {
                entry.occurrences += 1;
                let id = entry.id;
                let occurrences = entry.occurrences;
                if let Some(alert) = inner.ring.iter_mut().rev().find(|a| a.id == id) {
                    alert.occurrences = occurrences;
                }
                return Submission::Folded { id, occurrences };
            }
        }

        let alert = Alert {
            id: Uuid::new_v4(),
            timestamp: now,
            origin,
            source,
            severity,
            message,
            occurrences: 1,
        };

        inner.dedup.insert(
            key,
            DedupEntry {
                id: alert.id,
                first_seen: now,
                occurrences: 1,
            },
        );
        inner.seen.insert(alert.id);
        inner.alert_count += 1;

        if let Err(e) = inner.sink.write(&alert) {
            // Durable logging is best-effort: the ring buffer below still
            // holds the alert for the dashboard.
            warn!(alert_id = %alert.id, error = %e, "alert sink write failed");
        }

        if inner.ring.len() >= self.ring_capacity {
            inner.ring.pop_front();
        }
        inner.ring.push_back(alert.clone());

        Submission::New(alert)
    }

    /// Idempotent delivery of an already-materialized alert record, for
    /// duplicate delivery from a retrying upstream. Returns `false` without
    /// touching any counter when the id has been seen before.
    pub fn record_delivered(&self, alert: &Alert) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !inner.seen.insert(alert.id) {
            return false;
        }
        inner.alert_count += 1;
        if let Err(e) = inner.sink.write(alert) {
            warn!(alert_id = %alert.id, error = %e, "alert sink write failed");
        }
        if inner.ring.len() >= self.ring_capacity {
            inner.ring.pop_front();
        }
        inner.ring.push_back(alert.clone());
        true
    }

    /// Number of distinct alerts created (folded occurrences do not count).
    pub fn alert_count(&self) -> u64 {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .alert_count
    }

    /// Up to `n` most recent alerts, newest first.
    pub fn recent(&self, n: usize) -> Vec<Alert> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.ring.iter().rev().take(n).cloned().collect()
    }

    /// Drop dedup entries whose cooldown has fully elapsed. Called
    /// opportunistically by the eviction sweeper to bound table growth.
    pub fn prune_dedup(&self, now: DateTime<Utc>) {
        let cooldown = self.cooldown;
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.dedup.retain(|_, e| now - e.first_seen <= cooldown);
    }
}
