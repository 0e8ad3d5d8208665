//! TOML configuration for the packetwarden daemon.
//!
//! Layered model: an optional config file with sensible compiled-in
//! defaults, an environment variable override for the file path, and CLI
//! flags taking final precedence in `main`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Root configuration for the detection pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ingest: IngestConfig,
    pub scoring: ScoringConfig,
    pub alerts: AlertConfig,
    pub metrics: MetricsConfig,
    pub api: ApiConfig,
    pub rules: RulesConfig,
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Try to load configuration from, in order:
    /// 1. The path specified by the `PACKETWARDEN_CONFIG` environment variable.
    /// 2. `/etc/packetwarden/packetwarden.toml`.
    /// 3. Fall back to compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var("PACKETWARDEN_CONFIG") {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "PACKETWARDEN_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new("/etc/packetwarden/packetwarden.toml");
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Ingestion
// ---------------------------------------------------------------------------

/// What to do when the ingestion queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    /// Fail the incoming enqueue; queued packets keep their order (default).
    RejectNewest,
    /// Evict the oldest queued packet to make room for the new one.
    DropOldest,
}

/// Ingestion queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Maximum number of packets buffered between capture and the workers.
    pub queue_capacity: usize,
    /// Policy applied when the queue is full.
    pub drop_policy: DropPolicy,
    /// Number of detection worker tasks consuming the queue.
    pub workers: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 4096,
            drop_policy: DropPolicy::RejectNewest,
            workers: 4,
        }
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Anomaly scorer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Tumbling window length in seconds.
    pub window_secs: u64,
    /// Score threshold; a closed window scoring below this emits an event.
    /// Lower = more anomalous.
    pub threshold: f64,
    /// How many past windows feed the per-source moving baseline.
    pub baseline_windows: usize,
    /// Profiles with no traffic for this long are evicted.
    pub retention_secs: u64,
    /// How often the eviction sweep runs.
    pub evict_interval_secs: u64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            threshold: -0.5,
            baseline_windows: 10,
            retention_secs: 600,
            evict_interval_secs: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

/// Alert manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Identical detections from the same source within this window are
    /// folded into one alert with an occurrence count.
    pub cooldown_secs: u64,
    /// Capacity of the in-memory recent-alert ring buffer.
    pub ring_capacity: usize,
    /// Path to the append-only JSON-lines alert log.
    pub log_path: PathBuf,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 60,
            ring_capacity: 256,
            log_path: PathBuf::from("data/alerts.jsonl"),
        }
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// How `top_suspicious_sources` ranks sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankBy {
    PacketCount,
    AlertCount,
}

/// Metrics aggregator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Ranking key for the top-sources view.
    pub rank_by: RankBy,
    /// Maximum points kept in the anomaly score series.
    pub score_series_capacity: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            rank_by: RankBy::PacketCount,
            score_series_capacity: 100,
        }
    }
}

// ---------------------------------------------------------------------------
// API
// ---------------------------------------------------------------------------

/// HTTP query API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Bind address for the query API listener.
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Rule set location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Path to the declarative TOML rule file.
    pub path: PathBuf,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("rules.toml"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = Config::default();

        assert_eq!(cfg.ingest.queue_capacity, 4096);
        assert_eq!(cfg.ingest.drop_policy, DropPolicy::RejectNewest);
        assert_eq!(cfg.ingest.workers, 4);

        assert_eq!(cfg.scoring.window_secs, 60);
        assert_eq!(cfg.scoring.threshold, -0.5);
        assert_eq!(cfg.scoring.baseline_windows, 10);
        assert_eq!(cfg.scoring.retention_secs, 600);

        assert_eq!(cfg.alerts.cooldown_secs, 60);
        assert_eq!(cfg.alerts.ring_capacity, 256);
        assert_eq!(cfg.alerts.log_path, PathBuf::from("data/alerts.jsonl"));

        assert_eq!(cfg.metrics.rank_by, RankBy::PacketCount);
        assert_eq!(cfg.metrics.score_series_capacity, 100);

        assert_eq!(cfg.api.bind, "0.0.0.0:8080");
        assert_eq!(cfg.rules.path, PathBuf::from("rules.toml"));
    }

    #[test]
    fn test_parse_example_toml() {
        let toml_str = r#"
[ingest]
queue_capacity = 128
drop_policy = "drop_oldest"
workers = 2

[scoring]
window_secs = 30
threshold = -0.8
baseline_windows = 5
retention_secs = 120
evict_interval_secs = 10

[alerts]
cooldown_secs = 15
ring_capacity = 32
log_path = "/var/log/packetwarden/alerts.jsonl"

[metrics]
rank_by = "alert_count"
score_series_capacity = 50

[api]
bind = "127.0.0.1:9090"

[rules]
path = "/etc/packetwarden/rules.toml"
"#;

        let cfg: Config = toml::from_str(toml_str).unwrap();

        assert_eq!(cfg.ingest.queue_capacity, 128);
        assert_eq!(cfg.ingest.drop_policy, DropPolicy::DropOldest);
        assert_eq!(cfg.ingest.workers, 2);
        assert_eq!(cfg.scoring.window_secs, 30);
        assert_eq!(cfg.scoring.threshold, -0.8);
        assert_eq!(cfg.scoring.baseline_windows, 5);
        assert_eq!(cfg.alerts.cooldown_secs, 15);
        assert_eq!(cfg.alerts.ring_capacity, 32);
        assert_eq!(cfg.metrics.rank_by, RankBy::AlertCount);
        assert_eq!(cfg.metrics.score_series_capacity, 50);
        assert_eq!(cfg.api.bind, "127.0.0.1:9090");
        assert_eq!(
            cfg.rules.path,
            PathBuf::from("/etc/packetwarden/rules.toml")
        );
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let cfg: Config = toml::from_str("[scoring]\nthreshold = -1.5\n").unwrap();
        assert_eq!(cfg.scoring.threshold, -1.5);
        assert_eq!(cfg.scoring.window_secs, 60);
        assert_eq!(cfg.ingest.queue_capacity, 4096);
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.api.bind, Config::default().api.bind);
        assert_eq!(cfg.alerts.ring_capacity, Config::default().alerts.ring_capacity);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("packetwarden.toml");
        std::fs::write(&path, "[api]\nbind = \"0.0.0.0:9999\"\n").unwrap();

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.api.bind, "0.0.0.0:9999");
    }

    #[test]
    fn test_load_missing_file_errors() {
        assert!(Config::load(Path::new("/nonexistent/packetwarden.toml")).is_err());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let back: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(back.scoring.threshold, cfg.scoring.threshold);
        assert_eq!(back.ingest.queue_capacity, cfg.ingest.queue_capacity);
        assert_eq!(back.metrics.rank_by, cfg.metrics.rank_by);
    }
}
