//! Pluggable scoring strategies.
//!
//! The exact anomaly formula is a strategy behind a fixed interface so the
//! weighting can be swapped without touching window bookkeeping. The default
//! is a weighted z-score over the window features, inverted so that lower
//! scores are more anomalous (the dashboard convention).

use super::WindowStats;

/// A simple series of samples for statistical analysis.
pub struct Series {
    values: Vec<f64>,
}

impl Series {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    pub fn variance(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        let sum_sq_diff: f64 = self.values.iter().map(|&x| (x - mean).powi(2)).sum();
        sum_sq_diff / self.values.len() as f64
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Z-deviation of `value` above this series, clamped to `[0, cap]`.
    ///
    /// Only positive deviation counts: traffic falling below its baseline is
    /// not suspicious. A constant baseline treats any excess as maximal.
    pub fn excess_z(&self, value: f64, cap: f64) -> f64 {
        let std = self.std_dev();
        if std == 0.0 {
            if value - self.mean() > f64::EPSILON {
                return cap;
            }
            return 0.0;
        }
        ((value - self.mean()) / std).clamp(0.0, cap)
    }
}

/// Scoring interface: closed-window stats plus the source's baseline of
/// previously closed windows, producing a scalar where lower = more
/// anomalous and `0.0` is neutral.
pub trait ScoreStrategy: Send + Sync {
    fn score(&self, current: &WindowStats, baseline: &[WindowStats]) -> f64;
}

/// Relative weight of each window feature in the combined deviation.
#[derive(Debug, Clone, Copy)]
pub struct FeatureWeights {
    pub packets: f64,
    pub bytes: f64,
    pub dst_ports: f64,
    pub dst_addrs: f64,
}

impl Default for FeatureWeights {
    fn default() -> Self {
        // Destination fan-out is the strongest scan signal, so it weighs
        // double the raw volume features.
        Self {
            packets: 1.0,
            bytes: 1.0,
            dst_ports: 2.0,
            dst_addrs: 2.0,
        }
    }
}

/// Default strategy: weighted mean of per-feature excess z-scores, scaled
/// and negated into the `[-2.0, 0.0]` band. A combined deviation of two
/// sigmas lands exactly on the conventional `-0.5` threshold.
pub struct ZScoreStrategy {
    weights: FeatureWeights,
    z_cap: f64,
}

impl Default for ZScoreStrategy {
    fn default() -> Self {
        Self {
            weights: FeatureWeights::default(),
            z_cap: 8.0,
        }
    }
}

impl ZScoreStrategy {
    pub fn new(weights: FeatureWeights) -> Self {
        Self {
            weights,
            z_cap: 8.0,
        }
    }
}

impl ScoreStrategy for ZScoreStrategy {
    fn score(&self, current: &WindowStats, baseline: &[WindowStats]) -> f64 {
        if baseline.is_empty() {
            return 0.0;
        }

        let column = |f: fn(&WindowStats) -> f64| {
            Series::new(baseline.iter().map(f).collect())
        };

        let features: [(f64, f64); 4] = [
            (
                self.weights.packets,
                column(|w| w.packets as f64).excess_z(current.packets as f64, self.z_cap),
            ),
            (
                self.weights.bytes,
                column(|w| w.bytes as f64).excess_z(current.bytes as f64, self.z_cap),
            ),
            (
                self.weights.dst_ports,
                column(|w| w.dst_ports as f64).excess_z(current.dst_ports as f64, self.z_cap),
            ),
            (
                self.weights.dst_addrs,
                column(|w| w.dst_addrs as f64).excess_z(current.dst_addrs as f64, self.z_cap),
            ),
        ];

        let weight_sum: f64 = features.iter().map(|(w, _)| w).sum();
        if weight_sum == 0.0 {
            return 0.0;
        }
        let combined: f64 = features.iter().map(|(w, z)| w * z).sum::<f64>() / weight_sum;

        (-combined / 4.0).clamp(-2.0, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn window(packets: u64, bytes: u64, ports: usize, addrs: usize) -> WindowStats {
        WindowStats {
            packets,
            bytes,
            dst_ports: ports,
            dst_addrs: addrs,
            window_start: Utc::now(),
        }
    }

    #[test]
    fn test_series_stats() {
        let s = Series::new(vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(s.mean(), 3.0);
        // Population variance of 1..=5 is 2.0.
        assert!((s.variance() - 2.0).abs() < 1e-9);
        let z = s.excess_z(10.0, 8.0);
        assert!(z > 4.9 && z < 5.0);
    }

    #[test]
    fn test_excess_z_ignores_drops() {
        let s = Series::new(vec![10.0, 10.0, 12.0, 8.0]);
        assert_eq!(s.excess_z(1.0, 8.0), 0.0);
    }

    #[test]
    fn test_constant_baseline_treats_excess_as_maximal() {
        let s = Series::new(vec![10.0, 10.0, 10.0]);
        assert_eq!(s.excess_z(11.0, 8.0), 8.0);
        assert_eq!(s.excess_z(10.0, 8.0), 0.0);
    }

    #[test]
    fn test_steady_traffic_scores_neutral() {
        let strategy = ZScoreStrategy::default();
        let baseline = vec![
            window(10, 640, 2, 1),
            window(10, 640, 2, 1),
            window(10, 640, 2, 1),
        ];
        let score = strategy.score(&window(10, 640, 2, 1), &baseline);
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_burst_scores_below_threshold() {
        let strategy = ZScoreStrategy::default();
        let baseline = vec![
            window(10, 640, 2, 1),
            window(12, 700, 2, 1),
            window(9, 600, 3, 1),
        ];
        let score = strategy.score(&window(500, 32000, 400, 1), &baseline);
        assert!(score < -0.5, "burst should cross threshold, got {score}");
        assert!(score >= -2.0);
    }

    #[test]
    fn test_empty_baseline_is_neutral() {
        let strategy = ZScoreStrategy::default();
        assert_eq!(strategy.score(&window(500, 32000, 400, 1), &[]), 0.0);
    }
}
