//! Rule engine: stateless evaluation over an atomically swappable rule set.

use super::{RuleHit, RuleParseError, RuleSet};
use crate::packet::PacketRecord;

use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// Outcome of a hot reload.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct ReloadReport {
    pub loaded: usize,
    pub skipped: usize,
}

/// Holds the active rule set behind an `RwLock<Arc<_>>`.
///
/// Evaluation clones the `Arc` and drops the read lock immediately, so a
/// reload never waits on in-flight packet evaluation and evaluation never
/// observes a half-replaced set.
pub struct RuleEngine {
    active: RwLock<Arc<RuleSet>>,
}

impl RuleEngine {
    pub fn new(ruleset: RuleSet) -> Self {
        Self {
            active: RwLock::new(Arc::new(ruleset)),
        }
    }

    /// Evaluate one packet against the current rule set, in declaration
    /// order, firing every matching rule.
    pub fn evaluate(&self, packet: &PacketRecord) -> Vec<RuleHit> {
        self.current().evaluate(packet)
    }

    /// Snapshot of the active rule set.
    pub fn current(&self) -> Arc<RuleSet> {
        self.active
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Hot-reload the rule set from `path`.
    ///
    /// Individually malformed rules are skipped with a warning; if the file
    /// itself cannot be read or parsed the previous set stays active and the
    /// error is returned.
    pub fn reload(&self, path: &Path) -> Result<ReloadReport, RuleParseError> {
        let (set, skipped) = RuleSet::load_lenient(path)?;
        let loaded = set.len();

        if skipped > 0 {
            warn!(loaded, skipped, "rule reload skipped invalid rules");
        } else {
            info!(loaded, "rule reload complete");
        }

        *self.active.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(set);
        Ok(ReloadReport { loaded, skipped })
    }
}
