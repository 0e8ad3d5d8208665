//! Declarative signature rules and the predicate model.
//!
//! A rule is an id, a severity, and a predicate tree of typed field
//! comparisons. Predicates are pure functions of a single packet; anything
//! that needs cross-packet state belongs to the anomaly scorer.

pub mod engine;

pub use engine::{ReloadReport, RuleEngine};

use crate::alert::Severity;
use crate::packet::{FlagBits, PacketRecord, Protocol};

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleParseError {
    #[error("failed to read rule file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse rule file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid rule '{id}': {reason}")]
    InvalidRule { id: String, reason: String },
    #[error("duplicate rule id '{0}'")]
    DuplicateId(String),
}

/// Named TCP flags usable in rule files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagName {
    Syn,
    Ack,
    Fin,
    Rst,
    Psh,
    Urg,
}

impl FlagName {
    fn bit(self) -> FlagBits {
        match self {
            FlagName::Syn => FlagBits::SYN,
            FlagName::Ack => FlagBits::ACK,
            FlagName::Fin => FlagBits::FIN,
            FlagName::Rst => FlagBits::RST,
            FlagName::Psh => FlagBits::PSH,
            FlagName::Urg => FlagBits::URG,
        }
    }
}

/// Tagged-variant predicate tree over packet header fields.
///
/// `All`/`Any` combine child predicates; the leaves compare one field each.
/// Evaluation is generic over the tree, there is no per-rule dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    All { preds: Vec<Predicate> },
    Any { preds: Vec<Predicate> },
    Protocol { value: Protocol },
    SrcAddr { value: IpAddr },
    DstAddr { value: IpAddr },
    SrcPort { lo: u16, hi: u16 },
    DstPort { lo: u16, hi: u16 },
    FlagsSet { flags: Vec<FlagName> },
    MinLength { value: u32 },
    MaxLength { value: u32 },
}

impl Predicate {
    /// Evaluate against one packet. Pure; no side effects, no state.
    pub fn matches(&self, p: &PacketRecord) -> bool {
        match self {
            Predicate::All { preds } => preds.iter().all(|c| c.matches(p)),
            Predicate::Any { preds } => preds.iter().any(|c| c.matches(p)),
            Predicate::Protocol { value } => p.protocol == *value,
            Predicate::SrcAddr { value } => p.src_addr == *value,
            Predicate::DstAddr { value } => p.dst_addr == *value,
            Predicate::SrcPort { lo, hi } => (*lo..=*hi).contains(&p.src_port),
            Predicate::DstPort { lo, hi } => (*lo..=*hi).contains(&p.dst_port),
            Predicate::FlagsSet { flags } => {
                let mask = flags
                    .iter()
                    .fold(FlagBits::NONE, |acc, f| acc.union(f.bit()));
                p.flags.contains(mask)
            }
            Predicate::MinLength { value } => p.length >= *value,
            Predicate::MaxLength { value } => p.length <= *value,
        }
    }

    /// Structural checks serde cannot express.
    fn validate(&self) -> Result<(), String> {
        match self {
            Predicate::All { preds } | Predicate::Any { preds } => {
                if preds.is_empty() {
                    return Err("empty predicate group".to_string());
                }
                for c in preds {
                    c.validate()?;
                }
                Ok(())
            }
            Predicate::SrcPort { lo, hi } | Predicate::DstPort { lo, hi } => {
                if lo > hi {
                    Err(format!("port range {lo}-{hi} is inverted"))
                } else {
                    Ok(())
                }
            }
            Predicate::FlagsSet { flags } => {
                if flags.is_empty() {
                    Err("flags_set predicate with no flags".to_string())
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }
}

/// One signature rule. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub severity: Severity,
    pub description: String,
    pub predicate: Predicate,
}

impl Rule {
    fn validate(&self) -> Result<(), RuleParseError> {
        if self.id.trim().is_empty() {
            return Err(RuleParseError::InvalidRule {
                id: "<unnamed>".to_string(),
                reason: "empty rule id".to_string(),
            });
        }
        self.predicate
            .validate()
            .map_err(|reason| RuleParseError::InvalidRule {
                id: self.id.clone(),
                reason,
            })
    }
}

/// The result of one rule matching one packet.
#[derive(Debug, Clone, Serialize)]
pub struct RuleHit {
    pub rule_id: String,
    pub severity: Severity,
    pub description: String,
}

/// Ordered, immutable rule set. Reload builds a fresh set and swaps it in
/// atomically; evaluations in flight keep the set they started with.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl RuleSet {
    /// Evaluate all rules in declaration order. Every matching rule fires;
    /// there is no short-circuit after the first hit.
    pub fn evaluate(&self, packet: &PacketRecord) -> Vec<RuleHit> {
        self.rules
            .iter()
            .filter(|r| r.predicate.matches(packet))
            .map(|r| RuleHit {
                rule_id: r.id.clone(),
                severity: r.severity,
                description: r.description.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Strict load for startup: any malformed or duplicate rule is fatal.
    pub fn load(path: &Path) -> Result<Self, RuleParseError> {
        let content = std::fs::read_to_string(path).map_err(|source| RuleParseError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let set: RuleSet = toml::from_str(&content)?;
        set.validate()?;
        Ok(set)
    }

    fn validate(&self) -> Result<(), RuleParseError> {
        let mut seen = std::collections::HashSet::new();
        for rule in &self.rules {
            rule.validate()?;
            if !seen.insert(rule.id.as_str()) {
                return Err(RuleParseError::DuplicateId(rule.id.clone()));
            }
        }
        Ok(())
    }

    /// Lenient load for hot reload: individually malformed rules are skipped
    /// with a warning, the rest stay usable. An unreadable or structurally
    /// unparseable file is still an error so the caller keeps the prior set.
    pub fn load_lenient(path: &Path) -> Result<(Self, usize), RuleParseError> {
        let content = std::fs::read_to_string(path).map_err(|source| RuleParseError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let doc: toml::Table = toml::from_str(&content)?;

        let raw_rules = match doc.get("rules") {
            Some(toml::Value::Array(arr)) => arr.clone(),
            Some(_) => {
                return Err(RuleParseError::InvalidRule {
                    id: "<file>".to_string(),
                    reason: "'rules' is not an array of tables".to_string(),
                })
            }
            None => Vec::new(),
        };

        let mut rules = Vec::with_capacity(raw_rules.len());
        let mut seen = std::collections::HashSet::new();
        let mut skipped = 0usize;

        for (idx, value) in raw_rules.into_iter().enumerate() {
            match value.try_into::<Rule>() {
                Ok(rule) => {
                    if let Err(e) = rule.validate() {
                        tracing::warn!(index = idx, error = %e, "skipping invalid rule");
                        skipped += 1;
                        continue;
                    }
                    if !seen.insert(rule.id.clone()) {
                        tracing::warn!(rule_id = %rule.id, "skipping duplicate rule id");
                        skipped += 1;
                        continue;
                    }
                    rules.push(rule);
                }
                Err(e) => {
                    tracing::warn!(index = idx, error = %e, "skipping unparseable rule");
                    skipped += 1;
                }
            }
        }

        Ok((RuleSet { rules }, skipped))
    }

    /// Built-in signatures used when no rule file is configured. Covers the
    /// classic reconnaissance and flood patterns.
    pub fn builtin() -> Self {
        RuleSet {
            rules: vec![
                Rule {
                    id: "syn-to-privileged-port".to_string(),
                    severity: Severity::Low,
                    description: "TCP SYN to a privileged port".to_string(),
                    predicate: Predicate::All {
                        preds: vec![
                            Predicate::Protocol {
                                value: Protocol::Tcp,
                            },
                            Predicate::FlagsSet {
                                flags: vec![FlagName::Syn],
                            },
                            Predicate::DstPort { lo: 1, hi: 1024 },
                        ],
                    },
                },
                Rule {
                    id: "malformed-syn-fin".to_string(),
                    severity: Severity::High,
                    description: "TCP packet with SYN and FIN both set".to_string(),
                    predicate: Predicate::All {
                        preds: vec![
                            Predicate::Protocol {
                                value: Protocol::Tcp,
                            },
                            Predicate::FlagsSet {
                                flags: vec![FlagName::Syn, FlagName::Fin],
                            },
                        ],
                    },
                },
                Rule {
                    id: "oversized-icmp".to_string(),
                    severity: Severity::Medium,
                    description: "ICMP packet larger than 1024 bytes".to_string(),
                    predicate: Predicate::All {
                        preds: vec![
                            Predicate::Protocol {
                                value: Protocol::Icmp,
                            },
                            Predicate::MinLength { value: 1025 },
                        ],
                    },
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn tcp_syn(dst_port: u16) -> PacketRecord {
        PacketRecord::new(
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)),
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)),
            40000,
            dst_port,
            Protocol::Tcp,
            64,
            FlagBits::SYN,
        )
    }

    #[test]
    fn test_all_matching_rules_fire_in_order() {
        let set = RuleSet {
            rules: vec![
                Rule {
                    id: "b-second".to_string(),
                    severity: Severity::Low,
                    description: "any tcp".to_string(),
                    predicate: Predicate::Protocol {
                        value: Protocol::Tcp,
                    },
                },
                Rule {
                    id: "a-first".to_string(),
                    severity: Severity::High,
                    description: "low dst port".to_string(),
                    predicate: Predicate::DstPort { lo: 1, hi: 1024 },
                },
            ],
        };

        let hits = set.evaluate(&tcp_syn(22));
        assert_eq!(hits.len(), 2);
        // Declaration order, not severity or id order.
        assert_eq!(hits[0].rule_id, "b-second");
        assert_eq!(hits[1].rule_id, "a-first");

        let hits = set.evaluate(&tcp_syn(8080));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].rule_id, "b-second");
    }

    #[test]
    fn test_predicate_tree_any_all() {
        let pred = Predicate::All {
            preds: vec![
                Predicate::Protocol {
                    value: Protocol::Tcp,
                },
                Predicate::Any {
                    preds: vec![
                        Predicate::DstPort { lo: 22, hi: 22 },
                        Predicate::DstPort { lo: 443, hi: 443 },
                    ],
                },
            ],
        };

        assert!(pred.matches(&tcp_syn(22)));
        assert!(pred.matches(&tcp_syn(443)));
        assert!(!pred.matches(&tcp_syn(80)));
    }

    #[test]
    fn test_flags_predicate_requires_all_named_bits() {
        let pred = Predicate::FlagsSet {
            flags: vec![FlagName::Syn, FlagName::Ack],
        };
        let mut p = tcp_syn(80);
        assert!(!pred.matches(&p));
        p.flags = FlagBits::SYN.union(FlagBits::ACK);
        assert!(pred.matches(&p));
    }

    #[test]
    fn test_parse_rule_file() {
        let toml_str = r#"
[[rules]]
id = "syn-scan"
severity = "LOW"
description = "SYN to privileged port"

[rules.predicate]
kind = "all"

[[rules.predicate.preds]]
kind = "protocol"
value = "tcp"

[[rules.predicate.preds]]
kind = "flags_set"
flags = ["syn"]

[[rules.predicate.preds]]
kind = "dst_port"
lo = 1
hi = 1024
"#;
        let set: RuleSet = toml::from_str(toml_str).unwrap();
        set.validate().unwrap();
        assert_eq!(set.len(), 1);
        assert!(!set.evaluate(&tcp_syn(80)).is_empty());
        assert!(set.evaluate(&tcp_syn(5000)).is_empty());
    }

    #[test]
    fn test_strict_load_rejects_inverted_port_range() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rules.toml");
        std::fs::write(
            &path,
            r#"
[[rules]]
id = "bad-range"
severity = "LOW"
description = "inverted"

[rules.predicate]
kind = "dst_port"
lo = 1024
hi = 1
"#,
        )
        .unwrap();

        let err = RuleSet::load(&path).unwrap_err();
        assert!(matches!(err, RuleParseError::InvalidRule { .. }));
    }

    #[test]
    fn test_strict_load_rejects_duplicate_ids() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rules.toml");
        std::fs::write(
            &path,
            r#"
[[rules]]
id = "dup"
severity = "LOW"
description = "one"
[rules.predicate]
kind = "protocol"
value = "tcp"

[[rules]]
id = "dup"
severity = "LOW"
description = "two"
[rules.predicate]
kind = "protocol"
value = "udp"
"#,
        )
        .unwrap();

        assert!(matches!(
            RuleSet::load(&path).unwrap_err(),
            RuleParseError::DuplicateId(_)
        ));
    }

    #[test]
    fn test_lenient_load_skips_bad_rules() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rules.toml");
        std::fs::write(
            &path,
            r#"
[[rules]]
id = "good"
severity = "LOW"
description = "fine"
[rules.predicate]
kind = "protocol"
value = "tcp"

[[rules]]
id = "broken"
severity = "NOT_A_SEVERITY"
description = "bad severity"
[rules.predicate]
kind = "protocol"
value = "tcp"
"#,
        )
        .unwrap();

        let (set, skipped) = RuleSet::load_lenient(&path).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(skipped, 1);
        assert_eq!(set.rules[0].id, "good");
    }

    #[test]
    fn test_lenient_load_unreadable_file_errors() {
        assert!(RuleSet::load_lenient(Path::new("/nonexistent/rules.toml")).is_err());
    }

    #[test]
    fn test_builtin_rules_validate() {
        let set = RuleSet::builtin();
        assert!(set.validate().is_ok());
        assert!(!set.is_empty());
    }
}
