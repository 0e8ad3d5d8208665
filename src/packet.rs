//! Packet records as delivered by the capture collaborator.
//!
//! The capture layer parses raw frames and hands the pipeline one immutable
//! [`PacketRecord`] per packet. Nothing in this crate mutates a record after
//! construction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Transport protocol of a captured packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Other,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
            Protocol::Icmp => write!(f, "icmp"),
            Protocol::Other => write!(f, "other"),
        }
    }
}

/// TCP header flag bits.
///
/// Stored as the raw low byte of the TCP flags field. The named constants
/// cover the flags rule predicates can match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlagBits(pub u8);

impl FlagBits {
    pub const FIN: FlagBits = FlagBits(0x01);
    pub const SYN: FlagBits = FlagBits(0x02);
    pub const RST: FlagBits = FlagBits(0x04);
    pub const PSH: FlagBits = FlagBits(0x08);
    pub const ACK: FlagBits = FlagBits(0x10);
    pub const URG: FlagBits = FlagBits(0x20);

    /// Empty flag set (non-TCP packets).
    pub const NONE: FlagBits = FlagBits(0);

    /// True if every bit in `other` is set in `self`.
    pub fn contains(self, other: FlagBits) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: FlagBits) -> FlagBits {
        FlagBits(self.0 | other.0)
    }
}

/// Immutable snapshot of one captured packet.
///
/// Created once by the capture collaborator, read by the rule engine, the
/// anomaly scorer, and the metrics aggregator, then dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketRecord {
    pub timestamp: DateTime<Utc>,
    pub src_addr: IpAddr,
    pub dst_addr: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: Protocol,
    /// Total length on the wire, in bytes.
    pub length: u32,
    pub flags: FlagBits,
}

impl PacketRecord {
    /// Convenience constructor stamping the record with the current time.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        src_addr: IpAddr,
        dst_addr: IpAddr,
        src_port: u16,
        dst_port: u16,
        protocol: Protocol,
        length: u32,
        flags: FlagBits,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            src_addr,
            dst_addr,
            src_port,
            dst_port,
            protocol,
            length,
            flags,
        }
    }
}
