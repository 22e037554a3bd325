//! Persisted row types.
//!
//! Each result file has a fixed schema; the column names come straight from
//! the field names (or their `serde(rename)`), so the header written by the
//! store always matches the rows that follow it. Metrics a probe did not
//! produce serialise as empty cells, never as zero.

use chrono::NaiveDateTime;
use clap::ValueEnum;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Which side of the comparison a measurement belongs to.
#[derive(ValueEnum, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestLabel {
    #[value(name = "VPN_ON")]
    VpnOn,
    #[value(name = "VPN_OFF")]
    VpnOff,
}

impl TestLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            TestLabel::VpnOn => "VPN_ON",
            TestLabel::VpnOff => "VPN_OFF",
        }
    }
}

impl fmt::Display for TestLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reply of the ping stream.
///
/// Columns: `timestamp, session, test_label, ping_latency_ms,
/// ping_jitter_ms, ping_loss_%`.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct PingRecord {
    pub timestamp: NaiveDateTime,
    pub session: u64,
    pub test_label: TestLabel,
    #[serde(serialize_with = "two_decimals")]
    pub ping_latency_ms: f64,
    #[serde(serialize_with = "two_decimals")]
    pub ping_jitter_ms: f64,
    #[serde(rename = "ping_loss_%", serialize_with = "two_decimals")]
    pub ping_loss_percent: f64,
}

/// One TCP throughput measurement.
///
/// Columns: `timestamp, test_label, tcp_throughput_mbps`.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ThroughputRecord {
    pub timestamp: NaiveDateTime,
    pub test_label: TestLabel,
    pub tcp_throughput_mbps: f64,
}

/// One UDP throughput measurement.
///
/// Columns: `timestamp, test_label, udp_throughput_mbps, udp_jitter_ms, udp_loss_%`.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct UdpRecord {
    pub timestamp: NaiveDateTime,
    pub test_label: TestLabel,
    pub udp_throughput_mbps: f64,
    pub udp_jitter_ms: Option<f64>,
    #[serde(rename = "udp_loss_%")]
    pub udp_loss_percent: Option<f64>,
}

/// Wall-clock timestamp in the local zone, ISO-8601 without offset.
pub fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

fn two_decimals<S: Serializer>(value: &f64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format!("{value:.2}"))
}
