//! Tool-output grammars.
//!
//! Each external tool sits behind a narrow trait so its output format can be
//! swapped or versioned without touching the code that consumes it:
//!
//! * [PingGrammar] classifies one line of a continuous `ping` run;
//! * [SummaryGrammar] extracts the result of one finished `iperf` run.
//!
//! [SampleParser] is the stateful half of the ping side: it feeds classified
//! lines into [StreamStats] and emits one [Observation] per reply.

use crate::stats::{Observation, StreamStats};
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

static RTT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"time[=<]([\d.]+)\s*ms").expect("static regex"));
static SEQ: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"icmp_seq[=\s](\d+)").expect("static regex"));

const UNANSWERED_MARKERS: &[&str] = &[
    "Request timeout for icmp_seq", // macOS / BSD
    "Request timed out.",           // Windows
    "no answer yet for icmp_seq",   // Linux with -O
];

/// What a single line of ping output means.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PingLine {
    Reply { rtt_ms: f64, seq: Option<u64> },
    Unanswered { seq: Option<u64> },
    Other,
}

pub trait PingGrammar {
    fn classify(&self, line: &str) -> PingLine;
}

/// Grammar of the stock ICMP `ping` on Linux, macOS and Windows.
#[derive(Clone, Copy, Debug, Default)]
pub struct IcmpPing;

impl PingGrammar for IcmpPing {
    fn classify(&self, line: &str) -> PingLine {
        let seq = SEQ
            .captures(line)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok());

        if let Some(rtt_ms) = RTT
            .captures(line)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
        {
            return PingLine::Reply { rtt_ms, seq };
        }
        if UNANSWERED_MARKERS.iter().any(|m| line.contains(m)) {
            return PingLine::Unanswered { seq };
        }
        PingLine::Other
    }
}

/// Streaming line parser for one session.
pub struct SampleParser<G = IcmpPing> {
    grammar: G,
    stats: StreamStats,
}

impl SampleParser<IcmpPing> {
    pub fn new() -> Self {
        Self::with_grammar(IcmpPing)
    }
}

impl Default for SampleParser<IcmpPing> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G: PingGrammar> SampleParser<G> {
    pub fn with_grammar(grammar: G) -> Self {
        Self {
            grammar,
            stats: StreamStats::new(),
        }
    }

    /// Feed one line; returns the reply's metrics if the line was a reply.
    pub fn feed(&mut self, line: &str) -> Option<Observation> {
        match self.grammar.classify(line) {
            PingLine::Reply { rtt_ms, seq } => Some(self.stats.record_reply(rtt_ms, seq)),
            PingLine::Unanswered { seq } => {
                self.stats.record_unanswered(seq);
                None
            }
            PingLine::Other => None,
        }
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }
}

/// Extracts the result of one finished throughput run from its stdout.
pub trait SummaryGrammar {
    type Summary;
    fn parse(&self, stdout: &str) -> Option<Self::Summary>;
}

/// `iperf -y C`: the trailing comma-separated field is bits per second.
#[derive(Clone, Copy, Debug, Default)]
pub struct IperfCsv;

impl SummaryGrammar for IperfCsv {
    /// Throughput in Mbps.
    type Summary = f64;

    fn parse(&self, stdout: &str) -> Option<f64> {
        let bps: f64 = stdout.trim().rsplit(',').next()?.trim().parse().ok()?;
        bps.is_finite().then_some(bps / 1e6)
    }
}

/// Result of a UDP run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UdpSummary {
    pub throughput_mbps: f64,
    pub jitter_ms: Option<f64>,
    pub loss_percent: Option<f64>,
}

/// `iperf -J`: the `end.sum` object of the JSON report.
#[derive(Clone, Copy, Debug, Default)]
pub struct IperfJson;

#[derive(Deserialize)]
struct JsonReport {
    end: JsonEnd,
}

#[derive(Deserialize)]
struct JsonEnd {
    sum: JsonSum,
}

#[derive(Deserialize)]
struct JsonSum {
    bits_per_second: f64,
    jitter_ms: Option<f64>,
    lost_percent: Option<f64>,
}

impl SummaryGrammar for IperfJson {
    type Summary = UdpSummary;

    fn parse(&self, stdout: &str) -> Option<UdpSummary> {
        let report: JsonReport = serde_json::from_str(stdout).ok()?;
        let sum = report.end.sum;
        Some(UdpSummary {
            throughput_mbps: sum.bits_per_second / 1e6,
            jitter_ms: sum.jitter_ms,
            loss_percent: sum.lost_percent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linux_reply_line() {
        let line = "64 bytes from 143.54.1.1: icmp_seq=3 ttl=57 time=12.4 ms";
        assert_eq!(
            IcmpPing.classify(line),
            PingLine::Reply {
                rtt_ms: 12.4,
                seq: Some(3)
            }
        );
    }

    #[test]
    fn windows_sub_millisecond_reply() {
        let line = "Reply from 10.0.0.1: bytes=32 time<1ms TTL=128";
        assert_eq!(
            IcmpPing.classify(line),
            PingLine::Reply {
                rtt_ms: 1.0,
                seq: None
            }
        );
    }

    #[test]
    fn timeouts_and_noise() {
        assert_eq!(
            IcmpPing.classify("Request timeout for icmp_seq 7"),
            PingLine::Unanswered { seq: Some(7) }
        );
        assert_eq!(
            IcmpPing.classify("Request timed out."),
            PingLine::Unanswered { seq: None }
        );
        assert_eq!(
            IcmpPing.classify("PING moodle.ufrgs.br (143.54.1.1) 56(84) bytes of data."),
            PingLine::Other
        );
        assert_eq!(
            IcmpPing.classify("rtt min/avg/max/mdev = 1.0/2.0/3.0/0.5 ms"),
            PingLine::Other
        );
    }

    #[test]
    fn parser_emits_one_observation_per_reply() {
        let mut p = SampleParser::new();
        assert!(p.feed("PING host (1.2.3.4) 56(84) bytes of data.").is_none());
        let a = p.feed("64 bytes from 1.2.3.4: icmp_seq=1 ttl=57 time=10 ms").unwrap();
        let b = p.feed("64 bytes from 1.2.3.4: icmp_seq=2 ttl=57 time=30 ms").unwrap();
        assert_eq!(a.jitter_ms, 0.0);
        assert_eq!(b.jitter_ms, 1.25);
        assert_eq!(p.stats().replies(), 2);
    }

    #[test]
    fn iperf_csv_trailing_field() {
        let out = "20251001120000,10.0.0.2,5001,143.54.1.2,8787,3,0.0-180.0,2250000000,100000000\n";
        assert_eq!(IperfCsv.parse(out), Some(100.0));
        assert_eq!(IperfCsv.parse(""), None);
        assert_eq!(IperfCsv.parse("connect failed: Connection refused"), None);
    }

    #[test]
    fn iperf_json_summary() {
        let out = r#"{"start":{},"end":{"sum":{"bits_per_second":10000000.0,"jitter_ms":0.25,"lost_percent":1.5}}}"#;
        assert_eq!(
            IperfJson.parse(out),
            Some(UdpSummary {
                throughput_mbps: 10.0,
                jitter_ms: Some(0.25),
                loss_percent: Some(1.5),
            })
        );
        assert_eq!(IperfJson.parse(r#"{"error":"unable to connect"}"#), None);
    }
}
