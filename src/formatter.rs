//! Pluggable console output layer.
//!
//! Operational messages go through `tracing` on stderr; everything a user
//! reads as a result (per-reply samples, probe results, summaries) goes
//! through a [Formatter] on stdout.

use crate::{
    cli::OutputMode,
    probe::{Measurement, ProbeKind, ProbeOutcome},
    record::{PingRecord, TestLabel},
    report::LabelAggregate,
    stats::Summary,
};
use serde::Serialize;
use serde_json::to_string;
use std::io::{self, Write};

/// Print behaviour contract.
pub trait Formatter {
    fn sample(&self, rec: &PingRecord);
    fn probe(&self, label: TestLabel, kind: ProbeKind, outcome: &ProbeOutcome);
    fn summary(&self, label: TestLabel, sum: &Summary);
    fn aggregates(&self, rows: &[LabelAggregate]);
}

fn ms(v: Option<f64>) -> String {
    v.map(|v| format!("{v:.3}")).unwrap_or_else(|| "-".into())
}

/// UDP-only fields of a measurement, empty for TCP.
fn udp_extras(m: &Measurement) -> String {
    let mut out = String::new();
    if let Some(j) = m.jitter_ms {
        out.push_str(&format!(", jitter {j:.3} ms"));
    }
    if let Some(l) = m.loss_percent {
        out.push_str(&format!(", loss {l:.2}%"));
    }
    out
}

/* ---------- Normal text ---------- */

pub struct Normal;
impl Formatter for Normal {
    fn sample(&self, rec: &PingRecord) {
        // progress line, overwritten in place
        print!(
            "\rRTT = {:.2} ms, jitter = {:.2} ms, loss = {:.2}%   ",
            rec.ping_latency_ms, rec.ping_jitter_ms, rec.ping_loss_percent
        );
        let _ = io::stdout().flush();
    }

    fn probe(&self, label: TestLabel, kind: ProbeKind, outcome: &ProbeOutcome) {
        match outcome {
            ProbeOutcome::Measured(m) => println!(
                "[{label}] iperf {kind} -> {:.2} Mbps{}",
                m.throughput_mbps,
                udp_extras(m)
            ),
            ProbeOutcome::NoResult(reason) => println!("[{label}] iperf {kind} -> failed: {reason}"),
        }
    }

    fn summary(&self, label: TestLabel, s: &Summary) {
        println!(
            "\n--- {label} ping statistics ---
{} probes sent, {} replies, {:.2}% packet loss",
            s.attempts, s.replies, s.packet_loss
        );
        if s.replies > 0 {
            println!(
                "Round-trip min/avg/max = {}/{}/{} ms, jitter (RFC 3550) = {:.3} ms",
                ms(s.min_latency_ms),
                ms(s.mean_latency_ms),
                ms(s.max_latency_ms),
                s.jitter_ms
            );
        } else {
            println!("No ping data collected.");
        }
    }

    fn aggregates(&self, rows: &[LabelAggregate]) {
        println!(
            "label    samples  latency_ms  jitter_ms  loss_%  tcp_mbps  tcp_rev_mbps  \
udp_mbps  udp_jitter_ms  udp_loss_%"
        );
        for r in rows {
            println!(
                "{:<8} {:>7}  {:>10}  {:>9}  {:>6}  {:>8}  {:>12}  {:>8}  {:>13}  {:>10}",
                r.label.as_str(),
                r.ping_samples,
                ms(r.mean_latency_ms),
                ms(r.mean_jitter_ms),
                ms(r.mean_loss_percent),
                ms(r.mean_tcp_mbps),
                ms(r.mean_tcp_reverse_mbps),
                ms(r.mean_udp_mbps),
                ms(r.mean_udp_jitter_ms),
                ms(r.mean_udp_loss_percent),
            );
        }
    }
}

/* ---------- JSON ---------- */

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum JsonEvent<'a> {
    Sample(&'a PingRecord),
    Probe {
        label: TestLabel,
        kind: ProbeKind,
        throughput_mbps: Option<f64>,
        jitter_ms: Option<f64>,
        loss_percent: Option<f64>,
        error: Option<&'a str>,
    },
    Summary {
        label: TestLabel,
        #[serde(flatten)]
        summary: &'a Summary,
    },
    Aggregates {
        rows: &'a [LabelAggregate],
    },
}

pub struct Json;
impl Json {
    fn emit(ev: &JsonEvent<'_>) {
        match to_string(ev) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, "cannot encode output event"),
        }
    }
}

impl Formatter for Json {
    fn sample(&self, rec: &PingRecord) {
        Self::emit(&JsonEvent::Sample(rec))
    }

    fn probe(&self, label: TestLabel, kind: ProbeKind, outcome: &ProbeOutcome) {
        let (m, error) = match outcome {
            ProbeOutcome::Measured(m) => (Some(m), None),
            ProbeOutcome::NoResult(reason) => (None, Some(reason.as_str())),
        };
        Self::emit(&JsonEvent::Probe {
            label,
            kind,
            throughput_mbps: m.map(|m| m.throughput_mbps),
            jitter_ms: m.and_then(|m| m.jitter_ms),
            loss_percent: m.and_then(|m| m.loss_percent),
            error,
        })
    }

    fn summary(&self, label: TestLabel, s: &Summary) {
        Self::emit(&JsonEvent::Summary { label, summary: s })
    }

    fn aggregates(&self, rows: &[LabelAggregate]) {
        Self::emit(&JsonEvent::Aggregates { rows })
    }
}

/* ---------- ANSI-colored TTY ---------- */

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

pub struct Color;
impl Formatter for Color {
    fn sample(&self, rec: &PingRecord) {
        let color = if rec.ping_loss_percent == 0.0 { GREEN } else { RED };
        print!(
            "\rRTT = {:.2} ms, jitter = {:.2} ms, loss = {color}{:.2}%{RESET}   ",
            rec.ping_latency_ms, rec.ping_jitter_ms, rec.ping_loss_percent
        );
        let _ = io::stdout().flush();
    }

    fn probe(&self, label: TestLabel, kind: ProbeKind, outcome: &ProbeOutcome) {
        match outcome {
            ProbeOutcome::Measured(m) => println!(
                "[{label}] iperf {kind} -> {GREEN}{:.2} Mbps{RESET}{}",
                m.throughput_mbps,
                udp_extras(m)
            ),
            ProbeOutcome::NoResult(reason) => {
                println!("[{label}] iperf {kind} -> {RED}failed{RESET}: {reason}")
            }
        }
    }

    fn summary(&self, label: TestLabel, s: &Summary) {
        let color = if s.packet_loss == 0.0 { GREEN } else { RED };
        println!(
            "\n--- {label} ping statistics ---\n\
{} probes sent, {} replies, {color}{:.2}%{RESET} packet loss",
            s.attempts, s.replies, s.packet_loss
        );
        if s.replies > 0 {
            println!(
                "Round-trip min/avg/max = {}/{}/{} ms, jitter (RFC 3550) = {:.3} ms",
                ms(s.min_latency_ms),
                ms(s.mean_latency_ms),
                ms(s.max_latency_ms),
                s.jitter_ms
            );
        }
    }

    fn aggregates(&self, rows: &[LabelAggregate]) {
        Normal.aggregates(rows)
    }
}

/* ---------- Factory ---------- */

pub fn from_mode(mode: OutputMode) -> Box<dyn Formatter> {
    match mode {
        OutputMode::Normal => Box::new(Normal),
        OutputMode::Json => Box::new(Json),
        OutputMode::Color => Box::new(Color),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn udp_extras_lists_present_fields_only() {
        let tcp = Measurement {
            throughput_mbps: 90.0,
            jitter_ms: None,
            loss_percent: None,
        };
        assert_eq!(udp_extras(&tcp), "");

        let udp = Measurement {
            throughput_mbps: 10.0,
            jitter_ms: Some(0.25),
            loss_percent: Some(1.5),
        };
        assert_eq!(udp_extras(&udp), ", jitter 0.250 ms, loss 1.50%");
    }
}
