//! Read-only aggregation over persisted result files.

use crate::{
    error::Result,
    record::TestLabel,
    store::{ResultFiles, archive_path},
};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};
use tracing::warn;

#[derive(Deserialize)]
struct PingRow {
    test_label: TestLabel,
    ping_latency_ms: Option<f64>,
    ping_jitter_ms: Option<f64>,
    #[serde(rename = "ping_loss_%")]
    ping_loss_percent: Option<f64>,
}

#[derive(Deserialize)]
struct TcpRow {
    test_label: TestLabel,
    tcp_throughput_mbps: Option<f64>,
}

#[derive(Deserialize)]
struct UdpRow {
    test_label: TestLabel,
    udp_throughput_mbps: Option<f64>,
    udp_jitter_ms: Option<f64>,
    #[serde(rename = "udp_loss_%")]
    udp_loss_percent: Option<f64>,
}

/// Per-label means over everything recorded so far.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct LabelAggregate {
    pub label: TestLabel,
    pub ping_samples: u64,
    pub mean_latency_ms: Option<f64>,
    pub mean_jitter_ms: Option<f64>,
    pub mean_loss_percent: Option<f64>,
    pub tcp_samples: u64,
    pub mean_tcp_mbps: Option<f64>,
    pub mean_tcp_reverse_mbps: Option<f64>,
    pub udp_samples: u64,
    pub mean_udp_mbps: Option<f64>,
    pub mean_udp_jitter_ms: Option<f64>,
    pub mean_udp_loss_percent: Option<f64>,
}

#[derive(Default)]
struct Mean {
    sum: f64,
    n: u64,
}

impl Mean {
    fn push(&mut self, v: Option<f64>) {
        if let Some(v) = v {
            self.sum += v;
            self.n += 1;
        }
    }

    fn get(&self) -> Option<f64> {
        (self.n > 0).then(|| self.sum / self.n as f64)
    }
}

#[derive(Default)]
struct Acc {
    samples: u64,
    latency: Mean,
    jitter: Mean,
    loss: Mean,
    tcp: Mean,
    tcp_reverse: Mean,
    udp: Mean,
    udp_jitter: Mean,
    udp_loss: Mean,
}

/// Open the plain file, or its compacted sidecar when only that exists.
fn open_any(path: &Path) -> Result<Option<Box<dyn Read>>> {
    if path.is_file() {
        return Ok(Some(Box::new(BufReader::new(File::open(path)?))));
    }
    let gz = archive_path(path);
    if gz.is_file() {
        return Ok(Some(Box::new(GzDecoder::new(BufReader::new(File::open(gz)?)))));
    }
    Ok(None)
}

fn rows<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
    let Some(input) = open_any(path)? else {
        return Ok(Vec::new());
    };
    let mut out = Vec::new();
    for (i, row) in csv::Reader::from_reader(input).deserialize().enumerate() {
        match row {
            Ok(r) => out.push(r),
            Err(e) => warn!(file = %path.display(), row = i + 1, error = %e, "skipping row"),
        }
    }
    Ok(out)
}

fn slot(label: TestLabel) -> usize {
    match label {
        TestLabel::VpnOn => 0,
        TestLabel::VpnOff => 1,
    }
}

/// Aggregate every result file of one user, one entry per label.
pub fn aggregate(files: &ResultFiles) -> Result<Vec<LabelAggregate>> {
    let mut accs: [Acc; 2] = Default::default();

    for r in rows::<PingRow>(&files.ping)? {
        let acc = &mut accs[slot(r.test_label)];
        acc.samples += 1;
        acc.latency.push(r.ping_latency_ms);
        acc.jitter.push(r.ping_jitter_ms);
        acc.loss.push(r.ping_loss_percent);
    }
    for r in rows::<TcpRow>(&files.tcp)? {
        accs[slot(r.test_label)].tcp.push(r.tcp_throughput_mbps);
    }
    for r in rows::<TcpRow>(&files.tcp_reverse)? {
        accs[slot(r.test_label)].tcp_reverse.push(r.tcp_throughput_mbps);
    }
    for r in rows::<UdpRow>(&files.udp)? {
        let acc = &mut accs[slot(r.test_label)];
        acc.udp.push(r.udp_throughput_mbps);
        acc.udp_jitter.push(r.udp_jitter_ms);
        acc.udp_loss.push(r.udp_loss_percent);
    }

    Ok([TestLabel::VpnOn, TestLabel::VpnOff]
        .into_iter()
        .zip(accs)
        .map(|(label, acc)| LabelAggregate {
            label,
            ping_samples: acc.samples,
            mean_latency_ms: acc.latency.get(),
            mean_jitter_ms: acc.jitter.get(),
            mean_loss_percent: acc.loss.get(),
            tcp_samples: acc.tcp.n + acc.tcp_reverse.n,
            mean_tcp_mbps: acc.tcp.get(),
            mean_tcp_reverse_mbps: acc.tcp_reverse.get(),
            udp_samples: acc.udp.n,
            mean_udp_mbps: acc.udp.get(),
            mean_udp_jitter_ms: acc.udp_jitter.get(),
            mean_udp_loss_percent: acc.udp_loss.get(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        record::{PingRecord, ThroughputRecord, UdpRecord, now},
        store::{append, compact},
    };

    fn ping(label: TestLabel, rtt: f64, jitter: f64) -> PingRecord {
        PingRecord {
            timestamp: now(),
            session: 1,
            test_label: label,
            ping_latency_ms: rtt,
            ping_jitter_ms: jitter,
            ping_loss_percent: 0.0,
        }
    }

    #[test]
    fn aggregates_plain_and_compacted_files() {
        let dir = tempfile::tempdir().unwrap();
        let files = ResultFiles::under(dir.path());

        append(&files.ping, &ping(TestLabel::VpnOn, 20.0, 1.0)).unwrap();
        append(&files.ping, &ping(TestLabel::VpnOn, 30.0, 2.0)).unwrap();
        append(&files.ping, &ping(TestLabel::VpnOff, 10.0, 0.5)).unwrap();
        compact(&files.ping).unwrap();

        let tcp = ThroughputRecord {
            timestamp: now(),
            test_label: TestLabel::VpnOff,
            tcp_throughput_mbps: 94.0,
        };
        append(&files.tcp, &tcp).unwrap();

        let agg = aggregate(&files).unwrap();
        let on = &agg[0];
        assert_eq!(on.label, TestLabel::VpnOn);
        assert_eq!(on.ping_samples, 2);
        assert_eq!(on.mean_latency_ms, Some(25.0));
        assert_eq!(on.mean_jitter_ms, Some(1.5));
        assert_eq!(on.mean_tcp_mbps, None);

        let off = &agg[1];
        assert_eq!(off.ping_samples, 1);
        assert_eq!(off.mean_tcp_mbps, Some(94.0));
        assert_eq!(off.mean_tcp_reverse_mbps, None);
    }

    fn udp(label: TestLabel, mbps: f64, jitter: Option<f64>, loss: Option<f64>) -> UdpRecord {
        UdpRecord {
            timestamp: now(),
            test_label: label,
            udp_throughput_mbps: mbps,
            udp_jitter_ms: jitter,
            udp_loss_percent: loss,
        }
    }

    #[test]
    fn udp_means_skip_empty_cells() {
        let dir = tempfile::tempdir().unwrap();
        let files = ResultFiles::under(dir.path());

        // older rows live in the archive, newer ones in the plain file
        append(&files.udp, &udp(TestLabel::VpnOn, 8.0, Some(0.5), Some(2.0))).unwrap();
        append(&files.udp, &udp(TestLabel::VpnOff, 10.0, None, None)).unwrap();
        compact(&files.udp).unwrap();
        append(&files.ping, &ping(TestLabel::VpnOn, 20.0, 1.0)).unwrap();

        let agg = aggregate(&files).unwrap();
        let on = &agg[0];
        assert_eq!(on.ping_samples, 1);
        assert_eq!(on.udp_samples, 1);
        assert_eq!(on.mean_udp_mbps, Some(8.0));
        assert_eq!(on.mean_udp_jitter_ms, Some(0.5));
        assert_eq!(on.mean_udp_loss_percent, Some(2.0));

        let off = &agg[1];
        assert_eq!(off.udp_samples, 1);
        assert_eq!(off.mean_udp_mbps, Some(10.0));
        assert_eq!(off.mean_udp_jitter_ms, None);
        assert_eq!(off.mean_udp_loss_percent, None);
    }

    #[test]
    fn plain_file_wins_over_archive() {
        let dir = tempfile::tempdir().unwrap();
        let files = ResultFiles::under(dir.path());
        append(&files.udp, &udp(TestLabel::VpnOn, 4.0, None, None)).unwrap();
        compact(&files.udp).unwrap();
        crate::store::prepare(&files.udp).unwrap();
        append(&files.udp, &udp(TestLabel::VpnOn, 6.0, Some(1.0), None)).unwrap();

        let on = &aggregate(&files).unwrap()[0];
        assert_eq!(on.udp_samples, 2);
        assert_eq!(on.mean_udp_mbps, Some(5.0));
        assert_eq!(on.mean_udp_jitter_ms, Some(1.0));
    }

    #[test]
    fn no_files_means_empty_aggregates() {
        let dir = tempfile::tempdir().unwrap();
        let agg = aggregate(&ResultFiles::under(dir.path())).unwrap();
        assert!(
            agg.iter()
                .all(|a| a.ping_samples == 0 && a.tcp_samples == 0 && a.udp_samples == 0)
        );
    }
}
