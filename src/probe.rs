//! Throughput probes.
//!
//! [Iperf] wraps one bounded `iperf` client run per call. Every way the tool
//! can fail (not installed, connection refused, garbage output, overrun)
//! comes back as [ProbeOutcome::NoResult]; deciding when too many failures
//! matter is the orchestrator's job.

use crate::{
    config::IperfTarget,
    parser::{IperfCsv, IperfJson, SummaryGrammar},
};
use serde::Serialize;
use std::{fmt, process::Stdio, time::Duration};
use tokio::{process::Command, time::timeout};
use tracing::debug;

/// Slack on top of the requested test length before the run is abandoned.
const OVERRUN_GRACE: Duration = Duration::from_secs(15);

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    Tcp,
    TcpReverse,
    Udp,
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProbeKind::Tcp => "TCP",
            ProbeKind::TcpReverse => "TCP (reverse)",
            ProbeKind::Udp => "UDP",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Measurement {
    pub throughput_mbps: f64,
    pub jitter_ms: Option<f64>,
    pub loss_percent: Option<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ProbeOutcome {
    Measured(Measurement),
    NoResult(String),
}

impl ProbeOutcome {
    pub fn is_measured(&self) -> bool {
        matches!(self, ProbeOutcome::Measured(_))
    }
}

/// Seam between the orchestrator and the throughput tool.
#[allow(async_fn_in_trait)]
pub trait ThroughputProbe {
    async fn tcp(&mut self, reverse: bool) -> ProbeOutcome;
    async fn udp(&mut self) -> ProbeOutcome;
}

/// `iperf` client against a fixed server.
pub struct Iperf {
    target: IperfTarget,
}

impl Iperf {
    pub fn new(target: IperfTarget) -> Self {
        Self { target }
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new("iperf");
        cmd.arg("-c")
            .arg(&self.target.server)
            .arg("-p")
            .arg(self.target.port.to_string())
            .arg("-t")
            .arg(self.target.duration.as_secs().to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    /// Run `cmd` to completion within the test length plus grace.
    async fn capture(&self, mut cmd: Command) -> Result<String, String> {
        debug!(cmd = ?cmd, "running throughput probe");
        let out = match timeout(self.target.duration + OVERRUN_GRACE, cmd.output()).await {
            Err(_) => return Err("timed out".into()),
            Ok(Err(e)) => return Err(format!("cannot run iperf: {e}")),
            Ok(Ok(out)) => out,
        };
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(format!("iperf exited with {}: {}", out.status, stderr.trim()));
        }
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }
}

impl ThroughputProbe for Iperf {
    async fn tcp(&mut self, reverse: bool) -> ProbeOutcome {
        let mut cmd = self.base_command();
        cmd.arg("-y").arg("C");
        if reverse {
            cmd.arg("-R");
        }
        match self.capture(cmd).await {
            Ok(stdout) => match IperfCsv.parse(&stdout) {
                Some(mbps) => ProbeOutcome::Measured(Measurement {
                    throughput_mbps: mbps,
                    jitter_ms: None,
                    loss_percent: None,
                }),
                None => ProbeOutcome::NoResult("no throughput field in iperf output".into()),
            },
            Err(reason) => ProbeOutcome::NoResult(reason),
        }
    }

    async fn udp(&mut self) -> ProbeOutcome {
        let Some(bitrate) = self.target.udp_bitrate.clone() else {
            return ProbeOutcome::NoResult("UDP probe disabled".into());
        };
        let mut cmd = self.base_command();
        cmd.arg("-J").arg("-u").arg("-b").arg(bitrate);
        match self.capture(cmd).await {
            Ok(stdout) => match IperfJson.parse(&stdout) {
                Some(sum) => ProbeOutcome::Measured(Measurement {
                    throughput_mbps: sum.throughput_mbps,
                    jitter_ms: sum.jitter_ms,
                    loss_percent: sum.loss_percent,
                }),
                None => ProbeOutcome::NoResult("no summary in iperf JSON report".into()),
            },
            Err(reason) => ProbeOutcome::NoResult(reason),
        }
    }
}
