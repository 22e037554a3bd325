//! High-level orchestrator: VPN_ON session → teardown → VPN_OFF session →
//! teardown → repeat, until interrupted.
//!
//! [Orchestrator::step] performs exactly one transition of the cycle
//!
//! ```text
//! Idle → VpnStarting → SessionOnActive → TeardownOn → VpnOffSettling
//!      → SessionOffActive → TeardownOff → VpnStarting → …
//! ```
//!
//! and [Orchestrator::run] drives it forever, racing the loop against the
//! shutdown signal. Whatever ends the loop (interrupt or error), the same
//! teardown runs before returning.

use crate::{
    cli::{Args, Command, OutputMode, ReverseMode, RunArgs, SummaryArgs},
    config::{Config, SchedulePolicy, ensure_privileges},
    error::Result,
    formatter::{self, Formatter},
    pingstream::{self, ChildExit, PingHandle, PingSpawner, ProcessPingSpawner},
    probe::{Iperf, ProbeKind, ProbeOutcome, ThroughputProbe},
    record::{self, TestLabel, ThroughputRecord, UdpRecord},
    report,
    signal::Shutdown,
    store::{self, ResultFiles},
    vpn::{OpenVpn, Tunnel},
};
use std::fs;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};

/// Position in the ON/OFF cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Idle,
    VpnStarting,
    SessionOnActive,
    TeardownOn,
    VpnOffSettling,
    SessionOffActive,
    TeardownOff,
}

/// Why an active session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    Elapsed,
    PingExited(ChildExit),
    ProbeFailures(u32),
}

pub struct Orchestrator<T, P, S: PingSpawner> {
    schedule: SchedulePolicy,
    files: ResultFiles,
    udp: bool,
    tunnel: T,
    probe: P,
    spawner: S,
    ping: Option<S::Handle>,
    state: State,
    reverse: bool,
    last_end: Option<SessionEnd>,
    fmt: Box<dyn Formatter>,
}

impl<T, P, S> Orchestrator<T, P, S>
where
    T: Tunnel,
    P: ThroughputProbe,
    S: PingSpawner,
{
    pub fn new(cfg: &Config, tunnel: T, probe: P, spawner: S) -> Self {
        Self {
            schedule: cfg.schedule.clone(),
            files: cfg.files.clone(),
            udp: cfg.iperf.udp_bitrate.is_some(),
            tunnel,
            probe,
            spawner,
            ping: None,
            state: State::Idle,
            reverse: false,
            last_end: None,
            fmt: formatter::from_mode(cfg.output_mode),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Direction the next TCP probe will use.
    pub fn reverse(&self) -> bool {
        self.reverse
    }

    pub fn last_session_end(&self) -> Option<SessionEnd> {
        self.last_end
    }

    pub fn tunnel(&self) -> &T {
        &self.tunnel
    }

    /// Perform the transition out of the current state.
    pub async fn step(&mut self) -> Result<State> {
        let next = match self.state {
            State::Idle => {
                self.bring_up_tunnel().await?;
                State::VpnStarting
            }
            State::VpnStarting => {
                self.begin_session(TestLabel::VpnOn).await?;
                State::SessionOnActive
            }
            State::SessionOnActive => {
                self.supervise(TestLabel::VpnOn).await?;
                State::TeardownOn
            }
            State::TeardownOn => {
                self.teardown(TestLabel::VpnOn).await?;
                sleep(self.schedule.probe_interval).await;
                State::VpnOffSettling
            }
            State::VpnOffSettling => {
                info!("[VPN_OFF] making sure the tunnel is down");
                self.tunnel.kill().await?;
                self.begin_session(TestLabel::VpnOff).await?;
                State::SessionOffActive
            }
            State::SessionOffActive => {
                self.supervise(TestLabel::VpnOff).await?;
                State::TeardownOff
            }
            State::TeardownOff => {
                self.teardown(TestLabel::VpnOff).await?;
                info!(
                    restart_in_s = self.schedule.probe_interval.as_secs(),
                    "ON/OFF cycle complete"
                );
                sleep(self.schedule.probe_interval).await;
                self.bring_up_tunnel().await?;
                State::VpnStarting
            }
        };
        debug!(from = ?self.state, to = ?next, "transition");
        self.state = next;
        Ok(next)
    }

    /// Run the cycle until `shutdown` fires or a step fails; tear down either way.
    pub async fn run(&mut self, shutdown: &Shutdown) -> Result<()> {
        let res = tokio::select! {
            res = self.drive() => res,
            _ = shutdown.wait() => {
                info!("stopped by operator");
                Ok(())
            }
        };
        if let Err(e) = &res {
            error!(error = %e, state = ?self.state, "fatal error, tearing down");
        }
        self.shutdown().await;
        res
    }

    async fn drive(&mut self) -> Result<()> {
        loop {
            self.step().await?;
        }
    }

    /// Stop the ping stream if live, kill the tunnel and compact every file.
    pub async fn shutdown(&mut self) {
        self.stop_ping().await;
        if let Err(e) = self.tunnel.kill().await {
            warn!(error = %e, "tunnel kill failed during shutdown");
        }
        self.files.compact_all();
        self.state = State::Idle;
    }

    async fn bring_up_tunnel(&mut self) -> Result<()> {
        self.tunnel.kill().await?;
        info!("[VPN_ON] starting tunnel");
        self.tunnel.start().await?;
        sleep(self.schedule.vpn_settle).await;
        if !self.tunnel.is_running().await {
            warn!("tunnel process not alive after settle delay");
        }
        Ok(())
    }

    async fn begin_session(&mut self, label: TestLabel) -> Result<()> {
        self.files.prepare_throughput()?;
        let handle = self.spawner.spawn(label, self.schedule.session).await?;
        self.ping = Some(handle);
        Ok(())
    }

    async fn supervise(&mut self, label: TestLabel) -> Result<SessionEnd> {
        let started = Instant::now();
        let mut failures = 0;
        info!(
            %label,
            session_s = self.schedule.session.as_secs(),
            "session running"
        );

        let end = loop {
            if started.elapsed() >= self.schedule.session {
                break SessionEnd::Elapsed;
            }
            if let Some(exit) = self.ping_exit()? {
                warn!(%label, code = ?exit.code, "ping stream stopped unexpectedly");
                break SessionEnd::PingExited(exit);
            }

            if self.probe_once(label).await? {
                failures = 0;
            } else {
                failures += 1;
                if failures >= self.schedule.max_probe_failures {
                    warn!(%label, failures, "throughput server unreachable, ending session early");
                    break SessionEnd::ProbeFailures(failures);
                }
            }

            sleep(self.schedule.probe_interval).await;
        };

        info!(%label, end = ?end, elapsed_s = started.elapsed().as_secs(), "session finished");
        self.last_end = Some(end);
        Ok(end)
    }

    fn ping_exit(&mut self) -> Result<Option<ChildExit>> {
        match self.ping.as_mut() {
            Some(handle) => handle.try_exit(),
            None => Ok(Some(ChildExit { code: None })),
        }
    }

    /// One TCP probe (plus UDP if enabled). Returns whether TCP measured.
    async fn probe_once(&mut self, label: TestLabel) -> Result<bool> {
        let reverse = self.reverse;
        let kind = if reverse {
            ProbeKind::TcpReverse
        } else {
            ProbeKind::Tcp
        };
        let outcome = self.probe.tcp(reverse).await;
        self.fmt.probe(label, kind, &outcome);
        let measured = match &outcome {
            ProbeOutcome::Measured(m) => {
                let row = ThroughputRecord {
                    timestamp: record::now(),
                    test_label: label,
                    tcp_throughput_mbps: m.throughput_mbps,
                };
                store::append(self.files.tcp_for(reverse), &row)?;
                true
            }
            ProbeOutcome::NoResult(reason) => {
                warn!(%label, probe = %kind, %reason, "throughput probe failed");
                false
            }
        };

        if self.udp {
            let outcome = self.probe.udp().await;
            self.fmt.probe(label, ProbeKind::Udp, &outcome);
            match &outcome {
                ProbeOutcome::Measured(m) => {
                    let row = UdpRecord {
                        timestamp: record::now(),
                        test_label: label,
                        udp_throughput_mbps: m.throughput_mbps,
                        udp_jitter_ms: m.jitter_ms,
                        udp_loss_percent: m.loss_percent,
                    };
                    store::append(&self.files.udp, &row)?;
                }
                ProbeOutcome::NoResult(reason) => {
                    warn!(%label, probe = %ProbeKind::Udp, %reason, "throughput probe failed")
                }
            }
        }

        if self.schedule.reverse == ReverseMode::Probes {
            self.reverse = !self.reverse;
        }
        Ok(measured)
    }

    async fn teardown(&mut self, label: TestLabel) -> Result<()> {
        info!(%label, "tearing down session");
        self.stop_ping().await;
        self.tunnel.kill().await?;
        self.files.compact_all();
        if self.schedule.reverse == ReverseMode::Sessions {
            self.reverse = !self.reverse;
        }
        Ok(())
    }

    async fn stop_ping(&mut self) {
        if let Some(mut handle) = self.ping.take() {
            if let Err(e) = handle.stop(self.schedule.stop_grace).await {
                warn!(error = %e, "cannot stop ping stream cleanly");
            }
        }
    }
}

/* ---------- binary entry ---------- */

pub fn run(args: Args) -> Result<i32> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    rt.block_on(run_async(args))
}

async fn run_async(args: Args) -> Result<i32> {
    match &args.command {
        Command::Run(run) => run_sessions(run, args.output_mode, args.debug).await,
        Command::PingStream(ps) => {
            let shutdown = Shutdown::install()?;
            pingstream::run(ps, args.output_mode, &shutdown).await?;
            Ok(0)
        }
        Command::Summary(sum) => summarize(sum, args.output_mode),
    }
}

async fn run_sessions(args: &RunArgs, mode: OutputMode, debug: bool) -> Result<i32> {
    ensure_privileges()?;
    let cfg = Config::from_args(args, mode, debug)?;
    fs::create_dir_all(&cfg.user_dir)?;
    info!(
        user = %cfg.user,
        ping = %cfg.files.ping.display(),
        iperf = %cfg.files.tcp.display(),
        "=== VPN impact test === (Ctrl-C to stop)"
    );

    let shutdown = Shutdown::install()?;
    let spawner =
        ProcessPingSpawner::current(cfg.ping_host.clone(), cfg.files.ping.clone(), cfg.output_mode)?;
    let mut orch = Orchestrator::new(
        &cfg,
        OpenVpn::new(cfg.tunnel.clone()),
        Iperf::new(cfg.iperf.clone()),
        spawner,
    );
    orch.run(&shutdown).await?;
    Ok(0)
}

fn summarize(args: &SummaryArgs, mode: OutputMode) -> Result<i32> {
    let dir = args.data_dir.join(args.user_name.trim().to_lowercase());
    let rows = report::aggregate(&ResultFiles::under(&dir))?;
    formatter::from_mode(mode).aggregates(&rows);
    Ok(0)
}
