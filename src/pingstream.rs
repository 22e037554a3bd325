//! Continuous ping stream.
//!
//! Two halves live here:
//!
//! * the **runner** ([run]), executed in its own process via the
//!   `ping-stream` subcommand: it spawns the system `ping`, parses its
//!   stdout line by line and appends one row per reply before reading the
//!   next line;
//! * the **supervisor side** ([ProcessPingSpawner] / [PingStreamChild]),
//!   used by the orchestrator to launch that process, poll it and stop it.

use crate::{
    cli::{OutputMode, PingStreamArgs},
    error::{HarnessError, Result},
    formatter::{self, Formatter},
    parser::SampleParser,
    record::{self, PingRecord, TestLabel},
    signal::Shutdown,
    stats::Summary,
    store,
};
use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, BufReader},
    process::{Child, Command},
    time::timeout,
};
use tracing::{debug, info, warn};

/* ---------- runner ---------- */

/// `ping` invocation sending one probe per second for `duration`.
pub fn ping_command(host: &str, duration: Duration) -> Command {
    let count = duration.as_secs().max(1).to_string();
    let mut cmd = Command::new("ping");
    if cfg!(windows) {
        cmd.arg("-n").arg(count);
    } else {
        cmd.arg("-c").arg(count);
    }
    cmd.arg(host);
    cmd
}

/// Turns ping output lines into persisted rows for one session.
pub struct SessionRecorder {
    parser: SampleParser,
    session: u64,
    label: TestLabel,
    output: PathBuf,
}

impl SessionRecorder {
    /// Restore the results file if it was compacted and pick the next
    /// session number from it.
    pub fn open(output: &Path, label: TestLabel) -> Result<Self> {
        store::prepare(output)?;
        let session = store::next_session(output);
        Ok(Self {
            parser: SampleParser::new(),
            session,
            label,
            output: output.to_path_buf(),
        })
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    /// Parse one line; a reply is appended to the results file before this
    /// returns.
    pub fn ingest(&mut self, line: &str) -> Result<Option<PingRecord>> {
        let Some(obs) = self.parser.feed(line) else {
            return Ok(None);
        };
        let rec = PingRecord {
            timestamp: record::now(),
            session: self.session,
            test_label: self.label,
            ping_latency_ms: obs.rtt_ms,
            ping_jitter_ms: obs.jitter_ms,
            ping_loss_percent: obs.loss_percent,
        };
        store::append(&self.output, &rec)?;
        Ok(Some(rec))
    }

    pub fn summary(&self) -> Summary {
        self.parser.stats().summary()
    }

    pub fn replies(&self) -> u64 {
        self.parser.stats().replies()
    }
}

/// Why [pump] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamEnd {
    Eof,
    Interrupted,
}

/// Feed `reader` into `recorder` until EOF or shutdown.
pub async fn pump<R>(
    reader: R,
    recorder: &mut SessionRecorder,
    fmt: &dyn Formatter,
    shutdown: &Shutdown,
) -> Result<StreamEnd>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    if let Some(rec) = recorder.ingest(&line)? {
                        fmt.sample(&rec);
                    }
                }
                None => return Ok(StreamEnd::Eof),
            },
            _ = shutdown.wait() => return Ok(StreamEnd::Interrupted),
        }
    }
}

/// Entry point of the `ping-stream` subcommand.
pub async fn run(args: &PingStreamArgs, mode: OutputMode, shutdown: &Shutdown) -> Result<Summary> {
    let fmt = formatter::from_mode(mode);
    let mut recorder = SessionRecorder::open(&args.output_path, args.label)?;
    info!(
        host = %args.host,
        session = recorder.session(),
        label = %args.label,
        duration_s = args.duration,
        "ping stream starting"
    );

    let mut child = ping_command(&args.host, Duration::from_secs(args.duration))
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| HarnessError::PingStream(format!("cannot start ping: {e}")))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| HarnessError::PingStream("ping stdout not captured".into()))?;

    let end = pump(BufReader::new(stdout), &mut recorder, fmt.as_ref(), shutdown).await?;
    let summary = recorder.summary();
    fmt.summary(args.label, &summary);

    match end {
        StreamEnd::Interrupted => {
            info!("ping stream interrupted");
            if let Err(e) = child.kill().await {
                debug!(error = %e, "cannot kill ping");
            }
        }
        StreamEnd::Eof => {
            let status = child.wait().await?;
            debug!(%status, "ping exited");
            if !status.success() && recorder.replies() == 0 {
                return Err(HarnessError::PingStream(format!(
                    "ping exited with {status} without any reply"
                )));
            }
        }
    }
    Ok(summary)
}

/* ---------- supervisor side ---------- */

/// How a supervised ping stream ended on its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChildExit {
    pub code: Option<i32>,
}

/// Handle on a live ping stream.
#[allow(async_fn_in_trait)]
pub trait PingHandle {
    /// Non-blocking liveness check: `Some` once the stream has exited.
    fn try_exit(&mut self) -> Result<Option<ChildExit>>;

    /// Terminate gracefully, escalating to a hard kill after `grace`.
    async fn stop(&mut self, grace: Duration) -> Result<()>;
}

/// Launches ping streams for the orchestrator.
#[allow(async_fn_in_trait)]
pub trait PingSpawner {
    type Handle: PingHandle;

    async fn spawn(&mut self, label: TestLabel, duration: Duration) -> Result<Self::Handle>;
}

/// Spawns this executable's `ping-stream` subcommand.
pub struct ProcessPingSpawner {
    exe: PathBuf,
    host: String,
    output: PathBuf,
    mode: OutputMode,
}

impl ProcessPingSpawner {
    pub fn new(exe: PathBuf, host: String, output: PathBuf, mode: OutputMode) -> Self {
        Self {
            exe,
            host,
            output,
            mode,
        }
    }

    /// Spawner re-invoking the running binary.
    pub fn current(host: String, output: PathBuf, mode: OutputMode) -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?, host, output, mode))
    }
}

impl PingSpawner for ProcessPingSpawner {
    type Handle = PingStreamChild;

    async fn spawn(&mut self, label: TestLabel, duration: Duration) -> Result<PingStreamChild> {
        let mode = match self.mode {
            OutputMode::Normal => "normal",
            OutputMode::Json => "json",
            OutputMode::Color => "color",
        };
        let mut cmd = Command::new(&self.exe);
        cmd.arg("--output-mode")
            .arg(mode)
            .arg("ping-stream")
            .arg("--host")
            .arg(&self.host)
            .arg("--duration")
            .arg(duration.as_secs().max(1).to_string())
            .arg("--output-path")
            .arg(&self.output)
            .arg("--label")
            .arg(label.as_str())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        info!(%label, output = %self.output.display(), "spawning ping stream");
        Ok(PingStreamChild {
            child: cmd.spawn()?,
        })
    }
}

/// The `ping-stream` child process.
pub struct PingStreamChild {
    child: Child,
}

impl PingHandle for PingStreamChild {
    fn try_exit(&mut self) -> Result<Option<ChildExit>> {
        Ok(self
            .child
            .try_wait()?
            .map(|status| ChildExit { code: status.code() }))
    }

    async fn stop(&mut self, grace: Duration) -> Result<()> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        terminate(&mut self.child);
        match timeout(grace, self.child.wait()).await {
            Ok(status) => {
                let status = status?;
                debug!(%status, "ping stream exited");
            }
            Err(_) => {
                warn!("ping stream ignored SIGTERM, killing");
                self.child.kill().await?;
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SAFETY: pid belongs to our un-reaped child; worst case the signal
        // hits an already exited process and kill returns ESRCH.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.start_kill();
}
