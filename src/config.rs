//! Immutable run configuration, built once from the `run` arguments.

use crate::{
    cli::{OutputMode, ReverseMode, RunArgs},
    error::{HarnessError, Result},
    store::ResultFiles,
};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

/// Timing and failure policy shared by both halves of the ON/OFF cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchedulePolicy {
    pub session: Duration,
    pub probe_interval: Duration,
    pub vpn_settle: Duration,
    pub stop_grace: Duration,
    pub max_probe_failures: u32,
    pub reverse: ReverseMode,
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self {
            session: Duration::from_secs(900),
            probe_interval: Duration::from_secs(5),
            vpn_settle: Duration::from_secs(10),
            stop_grace: Duration::from_secs(5),
            max_probe_failures: 3,
            reverse: ReverseMode::Sessions,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IperfTarget {
    pub server: String,
    pub port: u16,
    pub duration: Duration,
    /// `Some(bitrate)` enables the UDP probe.
    pub udp_bitrate: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TunnelSettings {
    pub config: PathBuf,
    pub credentials: PathBuf,
    pub show_output: bool,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub user: String,
    pub user_dir: PathBuf,
    pub files: ResultFiles,
    pub ping_host: String,
    pub iperf: IperfTarget,
    pub tunnel: TunnelSettings,
    pub schedule: SchedulePolicy,
    pub output_mode: OutputMode,
}

impl Config {
    /// Validate arguments and resolve paths. Touches the filesystem only to
    /// check that the tunnel files exist.
    pub fn from_args(args: &RunArgs, output_mode: OutputMode, debug: bool) -> Result<Self> {
        let user = args.user_name.trim().to_lowercase();
        if user.is_empty() {
            return Err(HarnessError::Config("USER_NAME is empty".into()));
        }
        require_file(&args.vpn_config)?;
        require_file(&args.vpn_credentials)?;

        let user_dir = args.data_dir.join(&user);
        Ok(Self {
            files: ResultFiles::under(&user_dir),
            user,
            user_dir,
            ping_host: args.ping_host.clone(),
            iperf: IperfTarget {
                server: args.iperf_server.clone(),
                port: args.iperf_port,
                duration: Duration::from_secs(args.iperf_secs),
                udp_bitrate: args.udp.then(|| args.udp_bitrate.clone()),
            },
            tunnel: TunnelSettings {
                config: args.vpn_config.clone(),
                credentials: args.vpn_credentials.clone(),
                show_output: debug,
            },
            schedule: SchedulePolicy {
                session: Duration::from_secs(args.session_secs),
                probe_interval: Duration::from_secs(args.interval_secs),
                vpn_settle: Duration::from_secs(args.settle_secs),
                stop_grace: Duration::from_secs(args.stop_grace_secs),
                max_probe_failures: args.max_probe_failures,
                reverse: args.reverse,
            },
            output_mode,
        })
    }
}

fn require_file(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(HarnessError::MissingFile(path.to_path_buf()))
    }
}

/// Fail fast unless the process may manage the tunnel.
#[cfg(unix)]
pub fn ensure_privileges() -> Result<()> {
    // SAFETY: geteuid has no preconditions and cannot fail.
    let euid = unsafe { libc::geteuid() };
    if euid == 0 {
        Ok(())
    } else {
        Err(HarnessError::Privilege(format!(
            "running as uid {euid}; the tunnel client needs root, re-run with sudo"
        )))
    }
}

#[cfg(not(unix))]
pub fn ensure_privileges() -> Result<()> {
    tracing::warn!("privilege check not supported on this platform, continuing");
    Ok(())
}
