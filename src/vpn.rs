//! Tunnel control.
//!
//! The tunnel client is a process-wide singleton identified by name. Only
//! the orchestrator drives it, one call at a time.

use crate::{config::TunnelSettings, error::Result};
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Seam between the orchestrator and the tunnel client.
#[allow(async_fn_in_trait)]
pub trait Tunnel {
    /// Terminate any running tunnel. Idempotent; never fails because
    /// nothing was running.
    async fn kill(&mut self) -> Result<()>;

    /// Launch the tunnel without waiting for it to connect.
    async fn start(&mut self) -> Result<()>;

    /// Is a tunnel process alive? Diagnostic only.
    async fn is_running(&mut self) -> bool;
}

#[cfg(not(windows))]
const PROCESS_NAME: &str = "openvpn";
#[cfg(windows)]
const PROCESS_NAME: &str = "openvpn.exe";

/// OpenVPN client driven through its command line.
pub struct OpenVpn {
    settings: TunnelSettings,
    child: Option<Child>,
}

impl OpenVpn {
    pub fn new(settings: TunnelSettings) -> Self {
        Self {
            settings,
            child: None,
        }
    }
}

#[cfg(not(windows))]
fn kill_command() -> Command {
    let mut cmd = Command::new("pkill");
    cmd.arg("-x").arg(PROCESS_NAME);
    cmd
}

#[cfg(windows)]
fn kill_command() -> Command {
    let mut cmd = Command::new("taskkill");
    cmd.args(["/F", "/IM", PROCESS_NAME]);
    cmd
}

#[cfg(not(windows))]
fn liveness_command() -> Command {
    let mut cmd = Command::new("pgrep");
    cmd.arg("-x").arg(PROCESS_NAME);
    cmd
}

#[cfg(windows)]
fn liveness_command() -> Command {
    let mut cmd = Command::new("tasklist");
    cmd.args(["/FI", &format!("IMAGENAME eq {PROCESS_NAME}")]);
    cmd
}

impl Tunnel for OpenVpn {
    async fn kill(&mut self) -> Result<()> {
        let status = kill_command()
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match status {
            Ok(s) => debug!(status = %s, "tunnel kill issued"),
            Err(e) => warn!(error = %e, "cannot run tunnel kill command"),
        }
        // reap our own handle so it never lingers as a zombie
        if let Some(mut child) = self.child.take() {
            match child.try_wait() {
                Ok(Some(status)) => debug!(%status, "tunnel client already exited"),
                Ok(None) => {
                    if let Err(e) = child.kill().await {
                        debug!(error = %e, "cannot kill tunnel client");
                    }
                }
                Err(e) => warn!(error = %e, "cannot poll tunnel client"),
            }
        }
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        let mut cmd = Command::new("openvpn");
        cmd.arg("--config")
            .arg(&self.settings.config)
            .arg("--auth-user-pass")
            .arg(&self.settings.credentials)
            .stdin(Stdio::null());
        if !self.settings.show_output {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }
        info!(config = %self.settings.config.display(), "starting tunnel");
        self.child = Some(cmd.spawn()?);
        Ok(())
    }

    // matches any tunnel process, ours or not
    async fn is_running(&mut self) -> bool {
        let mut cmd = liveness_command();
        cmd.stdout(Stdio::piped()).stderr(Stdio::null());
        match cmd.output().await {
            #[cfg(windows)]
            Ok(out) => String::from_utf8_lossy(&out.stdout).contains(PROCESS_NAME),
            #[cfg(not(windows))]
            Ok(out) => out.status.success(),
            Err(e) => {
                warn!(error = %e, "cannot query tunnel liveness");
                false
            }
        }
    }
}
