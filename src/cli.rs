//! Argument parsing layer (clap).

use crate::record::TestLabel;
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum, value_parser};
use std::path::PathBuf;

/// Global CLI arguments.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose logging and tunnel client output
    #[arg(long, global = true)]
    pub debug: bool,

    /// Console output format (`-o`)
    #[arg(
        short = 'o',
        long,
        global = true,
        value_enum,
        default_value_t = OutputMode::Normal,
        help = "normal | json | color"
    )]
    pub output_mode: OutputMode,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Alternate VPN_ON / VPN_OFF sessions until interrupted
    Run(RunArgs),
    /// Stream ping replies into a results file (spawned by `run`)
    PingStream(PingStreamArgs),
    /// Print per-label aggregates of persisted results
    Summary(SummaryArgs),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RunArgs {
    /// Owner of the results directory
    #[arg(long, env = "USER_NAME")]
    pub user_name: String,

    /// Root directory for per-user results
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,

    /// Host probed by the ping stream
    #[arg(long, default_value = "moodle.ufrgs.br")]
    pub ping_host: String,

    /// iperf server
    #[arg(long, default_value = "pcad.inf.ufrgs.br")]
    pub iperf_server: String,

    #[arg(long, default_value_t = 8787)]
    pub iperf_port: u16,

    /// Length of one VPN_ON or VPN_OFF session (s)
    #[arg(long, default_value_t = 900, value_parser = value_parser!(u64).range(1..))]
    pub session_secs: u64,

    /// Duration of one iperf run (s)
    #[arg(long, default_value_t = 180, value_parser = value_parser!(u64).range(1..))]
    pub iperf_secs: u64,

    /// Pause between probes and after teardown (s)
    #[arg(long, default_value_t = 5, value_parser = value_parser!(u64).range(1..))]
    pub interval_secs: u64,

    /// Wait after starting the tunnel (s)
    #[arg(long, default_value_t = 10, value_parser = value_parser!(u64).range(1..))]
    pub settle_secs: u64,

    /// Grace period for the ping stream to exit after SIGTERM (s)
    #[arg(long, default_value_t = 5, value_parser = value_parser!(u64).range(1..))]
    pub stop_grace_secs: u64,

    /// Consecutive failed throughput probes that end a session early
    #[arg(long, default_value_t = 3, value_parser = value_parser!(u32).range(1..))]
    pub max_probe_failures: u32,

    /// When to flip the iperf direction
    #[arg(long, value_enum, default_value_t = ReverseMode::Sessions)]
    pub reverse: ReverseMode,

    /// Also run the UDP probe after every TCP probe
    #[arg(long)]
    pub udp: bool,

    /// Target bitrate of the UDP probe
    #[arg(long, default_value = "10M")]
    pub udp_bitrate: String,

    /// OpenVPN configuration file
    #[arg(long, default_value = "ufrgs.ovpn")]
    pub vpn_config: PathBuf,

    /// OpenVPN credentials file
    #[arg(long, default_value = "pass.txt")]
    pub vpn_credentials: PathBuf,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct PingStreamArgs {
    #[arg(long)]
    pub host: String,

    /// Stream length in seconds (one probe per second)
    #[arg(long, value_parser = value_parser!(u64).range(1..))]
    pub duration: u64,

    #[arg(long)]
    pub output_path: PathBuf,

    #[arg(long, value_enum)]
    pub label: TestLabel,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct SummaryArgs {
    #[arg(long, env = "USER_NAME")]
    pub user_name: String,

    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,
}

/// Supported output modes.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputMode {
    Normal,
    Json,
    Color, // ANSI-colored TTY
}

/// When the iperf direction is inverted.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReverseMode {
    /// Always client-to-server
    Off,
    /// Flip at every teardown
    Sessions,
    /// Flip after every probe
    Probes,
}
