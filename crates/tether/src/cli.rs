//! Clap derive structures for the `tether` CLI.

use std::time::Duration;

use clap::{Args, Parser, Subcommand};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// tether -- drive a device session from the command line
#[derive(Debug, Parser)]
#[command(
    name = "tether",
    version,
    about = "Keep a session with a remote device account and watch its devices",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Profile to use
    #[arg(long, short = 'p', env = "TETHER_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Endpoint URL (overrides profile)
    #[arg(long, short = 'u', env = "TETHER_URL", global = true)]
    pub url: Option<String>,

    /// Accept invalid TLS certificates
    #[arg(long, short = 'k', global = true)]
    pub insecure: bool,

    /// Request timeout in seconds (overrides profile)
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Log in and store the session credentials
    Login(LoginArgs),

    /// List devices on the account
    Devices,

    /// Keep the session running and print device updates
    Watch(WatchArgs),

    /// Send a command to one device
    Send(SendArgs),

    /// End the session and forget stored credentials
    Logout,
}

#[derive(Debug, Args)]
pub struct LoginArgs {
    /// Account username (overrides profile)
    #[arg(long, short = 'U', env = "TETHER_USERNAME")]
    pub username: Option<String>,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Device id to watch (repeatable; default: every device)
    #[arg(long = "device", short = 'd')]
    pub devices: Vec<String>,

    /// Stop after this long (e.g. "30s", "10m")
    #[arg(long, value_parser = humantime::parse_duration)]
    pub duration: Option<Duration>,
}

#[derive(Debug, Args)]
pub struct SendArgs {
    /// Target device id
    pub device: String,

    /// Attribute to set (e.g. "volume")
    pub attribute: String,

    /// New value, parsed as JSON when possible (`42`, `true`, `{"bass":1}`)
    pub value: String,

    /// Do not ignore the push echo of this command
    #[arg(long)]
    pub no_suppress: bool,
}
