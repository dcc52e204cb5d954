//! Clap derive structures for the `ffwatch` binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use ffwatch_core::AdapterAction;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// ffwatch -- live adapter status from a framework management console
#[derive(Debug, Parser)]
#[command(
    name = "ffwatch",
    version,
    about = "Watch adapters, receivers and messages on a management console",
    long_about = "Connects to a management console, keeps a live model of its adapters\n\
        through the push channel (falling back to polling), and reports\n\
        state transitions, summaries and connectivity problems.",
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
    /// Console profile to use
    #[arg(long, short = 'p', env = "FFWATCH_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Console URL (overrides profile)
    #[arg(long, short = 'u', env = "FFWATCH_URL", global = true)]
    pub url: Option<String>,

    /// Config file (default: platform config directory)
    #[arg(long, env = "FFWATCH_CONFIG", global = true, hide_env = true)]
    pub config: Option<PathBuf>,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', global = true)]
    pub insecure: bool,

    /// Poll instead of using the push channel
    #[arg(long, global = true)]
    pub no_push: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Stream notifications, summaries and connectivity alerts until Ctrl-C
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Print the current summary and adapter states, then exit
    #[command(alias = "st")]
    Status(StatusArgs),

    /// Start, stop or reload an adapter
    Adapter(AdapterArgs),

    /// Inspect and manage the configuration file
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Restrict summaries to one configuration
    #[arg(long, short = 'C')]
    pub configuration: Option<String>,

    /// Emit one JSON object per line
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Restrict the summary to one configuration
    #[arg(long, short = 'C')]
    pub configuration: Option<String>,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct AdapterArgs {
    /// Configuration the adapter belongs to
    pub configuration: String,

    /// Adapter name
    pub name: String,

    /// What to do with the adapter
    #[arg(value_enum)]
    pub action: ActionArg,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ActionArg {
    Start,
    Stop,
    Reload,
}

impl From<ActionArg> for AdapterAction {
    fn from(arg: ActionArg) -> Self {
        match arg {
            ActionArg::Start => Self::Start,
            ActionArg::Stop => Self::Stop,
            ActionArg::Reload => Self::Reload,
        }
    }
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file location
    Path,

    /// List configured profiles
    Profiles,

    /// Store a profile password (read from stdin) in the system keyring
    SetPassword,
}
