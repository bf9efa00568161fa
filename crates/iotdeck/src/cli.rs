//! Clap derive structures for the `iotdeck` CLI.
//!
//! Defines the command tree, global flags, and shared types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use iotdeck_core::{DeviceStatus, EntityId, HttpMethod};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// iotdeck -- device-management hub for IoT fleets
#[derive(Debug, Parser)]
#[command(
    name = "iotdeck",
    version,
    about = "Run and exercise an IoT device-management hub from the command line",
    long_about = "Replays device fleets, telemetry and rules through an in-process hub,\n\
        sends signed commands to devices, and manages hub profiles.",
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
    /// Hub profile to use
    #[arg(long, short = 'p', env = "IOTDECK_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Config file path (overrides the platform default)
    #[arg(long, env = "IOTDECK_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "IOTDECK_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Shared signing secret (overrides the profile)
    #[arg(long, env = "IOTDECK_SECRET", global = true, hide_env_values = true)]
    pub secret: Option<String>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Replay a scenario file through an in-process hub
    #[command(alias = "r")]
    Replay(ReplayArgs),

    /// Send one signed command to a device and wait for the outcome
    Send(SendArgs),

    /// Compute the signature headers for a request
    Sign(SignArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Replay ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ReplayArgs {
    /// Scenario file (.json or .toml)
    pub scenario: PathBuf,

    /// What to print once the scenario has run
    #[arg(long, default_value = "summary")]
    pub show: ReplayView,

    /// Only report on this organization
    #[arg(long)]
    pub org: Option<EntityId>,

    /// Devices view: only devices in this status (online, offline, warning, error)
    #[arg(long, value_parser = parse_status)]
    pub status: Option<DeviceStatus>,

    /// Devices view: only devices whose name or id contains this text
    #[arg(long)]
    pub search: Option<String>,
}

fn parse_status(raw: &str) -> Result<DeviceStatus, String> {
    raw.to_lowercase()
        .parse::<DeviceStatus>()
        .map_err(|_| format!("unknown status '{raw}' (online, offline, warning, error)"))
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ReplayView {
    /// Per-organization counts
    Summary,
    /// Devices and their final status
    Devices,
    /// Every alert raised
    Alerts,
    /// Every command dispatched
    Commands,
    /// Dead-lettered telemetry
    DeadLetters,
}

// ── Send ─────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct SendArgs {
    /// Device base URL (e.g. http://10.0.0.42)
    #[arg(long)]
    pub url: String,

    /// HTTP method
    #[arg(long, short = 'X', default_value = "POST", value_parser = parse_method)]
    pub method: HttpMethod,

    /// Device endpoint path (e.g. /relay)
    pub endpoint: String,

    /// JSON payload (inline JSON or @path/to/file.json)
    #[arg(long, short = 'd')]
    pub data: Option<String>,

    /// Extra request header, NAME:VALUE (repeatable)
    #[arg(long = "header", short = 'H')]
    pub headers: Vec<String>,

    /// Delivery attempts before giving up
    #[arg(long)]
    pub max_retries: Option<u32>,
}

fn parse_method(raw: &str) -> Result<HttpMethod, String> {
    raw.parse::<HttpMethod>()
        .map_err(|_| format!("unsupported method '{raw}' (GET, POST, PUT, PATCH, DELETE)"))
}

// ── Sign ─────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct SignArgs {
    /// HTTP method
    #[arg(long, short = 'X', default_value = "POST")]
    pub method: String,

    /// Endpoint path the device sees
    pub endpoint: String,

    /// Request body, exactly as sent
    #[arg(long, short = 'd', default_value = "")]
    pub body: String,

    /// Unix timestamp in seconds (defaults to now)
    #[arg(long)]
    pub timestamp: Option<i64>,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Write a starter config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Display current resolved configuration
    Show,

    /// Print the config file path
    Path,

    /// List configured profiles
    Profiles,

    /// Set the default profile
    Use {
        /// Profile name to set as default
        name: String,
    },

    /// Store the signing secret in the system keyring
    SetSecret {
        /// Secret value (read from stdin when omitted)
        #[arg(long)]
        value: Option<String>,
    },
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
