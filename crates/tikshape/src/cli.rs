//! Clap derive structures for the `tikshape` CLI.
//!
//! Defines the command tree, global flags, and shared types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// tikshape -- keep RouterOS bandwidth queues in line with the billing inventory
#[derive(Debug, Parser)]
#[command(
    name = "tikshape",
    version,
    about = "Reconcile RouterOS queue trees with a billing inventory",
    long_about = "Builds and repairs per-client bandwidth queues on a RouterOS router.\n\n\
        Each sync removes whatever the router holds for a client and recreates\n\
        the address binding, marking rules, and download/upload child queues\n\
        from the package in the inventory.",
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
    /// Router profile to use
    #[arg(long, short = 'p', env = "TIKSHAPE_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Router address (overrides profile)
    #[arg(long, short = 'H', env = "TIKSHAPE_HOST", global = true)]
    pub host: Option<String>,

    /// API port (overrides profile)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// API user (overrides profile)
    #[arg(long, short = 'u', env = "TIKSHAPE_USERNAME", global = true)]
    pub username: Option<String>,

    /// API password (overrides profile, keyring, and config)
    #[arg(long, env = "TIKSHAPE_PASSWORD", global = true, hide_env_values = true)]
    pub password: Option<String>,

    /// Use the api-ssl service
    #[arg(long, global = true)]
    pub tls: bool,

    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "TIKSHAPE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Billing inventory file (overrides config)
    #[arg(long, short = 'i', env = "TIKSHAPE_INVENTORY", global = true)]
    pub inventory: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "TIKSHAPE_OUTPUT",
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

    /// Connect and command timeout in seconds (overrides config)
    #[arg(long, env = "TIKSHAPE_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable tables and detail views (default)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
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
    /// Rebuild the queues, marking rules, and address binding of one client
    #[command(alias = "s")]
    Sync(SyncArgs),

    /// Sync every active client in the inventory
    SyncAll,

    /// Remove everything a sync created for a client
    #[command(alias = "rm")]
    DeleteClient(DeleteClientArgs),

    /// Remove the download and upload parent queues of a package
    DeletePackage(DeletePackageArgs),

    /// Create or update the parent queues of a package
    PackageSync(PackageSyncArgs),

    /// Check that the router answers and report its identity
    Ping,

    /// Inspect CLI configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Sync ─────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct SyncArgs {
    /// Client id, name, or IP address as listed in the inventory
    pub client: String,

    /// Package id; with --ip, syncs a client missing from the inventory
    #[arg(long, requires = "ip")]
    pub package: Option<u64>,

    /// Client address in CIDR notation (bare address means /30)
    #[arg(long, requires = "package")]
    pub ip: Option<String>,

    /// Name the client had before a rename
    #[arg(long)]
    pub previous_name: Option<String>,

    /// Address the client had before a move
    #[arg(long)]
    pub previous_ip: Option<String>,

    /// Interface for the address binding (overrides the inventory)
    #[arg(long)]
    pub interface: Option<String>,

    /// Download limit overriding the package, e.g. 20M
    #[arg(long)]
    pub download_limit: Option<String>,

    /// Upload limit overriding the package
    #[arg(long)]
    pub upload_limit: Option<String>,

    /// Guaranteed download rate overriding the fair share
    #[arg(long)]
    pub download_limit_at: Option<String>,

    /// Guaranteed upload rate overriding the fair share
    #[arg(long)]
    pub upload_limit_at: Option<String>,
}

#[derive(Debug, Args)]
pub struct DeleteClientArgs {
    /// Client id, name, or IP address as listed in the inventory
    pub client: String,

    /// Client address; removes a client missing from the inventory
    #[arg(long)]
    pub ip: Option<String>,
}

#[derive(Debug, Args)]
pub struct DeletePackageArgs {
    /// Package id or name
    pub package: String,
}

#[derive(Debug, Args)]
pub struct PackageSyncArgs {
    /// Package id
    pub id: u64,

    /// Name the package had before a rename
    #[arg(long)]
    pub previous_name: Option<String>,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration (passwords redacted)
    Show,

    /// Print the config file path
    Path,

    /// Store the profile password in the system keyring
    SetPassword,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
