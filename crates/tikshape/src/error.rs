//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and a stable process exit code.

use miette::Diagnostic;
use thiserror::Error;

use tikshape_config::ConfigError;
use tikshape_core::{CoreError, SyncStep};

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const PARTIAL: i32 = 9;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not reach the router: {reason}")]
    #[diagnostic(
        code(tikshape::connection_failed),
        help(
            "Check that the API service is enabled (/ip service enable api)\n\
             and reachable on port 8728, or 8729 with --tls.\n\
             Try: tikshape ping -v"
        )
    )]
    ConnectionFailed { reason: String },

    // ── Authentication ───────────────────────────────────────────────

    #[error("Router rejected the login: {message}")]
    #[diagnostic(
        code(tikshape::auth_failed),
        help(
            "Verify the username and password of the profile.\n\
             Store a new password with: tikshape config set-password --profile <name>"
        )
    )]
    AuthFailed { message: String },

    #[error("No password configured for profile '{profile}'")]
    #[diagnostic(
        code(tikshape::no_credentials),
        help(
            "Run: tikshape config set-password --profile {profile}\n\
             Or set the TIKSHAPE_PASSWORD environment variable."
        )
    )]
    NoCredentials { profile: String },

    // ── Resources ────────────────────────────────────────────────────

    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(code(tikshape::not_found), help("{hint}"))]
    NotFound {
        resource_type: String,
        identifier: String,
        hint: String,
    },

    #[error("Router rejected {command}: {message}")]
    #[diagnostic(
        code(tikshape::rejected),
        help("The router refused the change; another entry may already use that name or address.")
    )]
    Rejected { command: String, message: String },

    // ── Reconciliation ───────────────────────────────────────────────

    #[error("Sync failed at step '{step}'")]
    #[diagnostic(code(tikshape::sync_step))]
    StepFailed {
        step: SyncStep,
        #[source]
        source: Box<CliError>,
    },

    #[error("Client left without its {step} queue")]
    #[diagnostic(
        code(tikshape::partial),
        help(
            "Old queues were already removed and only some new ones exist.\n\
             Re-run the same sync once the router accepts the change."
        )
    )]
    Partial {
        step: SyncStep,
        #[source]
        source: Box<CliError>,
    },

    #[error("{failed} of {total} clients failed to sync")]
    #[diagnostic(
        code(tikshape::sync_all),
        help("Each failure is listed above. Retry one with: tikshape sync <client>")
    )]
    SyncAllFailed { failed: usize, total: usize },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(tikshape::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(tikshape::profile_not_found),
        help("Available profiles: {available}")
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No router configured")]
    #[diagnostic(
        code(tikshape::no_config),
        help(
            "Add a [profiles.default] section to {path}\n\
             or pass --host and --username."
        )
    )]
    NoConfig { path: String },

    #[error("No billing inventory configured")]
    #[diagnostic(
        code(tikshape::no_inventory),
        help("Set `inventory = \"/path/to/inventory.toml\"` in the config or pass --inventory.")
    )]
    NoInventory,

    #[error("Inventory {path} is invalid: {reason}")]
    #[diagnostic(code(tikshape::inventory))]
    Inventory { path: String, reason: String },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(tikshape::config))]
    Config { message: String },

    #[error("Billing store error: {message}")]
    #[diagnostic(code(tikshape::store))]
    Store { message: String },

    // ── IO / Serialization ────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not render output: {0}")]
    #[diagnostic(code(tikshape::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::NotFound { .. } | Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::Rejected { .. } => exit_code::CONFLICT,
            Self::Validation { .. } | Self::NoConfig { .. } | Self::NoInventory => {
                exit_code::USAGE
            }
            Self::StepFailed { source, .. } => source.exit_code(),
            Self::Partial { .. } => exit_code::PARTIAL,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Step { step, source } => CliError::StepFailed {
                step,
                source: Box::new((*source).into()),
            },
            CoreError::PartialReconciliation { step, source } => CliError::Partial {
                step,
                source: Box::new((*source).into()),
            },

            CoreError::InvalidAddress { input } => CliError::Validation {
                field: "address".into(),
                reason: format!("'{input}' is not a dotted-quad IPv4 address"),
            },
            CoreError::InvalidPrefix { prefix } => CliError::Validation {
                field: "prefix".into(),
                reason: format!("'{prefix}' is not between 0 and 32"),
            },
            CoreError::Validation { message } => CliError::Validation {
                field: "input".into(),
                reason: message,
            },

            CoreError::PackageNotFound { identifier } => CliError::NotFound {
                resource_type: "package".into(),
                identifier,
                hint: "Check the [[packages]] entries of the inventory file.".into(),
            },
            CoreError::ClientNotFound { identifier } => CliError::NotFound {
                resource_type: "client".into(),
                identifier,
                hint: "Check the [[clients]] entries of the inventory file, \
                       or pass --package and --ip to sync an unlisted client."
                    .into(),
            },
            CoreError::Store { message } => CliError::Store { message },

            CoreError::DeviceAuth { message } => CliError::AuthFailed { message },
            CoreError::DeviceUnavailable { reason } => CliError::ConnectionFailed { reason },
            CoreError::DeviceRejected { command, message } => {
                CliError::Rejected { command, message }
            }
        }
    }
}

impl From<tikshape_api::Error> for CliError {
    fn from(err: tikshape_api::Error) -> Self {
        CoreError::from(err).into()
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::ProfileNotFound { name } => CliError::ProfileNotFound {
                name,
                available: "(none)".into(),
            },
            ConfigError::NoCredentials { profile } => CliError::NoCredentials { profile },
            ConfigError::Inventory { path, reason } => CliError::Inventory {
                path: path.display().to_string(),
                reason,
            },
            ConfigError::Io(e) => CliError::Io(e),
            other => CliError::Config {
                message: other.to_string(),
            },
        }
    }
}
