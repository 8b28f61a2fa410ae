// ── Core error types ──
//
// Domain errors from tikshape-core. Callers never see wire sentences or
// socket errors directly: the `From<tikshape_api::Error>` impl folds
// transport-layer failures into device-level kinds, and reconciliation
// wraps whatever failed with the step it failed in.

use thiserror::Error;

/// A stage of a client reconciliation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum SyncStep {
    LoadPackage,
    EnsureParents,
    CleanupByName,
    ResolvePeer,
    CleanupByMark,
    BindAddress,
    Classify,
    ComputeLimits,
    CreateDownloadQueue,
    CreateUploadQueue,
    RemoveAddress,
    RemoveParents,
}

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Addressing errors ────────────────────────────────────────────
    #[error("Invalid IPv4 address: {input}")]
    InvalidAddress { input: String },

    #[error("Invalid prefix length {prefix}: expected 0..=32")]
    InvalidPrefix { prefix: String },

    // ── Billing data errors ──────────────────────────────────────────
    #[error("Package not found: {identifier}")]
    PackageNotFound { identifier: String },

    #[error("Client not found: {identifier}")]
    ClientNotFound { identifier: String },

    #[error("Billing store error: {message}")]
    Store { message: String },

    #[error("Validation failed: {message}")]
    Validation { message: String },

    // ── Device errors ────────────────────────────────────────────────
    #[error("Router rejected the credentials: {message}")]
    DeviceAuth { message: String },

    #[error("Router unavailable: {reason}")]
    DeviceUnavailable { reason: String },

    #[error("Router rejected {command}: {message}")]
    DeviceRejected { command: String, message: String },

    // ── Reconciliation context ───────────────────────────────────────
    #[error("Sync failed at {step}: {source}")]
    Step {
        step: SyncStep,
        #[source]
        source: Box<CoreError>,
    },

    /// Device state was left half-built: parents and classification exist
    /// but a child queue is missing until the next sync.
    #[error("Partial reconciliation at {step}: {source}")]
    PartialReconciliation {
        step: SyncStep,
        #[source]
        source: Box<CoreError>,
    },
}

impl CoreError {
    /// The underlying error with step annotations peeled off.
    pub fn root(&self) -> &CoreError {
        match self {
            Self::Step { source, .. } | Self::PartialReconciliation { source, .. } => source.root(),
            other => other,
        }
    }

    /// The step a reconciliation failed in, if any.
    pub fn step(&self) -> Option<SyncStep> {
        match self {
            Self::Step { step, .. } | Self::PartialReconciliation { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// Whether re-running the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.root(), Self::DeviceUnavailable { .. })
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, Self::PartialReconciliation { .. })
    }
}

/// Attach a [`SyncStep`] to a fallible result.
pub(crate) trait StepExt<T> {
    fn at(self, step: SyncStep) -> Result<T, CoreError>;
    fn partial(self, step: SyncStep) -> Result<T, CoreError>;
}

impl<T, E: Into<CoreError>> StepExt<T> for Result<T, E> {
    fn at(self, step: SyncStep) -> Result<T, CoreError> {
        self.map_err(|err| CoreError::Step {
            step,
            source: Box::new(err.into()),
        })
    }

    fn partial(self, step: SyncStep) -> Result<T, CoreError> {
        self.map_err(|err| CoreError::PartialReconciliation {
            step,
            source: Box::new(err.into()),
        })
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<tikshape_api::Error> for CoreError {
    fn from(err: tikshape_api::Error) -> Self {
        use tikshape_api::Error as Api;
        match err {
            Api::Authentication { message } => CoreError::DeviceAuth { message },
            Api::Trap {
                command, message, ..
            } => CoreError::DeviceRejected { command, message },
            Api::InvalidRequest(message) => CoreError::Validation { message },
            Api::Transport(e) => CoreError::DeviceUnavailable {
                reason: e.to_string(),
            },
            Api::Timeout { timeout_secs } => CoreError::DeviceUnavailable {
                reason: format!("no answer within {timeout_secs}s"),
            },
            Api::ConnectionClosed => CoreError::DeviceUnavailable {
                reason: "connection closed by router".into(),
            },
            Api::Fatal { reason } => CoreError::DeviceUnavailable {
                reason: format!("session terminated: {reason}"),
            },
            Api::Tls(msg) => CoreError::DeviceUnavailable {
                reason: format!("TLS error: {msg}"),
            },
            Api::Protocol(msg) => CoreError::DeviceUnavailable {
                reason: format!("protocol error: {msg}"),
            },
        }
    }
}
