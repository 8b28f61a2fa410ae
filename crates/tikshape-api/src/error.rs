use thiserror::Error;

/// Top-level error type for the `tikshape-api` crate.
///
/// Covers every failure mode between the caller and the router:
/// authentication, transport, wire protocol, and device-side rejections.
/// `tikshape-core` maps these into domain error kinds.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Login rejected (wrong credentials, disabled user, legacy login scheme).
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// TCP-level failure (connection refused, reset, DNS failure, etc.)
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Connect or command exceeded the configured timeout.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS configuration or handshake error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The router closed the socket before a reply was complete.
    #[error("Connection closed by router")]
    ConnectionClosed,

    // ── Protocol ────────────────────────────────────────────────────
    /// `!trap` reply: the router refused the command.
    #[error("Router rejected {command}: {message}")]
    Trap {
        command: String,
        message: String,
        category: Option<u8>,
    },

    /// `!fatal` reply: the router is tearing the session down.
    #[error("Router closed the session: {reason}")]
    Fatal { reason: String },

    /// Malformed framing or an unexpected reply word.
    #[error("Protocol error: {0}")]
    Protocol(String),

    // ── Requests ────────────────────────────────────────────────────
    /// A typed request failed validation before it was serialized.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// Returns `true` if the router refused the login.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Returns `true` if this is a transient error worth retrying on a
    /// fresh session.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Timeout { .. } | Self::ConnectionClosed | Self::Fatal { .. }
        )
    }

    /// Returns `true` if the session that produced this error can no longer
    /// be trusted and must be dropped.
    pub(crate) fn poisons_session(&self) -> bool {
        self.is_transient() || matches!(self, Self::Protocol(_) | Self::Tls(_))
    }

    /// The `!trap` message, if the router rejected the command.
    pub fn trap_message(&self) -> Option<&str> {
        match self {
            Self::Trap { message, .. } => Some(message),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(Error::Timeout { timeout_secs: 30 }.is_transient());
        assert!(Error::ConnectionClosed.is_transient());
        assert!(
            Error::Transport(std::io::Error::from(std::io::ErrorKind::ConnectionReset))
                .is_transient()
        );
        assert!(
            !Error::Trap {
                command: "/queue/tree/add".into(),
                message: "failure: already have such name".into(),
                category: None,
            }
            .is_transient()
        );
        assert!(!Error::Authentication { message: "bad".into() }.is_transient());
    }

    #[test]
    fn protocol_errors_poison_but_do_not_retry() {
        let err = Error::Protocol("bad length prefix".into());
        assert!(err.poisons_session());
        assert!(!err.is_transient());
    }
}
