use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};

use secrecy::{ExposeSecret, SecretString};

/// Default plain API port.
pub const DEFAULT_PORT: u16 = 8728;
/// Default `api-ssl` port.
pub const DEFAULT_TLS_PORT: u16 = 8729;

/// Everything needed to open and authenticate a session with one router.
///
/// Two connections with equal host, port, username, password and TLS flag
/// share one pooled session.
#[derive(Debug, Clone)]
pub struct DeviceConnection {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub tls: bool,
}

impl DeviceConnection {
    /// Plain API connection on the default port.
    pub fn new(host: impl Into<String>, username: impl Into<String>, password: SecretString) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            username: username.into(),
            password,
            tls: false,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Switch to `api-ssl`. Moves to the TLS default port unless a
    /// custom port was already set.
    pub fn with_tls(mut self, tls: bool) -> Self {
        if tls && self.port == DEFAULT_PORT {
            self.port = DEFAULT_TLS_PORT;
        } else if !tls && self.port == DEFAULT_TLS_PORT {
            self.port = DEFAULT_PORT;
        }
        self.tls = tls;
        self
    }

    /// Pool key for this connection.
    pub fn key(&self) -> ConnectionKey {
        let mut hasher = DefaultHasher::new();
        self.password.expose_secret().hash(&mut hasher);
        ConnectionKey {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password_digest: hasher.finish(),
            tls: self.tls,
        }
    }
}

impl fmt::Display for DeviceConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)
    }
}

/// Identity of a pooled session. The password only enters as a digest so
/// keys can be logged and held in maps without carrying the secret.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub host: String,
    pub port: u16,
    pub username: String,
    password_digest: u64,
    pub tls: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(password: &str) -> DeviceConnection {
        DeviceConnection::new("10.0.0.1", "billing", SecretString::from(password.to_owned()))
    }

    #[test]
    fn equal_fields_share_a_key() {
        assert_eq!(conn("s3cret").key(), conn("s3cret").key());
    }

    #[test]
    fn password_change_yields_new_identity() {
        assert_ne!(conn("old").key(), conn("new").key());
    }

    #[test]
    fn tls_switches_default_port_only() {
        let c = conn("x").with_tls(true);
        assert_eq!(c.port, DEFAULT_TLS_PORT);
        let custom = conn("x").with_port(9000).with_tls(true);
        assert_eq!(custom.port, 9000);
        assert_ne!(conn("x").key(), conn("x").with_tls(true).with_port(DEFAULT_PORT).key());
    }

    #[test]
    fn display_hides_password() {
        let shown = conn("hunter2").to_string();
        assert_eq!(shown, "billing@10.0.0.1:8728");
        assert!(!format!("{:?}", conn("hunter2")).contains("hunter2"));
    }
}
