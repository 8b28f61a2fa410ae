//! Shared configuration for the tikshape CLI.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext),
//! the shaping section, and the billing inventory file. Translates all of
//! it into `tikshape_api` connection settings and a `tikshape_core`
//! engine configuration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use tikshape_api::{Chain, DeviceConnection, TlsMode, TransportConfig};
use tikshape_core::{BandwidthPackage, ClientBinding, CoreError, MemoryStore, ShapingConfig};

const KEYRING_SERVICE: &str = "tikshape";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' not found")]
    ProfileNotFound { name: String },

    #[error("no password configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("inventory {path}: {reason}")]
    Inventory { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Queue layout settings for the reconciliation engine.
    #[serde(default)]
    pub shaping: Shaping,

    /// Billing inventory file (packages and client bindings).
    pub inventory: Option<PathBuf>,

    /// Named router profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            shaping: Shaping::default(),
            inventory: None,
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Look up `name`, or the default profile when `None`.
    pub fn profile(&self, name: Option<&str>) -> Result<(&str, &Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get_key_value(name)
            .map(|(k, v)| (k.as_str(), v))
            .ok_or_else(|| ConfigError::ProfileNotFound { name: name.into() })
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    /// Connect and per-command timeout, seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Pooled sessions idle longer than this are closed, seconds.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            timeout: default_timeout(),
            idle_timeout: default_idle_timeout(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    30
}
fn default_idle_timeout() -> u64 {
    300
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Shaping {
    /// Parent for package queues with no upstream parent.
    #[serde(default = "default_root_parent")]
    pub root_parent: String,

    /// Cache lifetime of router lookups, seconds.
    #[serde(default = "default_lookup_ttl")]
    pub lookup_ttl: u64,

    /// Firewall chain for marking rules.
    #[serde(default)]
    pub mangle_chain: Chain,

    pub default_queue_type: Option<String>,

    pub default_priority: Option<u8>,
}

impl Default for Shaping {
    fn default() -> Self {
        Self {
            root_parent: default_root_parent(),
            lookup_ttl: default_lookup_ttl(),
            mangle_chain: Chain::default(),
            default_queue_type: None,
            default_priority: None,
        }
    }
}

fn default_root_parent() -> String {
    tikshape_core::DEFAULT_ROOT_PARENT.into()
}
fn default_lookup_ttl() -> u64 {
    tikshape_api::DEFAULT_LOOKUP_TTL.as_secs()
}

/// A named router profile.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Router address or hostname.
    pub host: String,

    /// API port; 8728 plain, 8729 with `tls`.
    pub port: Option<u16>,

    pub username: String,

    /// Password (plaintext: prefer keyring or env var).
    pub password: Option<String>,

    /// Environment variable name containing the password.
    pub password_env: Option<String>,

    /// Use the api-ssl service.
    #[serde(default)]
    pub tls: bool,

    /// Verify the router certificate against the system roots.
    #[serde(default)]
    pub verify_tls: bool,

    /// Path to a custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override the default timeout.
    pub timeout: Option<u64>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("net", "tikshape", "tikshape").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("tikshape");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the Config from `path` + `TIKSHAPE_*` environment variables
/// (`TIKSHAPE_SHAPING__ROOT_PARENT=...`). A missing file is not an error.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    debug!(path = %path.display(), "loading config");
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("TIKSHAPE_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the router password: the profile's `password_env`, then
/// `TIKSHAPE_PASSWORD`, then the system keyring, then plaintext.
pub fn resolve_password(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    // 1. Profile's password_env → env var lookup
    if let Some(ref env_name) = profile.password_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    // 2. Global env var
    if let Ok(val) = std::env::var("TIKSHAPE_PASSWORD") {
        return Ok(SecretString::from(val));
    }

    // 3. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/password")) {
        if let Ok(pw) = entry.get_password() {
            return Ok(SecretString::from(pw));
        }
    }

    // 4. Plaintext in config
    if let Some(ref pw) = profile.password {
        return Ok(SecretString::from(pw.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Store a password in the system keyring for `profile_name`.
pub fn store_password(profile_name: &str, password: &str) -> Result<(), ConfigError> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/password"))
        .and_then(|entry| entry.set_password(password))
        .map_err(|e| ConfigError::Validation {
            field: "keyring".into(),
            reason: e.to_string(),
        })
}

// ── Translation ─────────────────────────────────────────────────────

/// Build a `DeviceConnection` from a profile.
pub fn profile_to_connection(
    profile: &Profile,
    profile_name: &str,
) -> Result<DeviceConnection, ConfigError> {
    if profile.host.trim().is_empty() {
        return Err(ConfigError::Validation {
            field: "host".into(),
            reason: format!("profile '{profile_name}' has no host"),
        });
    }
    let password = resolve_password(profile, profile_name)?;
    let connection = DeviceConnection::new(profile.host.trim(), &profile.username, password)
        .with_tls(profile.tls);
    Ok(match profile.port {
        Some(port) => connection.with_port(port),
        None => connection,
    })
}

/// Transport settings for a profile: timeout override and TLS policy.
pub fn transport_config(defaults: &Defaults, profile: &Profile) -> TransportConfig {
    let tls = if let Some(ref ca_path) = profile.ca_cert {
        TlsMode::CustomCa(ca_path.clone())
    } else if profile.verify_tls {
        TlsMode::System
    } else {
        // Routers ship self-signed certificates.
        TlsMode::DangerAcceptInvalid
    };
    TransportConfig::default()
        .with_tls_mode(tls)
        .with_timeout(Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout)))
        .with_idle_timeout(Duration::from_secs(defaults.idle_timeout))
}

/// Engine settings from the shaping section.
pub fn shaping_config(shaping: &Shaping) -> ShapingConfig {
    ShapingConfig {
        root_parent: shaping.root_parent.clone(),
        lookup_ttl: Duration::from_secs(shaping.lookup_ttl),
        mangle_chain: shaping.mangle_chain,
        default_queue_type: shaping.default_queue_type.clone(),
        default_priority: shaping.default_priority,
    }
}

// ── Inventory ───────────────────────────────────────────────────────

/// Billing data as kept in the inventory TOML file.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Inventory {
    #[serde(default)]
    pub packages: Vec<BandwidthPackage>,
    #[serde(default)]
    pub clients: Vec<ClientBinding>,
}

/// Read the inventory file into a `MemoryStore`, enforcing the store's
/// uniqueness rules.
pub fn load_inventory(path: &Path) -> Result<MemoryStore, ConfigError> {
    let invalid = |reason: String| ConfigError::Inventory {
        path: path.to_owned(),
        reason,
    };
    let raw = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
    let inventory: Inventory = toml::from_str(&raw).map_err(|e| invalid(e.to_string()))?;

    let store = MemoryStore::new();
    for package in inventory.packages {
        store
            .upsert_package(package)
            .map_err(|e: CoreError| invalid(e.to_string()))?;
    }
    for client in inventory.clients {
        store
            .upsert_client(client)
            .map_err(|e: CoreError| invalid(e.to_string()))?;
    }
    debug!(
        packages = store.package_count(),
        clients = store.client_count(),
        "inventory loaded"
    );
    Ok(store)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::io::Write;

    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    fn write(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    const CONFIG: &str = r#"
default_profile = "core"
inventory = "/srv/billing/inventory.toml"

[defaults]
timeout = 10

[shaping]
root_parent = "WAN"
mangle_chain = "prerouting"

[profiles.core]
host = "10.0.0.1"
username = "billing"
password = "hunter2"
tls = true

[profiles.edge]
host = "10.0.0.2"
port = 18728
username = "billing"
password = "edge-pw"
timeout = 5
"#;

    #[test]
    fn loads_profiles_and_sections() {
        let file = write(CONFIG);
        let config = load_config_from(file.path()).unwrap();

        let (name, profile) = config.profile(None).unwrap();
        assert_eq!(name, "core");
        assert_eq!(profile.host, "10.0.0.1");
        assert_eq!(config.defaults.idle_timeout, 300);
        assert_eq!(config.shaping.root_parent, "WAN");
        assert_eq!(config.shaping.lookup_ttl, 10);
        assert_eq!(
            config.inventory.as_deref(),
            Some(Path::new("/srv/billing/inventory.toml"))
        );

        let shaping = shaping_config(&config.shaping);
        assert_eq!(shaping.mangle_chain, Chain::Prerouting);
        assert_eq!(shaping.lookup_ttl, Duration::from_secs(10));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.default_profile.as_deref(), Some("default"));
        assert!(config.profiles.is_empty());
        assert!(matches!(
            config.profile(None),
            Err(ConfigError::ProfileNotFound { .. })
        ));
    }

    #[test]
    fn connection_from_profile() {
        let file = write(CONFIG);
        let config = load_config_from(file.path()).unwrap();

        let (name, core) = config.profile(Some("core")).unwrap();
        let conn = profile_to_connection(core, name).unwrap();
        assert_eq!(conn.port, tikshape_api::DEFAULT_TLS_PORT);
        assert!(conn.tls);

        let (name, edge) = config.profile(Some("edge")).unwrap();
        let conn = profile_to_connection(edge, name).unwrap();
        assert_eq!(conn.port, 18728);
        assert_eq!(conn.password.expose_secret(), "edge-pw");

        let transport = transport_config(&config.defaults, edge);
        assert_eq!(transport.timeout, Duration::from_secs(5));
        assert!(matches!(transport.tls, TlsMode::DangerAcceptInvalid));
    }

    #[test]
    fn save_round_trips_through_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.profiles.insert(
            "default".into(),
            Profile {
                host: "192.0.2.1".into(),
                port: None,
                username: "admin".into(),
                password: None,
                password_env: Some("ROUTER_PW".into()),
                tls: false,
                verify_tls: false,
                ca_cert: None,
                timeout: None,
            },
        );
        save_config_to(&config, &path).unwrap();

        let loaded = load_config_from(&path).unwrap();
        let (_, profile) = loaded.profile(None).unwrap();
        assert_eq!(profile.password_env.as_deref(), Some("ROUTER_PW"));
    }

    #[test]
    fn inventory_loads_into_store() {
        let file = write(
            r#"
[[packages]]
id = 10
name = "PAKET-10"
max_limit_download = "10M"
max_limit_upload = "2M"
max_clients = 5

[packages.child_download]
queue_type = "pcq-download-default"

[[clients]]
id = 1
client_name = "Budi"
package_id = 10
ip_cidr = "192.168.5.1/30"
interface = "ether2"
"#,
        );
        let store = load_inventory(file.path()).unwrap();
        assert_eq!(store.package_count(), 1);
        assert_eq!(store.client_count(), 1);
    }

    #[test]
    fn inventory_rejects_duplicate_addresses() {
        let file = write(
            r#"
[[clients]]
id = 1
client_name = "Budi"
package_id = 10
ip_cidr = "192.168.5.1/30"

[[clients]]
id = 2
client_name = "Sari"
package_id = 10
ip_cidr = "192.168.5.1"
"#,
        );
        let err = load_inventory(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Inventory { .. }));
    }
}
