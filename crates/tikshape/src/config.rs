//! CLI configuration: thin wrapper around `tikshape_config`.
//!
//! Adds the resolution steps that respect `GlobalOpts` overrides
//! (--host, --password, --inventory, ...) and assembles a `Reconciler`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tracing::debug;

use tikshape_api::{DeviceConnection, RouterClient, SessionPool, TransportConfig};
use tikshape_config::{Config, Profile};
use tikshape_core::{MemoryStore, Reconciler};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Config file in effect: `--config`, else the platform default.
pub fn config_file(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(tikshape_config::config_path)
}

pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(tikshape_config::load_config_from(&config_file(global))?)
}

/// Resolve the active profile with CLI flag overrides applied.
///
/// A missing profile is tolerated when `--host` is given; the profile is
/// then built from flags alone.
pub fn resolve_profile(global: &GlobalOpts, cfg: &Config) -> Result<(String, Profile), CliError> {
    let (name, mut profile) = match cfg.profile(global.profile.as_deref()) {
        Ok((name, profile)) => (name.to_owned(), profile.clone()),
        Err(_) if global.host.is_some() => (
            global.profile.clone().unwrap_or_else(|| "default".into()),
            Profile::default(),
        ),
        Err(_) if global.profile.is_some() || !cfg.profiles.is_empty() => {
            let mut available: Vec<&str> = cfg.profiles.keys().map(String::as_str).collect();
            available.sort_unstable();
            return Err(CliError::ProfileNotFound {
                name: global
                    .profile
                    .clone()
                    .or_else(|| cfg.default_profile.clone())
                    .unwrap_or_else(|| "default".into()),
                available: if available.is_empty() {
                    "(none)".into()
                } else {
                    available.join(", ")
                },
            });
        }
        Err(_) => {
            return Err(CliError::NoConfig {
                path: config_file(global).display().to_string(),
            });
        }
    };

    if let Some(ref host) = global.host {
        profile.host.clone_from(host);
    }
    if let Some(ref username) = global.username {
        profile.username.clone_from(username);
    }
    if global.port.is_some() {
        profile.port = global.port;
    }
    if global.tls {
        profile.tls = true;
    }
    if global.timeout.is_some() {
        profile.timeout = global.timeout;
    }
    if profile.username.trim().is_empty() {
        return Err(CliError::Validation {
            field: "username".into(),
            reason: format!("profile '{name}' has no username; pass --username"),
        });
    }
    Ok((name, profile))
}

/// Router connection and transport settings for the active profile.
pub fn connection(
    global: &GlobalOpts,
    cfg: &Config,
) -> Result<(DeviceConnection, TransportConfig), CliError> {
    let (name, profile) = resolve_profile(global, cfg)?;
    let connection = match global.password {
        // The flag beats the keyring and the config file.
        Some(ref password) => {
            let connection = DeviceConnection::new(
                profile.host.trim(),
                &profile.username,
                SecretString::from(password.clone()),
            )
            .with_tls(profile.tls);
            match profile.port {
                Some(port) => connection.with_port(port),
                None => connection,
            }
        }
        None => tikshape_config::profile_to_connection(&profile, &name)?,
    };
    let transport = tikshape_config::transport_config(&cfg.defaults, &profile);
    debug!(
        profile = %name,
        host = %connection.host,
        port = connection.port,
        tls = connection.tls,
        "resolved router connection"
    );
    Ok((connection, transport))
}

/// Open the billing inventory. Commands that only touch the router pass
/// `required = false` and get an empty store when none is configured.
pub fn open_store(global: &GlobalOpts, cfg: &Config, required: bool) -> Result<MemoryStore, CliError> {
    match global.inventory.as_ref().or(cfg.inventory.as_ref()) {
        Some(path) => Ok(tikshape_config::load_inventory(path)?),
        None if required => Err(CliError::NoInventory),
        None => Ok(MemoryStore::new()),
    }
}

/// Assemble the engine: one pool, one router facade, the inventory store.
pub fn reconciler(
    global: &GlobalOpts,
    cfg: &Config,
    store: MemoryStore,
) -> Result<Reconciler<MemoryStore>, CliError> {
    let (connection, transport) = connection(global, cfg)?;
    let pool = Arc::new(SessionPool::new(transport));
    let router = RouterClient::new(pool, connection);
    let shaping = tikshape_config::shaping_config(&cfg.shaping);
    debug!(
        root_parent = %shaping.root_parent,
        lookup_ttl = ?shaping.lookup_ttl,
        "building reconciler"
    );
    Ok(Reconciler::new(router, store, shaping))
}

/// Request timeout in effect, for diagnostics.
pub fn timeout(global: &GlobalOpts, cfg: &Config) -> Duration {
    Duration::from_secs(global.timeout.unwrap_or(cfg.defaults.timeout))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use clap::Parser;

    use super::*;
    use crate::cli::Cli;

    fn global(args: &[&str]) -> GlobalOpts {
        let mut argv = vec!["tikshape"];
        argv.extend_from_slice(args);
        argv.push("ping");
        Cli::try_parse_from(argv).unwrap().global
    }

    fn config_with_profile() -> Config {
        let mut cfg = Config::default();
        cfg.profiles.insert(
            "core".into(),
            Profile {
                host: "10.0.0.1".into(),
                username: "api".into(),
                password: Some("secret".into()),
                ..Profile::default()
            },
        );
        cfg.default_profile = Some("core".into());
        cfg
    }

    #[test]
    fn flags_override_the_profile() {
        let cfg = config_with_profile();
        let g = global(&["--host", "10.0.0.9", "--port", "18728", "--timeout", "5"]);
        let (name, profile) = resolve_profile(&g, &cfg).unwrap();
        assert_eq!(name, "core");
        assert_eq!(profile.host, "10.0.0.9");
        assert_eq!(profile.port, Some(18728));
        assert_eq!(profile.timeout, Some(5));
        assert_eq!(profile.username, "api");
    }

    #[test]
    fn host_flag_works_without_a_profile() {
        let g = global(&["--host", "10.0.0.9", "--username", "admin", "--password", "pw"]);
        let (connection, _) = connection(&g, &Config::default()).unwrap();
        assert_eq!(connection.host, "10.0.0.9");
        assert_eq!(connection.username, "admin");
        assert_eq!(connection.port, tikshape_api::DEFAULT_PORT);
    }

    #[test]
    fn unknown_profile_lists_the_available_ones() {
        let cfg = config_with_profile();
        let err = resolve_profile(&global(&["--profile", "edge"]), &cfg).unwrap_err();
        match err {
            CliError::ProfileNotFound { name, available } => {
                assert_eq!(name, "edge");
                assert_eq!(available, "core");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn no_profile_and_no_host_is_a_usage_error() {
        let err = resolve_profile(&global(&[]), &Config::default()).unwrap_err();
        assert!(matches!(err, CliError::NoConfig { .. }));
    }

    #[test]
    fn inventory_is_optional_for_router_only_commands() {
        let g = global(&[]);
        let cfg = Config::default();
        assert!(open_store(&g, &cfg, false).is_ok());
        assert!(matches!(
            open_store(&g, &cfg, true),
            Err(CliError::NoInventory)
        ));
    }
}
