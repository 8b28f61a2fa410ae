//! Config subcommand handlers.

use std::io::BufRead;

use tikshape_config::Config;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config;
use crate::error::CliError;
use crate::output;

const REDACTED: &str = "********";

/// The effective config with plaintext passwords masked.
fn redacted(mut cfg: Config) -> Config {
    for profile in cfg.profiles.values_mut() {
        if profile.password.is_some() {
            profile.password = Some(REDACTED.into());
        }
    }
    cfg
}

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            println!("{}", config::config_file(global).display());
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = redacted(config::load(global)?);
            let out = output::render_single(
                &global.output,
                &cfg,
                |c| toml::to_string_pretty(c).unwrap_or_else(|e| format!("# unrenderable: {e}")),
                |c| {
                    let mut names: Vec<&str> = c.profiles.keys().map(String::as_str).collect();
                    names.sort_unstable();
                    names.join("\n")
                },
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::SetPassword => {
            let cfg = config::load(global)?;
            let name = global
                .profile
                .clone()
                .or(cfg.default_profile)
                .unwrap_or_else(|| "default".into());
            let password = match global.password {
                Some(ref password) => password.clone(),
                None => {
                    eprintln!("Password for profile '{name}' (read from stdin):");
                    let mut line = String::new();
                    std::io::stdin().lock().read_line(&mut line)?;
                    line.trim_end_matches(['\r', '\n']).to_owned()
                }
            };
            if password.is_empty() {
                return Err(CliError::Validation {
                    field: "password".into(),
                    reason: "password cannot be empty".into(),
                });
            }
            tikshape_config::store_password(&name, &password)?;
            if !global.quiet {
                eprintln!("Password for profile '{name}' stored in the system keyring");
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use tikshape_config::Profile;

    use super::*;

    #[test]
    fn show_masks_plaintext_passwords() {
        let mut cfg = Config::default();
        cfg.profiles.insert(
            "core".into(),
            Profile {
                host: "10.0.0.1".into(),
                username: "api".into(),
                password: Some("hunter2".into()),
                ..Profile::default()
            },
        );
        cfg.profiles.insert(
            "edge".into(),
            Profile {
                host: "10.0.0.2".into(),
                username: "api".into(),
                password_env: Some("EDGE_PASSWORD".into()),
                ..Profile::default()
            },
        );
        let cfg = redacted(cfg);
        assert_eq!(cfg.profiles["core"].password.as_deref(), Some(REDACTED));
        assert_eq!(cfg.profiles["edge"].password, None);
    }
}
