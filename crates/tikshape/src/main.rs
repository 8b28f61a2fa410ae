mod cli;
mod commands;
mod config;
mod error;
mod output;

use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, CompletionsArgs, GlobalOpts};
use crate::error::CliError;

/// Crates whose spans follow `-v`; everything else stays at `warn`.
const LOG_TARGETS: [&str; 4] = ["tikshape", "tikshape_api", "tikshape_core", "tikshape_config"];

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.global);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err.exit_code();
            eprintln!("{:?}", miette::Report::new(err));
            u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from)
        }
    }
}

/// `RUST_LOG` wins; otherwise `-q` and `-v` pick the level for our crates.
fn log_filter(global: &GlobalOpts) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let level = match (global.quiet, global.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };
    let directives = LOG_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",");
    EnvFilter::new(format!("warn,{directives}"))
}

fn init_tracing(global: &GlobalOpts) {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(global))
        .with_target(global.verbose > 2)
        .with_writer(std::io::stderr)
        .init();
}

fn print_completions(args: &CompletionsArgs) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_owned();
    clap_complete::generate(args.shell, &mut cmd, name, &mut std::io::stdout());
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let Cli { global, command } = cli;
    match command {
        Command::Config(args) => commands::config_cmd::handle(args, &global),
        Command::Completions(args) => {
            print_completions(&args);
            Ok(())
        }
        command => {
            let cfg = config::load(&global)?;
            tracing::debug!(?command, profile = ?global.profile, "loaded configuration");
            commands::dispatch(command, &global, &cfg).await
        }
    }
}
