//! Command dispatch: bridges CLI args -> reconciler calls -> output formatting.

pub mod config_cmd;
pub mod delete;
pub mod package;
pub mod ping;
pub mod sync;

use tikshape_config::Config;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a router-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, global: &GlobalOpts, cfg: &Config) -> Result<(), CliError> {
    match cmd {
        Command::Sync(args) => sync::handle(args, global, cfg).await,
        Command::SyncAll => sync::handle_all(global, cfg).await,
        Command::DeleteClient(args) => delete::handle_client(args, global, cfg).await,
        Command::DeletePackage(args) => delete::handle_package(args, global, cfg).await,
        Command::PackageSync(args) => package::handle(args, global, cfg).await,
        Command::Ping => ping::handle(global, cfg).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => unreachable!(),
    }
}
