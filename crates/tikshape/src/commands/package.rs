//! Package parent maintenance.

use tikshape_config::Config;
use tikshape_core::{Direction, ParentAction, ParentReport};

use super::sync::parent_action;
use crate::cli::{GlobalOpts, PackageSyncArgs};
use crate::config;
use crate::error::CliError;
use crate::output;

fn detail(report: &ParentReport, color: bool) -> String {
    let line = |label: &str, queue: String, action: &ParentAction| {
        output::field(
            label,
            format!("{queue} {} ({})", parent_action(action), action.id()),
            9,
            color,
        )
    };
    [
        line(
            "Download",
            Direction::Download.qualify(&report.package),
            &report.download,
        ),
        line(
            "Upload",
            Direction::Upload.qualify(&report.package),
            &report.upload,
        ),
    ]
    .join("\n")
}

pub async fn handle(args: PackageSyncArgs, global: &GlobalOpts, cfg: &Config) -> Result<(), CliError> {
    let store = config::open_store(global, cfg, true)?;
    let engine = config::reconciler(global, cfg, store)?;
    let report = engine
        .sync_package(args.id, args.previous_name.as_deref())
        .await?;

    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        &report,
        |r| detail(r, color),
        |r| r.package.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
