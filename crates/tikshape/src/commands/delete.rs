//! Teardown handlers: client bindings and package parents.

use serde::Serialize;

use tikshape_config::Config;
use tikshape_core::{BillingStore, CleanupReport, ClientLookup};

use crate::cli::{DeleteClientArgs, DeletePackageArgs, GlobalOpts};
use crate::config;
use crate::error::CliError;
use crate::output;

fn detail(report: &CleanupReport, color: bool) -> String {
    if report.is_noop() {
        return format!(
            "nothing to remove for {} ({})",
            report.client_name, report.ip_cidr
        );
    }
    [
        output::field("Client", &report.client_name, 9, color),
        output::field("Address", &report.ip_cidr, 9, color),
        output::field("Peer", &report.peer, 9, color),
        output::field(
            "Binding",
            if report.address_removed { "removed" } else { "absent" },
            9,
            color,
        ),
        output::field("Marking", report.mangle_rules_removed, 9, color),
        output::field("Queues", report.queues_removed, 9, color),
    ]
    .join("\n")
}

pub async fn handle_client(
    args: DeleteClientArgs,
    global: &GlobalOpts,
    cfg: &Config,
) -> Result<(), CliError> {
    let store = config::open_store(global, cfg, args.ip.is_none())?;
    let engine = config::reconciler(global, cfg, store)?;
    let report = match args.ip {
        Some(ref ip) => engine.delete_client_binding(&args.client, ip).await?,
        None => engine.delete_client(&ClientLookup::parse(&args.client)).await?,
    };

    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        &report,
        |r| detail(r, color),
        |r| r.client_name.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

#[derive(Serialize)]
struct PackageRemoval {
    package: String,
    queues_removed: usize,
}

pub async fn handle_package(
    args: DeletePackageArgs,
    global: &GlobalOpts,
    cfg: &Config,
) -> Result<(), CliError> {
    let store = config::open_store(global, cfg, false)?;
    let engine = config::reconciler(global, cfg, store)?;

    // A numeric argument names a package id when the inventory knows it.
    let name = match args.package.trim().parse::<u64>() {
        Ok(id) => engine
            .store()
            .package_by_id(id)
            .await?
            .map_or_else(|| args.package.clone(), |p| p.name.clone()),
        Err(_) => args.package.clone(),
    };
    let queues_removed = engine.delete_package_parents(&name).await?;

    let removal = PackageRemoval {
        package: name,
        queues_removed,
    };
    let out = output::render_single(
        &global.output,
        &removal,
        |r| match r.queues_removed {
            0 => format!("no parent queues found for {}", r.package),
            n => format!("removed {n} parent queues of {}", r.package),
        },
        |r| r.package.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
