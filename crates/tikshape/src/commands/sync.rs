//! Sync command handlers.

use tabled::Tabled;

use tikshape_api::Rate;
use tikshape_config::Config;
use tikshape_core::{
    ChildQueue, ClientLookup, ParentAction, SyncAllReport, SyncOptions, SyncReport, SyncRequest,
};

use crate::cli::{GlobalOpts, SyncArgs};
use crate::config;
use crate::error::CliError;
use crate::output;

// ── Table rows ──────────────────────────────────────────────────────

#[derive(Tabled)]
struct ChildRow {
    #[tabled(rename = "Dir")]
    direction: String,
    #[tabled(rename = "Queue")]
    name: String,
    #[tabled(rename = "Parent")]
    parent: String,
    #[tabled(rename = "Mark")]
    packet_mark: String,
    #[tabled(rename = "Max")]
    max_limit: String,
    #[tabled(rename = "Limit-at")]
    limit_at: String,
}

impl From<&ChildQueue> for ChildRow {
    fn from(q: &ChildQueue) -> Self {
        Self {
            direction: q.direction.to_string(),
            name: q.name.clone(),
            parent: q.parent.clone(),
            packet_mark: q.packet_mark.clone(),
            max_limit: q.max_limit.to_string(),
            limit_at: q.limit_at.map_or_else(|| "-".into(), |r| r.to_string()),
        }
    }
}

#[derive(Tabled)]
struct SyncedRow {
    #[tabled(rename = "Client")]
    client: String,
    #[tabled(rename = "Package")]
    package: String,
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "Peer")]
    peer: String,
    #[tabled(rename = "Down")]
    download: String,
    #[tabled(rename = "Up")]
    upload: String,
}

impl From<&SyncReport> for SyncedRow {
    fn from(r: &SyncReport) -> Self {
        Self {
            client: r.client_name.clone(),
            package: r.package.clone(),
            address: r.ip_cidr.clone(),
            peer: r.peer.clone(),
            download: r.download.max_limit.to_string(),
            upload: r.upload.max_limit.to_string(),
        }
    }
}

// ── Detail views ────────────────────────────────────────────────────

pub(crate) fn parent_action(action: &ParentAction) -> String {
    match action {
        ParentAction::Created { .. } => "created".into(),
        ParentAction::Updated { .. } => "updated".into(),
        ParentAction::Renamed { from, .. } => format!("renamed from {from}"),
    }
}

fn detail(report: &SyncReport, color: bool) -> String {
    let mut lines = vec![
        output::field("Client", &report.client_name, 9, color),
        output::field("Package", &report.package, 9, color),
        output::field(
            "Address",
            format!("{} ({})", report.ip_cidr, report.address),
            9,
            color,
        ),
        output::field("Peer", &report.peer, 9, color),
        output::field(
            "Parents",
            format!(
                "download {}, upload {}",
                parent_action(&report.parents.download),
                parent_action(&report.parents.upload)
            ),
            9,
            color,
        ),
        output::field(
            "Cleanup",
            format!(
                "{} stale queues removed, {} marking rules replaced",
                report.queues_removed, report.mangle_rules_replaced
            ),
            9,
            color,
        ),
        String::new(),
        output::render_table(&[
            ChildRow::from(&report.download),
            ChildRow::from(&report.upload),
        ]),
    ];
    lines.extend(report.warnings.iter().map(|w| output::warning(w, color)));
    lines.join("\n")
}

fn detail_all(report: &SyncAllReport, color: bool) -> String {
    let mut lines = Vec::new();
    if !report.synced.is_empty() {
        let rows: Vec<SyncedRow> = report.synced.iter().map(SyncedRow::from).collect();
        lines.push(output::render_table(&rows));
    }
    for synced in &report.synced {
        for warning in &synced.warnings {
            lines.push(output::warning(
                &format!("{}: {warning}", synced.client_name),
                color,
            ));
        }
    }
    for failure in &report.failed {
        let step = failure
            .step
            .map_or_else(String::new, |s| format!(" at {s}"));
        let retry = if failure.retryable { " (retryable)" } else { "" };
        lines.push(output::failure(
            &format!("{}{step}: {}{retry}", failure.client_name, failure.error),
            color,
        ));
    }
    if lines.is_empty() {
        lines.push("no active clients".into());
    }
    lines.join("\n")
}

// ── Handlers ────────────────────────────────────────────────────────

fn parse_rate(field: &str, value: Option<String>) -> Result<Option<Rate>, CliError> {
    value
        .map(|v| {
            v.parse::<Rate>().map_err(|e| CliError::Validation {
                field: field.into(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn options(args: &mut SyncArgs) -> Result<SyncOptions, CliError> {
    Ok(SyncOptions {
        previous_client_name: args.previous_name.take(),
        previous_ip_cidr: args.previous_ip.take(),
        interface: args.interface.take(),
        download_limit: parse_rate("download-limit", args.download_limit.take())?,
        upload_limit: parse_rate("upload-limit", args.upload_limit.take())?,
        download_limit_at: parse_rate("download-limit-at", args.download_limit_at.take())?,
        upload_limit_at: parse_rate("upload-limit-at", args.upload_limit_at.take())?,
    })
}

pub async fn handle(mut args: SyncArgs, global: &GlobalOpts, cfg: &Config) -> Result<(), CliError> {
    let options = options(&mut args)?;
    let ad_hoc = args.package.zip(args.ip.take());

    // An unlisted client still needs its package from the inventory.
    let store = config::open_store(global, cfg, true)?;
    let engine = config::reconciler(global, cfg, store)?;

    let report = match ad_hoc {
        Some((package_id, ip)) => {
            let request = SyncRequest::new(args.client, package_id, ip).with_options(options);
            engine.sync_client_binding(&request).await?
        }
        None => {
            engine
                .sync_client_with(&ClientLookup::parse(&args.client), options)
                .await?
        }
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

pub async fn handle_all(global: &GlobalOpts, cfg: &Config) -> Result<(), CliError> {
    let store = config::open_store(global, cfg, true)?;
    let engine = config::reconciler(global, cfg, store)?;
    let report = engine.sync_all().await?;

    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        &report,
        |r| detail_all(r, color),
        |r| {
            r.synced
                .iter()
                .map(|s| s.client_name.as_str())
                .collect::<Vec<_>>()
                .join("\n")
        },
    )?;
    output::print_output(&out, global.quiet);

    if report.is_clean() {
        Ok(())
    } else {
        Err(CliError::SyncAllFailed {
            failed: report.failed.len(),
            total: report.synced.len() + report.failed.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn rates_are_validated_before_connecting() {
        assert!(parse_rate("download-limit", Some("20M".into())).unwrap().is_some());
        let err = parse_rate("download-limit", Some("fast".into())).unwrap_err();
        assert!(matches!(err, CliError::Validation { ref field, .. } if field == "download-limit"));
    }

    #[test]
    fn renamed_parent_names_the_old_queue() {
        let action = ParentAction::Renamed {
            id: "*1".into(),
            from: "PAKET-5".into(),
        };
        assert_eq!(parent_action(&action), "renamed from PAKET-5");
    }
}
