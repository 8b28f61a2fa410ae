//! Output formatting: table, JSON, plain.
//!
//! Renders data in the format selected by `--output`. Table uses `tabled`
//! or a detail view, structured formats use serde, plain emits identifiers.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use tabled::{Table, Tabled, settings::Style};

use crate::cli::{ColorMode, OutputFormat};
use crate::error::CliError;

// ── Color helpers ────────────────────────────────────────────────────

/// Determine whether color output should be enabled.
pub fn should_color(mode: &ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

/// A `Label: value` detail line with the label padded to `width`.
pub fn field(label: &str, value: impl std::fmt::Display, width: usize, color: bool) -> String {
    let label = format!("{label}:");
    if color {
        format!("{:<width$} {value}", label.bold())
    } else {
        format!("{label:<width$} {value}")
    }
}

pub fn warning(message: &str, color: bool) -> String {
    if color {
        format!("{} {message}", "warning:".yellow().bold())
    } else {
        format!("warning: {message}")
    }
}

pub fn failure(message: &str, color: bool) -> String {
    if color {
        format!("{} {message}", "failed:".red().bold())
    } else {
        format!("failed: {message}")
    }
}

// ── Render dispatchers ───────────────────────────────────────────────

/// Render a single serde-serializable item in the chosen format.
///
/// Table rendering uses a custom `detail_fn` that returns a pre-formatted
/// string, since single-item detail views don't use `Tabled` derive.
pub fn render_single<T>(
    format: &OutputFormat,
    data: &T,
    detail_fn: impl Fn(&T) -> String,
    id_fn: impl Fn(&T) -> String,
) -> Result<String, CliError>
where
    T: serde::Serialize,
{
    Ok(match format {
        OutputFormat::Table => detail_fn(data),
        OutputFormat::Json => serde_json::to_string_pretty(data)?,
        OutputFormat::JsonCompact => serde_json::to_string(data)?,
        OutputFormat::Plain => id_fn(data),
    })
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

pub fn render_table<R: Tabled>(rows: &[R]) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use serde::Serialize;

    use super::*;

    #[derive(Serialize, Tabled)]
    struct Queue {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Max")]
        max_limit: String,
    }

    fn budi() -> Queue {
        Queue {
            name: "Budi".into(),
            max_limit: "10M".into(),
        }
    }

    fn render(format: &OutputFormat) -> String {
        render_single(format, &budi(), |q| render_table(&[q]), |q| q.name.clone()).unwrap()
    }

    #[test]
    fn plain_prints_the_identifier() {
        assert_eq!(render(&OutputFormat::Plain), "Budi");
    }

    #[test]
    fn compact_json_is_one_line() {
        let out = render(&OutputFormat::JsonCompact);
        assert_eq!(out, r#"{"name":"Budi","max_limit":"10M"}"#);
    }

    #[test]
    fn table_has_headers() {
        let out = render(&OutputFormat::Table);
        assert!(out.contains("Name"));
        assert!(out.contains("10M"));
    }

    #[test]
    fn uncolored_field_is_padded() {
        assert_eq!(field("Peer", "192.168.5.2", 8, false), "Peer:    192.168.5.2");
    }
}
