use std::io::IsTerminal;

use anstyle::{AnsiColor, Effects, Style};
use devlease_core::{CleanupResult, SetupResult};
use devlease_store::ExpireReport;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

pub(crate) fn current_output_style() -> OutputStyle {
    output_style_for(
        std::io::stdout().is_terminal(),
        std::env::var_os("NO_COLOR").is_some(),
    )
}

pub(crate) fn output_style_for(is_terminal: bool, no_color: bool) -> OutputStyle {
    if is_terminal && !no_color {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

fn status_badge(status: &str) -> &'static str {
    match status {
        "ok" => "[OK]",
        "warn" => "[WARN]",
        "error" => "[ERR]",
        _ => "[..]",
    }
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => format!("{} {message}", status_badge(status)),
    }
}

fn section_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightBlue.into()))
        .effects(Effects::BOLD)
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

pub(crate) fn render_section_header(style: OutputStyle, title: &str) -> Option<String> {
    match style {
        OutputStyle::Plain => None,
        OutputStyle::Rich => Some(colorize(section_style(), &format!("== {title} =="))),
    }
}

pub(crate) fn format_setup_lines(result: &SetupResult, style: OutputStyle) -> Vec<String> {
    let mut lines = Vec::new();
    if result.success {
        let message = match &result.snapshot {
            Some(handle) => format!(
                "environment ready (snapshot={} location={})",
                handle.id,
                handle.location.display()
            ),
            None => "environment ready".to_string(),
        };
        lines.push(render_status_line(style, "ok", &message));
    } else {
        let phase = result
            .failed_phase
            .map(|phase| phase.as_str())
            .unwrap_or("unknown");
        lines.push(render_status_line(
            style,
            "error",
            &format!("setup failed during {phase}"),
        ));
    }

    for error in &result.errors {
        lines.push(render_status_line(style, "error", error));
    }
    for error in &result.rollback_errors {
        lines.push(render_status_line(style, "error", &format!("rollback: {error}")));
    }
    for warning in &result.warnings {
        lines.push(render_status_line(style, "warn", warning));
    }
    lines
}

pub(crate) fn format_cleanup_lines(result: &CleanupResult, style: OutputStyle) -> Vec<String> {
    let mut lines = Vec::new();
    let headline = match (result.success, result.restored, result.emergency) {
        (_, _, true) => render_status_line(
            style,
            "warn",
            "emergency cleanup ran without a snapshot",
        ),
        (true, true, false) => render_status_line(style, "ok", "environment restored"),
        (true, false, false) => render_status_line(style, "info", "nothing to clean up"),
        (false, _, false) => render_status_line(style, "error", "cleanup failed"),
    };
    lines.push(headline);

    for error in &result.errors {
        lines.push(render_status_line(style, "error", error));
    }
    for warning in &result.warnings {
        lines.push(render_status_line(style, "warn", warning));
    }
    lines
}

pub(crate) fn format_expire_lines(report: &ExpireReport, style: OutputStyle) -> Vec<String> {
    let mut lines = vec![render_status_line(
        style,
        "ok",
        &format!(
            "expired {} snapshot(s), kept {}",
            report.removed.len(),
            report.kept
        ),
    )];
    for path in &report.removed {
        lines.push(render_status_line(
            style,
            "info",
            &format!("removed {}", path.display()),
        ));
    }
    for failure in report.failures.failures() {
        lines.push(render_status_line(style, "error", &failure.to_string()));
    }
    lines
}
