//! Output formatting utilities

use console::{style, Style};

use conveyor_engine::pipeline::FlowResult;
use conveyor_engine::report::StatusCounts;
use conveyor_engine::Status;

/// Print a success message
pub fn success(message: &str) {
    println!("{} {}", style("✓").green().bold(), message);
}

/// Print an error message
pub fn error(message: &str) {
    eprintln!("{} {}", style("✗").red().bold(), message);
}

/// Print a warning message
pub fn warning(message: &str) {
    println!("{} {}", style("!").yellow().bold(), message);
}

/// Print an info message
pub fn info(message: &str) {
    println!("{} {}", style("→").blue(), message);
}

/// Create a styled header
pub fn header(text: &str) -> String {
    style(text).bold().to_string()
}

/// Create a styled key-value line
pub fn key_value(key: &str, value: &str) -> String {
    format!("  {}: {}", style(key).dim(), value)
}

/// Style for paths
pub fn path_style() -> Style {
    Style::new().cyan()
}

/// Style for a status
pub fn status_style(status: Status) -> Style {
    match status {
        Status::Passed => Style::new().green(),
        Status::Failed => Style::new().red().bold(),
        Status::SkippedAsPassed => Style::new().dim(),
        Status::SkippedAsFailed => Style::new().yellow(),
    }
}

/// Symbol for a status
pub fn status_symbol(status: Status) -> String {
    let symbol = match status {
        Status::Passed => "✓",
        Status::Failed => "✗",
        Status::SkippedAsPassed => "○",
        Status::SkippedAsFailed => "⊘",
    };
    status_style(status).apply_to(symbol).to_string()
}

const COLUMNS: [&str; 6] = ["passed", "failed", "skipped", "skip/fail", "time", "status"];

/// Render the per-step summary table of a flow
pub fn flow_table(result: &FlowResult) -> String {
    let rows: Vec<(String, StatusCounts, u64, Status)> = result
        .steps
        .iter()
        .map(|node| {
            let step = &node.data;
            (
                step.step_info.display_name.clone(),
                StatusCounts::of_step(step),
                step.step_result.duration_ms(),
                step.step_result.status(),
            )
        })
        .collect();

    let name_width = rows
        .iter()
        .map(|(name, ..)| name.chars().count())
        .max()
        .unwrap_or(0)
        .max("step".len());

    let mut lines = Vec::with_capacity(rows.len() + 2);
    let mut heading = format!("  {:<width$}", "step", width = name_width);
    for column in COLUMNS {
        heading.push_str(&format!("  {:>9}", column));
    }
    lines.push(style(heading).bold().to_string());

    for (name, counts, duration_ms, status) in rows {
        // pad before styling so escape codes do not break alignment
        let status_cell = status_style(status).apply_to(format!("{:>9}", status.as_str()));
        lines.push(format!(
            "  {:<width$}  {:>9}  {:>9}  {:>9}  {:>9}  {:>9}  {}",
            name,
            counts.passed,
            counts.failed,
            counts.skipped_as_passed,
            counts.skipped_as_failed,
            format_duration(duration_ms),
            status_cell,
            width = name_width,
        ));
    }

    lines.push(String::new());
    lines.push(format!(
        "  {} flow {} {} in {}",
        status_symbol(result.status),
        style(&result.flow_id).dim(),
        status_style(result.status).apply_to(result.status.as_str()),
        format_duration(result.duration_ms)
    ));

    lines.join("\n")
}

/// Failed and skipped-as-failed packages with their first note or error
pub fn problems(result: &FlowResult) -> Vec<String> {
    let mut lines = Vec::new();
    for step in result.steps.iter() {
        for entry in step.data.artifacts_result.iter() {
            let outcome = &entry.data.artifact_step_result;
            if outcome.status().is_passing() {
                continue;
            }
            let reason = outcome
                .errors()
                .first()
                .map(|e| e.to_string())
                .or_else(|| outcome.notes().first().cloned())
                .unwrap_or_default();
            lines.push(format!(
                "  {} {} {} {}",
                status_symbol(outcome.status()),
                style(&step.data.step_info.step_id).bold(),
                entry.data.artifact.name(),
                style(reason).dim()
            ));
        }
    }
    lines
}

pub fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else {
        format!("{:.1}s", ms as f64 / 1000.0)
    }
}
