//! CLI output formatting

use crate::{
    core::StepStatus,
    execution::{EventType, PipelineEvent, PipelineResult},
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Create a percentage progress bar
pub fn create_progress_bar() -> ProgressBar {
    let progress = ProgressBar::new(100);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a step status for display
pub fn format_status(status: StepStatus) -> String {
    match status {
        StepStatus::Pending => style("PENDING").dim().to_string(),
        StepStatus::Running => style("RUNNING").yellow().to_string(),
        StepStatus::Complete => style("COMPLETE").green().to_string(),
        StepStatus::Failed => style("FAILED").red().to_string(),
        StepStatus::Skipped => style("SKIPPED").dim().to_string(),
    }
}

/// Format a pipeline event for display
pub fn format_event(event: &PipelineEvent) -> String {
    let step = event.step_name.as_deref().unwrap_or("");
    let data_str = |key: &str| {
        event
            .data
            .as_ref()
            .and_then(|d| d.get(key))
            .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
    };
    let took = event
        .duration
        .map(|ms| style(format!("({})", format_duration(Duration::from_millis(ms)))).dim().to_string())
        .unwrap_or_default();

    match event.kind {
        EventType::PipelineStarted => format!(
            "{} Starting pipeline {} ({})",
            ROCKET,
            style(&event.pipeline_id).bold(),
            style(data_str("runId").unwrap_or_default()).dim()
        ),
        EventType::StepStarted => format!("{} {}", SPINNER, style(step).cyan()),
        EventType::StepRetry => format!(
            "{} {} attempt {}/{} failed, retrying in {}ms: {}",
            WARN,
            style(step).yellow(),
            data_str("attempt").unwrap_or_default(),
            data_str("maxAttempts").unwrap_or_default(),
            data_str("delay").unwrap_or_default(),
            style(data_str("error").unwrap_or_default()).dim()
        ),
        EventType::StepComplete => match data_str("model") {
            Some(model) => format!(
                "{} {} {} {}",
                CHECK,
                style(step).green(),
                style(format!("[{}]", model)).dim(),
                took
            ),
            None => format!("{} {} {}", CHECK, style(step).green(), took),
        },
        EventType::StepFailed => format!(
            "{} {}: {} {}",
            CROSS,
            style(step).red(),
            style(data_str("error").unwrap_or_default()).dim(),
            took
        ),
        EventType::StepSkipped => match data_str("error") {
            Some(error) => format!("{} {} ({})", SKIP, style(step).dim(), error),
            None => format!(
                "{} {} ({})",
                SKIP,
                style(step).dim(),
                data_str("reason").unwrap_or_default()
            ),
        },
        EventType::PipelineComplete => format!(
            "{} Pipeline {} completed {} {}",
            CHECK,
            style(&event.pipeline_id).bold(),
            style("successfully").green(),
            took
        ),
        EventType::PipelineFailed => format!(
            "{} Pipeline {} {} {}",
            CROSS,
            style(&event.pipeline_id).bold(),
            style("failed").red(),
            took
        ),
    }
}

/// Per-step summary table of a finished run
pub fn format_result(result: &PipelineResult) -> String {
    let width = result.steps.iter().map(|s| s.id.len()).max().unwrap_or(0);
    let mut lines = Vec::with_capacity(result.steps.len() + 2);

    lines.push(format!(
        "{} Run {} finished in {}",
        INFO,
        style(&result.run_id.to_string()[..8]).dim(),
        format_duration(Duration::from_millis(result.duration_ms))
    ));

    for step in &result.steps {
        let mut line = format!(
            "  {:width$}  {}",
            step.id,
            format_status(step.status),
            width = width
        );
        if let Some(retries) = step.retries.filter(|r| *r > 0) {
            line.push_str(&format!(" {}", style(format!("{} retries", retries)).dim()));
        }
        if let Some(error) = &step.error {
            line.push_str(&format!(" {}", style(error).dim()));
        }
        lines.push(line);
    }

    if !result.models.is_empty() {
        lines.push(format!("  Models: {}", style(result.models.join(", ")).cyan()));
    }

    lines.join("\n")
}

pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    let secs = duration.as_secs();
    if secs == 0 {
        format!("{}ms", millis)
    } else if secs < 60 {
        format!("{:.1}s", duration.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
