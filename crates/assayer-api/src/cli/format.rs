//! Shared terminal rendering for jobs, executions and results.

use chrono::{DateTime, Utc};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use assayer_types::execution::{Execution, ExecutionStatus, LogLevel};
use assayer_types::job::TriggerSpec;
use assayer_types::result::{ConsolidatedResult, DomainStatus, RiskLevel, Severity};

pub fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            header
                .into_iter()
                .map(|h| Cell::new(h).fg(Color::Cyan))
                .collect::<Vec<_>>(),
        );
    table
}

pub fn status_color(status: ExecutionStatus) -> Color {
    match status {
        ExecutionStatus::Pending => Color::Yellow,
        ExecutionStatus::Running => Color::Blue,
        ExecutionStatus::Completed => Color::Green,
        ExecutionStatus::Failed => Color::Red,
        ExecutionStatus::Cancelled => Color::DarkGrey,
    }
}

pub fn status_cell(status: ExecutionStatus) -> Cell {
    Cell::new(status.to_string()).fg(status_color(status))
}

pub fn styled_status(status: ExecutionStatus) -> String {
    let text = status.to_string();
    match status {
        ExecutionStatus::Pending => style(text).yellow().to_string(),
        ExecutionStatus::Running => style(text).blue().to_string(),
        ExecutionStatus::Completed => style(text).green().to_string(),
        ExecutionStatus::Failed => style(text).red().to_string(),
        ExecutionStatus::Cancelled => style(text).dim().to_string(),
    }
}

pub fn styled_risk(risk: RiskLevel) -> String {
    let text = risk.to_string();
    match risk {
        RiskLevel::Low => style(text).green().bold().to_string(),
        RiskLevel::Medium => style(text).yellow().bold().to_string(),
        RiskLevel::High => style(text).red().bold().to_string(),
        RiskLevel::Critical => style(text).red().bold().reverse().to_string(),
    }
}

fn styled_severity(severity: Severity) -> String {
    let text = severity.to_string();
    match severity {
        Severity::Critical | Severity::High => style(text).red().to_string(),
        Severity::Medium => style(text).yellow().to_string(),
        Severity::Low | Severity::Info => style(text).dim().to_string(),
    }
}

fn domain_status_color(status: DomainStatus) -> Color {
    match status {
        DomainStatus::Passed => Color::Green,
        DomainStatus::Failed | DomainStatus::Error => Color::Red,
        DomainStatus::Cancelled | DomainStatus::Skipped => Color::DarkGrey,
    }
}

pub fn describe_trigger(trigger: &TriggerSpec) -> String {
    match trigger {
        TriggerSpec::Manual => "manual".to_string(),
        TriggerSpec::Cron { expression } => format!("cron: {expression}"),
        TriggerSpec::Interval { seconds } => format!("every {}", format_duration_ms(seconds.saturating_mul(1000))),
    }
}

/// `1h 2m`, `3m 4s`, `5.2s`, `120ms`.
pub fn format_duration_ms(ms: u64) -> String {
    let secs = ms / 1000;
    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if ms >= 1000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{ms}ms")
    }
}

pub fn format_time(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Print a consolidated result: score, risk, per-domain table, common
/// issues and recommendations.
pub fn print_result(result: &ConsolidatedResult) {
    println!(
        "  {} {:.3}   {} {}",
        style("Score:").bold(),
        result.overall_score,
        style("Risk:").bold(),
        styled_risk(result.risk_level)
    );
    println!();

    let mut table = new_table(vec!["Domain", "Status", "Score", "Pass rate", "Weight", "Findings"]);
    for score in &result.domain_scores {
        table.add_row(vec![
            Cell::new(score.domain.to_string()),
            Cell::new(score.status.to_string()).fg(domain_status_color(score.status)),
            Cell::new(format!("{:.3}", score.score)),
            Cell::new(format!("{:.0}%", score.pass_rate * 100.0)),
            Cell::new(format!("{:.2}", score.weight)),
            Cell::new(score.findings.to_string()),
        ]);
    }
    println!("{table}");

    if !result.common_issues.is_empty() {
        println!();
        println!("  {}", style("Common issues").bold());
        for issue in &result.common_issues {
            let domains: Vec<String> = issue.domains.iter().map(|d| d.to_string()).collect();
            println!(
                "    {} {} ({}) in {}",
                style("•").dim(),
                issue.pattern,
                styled_severity(issue.elevated_severity),
                domains.join(", ")
            );
        }
    }

    if !result.recommendations.is_empty() {
        println!();
        println!("  {}", style("Recommendations").bold());
        for rec in &result.recommendations {
            println!(
                "    {} [{}] {}",
                style("•").dim(),
                style(rec.priority.to_string()).yellow(),
                rec.title
            );
            if !rec.description.is_empty() {
                println!("      {}", style(&rec.description).dim());
            }
            for action in &rec.actions {
                println!("      - {action}");
            }
        }
    }
}

/// Print an execution with its logs and, when present, its result.
pub fn print_execution(execution: &Execution) {
    println!();
    println!(
        "  {} {} {}",
        style("Execution").bold(),
        style(execution.id).dim(),
        styled_status(execution.status)
    );
    println!("  {}  {}", style("Job:").bold(), style(&execution.job_name).cyan());
    println!("  {}  {}", style("Triggered by:").bold(), execution.triggered_by);
    println!(
        "  {}  {} ({} retries)",
        style("Attempts:").bold(),
        execution.attempts,
        execution.retry_count
    );
    if let Some(started) = &execution.started_at {
        println!("  {}  {}", style("Started:").bold(), format_time(started));
    }
    if let Some(ms) = execution.duration_ms {
        println!("  {}  {}", style("Duration:").bold(), format_duration_ms(ms));
    }
    if let Some(error) = &execution.error {
        println!("  {}  {}", style("Error:").bold(), style(error).red());
    }

    if !execution.logs.is_empty() {
        println!();
        for entry in &execution.logs {
            let level = match entry.level {
                LogLevel::Info => style("info ").dim(),
                LogLevel::Warn => style("warn ").yellow(),
                LogLevel::Error => style("error").red(),
            };
            println!("    {} {} {}", style(format_time(&entry.at)).dim(), level, entry.message);
        }
    }

    if let Some(result) = &execution.result {
        println!();
        print_result(result);
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_pick_the_coarsest_sensible_unit() {
        assert_eq!(format_duration_ms(120), "120ms");
        assert_eq!(format_duration_ms(5_200), "5.2s");
        assert_eq!(format_duration_ms(185_000), "3m 5s");
        assert_eq!(format_duration_ms(3_720_000), "1h 2m");
    }

    #[test]
    fn triggers_are_described() {
        assert_eq!(describe_trigger(&TriggerSpec::Manual), "manual");
        assert_eq!(describe_trigger(&TriggerSpec::Interval { seconds: 300 }), "every 5m 0s");
        assert_eq!(
            describe_trigger(&TriggerSpec::Cron {
                expression: "0 2 * * *".into()
            }),
            "cron: 0 2 * * *"
        );
    }
}
