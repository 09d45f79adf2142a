use std::fmt::{self, Write};

use chrono::NaiveDate;
use core_model::{DailyReport, format_date};

/// Plain-text daily message: recurring names first, then today's raw list.
pub fn render_report(report: &DailyReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "📊 Ranking recurrence {}", format_date(report.date));
    let _ = writeln!(
        out,
        "Window: {} ~ {}",
        format_date(report.window_start),
        format_date(report.date)
    );
    out.push('\n');

    if report.leaders.is_empty() {
        let _ = writeln!(
            out,
            "No name appeared {}+ times in the window.",
            report.min_count
        );
    } else {
        let _ = writeln!(out, "🔁 Recurring names ({})", report.leaders.len());
        for leader in &report.leaders {
            let marker = if leader.highlighted { "🔥" } else { "•" };
            let _ = writeln!(out, "{marker} {} ×{}", leader.name, leader.count);
        }
    }
    out.push('\n');

    let today = report
        .today
        .iter()
        .map(|n| n.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let _ = write!(out, "📋 Today ({}): {}", report.today.len(), today);
    out
}

/// Operator notice sent instead of a report when a run could not finish.
pub fn render_failure(date: NaiveDate, stage: &str, error: &dyn fmt::Display) -> String {
    format!(
        "⚠️ Ranking report for {} was not produced.\nStage: {stage}\nReason: {error}\nHistory was left unchanged.",
        format_date(date)
    )
}
