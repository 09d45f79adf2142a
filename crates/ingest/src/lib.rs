use std::collections::HashSet;

use chrono::NaiveDate;
use core_model::{DailyReport, ExtractError, Extractor, MergeReport, Notifier, StockName};
use recurrence::RecurrenceConfig;
use store_sqlite::SqliteStore;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub enum RunPhase {
    Extracting { kind: &'static str },
    Merging { name_count: usize },
    Persisting { rows: usize, added: usize },
    Analyzing { window_rows: usize },
    Notifying { channel: &'static str, leaders: usize },
    Done,
}

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub date: NaiveDate,
    /// Merge and analyze in memory but roll the store back.
    pub dry_run: bool,
}

#[derive(Debug)]
pub enum RunOutcome {
    Reported {
        report: DailyReport,
        merge: MergeReport,
        persisted: bool,
        notified: bool,
    },
    /// Nothing was merged; the operator was sent a diagnostic instead.
    ExtractionFailed { error: ExtractError, notified: bool },
}

/// One scheduled run: extract, merge into history, persist, analyze the
/// trailing window, notify. Notification happens only after the history is
/// committed, and an extraction failure leaves the store untouched.
pub fn run_daily(
    extractor: &dyn Extractor,
    store: &mut SqliteStore,
    recurrence: &RecurrenceConfig,
    notifier: &dyn Notifier,
    options: RunOptions,
    on_progress: impl Fn(RunPhase),
) -> anyhow::Result<RunOutcome> {
    let date = options.date;
    on_progress(RunPhase::Extracting {
        kind: extractor.kind(),
    });

    let names = match extractor.extract() {
        Ok(names) => names,
        Err(error) => {
            warn!(
                kind = extractor.kind(),
                transient = error.is_transient(),
                error = %error,
                "extraction failed; history left unchanged"
            );
            let notified = deliver(notifier, &notify::render_failure(date, "extract", &error));
            return Ok(RunOutcome::ExtractionFailed { error, notified });
        }
    };

    on_progress(RunPhase::Merging {
        name_count: names.len(),
    });

    let cycle = match store.begin_cycle() {
        Ok(cycle) => cycle,
        Err(err) => {
            deliver(notifier, &notify::render_failure(date, "store", &format!("{err:#}")));
            return Err(err);
        }
    };
    let mut history = cycle.load();
    let merge = history.merge(date, &names);
    for (raw, err) in &merge.rejected {
        warn!(name = %raw, error = %err, "rejected name");
    }

    on_progress(RunPhase::Persisting {
        rows: history.len(),
        added: merge.added,
    });

    let persisted = if options.dry_run {
        drop(cycle);
        info!("dry run; history rolled back");
        false
    } else {
        if let Err(err) = cycle.commit(&history) {
            deliver(notifier, &notify::render_failure(date, "persist", &format!("{err:#}")));
            return Err(err);
        }
        info!(rows = history.len(), added = merge.added, "history persisted");
        true
    };

    let analysis = recurrence::analyze(&history, date, recurrence);
    on_progress(RunPhase::Analyzing {
        window_rows: analysis.window_rows,
    });

    let report = DailyReport {
        date,
        window_start: analysis.window_start,
        min_count: recurrence.min_count,
        today: todays_names(&names),
        leaders: analysis.leaders,
    };

    on_progress(RunPhase::Notifying {
        channel: notifier.channel(),
        leaders: report.leaders.len(),
    });
    let notified = deliver(notifier, &notify::render_report(&report));

    on_progress(RunPhase::Done);

    Ok(RunOutcome::Reported {
        report,
        merge,
        persisted,
        notified,
    })
}

fn todays_names(names: &[String]) -> Vec<StockName> {
    let mut seen = HashSet::new();
    names
        .iter()
        .filter_map(|n| StockName::parse(n).ok())
        .filter(|n| seen.insert(n.clone()))
        .collect()
}

fn deliver(notifier: &dyn Notifier, text: &str) -> bool {
    match notifier.send(text) {
        Ok(()) => {
            info!(channel = notifier.channel(), "notification sent");
            true
        }
        Err(err) => {
            warn!(
                channel = notifier.channel(),
                transient = err.is_transient(),
                error = %err,
                "notification failed"
            );
            false
        }
    }
}
