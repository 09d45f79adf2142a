use std::collections::HashMap;

use chrono::{Days, NaiveDate};
use core_model::{History, Leader, Observation, StockName};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Today plus the two preceding calendar days.
pub const DEFAULT_WINDOW_DAYS: u32 = 2;
pub const DEFAULT_MIN_COUNT: usize = 2;
pub const DEFAULT_HIGHLIGHT_COUNT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecurrenceConfig {
    /// Days before `as_of` included in the window; the window is inclusive
    /// on both ends, so it spans `window_days + 1` calendar days.
    pub window_days: u32,
    /// Minimum occurrences inside the window for a name to lead.
    pub min_count: usize,
    /// Leaders at or above this count are flagged for emphasis.
    pub highlight_count: usize,
}

impl Default for RecurrenceConfig {
    fn default() -> Self {
        Self {
            window_days: DEFAULT_WINDOW_DAYS,
            min_count: DEFAULT_MIN_COUNT,
            highlight_count: DEFAULT_HIGHLIGHT_COUNT,
        }
    }
}

impl RecurrenceConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.min_count == 0 {
            anyhow::bail!("min_count must be at least 1");
        }
        if self.highlight_count < self.min_count {
            anyhow::bail!(
                "highlight_count ({}) must not be below min_count ({})",
                self.highlight_count,
                self.min_count
            );
        }
        Ok(())
    }
}

/// Result of one windowed analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analysis {
    pub as_of: NaiveDate,
    pub window_start: NaiveDate,
    pub window_rows: usize,
    pub leaders: Vec<Leader>,
}

/// First day of the window ending at `as_of`.
pub fn window_start(as_of: NaiveDate, window_days: u32) -> NaiveDate {
    as_of
        .checked_sub_days(Days::new(u64::from(window_days)))
        .unwrap_or(NaiveDate::MIN)
}

/// Observations dated from `as_of - window_days` through `as_of`, both
/// inclusive, in history order. Rows after `as_of` are outside the window.
pub fn recent(history: &History, as_of: NaiveDate, window_days: u32) -> Vec<Observation> {
    history.between(window_start(as_of, window_days), as_of)
}

/// Names occurring at least `min_count` times, most frequent first. Equal
/// counts keep the order in which the names first appear in `recent`.
pub fn leaders(recent: &[Observation], min_count: usize, highlight_count: usize) -> Vec<Leader> {
    let mut counts: Vec<(&StockName, usize)> = Vec::new();
    let mut slots: HashMap<&StockName, usize> = HashMap::new();
    for obs in recent {
        match slots.get(&obs.name) {
            Some(&slot) => counts[slot].1 += 1,
            None => {
                slots.insert(&obs.name, counts.len());
                counts.push((&obs.name, 1));
            }
        }
    }

    let mut out: Vec<Leader> = counts
        .into_iter()
        .filter(|(_, count)| *count >= min_count)
        .map(|(name, count)| Leader {
            name: name.clone(),
            count,
            highlighted: count >= highlight_count,
        })
        .collect();
    // sort_by is stable, which preserves first-appearance order among ties.
    out.sort_by(|a, b| b.count.cmp(&a.count));
    out
}

pub fn analyze(history: &History, as_of: NaiveDate, config: &RecurrenceConfig) -> Analysis {
    let start = window_start(as_of, config.window_days);
    let rows = recent(history, as_of, config.window_days);
    let leaders = leaders(&rows, config.min_count, config.highlight_count);
    debug!(
        as_of = %as_of,
        window_start = %start,
        window_rows = rows.len(),
        leaders = leaders.len(),
        "recurrence analyzed"
    );
    Analysis {
        as_of,
        window_start: start,
        window_rows: rows.len(),
        leaders,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_model::parse_date;

    fn d(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    fn history(rows: &[(&str, &str)]) -> History {
        let mut h = History::new();
        for (date, name) in rows {
            h.merge(d(date), [*name]);
        }
        h
    }

    fn names(leaders: &[Leader]) -> Vec<(&str, usize)> {
        leaders.iter().map(|l| (l.name.as_str(), l.count)).collect()
    }

    #[test]
    fn first_day_has_no_leaders() {
        let mut h = History::new();
        h.merge(d("2024-01-10"), ["A", "B"]);
        assert_eq!(h.len(), 2);
        for window_days in [0, 2, 30] {
            let rows = recent(&h, d("2024-01-10"), window_days);
            assert!(leaders(&rows, 2, 3).is_empty());
        }
    }

    #[test]
    fn window_counts_prior_days() {
        let h = history(&[("2024-01-09", "A"), ("2024-01-10", "A"), ("2024-01-10", "B")]);
        let rows = recent(&h, d("2024-01-10"), 2);
        assert_eq!(rows.len(), 3);
        let got = leaders(&rows, 2, 3);
        assert_eq!(names(&got), vec![("A", 2)]);
        assert!(!got[0].highlighted);
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let h = history(&[
            ("2024-01-07", "A"),
            ("2024-01-08", "A"),
            ("2024-01-10", "A"),
            ("2024-01-11", "A"),
        ]);
        let rows = recent(&h, d("2024-01-10"), 2);
        let dates: Vec<NaiveDate> = rows.iter().map(|o| o.date).collect();
        assert_eq!(dates, vec![d("2024-01-08"), d("2024-01-10")]);
        assert_eq!(window_start(d("2024-01-10"), 0), d("2024-01-10"));
        assert_eq!(window_start(d("2024-03-01"), 1), d("2024-02-29"));
    }

    #[test]
    fn ties_keep_first_appearance_order() {
        let h = history(&[
            ("2024-01-08", "C"),
            ("2024-01-08", "B"),
            ("2024-01-09", "A"),
            ("2024-01-09", "B"),
            ("2024-01-10", "A"),
            ("2024-01-10", "C"),
            ("2024-01-10", "B"),
        ]);
        let rows = recent(&h, d("2024-01-10"), 2);
        let got = leaders(&rows, 2, 3);
        assert_eq!(names(&got), vec![("B", 3), ("C", 2), ("A", 2)]);
        assert!(got[0].highlighted);
        assert!(!got[1].highlighted);
    }

    #[test]
    fn every_leader_meets_threshold() {
        let h = history(&[
            ("2024-01-08", "A"),
            ("2024-01-08", "B"),
            ("2024-01-09", "A"),
            ("2024-01-09", "C"),
            ("2024-01-10", "A"),
            ("2024-01-10", "B"),
            ("2024-01-10", "D"),
        ]);
        let rows = recent(&h, d("2024-01-10"), 2);
        for min_count in 1..=4 {
            let got = leaders(&rows, min_count, min_count);
            assert!(got.iter().all(|l| l.count >= min_count));
            let expected = match min_count {
                1 => 4,
                2 => 2,
                3 => 1,
                _ => 0,
            };
            assert_eq!(got.len(), expected, "min_count {min_count}");
        }
    }

    #[test]
    fn wider_window_never_shrinks() {
        let h = history(&[
            ("2024-01-01", "A"),
            ("2024-01-05", "B"),
            ("2024-01-08", "A"),
            ("2024-01-09", "C"),
            ("2024-01-10", "A"),
        ]);
        let mut previous = 0;
        for window_days in 0..12 {
            let size = recent(&h, d("2024-01-10"), window_days).len();
            assert!(size >= previous, "window {window_days} shrank");
            previous = size;
        }
        assert_eq!(previous, 5);
    }

    #[test]
    fn analysis_is_deterministic() {
        let h = history(&[
            ("2024-01-09", "X"),
            ("2024-01-09", "Y"),
            ("2024-01-10", "Y"),
            ("2024-01-10", "X"),
        ]);
        let config = RecurrenceConfig::default();
        let first = analyze(&h, d("2024-01-10"), &config);
        for _ in 0..5 {
            assert_eq!(analyze(&h, d("2024-01-10"), &config), first);
        }
        assert_eq!(names(&first.leaders), vec![("X", 2), ("Y", 2)]);
        assert_eq!(first.window_start, d("2024-01-08"));
        assert_eq!(first.window_rows, 4);
    }

    #[test]
    fn empty_input_is_not_an_error() {
        assert!(leaders(&[], 2, 3).is_empty());
        let analysis = analyze(&History::new(), d("2024-01-10"), &RecurrenceConfig::default());
        assert!(analysis.leaders.is_empty());
        assert_eq!(analysis.window_rows, 0);
    }

    #[test]
    fn config_validation() {
        assert!(RecurrenceConfig::default().validate().is_ok());
        let zero = RecurrenceConfig {
            min_count: 0,
            ..RecurrenceConfig::default()
        };
        assert!(zero.validate().is_err());
        let inverted = RecurrenceConfig {
            min_count: 3,
            highlight_count: 2,
            ..RecurrenceConfig::default()
        };
        assert!(inverted.validate().is_err());
    }
}
