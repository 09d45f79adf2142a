use std::collections::HashSet;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub mod error;

pub use error::{ExtractError, InputError, NotifyError};

/// On-disk and wire form of every date.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parses a zero-padded `YYYY-MM-DD` date. Anything else is rejected so that
/// string order of stored dates always matches calendar order.
pub fn parse_date(s: &str) -> Result<NaiveDate, InputError> {
    let date = NaiveDate::parse_from_str(s, DATE_FORMAT)
        .map_err(|_| InputError::BadDate(s.to_string()))?;
    if format_date(date) != s {
        return Err(InputError::BadDate(s.to_string()));
    }
    Ok(date)
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// A validated stock-name token: trimmed, non-empty, no control characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StockName(String);

impl StockName {
    pub fn parse(raw: &str) -> Result<Self, InputError> {
        let name = raw.trim();
        if name.is_empty() {
            return Err(InputError::EmptyName);
        }
        if name.chars().any(char::is_control) {
            return Err(InputError::ControlCharacter(name.to_string()));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for StockName {
    type Error = InputError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<StockName> for String {
    fn from(value: StockName) -> Self {
        value.0
    }
}

impl std::str::FromStr for StockName {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// "`name` appeared in the scrape taken on `date`."
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Observation {
    pub date: NaiveDate,
    #[serde(rename = "stock", alias = "name")]
    pub name: StockName,
}

impl Observation {
    pub fn new(date: NaiveDate, name: StockName) -> Self {
        Self { date, name }
    }
}

/// Outcome of merging one day's batch into the history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub added: usize,
    /// Names already present for that date, including repeats inside the batch.
    pub duplicates: usize,
    pub rejected: Vec<(String, InputError)>,
}

/// Every observation accumulated so far, in insertion order. At most one
/// entry exists per `(date, name)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Observation>", into = "Vec<Observation>")]
pub struct History {
    observations: Vec<Observation>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a history from stored rows, keeping the first of any repeated
    /// `(date, name)` pair.
    pub fn from_observations(rows: impl IntoIterator<Item = Observation>) -> Self {
        let mut seen = HashSet::new();
        let observations = rows
            .into_iter()
            .filter(|o| seen.insert((o.date, o.name.clone())))
            .collect();
        Self { observations }
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Observation> {
        self.observations.iter()
    }

    /// Adds `(date, name)` for every valid name not already recorded on that
    /// date. Rows for other dates are never touched; merging the same batch
    /// again is a no-op.
    pub fn merge<I, S>(&mut self, date: NaiveDate, names: I) -> MergeReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut present: HashSet<StockName> = self
            .observations
            .iter()
            .filter(|o| o.date == date)
            .map(|o| o.name.clone())
            .collect();
        let mut report = MergeReport::default();
        for raw in names {
            let raw = raw.as_ref();
            let name = match StockName::parse(raw) {
                Ok(name) => name,
                Err(err) => {
                    report.rejected.push((raw.to_string(), err));
                    continue;
                }
            };
            if !present.insert(name.clone()) {
                report.duplicates += 1;
                continue;
            }
            self.observations.push(Observation::new(date, name));
            report.added += 1;
        }
        report
    }

    /// Observations with `start <= date <= end`, in insertion order.
    pub fn between(&self, start: NaiveDate, end: NaiveDate) -> Vec<Observation> {
        self.observations
            .iter()
            .filter(|o| o.date >= start && o.date <= end)
            .cloned()
            .collect()
    }

    /// Distinct dates with their row counts, oldest first.
    pub fn dates(&self) -> Vec<(NaiveDate, usize)> {
        let mut out: Vec<(NaiveDate, usize)> = Vec::new();
        for o in &self.observations {
            match out.iter_mut().find(|(d, _)| *d == o.date) {
                Some((_, count)) => *count += 1,
                None => out.push((o.date, 1)),
            }
        }
        out.sort_by_key(|(d, _)| *d);
        out
    }
}

impl From<Vec<Observation>> for History {
    fn from(rows: Vec<Observation>) -> Self {
        Self::from_observations(rows)
    }
}

impl From<History> for Vec<Observation> {
    fn from(history: History) -> Self {
        history.observations
    }
}

impl<'a> IntoIterator for &'a History {
    type Item = &'a Observation;
    type IntoIter = std::slice::Iter<'a, Observation>;

    fn into_iter(self) -> Self::IntoIter {
        self.observations.iter()
    }
}

/// A name that recurred often enough inside the trailing window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leader {
    pub name: StockName,
    pub count: usize,
    /// Presentation tier only; never affects inclusion.
    pub highlighted: bool,
}

/// Everything the reporter needs for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub window_start: NaiveDate,
    pub min_count: usize,
    pub today: Vec<StockName>,
    pub leaders: Vec<Leader>,
}

/// Produces today's raw names. Implementations are expected to trim,
/// length-cap and dedupe their output; the history re-validates anyway.
pub trait Extractor {
    fn kind(&self) -> &'static str;
    fn extract(&self) -> Result<Vec<String>, ExtractError>;
}

/// Delivers a rendered message to an operator channel.
pub trait Notifier {
    fn channel(&self) -> &'static str;
    fn send(&self, text: &str) -> Result<(), NotifyError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    fn names(history: &History) -> Vec<(String, String)> {
        history
            .iter()
            .map(|o| (format_date(o.date), o.name.to_string()))
            .collect()
    }

    #[test]
    fn parse_date_requires_canonical_form() {
        assert_eq!(d("2024-01-10"), NaiveDate::from_ymd_opt(2024, 1, 10).unwrap());
        assert!(matches!(parse_date("2024-1-10"), Err(InputError::BadDate(_))));
        assert!(parse_date("2024-01-32").is_err());
        assert!(parse_date("yesterday").is_err());
        assert!(parse_date("").is_err());
    }

    #[test]
    fn stock_name_validation() {
        assert_eq!(StockName::parse("  삼성전자 ").unwrap().as_str(), "삼성전자");
        assert_eq!(StockName::parse("   "), Err(InputError::EmptyName));
        assert!(matches!(
            StockName::parse("A\u{7}B"),
            Err(InputError::ControlCharacter(_))
        ));
    }

    #[test]
    fn merge_into_empty_history() {
        let mut history = History::new();
        let report = history.merge(d("2024-01-10"), ["A", "B"]);
        assert_eq!(report.added, 2);
        assert_eq!(history.len(), 2);
        assert_eq!(
            names(&history),
            vec![
                ("2024-01-10".to_string(), "A".to_string()),
                ("2024-01-10".to_string(), "B".to_string()),
            ]
        );
    }

    #[test]
    fn merge_twice_keeps_one_row() {
        let mut history = History::new();
        history.merge(d("2024-01-10"), ["A"]);
        let second = history.merge(d("2024-01-10"), ["A"]);
        assert_eq!(second.added, 0);
        assert_eq!(second.duplicates, 1);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn merge_is_idempotent() {
        let mut base = History::new();
        base.merge(d("2024-01-08"), ["A", "C"]);
        base.merge(d("2024-01-09"), ["A", "B"]);
        let batches: [(&str, &[&str]); 3] = [
            ("2024-01-09", &["A", "D"]),
            ("2024-01-10", &["A", "B", "A"]),
            ("2024-01-11", &[]),
        ];
        for (date, batch) in batches {
            let mut once = base.clone();
            once.merge(d(date), batch.iter());
            let mut twice = once.clone();
            twice.merge(d(date), batch.iter());
            assert_eq!(once, twice, "merging {date} twice changed history");
        }
    }

    #[test]
    fn merge_collapses_duplicates_within_batch() {
        let mut history = History::new();
        let report = history.merge(d("2024-01-10"), ["A", "A", " A "]);
        assert_eq!(report.added, 1);
        assert_eq!(report.duplicates, 2);
        assert_eq!(history.between(d("2024-01-10"), d("2024-01-10")).len(), 1);
    }

    #[test]
    fn merge_drops_malformed_names_only() {
        let mut history = History::new();
        let report = history.merge(d("2024-01-10"), ["A", "", "B\n"]);
        assert_eq!(report.added, 2);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].1, InputError::EmptyName);
        let names: Vec<&str> = history.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[test]
    fn merge_leaves_other_dates_untouched() {
        let mut history = History::new();
        history.merge(d("2024-01-09"), ["A", "B"]);
        let before = history.between(d("2024-01-09"), d("2024-01-09"));
        history.merge(d("2024-01-10"), ["A", "C"]);
        assert_eq!(history.between(d("2024-01-09"), d("2024-01-09")), before);
        assert_eq!(history.observations()[0].date, d("2024-01-09"));
        assert_eq!(history.observations()[1].date, d("2024-01-09"));
        assert_eq!(history.len(), 4);
    }

    #[test]
    fn from_observations_dedupes() {
        let a = Observation::new(d("2024-01-10"), "A".parse().unwrap());
        let b = Observation::new(d("2024-01-11"), "A".parse().unwrap());
        let history = History::from_observations(vec![a.clone(), b.clone(), a.clone()]);
        assert_eq!(history.observations(), &[a, b]);
    }

    #[test]
    fn dates_summary_sorted() {
        let mut history = History::new();
        history.merge(d("2024-01-10"), ["A", "B"]);
        history.merge(d("2024-01-08"), ["A"]);
        assert_eq!(history.dates(), vec![(d("2024-01-08"), 1), (d("2024-01-10"), 2)]);
    }

    #[test]
    fn serde_uses_stock_column_name() {
        let mut history = History::new();
        history.merge(d("2024-01-10"), ["A"]);
        let json = serde_json::to_string(&history).unwrap();
        assert_eq!(json, r#"[{"date":"2024-01-10","stock":"A"}]"#);
        let back: History = serde_json::from_str(
            r#"[{"date":"2024-01-10","stock":"A"},{"date":"2024-01-10","name":"A"}]"#,
        )
        .unwrap();
        assert_eq!(back, history);
        assert!(serde_json::from_str::<History>(r#"[{"date":"2024-01-10","stock":" "}]"#).is_err());
    }
}
