//! The two-column `date,stock` table the history was originally kept in.

use std::io::{self, Write};
use std::mem::take;

use core_model::{History, Observation, StockName, format_date, parse_date};
use tracing::warn;

pub const HEADER: [&str; 2] = ["date", "stock"];

/// Quote-aware CSV split; tolerates CRLF and a missing trailing newline.
fn parse_rows(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut field = String::new();
    let mut row = Vec::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes => {
                if matches!(chars.peek(), Some('"')) {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            ',' if !in_quotes => row.push(take(&mut field)),
            '\n' | '\r' if !in_quotes => {
                if ch == '\r' && matches!(chars.peek(), Some('\n')) {
                    chars.next();
                }
                row.push(take(&mut field));
                if !(row.len() == 1 && row[0].is_empty()) {
                    rows.push(take(&mut row));
                } else {
                    row.clear();
                }
            }
            _ => field.push(ch),
        }
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows
}

/// Reads `date,stock` rows. The header is optional; a `name` column is
/// accepted in place of `stock`, and an unnamed leading index column (as
/// written by dataframe exports) is skipped. Malformed rows are dropped.
pub fn read_observations(text: &str) -> Vec<Observation> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut rows = parse_rows(text).into_iter();
    let mut date_col = 0;
    let mut name_col = 1;
    let mut pending = None;
    if let Some(first) = rows.next() {
        let lowered: Vec<String> = first.iter().map(|c| c.trim().to_ascii_lowercase()).collect();
        match (
            lowered.iter().position(|c| c == "date"),
            lowered.iter().position(|c| c == "stock" || c == "name"),
        ) {
            (Some(d), Some(n)) => {
                date_col = d;
                name_col = n;
            }
            _ => pending = Some(first),
        }
    }

    let mut out = Vec::new();
    let mut dropped = 0usize;
    for row in pending.into_iter().chain(rows) {
        let parsed = match (row.get(date_col), row.get(name_col)) {
            (Some(date), Some(name)) => parse_date(date.trim())
                .and_then(|date| StockName::parse(name).map(|name| Observation::new(date, name))),
            _ => {
                dropped += 1;
                continue;
            }
        };
        match parsed {
            Ok(obs) => out.push(obs),
            Err(err) => {
                warn!(error = %err, "skipping csv row");
                dropped += 1;
            }
        }
    }
    if dropped > 0 {
        warn!(dropped, "csv rows dropped");
    }
    out
}

fn write_field<W: Write>(w: &mut W, field: &str) -> io::Result<()> {
    if field.contains([',', '"', '\n', '\r']) {
        write!(w, "\"{}\"", field.replace('"', "\"\""))
    } else {
        w.write_all(field.as_bytes())
    }
}

pub fn write_history<W: Write>(mut w: W, history: &History) -> io::Result<()> {
    writeln!(w, "{}", HEADER.join(","))?;
    for obs in history {
        write_field(&mut w, &format_date(obs.date))?;
        w.write_all(b",")?;
        write_field(&mut w, obs.name.as_str())?;
        writeln!(w)?;
    }
    w.flush()
}
