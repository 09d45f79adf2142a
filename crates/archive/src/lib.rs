use std::fs;
use std::io::BufWriter;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use core_model::{History, Observation};
use serde::{Deserialize, Serialize};
use store_sqlite::SqliteStore;
use tracing::info;

pub mod csv;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    /// Guesses the format from a file extension; anything but `.json` is CSV.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ExportFormat::Json,
            _ => ExportFormat::Csv,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub exported_at: DateTime<Utc>,
    pub rows: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    /// blake3 of the compact JSON encoding of `observations`.
    pub checksum: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub manifest: SnapshotManifest,
    pub observations: History,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub read: usize,
    pub added: usize,
    pub duplicates: usize,
}

fn checksum(history: &History) -> anyhow::Result<String> {
    let payload = serde_json::to_vec(history)?;
    Ok(blake3::hash(&payload).to_hex().to_string())
}

pub fn snapshot(history: &History) -> anyhow::Result<Snapshot> {
    let dates = history.dates();
    Ok(Snapshot {
        manifest: SnapshotManifest {
            exported_at: Utc::now(),
            rows: history.len(),
            first_date: dates.first().map(|(d, _)| *d),
            last_date: dates.last().map(|(d, _)| *d),
            checksum: checksum(history)?,
        },
        observations: history.clone(),
    })
}

/// Writes the whole history to `path`. JSON snapshots are read back and
/// verified against their checksum before returning.
pub fn export_history(history: &History, format: ExportFormat, path: &Path) -> anyhow::Result<usize> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating export dir {}", parent.display()))?;
    }
    match format {
        ExportFormat::Csv => {
            let file = fs::File::create(path)
                .with_context(|| format!("creating {}", path.display()))?;
            csv::write_history(BufWriter::new(file), history)
                .with_context(|| format!("writing {}", path.display()))?;
        }
        ExportFormat::Json => {
            let snap = snapshot(history)?;
            fs::write(path, serde_json::to_vec_pretty(&snap)?)
                .with_context(|| format!("writing {}", path.display()))?;
            read_snapshot(path).with_context(|| "verify snapshot write")?;
        }
    }
    info!(path = %path.display(), rows = history.len(), ?format, "history exported");
    Ok(history.len())
}

pub fn read_snapshot(path: &Path) -> anyhow::Result<Snapshot> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let snap: Snapshot = serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing snapshot {}", path.display()))?;
    let actual = checksum(&snap.observations)?;
    if actual != snap.manifest.checksum {
        anyhow::bail!(
            "snapshot {} failed verification (checksum {} != manifest {})",
            path.display(),
            actual,
            snap.manifest.checksum
        );
    }
    Ok(snap)
}

/// Reads observations from a JSON snapshot or a `date,stock` CSV file.
pub fn read_import(path: &Path) -> anyhow::Result<Vec<Observation>> {
    match ExportFormat::from_path(path) {
        ExportFormat::Json => Ok(read_snapshot(path)?.observations.into()),
        ExportFormat::Csv => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            Ok(csv::read_observations(&text))
        }
    }
}

/// Merges imported rows into the store in one locked cycle. Existing rows are
/// kept; only missing `(date, name)` pairs are appended.
pub fn import_into(store: &mut SqliteStore, rows: Vec<Observation>) -> anyhow::Result<ImportSummary> {
    let cycle = store.begin_cycle()?;
    let mut history = cycle.load();
    let mut summary = ImportSummary {
        read: rows.len(),
        added: 0,
        duplicates: 0,
    };
    for obs in rows {
        let report = history.merge(obs.date, [obs.name.as_str()]);
        summary.added += report.added;
        summary.duplicates += report.duplicates;
    }
    cycle.commit(&history)?;
    info!(
        read = summary.read,
        added = summary.added,
        duplicates = summary.duplicates,
        "history imported"
    );
    Ok(summary)
}
