use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use core_model::{History, Observation, StockName, format_date, parse_date};
use rusqlite::{Connection, ErrorCode, Transaction, TransactionBehavior, params};
use tracing::{debug, warn};

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Durable home of the observation history: a single two-column table,
/// `observations(date, stock)`, whose rowid order is insertion order.
pub struct SqliteStore {
    conn: Connection,
    path: PathBuf,
}

impl SqliteStore {
    pub fn default_path() -> PathBuf {
        let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        base.join("rankwatch").join("history.db")
    }

    /// Opens (or creates) the store at `path`. A file that is not a readable
    /// SQLite database is moved aside and replaced by an empty store.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating parent dir for {}", path.display()))?;
        }
        match Self::open_checked(path) {
            Ok(store) => Ok(store),
            Err(err) if is_unreadable(&err) => {
                let moved_to = quarantine(path)?;
                warn!(
                    path = %path.display(),
                    moved_to = %moved_to.display(),
                    error = %err,
                    "history store unreadable; starting from empty history"
                );
                Self::open_checked(path)
                    .with_context(|| format!("recreating sqlite db {}", path.display()))
            }
            Err(err) => {
                Err(err).with_context(|| format!("opening sqlite db {}", path.display()))
            }
        }
    }

    fn open_checked(path: &Path) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        // Forces a read of the file header so garbage is detected here.
        conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |r| r.get::<_, i64>(0))?;
        quick_check(&conn)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// How long a run waits for another run's cycle before giving up.
    pub fn set_busy_timeout(&self, timeout: Duration) -> anyhow::Result<()> {
        self.conn.busy_timeout(timeout)?;
        Ok(())
    }

    pub fn init_schema(&self) -> anyhow::Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS observations (
              date TEXT NOT NULL,
              stock TEXT NOT NULL,
              UNIQUE(date, stock)
            );
            "#,
        )?;
        Ok(())
    }

    /// Reads the whole history. Never fails: an unreadable table yields an
    /// empty history, and malformed rows are dropped.
    pub fn load(&self) -> History {
        load_history(&self.conn)
    }

    /// Replaces the stored history with `history` in one transaction.
    pub fn persist(&mut self, history: &History) -> anyhow::Result<()> {
        let tx = self.conn.transaction()?;
        write_history(&tx, history)?;
        tx.commit()?;
        Ok(())
    }

    /// Starts an exclusive load-merge-persist cycle. A second run trying to
    /// start a cycle waits for the busy timeout and then fails. Dropping the
    /// cycle without [`MergeCycle::commit`] leaves the store untouched.
    pub fn begin_cycle(&mut self) -> anyhow::Result<MergeCycle<'_>> {
        let path = self.path.display().to_string();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Exclusive)
            .map_err(|err| match err.sqlite_error_code() {
                Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
                    anyhow::anyhow!("history store {path} is locked by another run")
                }
                _ => anyhow::Error::new(err).context(format!("locking history store {path}")),
            })?;
        Ok(MergeCycle { tx })
    }

    pub fn row_count(&self) -> anyhow::Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM observations", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    /// Rows with `start <= date <= end`; a missing bound is open. Canonical
    /// dates compare correctly as text, so SQLite evaluates the range.
    pub fn between(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> anyhow::Result<Vec<Observation>> {
        let mut stmt = self.conn.prepare(
            "SELECT date, stock FROM observations \
             WHERE (?1 IS NULL OR date >= ?1) AND (?2 IS NULL OR date <= ?2) ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![start.map(format_date), end.map(format_date)], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (date, stock) = row?;
            if let Some(obs) = parse_row(&date, &stock) {
                out.push(obs);
            }
        }
        Ok(out)
    }

    /// Distinct dates with their row counts, oldest first.
    pub fn dates(&self) -> anyhow::Result<Vec<(NaiveDate, usize)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT date, COUNT(*) FROM observations GROUP BY date ORDER BY date")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
        let mut out = Vec::new();
        for row in rows {
            let (date, count) = row?;
            match parse_date(&date) {
                Ok(date) => out.push((date, count as usize)),
                Err(err) => debug!(error = %err, "skipping malformed date"),
            }
        }
        Ok(out)
    }

    pub fn integrity_check(&self) -> anyhow::Result<String> {
        self.conn
            .query_row("PRAGMA integrity_check;", [], |r| r.get(0))
            .map_err(Into::into)
    }
}

/// An exclusive transaction spanning one load-merge-persist cycle.
pub struct MergeCycle<'a> {
    tx: Transaction<'a>,
}

impl MergeCycle<'_> {
    pub fn load(&self) -> History {
        load_history(&self.tx)
    }

    /// Writes `history` and releases the lock.
    pub fn commit(self, history: &History) -> anyhow::Result<()> {
        write_history(&self.tx, history)?;
        self.tx.commit()?;
        Ok(())
    }
}

fn load_history(conn: &Connection) -> History {
    match read_rows(conn) {
        Ok((rows, dropped)) => {
            if dropped > 0 {
                warn!(dropped, "dropped malformed history rows");
            }
            let total = rows.len();
            let history = History::from_observations(rows);
            if history.len() < total {
                warn!(
                    duplicates = total - history.len(),
                    "collapsed duplicate history rows"
                );
            }
            debug!(rows = history.len(), "history loaded");
            history
        }
        Err(err) => {
            warn!(error = %err, "history unreadable; treating as empty");
            History::new()
        }
    }
}

fn read_rows(conn: &Connection) -> rusqlite::Result<(Vec<Observation>, usize)> {
    let mut stmt = conn.prepare("SELECT date, stock FROM observations ORDER BY rowid")?;
    let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0), r.get::<_, String>(1))))?;
    let mut out = Vec::new();
    let mut dropped = 0;
    for row in rows {
        match row? {
            (Ok(date), Ok(stock)) => match parse_row(&date, &stock) {
                Some(obs) => out.push(obs),
                None => dropped += 1,
            },
            _ => dropped += 1,
        }
    }
    Ok((out, dropped))
}

fn parse_row(date: &str, stock: &str) -> Option<Observation> {
    let date = parse_date(date)
        .map_err(|err| debug!(error = %err, "malformed date in history"))
        .ok()?;
    let name = StockName::parse(stock)
        .map_err(|err| debug!(error = %err, "malformed name in history"))
        .ok()?;
    Some(Observation::new(date, name))
}

fn write_history(conn: &Connection, history: &History) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM observations", [])?;
    let mut stmt =
        conn.prepare_cached("INSERT OR IGNORE INTO observations (date, stock) VALUES (?1, ?2)")?;
    for obs in history {
        stmt.execute(params![format_date(obs.date), obs.name.as_str()])?;
    }
    Ok(())
}

/// Walks every page so damage past the header is caught before a cycle
/// tries to rewrite it.
fn quick_check(conn: &Connection) -> rusqlite::Result<()> {
    let verdict: String = conn.query_row("PRAGMA quick_check", [], |r| r.get(0))?;
    if verdict == "ok" {
        return Ok(());
    }
    Err(rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CORRUPT),
        Some(verdict),
    ))
}

fn is_unreadable(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt)
    )
}

fn quarantine(path: &Path) -> anyhow::Result<PathBuf> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "history.db".to_string());
    let target = path.with_file_name(format!("{file_name}.corrupt-{}", Utc::now().timestamp()));
    std::fs::rename(path, &target)
        .with_context(|| format!("moving unreadable store {} aside", path.display()))?;
    for suffix in ["-wal", "-shm"] {
        let side = path.with_file_name(format!("{file_name}{suffix}"));
        if side.exists() {
            let _ = std::fs::remove_file(side);
        }
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    fn memory_store() -> SqliteStore {
        let store = SqliteStore::open(":memory:").unwrap();
        store.init_schema().unwrap();
        store
    }

    fn sample() -> History {
        let mut history = History::new();
        history.merge(d("2024-01-09"), ["A", "C"]);
        history.merge(d("2024-01-10"), ["A", "B"]);
        history
    }

    #[test]
    fn schema_and_integrity() {
        let mut store = memory_store();
        assert_eq!(store.integrity_check().unwrap(), "ok");
        store.persist(&History::new()).expect("empty history is fine");
        assert_eq!(store.row_count().unwrap(), 0);
    }

    #[test]
    fn init_schema_idempotent() {
        let store = memory_store();
        store.init_schema().unwrap();
        assert!(store.load().is_empty());
    }

    #[test]
    fn load_without_table_is_empty() {
        let store = SqliteStore::open(":memory:").unwrap();
        assert!(store.load().is_empty());
    }

    #[test]
    fn persist_and_load_keep_insertion_order() {
        let mut store = memory_store();
        let history = sample();
        store.persist(&history).unwrap();
        assert_eq!(store.load(), history);
        assert_eq!(store.row_count().unwrap(), 4);
    }

    #[test]
    fn persist_replaces_prior_content() {
        let mut store = memory_store();
        store.persist(&sample()).unwrap();
        let mut smaller = History::new();
        smaller.merge(d("2024-01-11"), ["Z"]);
        store.persist(&smaller).unwrap();
        assert_eq!(store.load(), smaller);
    }

    #[test]
    fn cycle_commit_is_idempotent_per_day() {
        let mut store = memory_store();
        for _ in 0..2 {
            let cycle = store.begin_cycle().unwrap();
            let mut history = cycle.load();
            history.merge(d("2024-01-10"), ["A"]);
            cycle.commit(&history).unwrap();
        }
        assert_eq!(store.row_count().unwrap(), 1);
    }

    #[test]
    fn dropped_cycle_rolls_back() {
        let mut store = memory_store();
        store.persist(&sample()).unwrap();
        {
            let cycle = store.begin_cycle().unwrap();
            let mut history = cycle.load();
            history.merge(d("2024-01-11"), ["Q"]);
            // dropped without commit
        }
        assert_eq!(store.load(), sample());
    }

    #[test]
    fn malformed_rows_are_dropped_on_load() {
        let store = memory_store();
        store
            .conn
            .execute_batch(
                r#"
                INSERT INTO observations (date, stock) VALUES ('2024-01-10', 'A');
                INSERT INTO observations (date, stock) VALUES ('2024-1-10', 'B');
                INSERT INTO observations (date, stock) VALUES ('2024-01-10', '   ');
                INSERT INTO observations (date, stock) VALUES ('2024-01-10', x'4142');
                "#,
            )
            .unwrap();
        let history = store.load();
        assert_eq!(history.len(), 1);
        assert_eq!(history.observations()[0].name.as_str(), "A");
    }

    #[test]
    fn between_is_inclusive() {
        let mut store = memory_store();
        let mut history = sample();
        history.merge(d("2024-01-11"), ["D"]);
        store.persist(&history).unwrap();
        let rows = store.between(Some(d("2024-01-10")), Some(d("2024-01-11"))).unwrap();
        let names: Vec<&str> = rows.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "D"]);
    }

    #[test]
    fn between_open_bounds() {
        let mut store = memory_store();
        store.persist(&sample()).unwrap();
        assert_eq!(store.between(None, None).unwrap().len(), 4);
        assert_eq!(store.between(None, Some(d("2024-01-09"))).unwrap().len(), 2);
        let later = store.between(Some(d("2024-01-10")), None).unwrap();
        assert!(later.iter().all(|o| o.date == d("2024-01-10")));
        assert_eq!(later.len(), 2);
    }

    #[test]
    fn dates_summary() {
        let mut store = memory_store();
        store.persist(&sample()).unwrap();
        assert_eq!(
            store.dates().unwrap(),
            vec![(d("2024-01-09"), 2), (d("2024-01-10"), 2)]
        );
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("history.db");
        let store = SqliteStore::open(&path).unwrap();
        store.init_schema().unwrap();
        assert!(store.load().is_empty());
        assert!(path.exists());
    }

    #[test]
    fn corrupt_file_is_quarantined_and_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");
        std::fs::write(&path, b"date,stock\n2024-01-10,A\nthis is not sqlite at all").unwrap();

        let mut store = SqliteStore::open(&path).unwrap();
        store.init_schema().unwrap();
        assert!(store.load().is_empty());
        store.persist(&sample()).unwrap();
        drop(store);

        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.load(), sample());
        let quarantined = std::fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().contains(".corrupt-"))
            .count();
        assert_eq!(quarantined, 1);
    }

    #[test]
    fn damage_past_first_page_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");
        {
            let mut store = SqliteStore::open(&path).unwrap();
            store.init_schema().unwrap();
            let mut history = History::new();
            for day in 1..=28 {
                let names: Vec<String> = (0..80).map(|i| format!("종목{day:02}-{i:03}")).collect();
                history.merge(d(&format!("2024-02-{day:02}")), &names);
            }
            store.persist(&history).unwrap();
            store
                .conn
                .execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
                .unwrap();
        }
        let mut bytes = std::fs::read(&path).unwrap();
        assert!(bytes.len() > 4096 * 4, "fixture must span several pages");
        for b in &mut bytes[4096..] {
            *b = 0xAB;
        }
        std::fs::write(&path, &bytes).unwrap();

        let mut store = SqliteStore::open(&path).unwrap();
        store.init_schema().unwrap();
        let cycle = store.begin_cycle().unwrap();
        let mut history = cycle.load();
        assert!(history.is_empty());
        history.merge(d("2024-03-01"), ["A"]);
        cycle.commit(&history).unwrap();
        drop(store);

        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.load(), history);
        assert_eq!(reopened.integrity_check().unwrap(), "ok");
        let quarantined = std::fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().contains(".corrupt-"))
            .count();
        assert_eq!(quarantined, 1);
    }

    #[test]
    fn concurrent_cycle_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");
        let mut first = SqliteStore::open(&path).unwrap();
        first.init_schema().unwrap();
        let mut second = SqliteStore::open(&path).unwrap();
        second.set_busy_timeout(Duration::from_millis(50)).unwrap();

        let cycle = first.begin_cycle().unwrap();
        let err = second.begin_cycle().err().expect("second cycle must fail");
        assert!(err.to_string().contains("locked"), "{err:#}");
        cycle.commit(&sample()).unwrap();

        let cycle = second.begin_cycle().unwrap();
        assert_eq!(cycle.load(), sample());
    }
}
