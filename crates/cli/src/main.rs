use std::{cell::RefCell, path::PathBuf, time::Instant};

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use core_model::{Extractor, Notifier, parse_date};
use ingest::{RunOptions, RunOutcome, RunPhase};
use listfile::ListFileExtractor;
use markup::MarkupExtractor;
use notify::{ConsoleNotifier, TelegramNotifier};
use store_sqlite::SqliteStore;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod ui;

use config::Config;

#[derive(Parser)]
#[command(name = "rankwatch")]
#[command(about = "Daily ranking scrape with recurrence alerts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Config file; defaults to <config dir>/rankwatch/config.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// History database; overrides config and RANKWATCH_STORAGE_PATH.
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    Init,
    Run(RunArgs),
    Leaders {
        #[arg(long, value_parser = date_arg)]
        as_of: Option<NaiveDate>,
        #[arg(long)]
        window_days: Option<u32>,
        #[arg(long)]
        min_count: Option<usize>,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    History {
        #[command(subcommand)]
        command: HistoryCommand,
    },
    Export {
        #[arg(long, value_enum, default_value_t = ExportOpt::Csv)]
        format: ExportOpt,
        #[arg(long)]
        out: PathBuf,
    },
    Import {
        path: PathBuf,
    },
    Doctor,
}

#[derive(Args)]
struct RunArgs {
    /// Date to file today's names under; defaults to the local date.
    #[arg(long, value_parser = date_arg)]
    date: Option<NaiveDate>,
    /// Read names from a file (one per line) instead of the ranking page.
    #[arg(long)]
    names_file: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    dry_run: bool,
    #[arg(long, default_value_t = false)]
    no_notify: bool,
}

#[derive(Subcommand)]
enum HistoryCommand {
    List {
        #[arg(long, value_parser = date_arg)]
        since: Option<NaiveDate>,
        #[arg(long, value_parser = date_arg)]
        until: Option<NaiveDate>,
    },
    Dates,
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportOpt {
    Csv,
    Json,
}

impl From<ExportOpt> for archive::ExportFormat {
    fn from(opt: ExportOpt) -> Self {
        match opt {
            ExportOpt::Csv => archive::ExportFormat::Csv,
            ExportOpt::Json => archive::ExportFormat::Json,
        }
    }
}

fn date_arg(s: &str) -> Result<NaiveDate, String> {
    parse_date(s).map_err(|e| e.to_string())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);
    let config = Config::load(cli.config.as_deref())?;
    let t = Instant::now();

    info!("opening database");
    let mut store = open_store(&cli, &config)?;

    match cli.command {
        Commands::Init => {
            info!(elapsed = ?t.elapsed(), "initialized");
            println!("{}", store.path().display());
        }
        Commands::Run(args) => {
            run(args, &config, &mut store)?;
            info!(elapsed = ?t.elapsed(), "run finished");
        }
        Commands::Leaders {
            as_of,
            window_days,
            min_count,
            json,
        } => {
            let mut window = config.recurrence();
            if let Some(days) = window_days {
                window.window_days = days;
            }
            if let Some(min) = min_count {
                window.min_count = min;
                window.highlight_count = window.highlight_count.max(min);
            }
            window.validate()?;
            let as_of = as_of.unwrap_or_else(today);
            let history = store.load();
            let analysis = recurrence::analyze(&history, as_of, &window);
            info!(
                leaders = analysis.leaders.len(),
                window_rows = analysis.window_rows,
                elapsed = ?t.elapsed(),
                "leaders computed"
            );
            if json {
                let output = serde_json::json!({
                    "as_of": analysis.as_of,
                    "window_start": analysis.window_start,
                    "window_rows": analysis.window_rows,
                    "leaders": analysis.leaders,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                ui::print_leaders(&analysis);
            }
        }
        Commands::History { command } => match command {
            HistoryCommand::List { since, until } => {
                let rows = store.between(since, until)?;
                info!(rows = rows.len(), "history listed");
                ui::print_observations(&rows);
            }
            HistoryCommand::Dates => {
                let dates = store.dates()?;
                info!(dates = dates.len(), "history dates listed");
                ui::print_dates(&dates);
            }
        },
        Commands::Export { format, out } => {
            let history = store.load();
            let rows = archive::export_history(&history, format.into(), &out)?;
            info!(rows, elapsed = ?t.elapsed(), "export done");
            println!("{}", out.display());
        }
        Commands::Import { path } => {
            info!(path = %path.display(), "importing history");
            let rows = archive::read_import(&path)?;
            let summary = archive::import_into(&mut store, rows)?;
            info!(elapsed = ?t.elapsed(), "import done");
            println!(
                "read={} added={} duplicates={}",
                summary.read, summary.added, summary.duplicates
            );
        }
        Commands::Doctor => {
            info!("running integrity check");
            let check = store.integrity_check()?;
            let rows = store.row_count()?;
            let dates = store.dates()?;
            info!(elapsed = ?t.elapsed(), "integrity check done");
            println!("path={}", store.path().display());
            println!("integrity_check={check}");
            println!("rows={rows}");
            println!("dates={}", dates.len());
            if let Some((first, _)) = dates.first() {
                println!("first_date={}", core_model::format_date(*first));
            }
            if let Some((last, _)) = dates.last() {
                println!("last_date={}", core_model::format_date(*last));
            }
            println!("telegram_configured={}", config.telegram.credentials().is_some());
        }
    }

    Ok(())
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

fn open_store(cli: &Cli, config: &Config) -> anyhow::Result<SqliteStore> {
    let path = cli
        .db
        .clone()
        .or_else(|| config.storage_path.clone())
        .unwrap_or_else(SqliteStore::default_path);
    let store = SqliteStore::open(&path)?;
    store.set_busy_timeout(config.busy_timeout())?;
    store.init_schema()?;
    Ok(store)
}

fn build_extractor(args: &RunArgs, config: &Config) -> anyhow::Result<Box<dyn Extractor>> {
    let extractor: Box<dyn Extractor> = match &args.names_file {
        Some(path) => Box::new(ListFileExtractor::from_file(
            path.clone(),
            config.source.max_name_len,
        )),
        None => Box::new(
            MarkupExtractor::new(config.source.markup_source())
                .with_context(|| "building ranking page client")?,
        ),
    };
    Ok(extractor)
}

/// Builds the extractor; a setup failure is reported like any other
/// extraction failure before the run aborts.
fn extractor_or_notify(
    args: &RunArgs,
    config: &Config,
    date: NaiveDate,
    notifier: &dyn Notifier,
) -> anyhow::Result<Box<dyn Extractor>> {
    build_extractor(args, config).inspect_err(|err| {
        let text = notify::render_failure(date, "extract", &format!("{err:#}"));
        if let Err(send_err) = notifier.send(&text) {
            warn!(channel = notifier.channel(), error = %send_err, "notification failed");
        }
    })
}

fn build_notifier(args: &RunArgs, config: &Config) -> anyhow::Result<Box<dyn Notifier>> {
    if args.dry_run || args.no_notify {
        return Ok(Box::new(ConsoleNotifier));
    }
    let Some((token, chat_id)) = config.telegram.credentials() else {
        warn!("telegram token or chat id missing; printing report to stdout");
        return Ok(Box::new(ConsoleNotifier));
    };
    let mut notifier = TelegramNotifier::new(token.to_string(), chat_id.to_string())
        .with_context(|| "building telegram client")?;
    if let Some(base) = &config.telegram.api_base {
        notifier = notifier.with_api_base(base);
    }
    Ok(Box::new(notifier))
}

fn run(args: RunArgs, config: &Config, store: &mut SqliteStore) -> anyhow::Result<()> {
    let window = config.recurrence();
    window.validate()?;
    let notifier = build_notifier(&args, config)?;
    let date = args.date.unwrap_or_else(today);
    let extractor = extractor_or_notify(&args, config, date, notifier.as_ref())?;
    info!(
        date = %core_model::format_date(date),
        extractor = extractor.kind(),
        channel = notifier.channel(),
        dry_run = args.dry_run,
        "run start"
    );

    let started = Instant::now();
    let last = RefCell::new(started);
    let outcome = ingest::run_daily(
        extractor.as_ref(),
        store,
        &window,
        notifier.as_ref(),
        RunOptions {
            date,
            dry_run: args.dry_run,
        },
        |phase| {
            let now = Instant::now();
            let delta = now.duration_since(*last.borrow());
            *last.borrow_mut() = now;
            let elapsed = started.elapsed();
            match phase {
                RunPhase::Extracting { kind } => {
                    info!(kind, ?elapsed, ?delta, "extracting names")
                }
                RunPhase::Merging { name_count } => {
                    info!(name_count, ?elapsed, ?delta, "merging into history")
                }
                RunPhase::Persisting { rows, added } => {
                    info!(rows, added, ?elapsed, ?delta, "persisting history")
                }
                RunPhase::Analyzing { window_rows } => {
                    info!(window_rows, ?elapsed, ?delta, "analyzing window")
                }
                RunPhase::Notifying { channel, leaders } => {
                    info!(channel, leaders, ?elapsed, ?delta, "sending report")
                }
                RunPhase::Done => info!(?elapsed, ?delta, "run done"),
            }
        },
    )?;

    match outcome {
        RunOutcome::Reported {
            report,
            merge,
            persisted,
            notified,
        } => {
            info!(
                today = report.today.len(),
                added = merge.added,
                duplicates = merge.duplicates,
                rejected = merge.rejected.len(),
                leaders = report.leaders.len(),
                persisted,
                notified,
                "run summary"
            );
            if !notified {
                anyhow::bail!(
                    "report for {} was stored but not delivered via {}",
                    core_model::format_date(date),
                    notifier.channel()
                );
            }
            Ok(())
        }
        RunOutcome::ExtractionFailed { error, notified } => {
            info!(notified, "run summary: extraction failed");
            Err(anyhow::Error::new(error).context("extraction failed; history left unchanged"))
        }
    }
}
