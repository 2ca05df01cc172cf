// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! djen-backup - back up DJEN documents to the Internet Archive.
//!
//! Exit codes: 0 success, 1 failure ratio above the configured maximum,
//! 2 fatal setup error (configuration, credentials, state files).

use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use djen_backup::backfill::engine::default_start;
use djen_backup::credentials::{self, Credentials};
use djen_backup::runner::{date_range, default_range, reset_entity, RunReport};
use djen_backup::{entities, BackupConfig, BackupError, InternetArchive, ProxyClient, Runner};

/// Back up daily DJEN documents to the Internet Archive
#[derive(Parser, Debug)]
#[command(name = "djen-backup")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Only process this entity code
    #[arg(long, alias = "entity", global = true)]
    tribunal: Option<String>,

    /// Wall-clock budget in minutes
    #[arg(long, global = true)]
    deadline_minutes: Option<u64>,

    /// Cap on queued jobs (0 = unlimited)
    #[arg(long, global = true)]
    max_items: Option<usize>,

    /// Concurrent workers
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// State cache file
    #[arg(long, global = true)]
    state_file: Option<PathBuf>,

    /// Upstream proxy base URL
    #[arg(long, env = "DJEN_PROXY_URL", global = true)]
    proxy_url: Option<String>,

    /// Discover and report without downloading or uploading
    #[arg(long, global = true)]
    dry_run: bool,

    /// Ignore the state cache and list every date
    #[arg(long, global = true)]
    force_recheck: bool,

    /// Print the run report as JSON on stdout
    #[arg(long, global = true)]
    report_json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fill gaps over a date range (default: the 7 days ending yesterday)
    Run {
        #[arg(long)]
        start_date: Option<NaiveDate>,
        #[arg(long)]
        end_date: Option<NaiveDate>,
    },

    /// Scan each entity backward from its cursor
    Backfill {
        /// Newest date considered (default: yesterday)
        #[arg(long)]
        start_date: Option<NaiveDate>,
        /// Backfill cursor file
        #[arg(long)]
        backfill_state_file: Option<PathBuf>,
        /// Oldest date ever scanned
        #[arg(long)]
        lower_bound: Option<NaiveDate>,
        /// Dates per entity per run (0 = unlimited)
        #[arg(long)]
        max_dates: Option<usize>,
    },

    /// Clear the stop flag and streak of one entity's backfill cursor
    Reset {
        entity: String,
        /// Backfill cursor file
        #[arg(long)]
        backfill_state_file: Option<PathBuf>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn load_config(global: &GlobalArgs) -> Result<BackupConfig, BackupError> {
    let mut config = match &global.config {
        Some(path) => BackupConfig::from_toml_file(path)?,
        None => BackupConfig::default(),
    };
    if let Some(minutes) = global.deadline_minutes {
        config.deadline_minutes = minutes;
    }
    if let Some(max_items) = global.max_items {
        config.max_items = max_items;
    }
    if let Some(workers) = global.workers {
        config.workers = workers;
    }
    if let Some(path) = &global.state_file {
        config.state_file = Some(path.clone());
    }
    if let Some(url) = &global.proxy_url {
        config.proxy_url = url.clone();
    }
    config.dry_run |= global.dry_run;
    config.force_recheck |= global.force_recheck;
    config.validate()?;
    Ok(config)
}

fn archive_credentials(config: &BackupConfig) -> Result<Credentials, BackupError> {
    match credentials::resolve() {
        Ok(creds) => Ok(creds),
        Err(e) if config.dry_run => {
            info!(reason = %e, "No archive credentials, fine for a dry run");
            Ok(Credentials::dry_run())
        }
        Err(e) => Err(e),
    }
}

enum Mode {
    Gaps { start: NaiveDate, end: NaiveDate },
    Backfill { start: NaiveDate },
}

async fn execute(cli: Cli) -> Result<RunReport, BackupError> {
    let mut config = load_config(&cli.global)?;
    let today = Utc::now().date_naive();
    let command = cli.command.unwrap_or(Command::Run {
        start_date: None,
        end_date: None,
    });

    let mode = match command {
        Command::Reset {
            entity,
            backfill_state_file,
        } => {
            let path = backfill_state_file
                .or_else(|| config.backfill_state_file.clone())
                .ok_or_else(|| BackupError::Config("reset needs --backfill-state-file".into()))?;
            reset_entity(&path, &entity)?;
            return Ok(RunReport {
                mode: "reset",
                planned: 0,
                summary: Default::default(),
                backfill: None,
                exit_code: 0,
            });
        }
        Command::Run { start_date, end_date } => {
            let (range_start, range_end) = default_range(today);
            let end = end_date.unwrap_or(range_end);
            let start = start_date.unwrap_or(range_start);
            if start > end {
                return Err(BackupError::Config(format!("start date {start} is after end date {end}")));
            }
            Mode::Gaps { start, end }
        }
        Command::Backfill {
            start_date,
            backfill_state_file,
            lower_bound,
            max_dates,
        } => {
            if backfill_state_file.is_some() {
                config.backfill_state_file = backfill_state_file;
            }
            if let Some(bound) = lower_bound {
                config.lower_bound = bound;
            }
            if let Some(max) = max_dates {
                config.max_dates_per_entity = max;
            }
            Mode::Backfill {
                start: start_date.unwrap_or_else(|| default_start(today)),
            }
        }
    };

    let creds = archive_credentials(&config)?;
    let upstream = Arc::new(ProxyClient::new(config.proxy_config())?);
    let archive = Arc::new(InternetArchive::new(config.archive_config(creds.authorization()))?);
    let entity_list = entities::select(entities::resolve(upstream.as_ref()).await, cli.global.tribunal.as_deref());
    info!(
        entities = entity_list.len(),
        workers = config.workers,
        deadline_minutes = config.deadline_minutes,
        dry_run = config.dry_run,
        "djen-backup starting"
    );

    let runner = Runner::new(config, upstream, archive);
    match mode {
        Mode::Gaps { start, end } => runner.run_gaps(&date_range(start, end), &entity_list).await,
        Mode::Backfill { start } => runner.run_backfill(start, entity_list).await,
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();
    let report_json = cli.global.report_json;

    match execute(cli).await {
        Ok(report) => {
            if report_json {
                match serde_json::to_string_pretty(&report) {
                    Ok(json) => println!("{json}"),
                    Err(e) => error!(error = %e, "Could not encode run report"),
                }
            }
            ExitCode::from(report.exit_code)
        }
        Err(e) => {
            error!(error = %e, "Fatal error");
            ExitCode::from(2)
        }
    }
}
