//! CLI for the harvest catalog downloader.

mod commands;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::{Parser, Subcommand};
use harvest_core::catalog::CatalogDb;
use harvest_core::config;
use std::path::PathBuf;

use commands::{run_add, run_expand, run_poll, run_status, RunOptions};

/// Top-level CLI for the harvest catalog downloader.
#[derive(Debug, Parser)]
#[command(name = "harvest")]
#[command(about = "harvest: poll a catalog and download, expand and flag its entries", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Poll the catalog over a time window and download pending entries.
    Run {
        /// Window start (YYYY-MM-DD or RFC 3339). Defaults to the start of today (UTC).
        #[arg(long, value_parser = parse_instant)]
        begin: Option<DateTime<Utc>>,
        /// Window end (YYYY-MM-DD or RFC 3339). Defaults to the end of the begin day.
        #[arg(long, value_parser = parse_instant)]
        end: Option<DateTime<Utc>>,
        /// Theme id to select catalog entries.
        #[arg(long, default_value = "0")]
        theme: i64,
        /// Run up to N downloads concurrently (overrides max_parallel from config).
        #[arg(long, value_name = "N")]
        parallel: Option<usize>,
        /// Seconds between catalog polls (overrides poll_interval_secs from config).
        #[arg(long, value_name = "SECS")]
        poll_interval: Option<u64>,
        /// Directory to download into (overrides download_dir from config).
        #[arg(long)]
        download_dir: Option<PathBuf>,
        /// Do not print the live status line.
        #[arg(long)]
        quiet: bool,
    },

    /// Add an entry to the catalog.
    Add {
        /// Direct HTTP/HTTPS URL to download.
        url: String,
        /// Publication date (YYYY-MM-DD). Defaults to today (UTC).
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,
        /// Theme id of the entry.
        #[arg(long, default_value = "0")]
        theme: i64,
        /// Destination file name or relative path under the download directory.
        #[arg(long)]
        dest: Option<String>,
    },

    /// Show all catalog entries and their download state.
    Status {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Expand a local archive, recursing into nested archives.
    Expand {
        /// Archive to expand.
        archive: PathBuf,
        /// Destination directory. Defaults to the archive's directory.
        #[arg(long)]
        dest: Option<PathBuf>,
        /// Nesting depth budget (overrides archive.max_depth from config).
        #[arg(long)]
        max_depth: Option<u32>,
    },
}

/// Accepts a bare date (midnight UTC) or a full RFC 3339 timestamp.
fn parse_instant(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    parse_date(s).map(|d| d.and_time(NaiveTime::MIN).and_utc())
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("invalid date {:?}: {}", s, e))
}

/// Fill in defaults for the run window: today, or the whole begin day.
fn resolve_window(
    begin: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let begin = begin.unwrap_or_else(|| now.date_naive().and_time(NaiveTime::MIN).and_utc());
    let end = match end {
        Some(end) => end,
        None => begin
            .date_naive()
            .succ_opt()
            .context("begin date out of range")?
            .and_time(NaiveTime::MIN)
            .and_utc()
            - chrono::Duration::seconds(1),
    };
    if end < begin {
        bail!("window end {} is before begin {}", end, begin);
    }
    Ok((begin, end))
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let mut cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Run {
                begin,
                end,
                theme,
                parallel,
                poll_interval,
                download_dir,
                quiet,
            } => {
                if let Some(n) = parallel {
                    cfg.max_parallel = n.max(1);
                }
                if let Some(secs) = poll_interval {
                    cfg.poll_interval_secs = secs;
                }
                if let Some(dir) = download_dir {
                    cfg.download_dir = dir;
                }
                let (begin, end) = resolve_window(begin, end, Utc::now())?;
                let db = CatalogDb::open_default().await?;
                let opts = RunOptions {
                    begin,
                    end,
                    theme_id: theme,
                    status_line: !quiet,
                };
                run_poll(db, &cfg, opts).await?;
            }
            CliCommand::Add {
                url,
                date,
                theme,
                dest,
            } => {
                let db = CatalogDb::open_default().await?;
                let date = date.unwrap_or_else(|| Utc::now().date_naive());
                run_add(&db, &url, date, theme, dest.as_deref()).await?;
            }
            CliCommand::Status { json } => {
                let db = CatalogDb::open_default().await?;
                run_status(&db, json).await?;
            }
            CliCommand::Expand {
                archive,
                dest,
                max_depth,
            } => {
                let mut archive_cfg = cfg.archive_or_default();
                if let Some(depth) = max_depth {
                    archive_cfg.max_depth = depth;
                }
                run_expand(&archive_cfg, &archive, dest.as_deref()).await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
