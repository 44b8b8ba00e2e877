use eaccounts::{
    config::load_config,
    engine::pipeline::{refresh, scrape_into, ScrapeOptions, ScrapeReport, WriteMode},
    export::export_store,
    page::replay::{ReplayHost, ReplayPortal},
    read_recorded_rows,
    store::{Direction, Index, KeyRange, TransactionStore},
    time,
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;
use std::fs::File;
use std::io;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "eaccounts", version, about = "Scrapes eAccounts transaction history into a local store")]
struct Cli {
    /// Database file (defaults to the platform data directory)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct SourceArgs {
    /// Recorded portal history (CSV) to scrape through the replay portal
    #[arg(long)]
    replay: PathBuf,

    /// Fail on transactions that are already stored instead of overwriting
    #[arg(long)]
    add: bool,

    #[arg(long, default_value_t = 20)]
    page_size: usize,

    /// Make every session's results table vanish after this many page changes
    #[arg(long)]
    die_after: Option<usize>,
}

impl SourceArgs {
    fn mode(&self) -> WriteMode {
        if self.add {
            WriteMode::Add
        } else {
            WriteMode::Put
        }
    }

    fn host(&self) -> Result<ReplayHost> {
        let rows: Vec<_> = read_recorded_rows(&self.replay)
            .with_context(|| format!("reading {}", self.replay.display()))?
            .collect();
        info!("Replaying {} recorded row(s)", rows.len());

        let portal = ReplayPortal::new(rows)?
            .page_size(self.page_size)
            .die_after(self.die_after);
        Ok(ReplayHost::new(portal))
    }
}

#[derive(Subcommand)]
enum Command {
    /// Scrape the whole history, or back to --since
    Scrape {
        #[command(flatten)]
        source: SourceArgs,

        /// Oldest minute to scrape, e.g. "2022-01-12 6:00 AM"
        #[arg(long)]
        since: Option<String>,
    },
    /// Scrape only what is newer than the newest stored transaction
    Refresh {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Print stored transactions
    List {
        #[arg(long)]
        account: Option<String>,

        /// Newest first
        #[arg(long)]
        reverse: bool,
    },
    /// Write stored transactions with running balances as CSV
    Export {
        #[arg(long)]
        account: Option<String>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    let db_path = cli.db.clone().unwrap_or_else(|| config.db_path());
    let mut store = TransactionStore::open(&db_path)
        .with_context(|| format!("opening store at {}", db_path.display()))?;

    match cli.command {
        Command::Scrape { source, since } => {
            let options = ScrapeOptions {
                since: since.as_deref().map(time::parse).transpose()?,
                after_time: None,
                mode: source.mode(),
            };
            let report = scrape_into(source.host()?, &mut store, &config, &options).await?;
            print_report(&report);
        }
        Command::Refresh { source } => {
            let report = refresh(source.host()?, &mut store, &config, source.mode()).await?;
            print_report(&report);
        }
        Command::List { account, reverse } => list(&store, account, reverse)?,
        Command::Export { account, output } => match output {
            Some(path) => {
                let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
                export_store(&store, account.as_deref(), file)?;
            }
            None => export_store(&store, account.as_deref(), io::stdout().lock())?,
        },
    }

    Ok(())
}

fn print_report(report: &ScrapeReport) {
    println!(
        "{} transaction(s) written in {} batch(es), {} skipped",
        report.written, report.batches, report.skipped
    );
}

fn list(store: &TransactionStore, account: Option<String>, reverse: bool) -> Result<()> {
    let direction = if reverse { Direction::Prev } else { Direction::Next };
    let cursor = match account {
        Some(account) => store.cursor(Some(KeyRange::only(account)), direction, Some(Index::Account))?,
        None => store.cursor(None, direction, None)?,
    };

    for tx in cursor {
        let tx = tx?;
        println!(
            "{:<22} {:>10} {:<18} {}",
            time::format(tx.minute()),
            tx.amount.to_string(),
            tx.account,
            tx.location
        );
    }
    Ok(())
}
