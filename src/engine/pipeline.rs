use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::config::ScrapeConfig;
use crate::engine::batch::Coalescer;
use crate::engine::normalize::Normalizer;
use crate::engine::scrape::RawScrapeStream;
use crate::error::{Result, ScrapeError};
use crate::page::frame::FrameHost;
use crate::store::TransactionStore;
use crate::time;
use crate::transaction::Transaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Overwrite by key. Re-running a scrape is idempotent.
    #[default]
    Put,
    /// Insert only. Any batch containing a known key is rolled back.
    Add,
}

#[derive(Debug, Clone, Default)]
pub struct ScrapeOptions {
    /// Minute to stop scraping at; `None` scrapes the whole history.
    pub since: Option<i64>,
    /// Transactions at or before this time (ms) are dropped, not written.
    pub after_time: Option<i64>,
    pub mode: WriteMode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrapeReport {
    pub batches: usize,
    pub written: usize,
    pub skipped: usize,
    pub conflicts: Vec<i64>,
}

/// Scrapes the portal behind `host` into `store`, one store transaction per
/// burst of rows.
///
/// In [`WriteMode::Add`] conflicting batches are rolled back but the scrape
/// keeps going; every conflicting key is reported at the end as
/// [`ScrapeError::Constraint`].
pub async fn scrape_into<H>(
    host: H,
    store: &mut TransactionStore,
    config: &ScrapeConfig,
    options: &ScrapeOptions,
) -> Result<ScrapeReport>
where
    H: FrameHost + 'static,
{
    let mut normalizer = Normalizer::new(RawScrapeStream::new(host, config, options.since));
    let (sender, receiver) = mpsc::channel(config.channel_capacity.max(1));

    let producer = tokio::spawn(async move {
        while let Some(tx) = normalizer.next().await? {
            if sender.send(tx).await.is_err() {
                break;
            }
        }
        Ok::<usize, ScrapeError>(normalizer.source().recoveries())
    });

    let mut coalescer = Coalescer::new(receiver, config.burst_quiet());
    let mut report = ScrapeReport::default();
    while let Some(mut batch) = coalescer.next_batch().await {
        if let Some(after) = options.after_time {
            let before = batch.len();
            batch.retain(|tx| tx.time > after);
            report.skipped += before - batch.len();
        }
        if batch.is_empty() {
            continue;
        }
        persist(store, &batch, options.mode, &mut report)?;
    }

    let recoveries = producer
        .await
        .map_err(|e| ScrapeError::Task(e.to_string()))??;

    info!(
        "Scrape finished: {} written in {} batch(es), {} skipped, {} recover(ies)",
        report.written, report.batches, report.skipped, recoveries
    );
    if !report.conflicts.is_empty() {
        return Err(ScrapeError::Constraint {
            times: report.conflicts,
        });
    }
    Ok(report)
}

fn persist(
    store: &mut TransactionStore,
    batch: &[Transaction],
    mode: WriteMode,
    report: &mut ScrapeReport,
) -> Result<()> {
    match mode {
        WriteMode::Put => {
            store.run_transaction(true, |tx| batch.iter().try_for_each(|t| tx.put(t)))?;
            report.written += batch.len();
        }
        WriteMode::Add => {
            let outcome = store.run_transaction(true, |tx| {
                let mut conflicts = Vec::new();
                for t in batch {
                    match tx.add(t) {
                        Ok(()) => {}
                        Err(ScrapeError::Constraint { times }) => conflicts.extend(times),
                        Err(e) => return Err(e),
                    }
                }
                if conflicts.is_empty() {
                    Ok(())
                } else {
                    Err(ScrapeError::Constraint { times: conflicts })
                }
            });
            match outcome {
                Ok(()) => report.written += batch.len(),
                Err(ScrapeError::Constraint { times }) => {
                    warn!("Rolled back a batch of {} with {} existing key(s)", batch.len(), times.len());
                    report.conflicts.extend(times);
                }
                Err(e) => return Err(e),
            }
        }
    }
    report.batches += 1;
    debug!("Batch {} of {} transaction(s) done", report.batches, batch.len());
    Ok(())
}

/// Scrapes only what is newer than the newest stored transaction.
///
/// Rows at or before the newest stored `time` are dropped. This relies on a
/// fresh scrape numbering a partly stored minute the same way the stored
/// copy was numbered, which is not checked.
pub async fn refresh<H>(
    host: H,
    store: &mut TransactionStore,
    config: &ScrapeConfig,
    mode: WriteMode,
) -> Result<ScrapeReport>
where
    H: FrameHost + 'static,
{
    let latest = store.latest()?;
    if let Some(latest) = &latest {
        info!("Refreshing from {}", time::format(latest.minute()));
    }

    let options = ScrapeOptions {
        since: latest.as_ref().map(Transaction::minute),
        after_time: latest.map(|t| t.time),
        mode,
    };
    scrape_into(host, store, config, &options).await
}
