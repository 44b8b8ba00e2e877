use std::collections::VecDeque;

use log::{debug, warn};

use crate::engine::{RawSource, ScrapeItem};
use crate::error::Result;
use crate::time::MS_PER_MIN;
use crate::transaction::Transaction;

/// Turns scraped rows into transactions with unique, strictly decreasing
/// millisecond times.
///
/// The portal only shows minutes, so rows sharing a minute are held back
/// until the minute is complete. A cluster of `n` rows at minute start `t`
/// is then numbered `t + n - 1` down to `t` in scrape order, which keeps
/// both the listing order and the keys unique.
pub struct Normalizer<S> {
    source: S,
    cluster: Vec<Transaction>,
    cluster_minute: Option<i64>,
    ready: VecDeque<Transaction>,
    last_emitted: Option<i64>,
    /// After a restart, rows at or after this minute were already emitted.
    resume_floor: Option<i64>,
    done: bool,
}

impl<S: RawSource> Normalizer<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            cluster: Vec::new(),
            cluster_minute: None,
            ready: VecDeque::new(),
            last_emitted: None,
            resume_floor: None,
            done: false,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub async fn next(&mut self) -> Result<Option<Transaction>> {
        loop {
            if let Some(tx) = self.ready.pop_front() {
                return Ok(Some(tx));
            }
            if self.done {
                return Ok(None);
            }

            match self.source.next_item().await? {
                None => {
                    self.flush();
                    self.done = true;
                }
                Some(ScrapeItem::Discard) => {
                    debug!("Discarding {} buffered row(s)", self.cluster.len());
                    self.cluster.clear();
                    self.cluster_minute = None;
                    self.resume_floor = self.last_emitted;
                }
                Some(ScrapeItem::Row(raw)) => {
                    let tx = Transaction::try_from(&raw)?;
                    let minute = tx.minute();

                    if let Some(floor) = self.resume_floor {
                        if minute >= floor {
                            continue;
                        }
                        self.resume_floor = None;
                    }

                    if self.cluster_minute != Some(minute) {
                        self.flush();
                        self.cluster_minute = Some(minute);
                    }
                    self.cluster.push(tx);
                }
            }
        }
    }

    fn flush(&mut self) {
        let n = self.cluster.len() as i64;
        if n > MS_PER_MIN {
            warn!("{n} transactions in one minute; times will spill into the next minute");
        }

        for (k, mut tx) in self.cluster.drain(..).enumerate() {
            tx.time += n - 1 - k as i64;
            self.last_emitted = Some(tx.minute());
            self.ready.push_back(tx);
        }
        self.cluster_minute = None;
    }
}
