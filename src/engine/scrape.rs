use std::collections::VecDeque;

use async_trait::async_trait;
use log::{debug, info, warn};

use crate::config::ScrapeConfig;
use crate::engine::{RawSource, ScrapeItem};
use crate::error::{Result, ScrapeError};
use crate::page::frame::FrameHost;
use crate::page::{DriverState, PageDriver, Role};
use crate::time;
use crate::transaction::RawTransaction;

/// Scraped rows, newest first, surviving the portal's pagination death.
///
/// When a page change leaves no table behind, the stream yields
/// [`ScrapeItem::Discard`] and continues in a brand-new frame whose search
/// ends at the checkpoint: the distinct timestamp before the last one seen.
/// The checkpoint minute is included in the new search, so the cluster that
/// was being read when the session died is observed again in full.
pub struct RawScrapeStream<H: FrameHost> {
    host: H,
    url: String,
    history_start: String,
    since: Option<i64>,
    /// End boundary of the current session, as typed into the form.
    checkpoint: Option<String>,
    driver: Option<PageDriver<H::Frame>>,
    pending: VecDeque<RawTransaction>,
    last_date: Option<String>,
    last_minute: Option<i64>,
    penultimate_date: Option<String>,
    recoveries: usize,
    finished: bool,
}

impl<H: FrameHost> RawScrapeStream<H> {
    /// `since` (minutes) stops the scrape once a full page has gone past it;
    /// `None` scrapes the whole history.
    pub fn new(host: H, config: &ScrapeConfig, since: Option<i64>) -> Self {
        Self {
            host,
            url: config.portal_url.clone(),
            history_start: config.history_start.clone(),
            since,
            checkpoint: None,
            driver: None,
            pending: VecDeque::new(),
            last_date: None,
            last_minute: None,
            penultimate_date: None,
            recoveries: 0,
            finished: false,
        }
    }

    pub fn recoveries(&self) -> usize {
        self.recoveries
    }

    pub fn checkpoint(&self) -> Option<&str> {
        self.checkpoint.as_deref()
    }

    async fn open_session(&mut self) -> Result<PageDriver<H::Frame>> {
        let mut driver = PageDriver::load(&self.host, &self.url).await?;

        let start = self
            .since
            .map(time::format)
            .unwrap_or_else(|| self.history_start.clone());
        driver.set_value(Role::StartDateInput, &start)?;
        if let Some(end) = &self.checkpoint {
            driver.set_value(Role::EndDateInput, end)?;
        }
        info!("Searching from {start} to {}", self.checkpoint.as_deref().unwrap_or("now"));

        driver.submit_search().await?;
        Ok(driver)
    }

    async fn advance(&mut self) -> Result<bool> {
        match self.driver.as_mut() {
            Some(driver) => driver.go_to_next_page().await,
            None => Ok(false),
        }
    }

    fn reached_since(&self) -> bool {
        match (self.since, self.last_minute) {
            (Some(since), Some(last)) => self.driver.is_some() && last < since,
            _ => false,
        }
    }

    fn track(&mut self, row: &RawTransaction) -> Result<()> {
        if self.last_date.as_deref() != Some(row.date_time.as_str()) {
            self.last_minute = Some(time::parse(&row.date_time)?);
            self.penultimate_date = self.last_date.replace(row.date_time.clone());
        }
        Ok(())
    }

    /// Drops the dead session and moves the end boundary to the checkpoint.
    fn recover(&mut self) -> Result<()> {
        let next = self.penultimate_date.take();
        let progressed = match (&next, &self.checkpoint) {
            (Some(next), Some(previous)) => time::parse(next)? < time::parse(previous)?,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !progressed {
            return Err(ScrapeError::RecoveryStalled {
                checkpoint: next.or_else(|| self.checkpoint.clone()),
            });
        }

        warn!(
            "Pagination died after {}; resuming from {}",
            self.last_date.as_deref().unwrap_or("?"),
            next.as_deref().unwrap_or("?")
        );
        self.driver = None;
        self.last_date = None;
        self.last_minute = None;
        self.checkpoint = next;
        self.recoveries += 1;
        Ok(())
    }
}

#[async_trait]
impl<H: FrameHost> RawSource for RawScrapeStream<H> {
    async fn next_item(&mut self) -> Result<Option<ScrapeItem>> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                self.track(&row)?;
                return Ok(Some(ScrapeItem::Row(row)));
            }
            if self.finished {
                return Ok(None);
            }
            if self.reached_since() {
                debug!("Reached {:?}, stopping", self.since.map(time::format));
                self.finished = true;
                continue;
            }

            if self.driver.is_none() {
                let driver = self.open_session().await?;
                self.driver = Some(driver);
            } else if !self.advance().await? {
                self.finished = true;
                continue;
            }

            let Some(driver) = self.driver.as_mut() else {
                continue;
            };
            match driver.read_results_table()? {
                Some(rows) => {
                    driver.mark_table_consumed()?;
                    debug!("Read {} row(s)", rows.len());
                    self.pending.extend(rows);
                }
                None if driver.state() == DriverState::Dead => {
                    self.recover()?;
                    return Ok(Some(ScrapeItem::Discard));
                }
                None => self.finished = true,
            }
        }
    }
}
