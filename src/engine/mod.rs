pub mod batch;
pub mod normalize;
pub mod pipeline;
pub mod scrape;


use std::collections::VecDeque;

use async_trait::async_trait;

use crate::error::Result;
use crate::transaction::RawTransaction;

#[derive(Debug, Clone, PartialEq)]
pub enum ScrapeItem {
    Row(RawTransaction),
    /// Pagination restarted: whatever was buffered for the current
    /// timestamp must be dropped, it will be scraped again.
    Discard,
}

/// A pull-based, reverse-chronological source of scraped rows.
#[async_trait]
pub trait RawSource: Send {
    async fn next_item(&mut self) -> Result<Option<ScrapeItem>>;
}

/// Pre-recorded items, mostly useful for replaying a captured scrape.
#[async_trait]
impl RawSource for VecDeque<ScrapeItem> {
    async fn next_item(&mut self) -> Result<Option<ScrapeItem>> {
        Ok(self.pop_front())
    }
}
