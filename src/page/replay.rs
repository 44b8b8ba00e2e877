//! A stand-in for the portal that serves a recorded transaction history
//! through the same DOM the live transaction page renders, including its
//! habit of dying after a fixed number of page changes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::sync::watch;

use crate::error::{Result, ScrapeError};
use crate::page::frame::{Bridge, BridgeMessage, DomEvent, Frame, FrameHost};
use crate::page::Role;
use crate::time;
use crate::transaction::RawTransaction;

const TABLE_ID: &str = "ctl00_MainContent_ResultRadGrid_ctl00";

#[derive(Debug)]
pub struct ReplayPortal {
    /// Newest first, the order the portal lists them in.
    rows: Vec<(i64, RawTransaction)>,
    page_size: usize,
    die_after: Option<usize>,
    latency: Duration,
}

impl ReplayPortal {
    /// Orders `rows` newest first; rows sharing a minute keep their
    /// relative order.
    pub fn new(rows: impl IntoIterator<Item = RawTransaction>) -> Result<Self> {
        let mut rows = rows
            .into_iter()
            .map(|row| -> Result<(i64, RawTransaction)> { Ok((time::parse(&row.date_time)?, row)) })
            .collect::<Result<Vec<_>>>()?;
        rows.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(Self {
            rows,
            page_size: 20,
            die_after: None,
            latency: Duration::from_millis(1),
        })
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// The `n`-th page change of a session leaves the results table stale.
    pub fn die_after(mut self, n: Option<usize>) -> Self {
        self.die_after = n;
        self
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Rows between the two form values, both ends inclusive. `None` when
    /// a non-empty value does not validate.
    fn search(&self, start: &str, end: &str) -> Option<Vec<RawTransaction>> {
        let bound = |value: &str| -> Option<Option<i64>> {
            if value.trim().is_empty() {
                Some(None)
            } else {
                time::parse(value).ok().map(Some)
            }
        };
        let start = bound(start)?;
        let end = bound(end)?;

        Some(
            self.rows
                .iter()
                .filter(|(minute, _)| start.map_or(true, |s| *minute >= s))
                .filter(|(minute, _)| end.map_or(true, |e| *minute <= e))
                .map(|(_, row)| row.clone())
                .collect(),
        )
    }
}

/// Hands out one independent session per opened frame.
#[derive(Debug, Clone)]
pub struct ReplayHost {
    portal: Arc<ReplayPortal>,
    sessions: Arc<AtomicUsize>,
}

impl ReplayHost {
    pub fn new(portal: ReplayPortal) -> Self {
        Self {
            portal: Arc::new(portal),
            sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of frames opened so far.
    pub fn sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameHost for ReplayHost {
    type Frame = ReplayFrame;

    async fn open(&self, url: &str) -> Result<ReplayFrame> {
        let session = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Replay session {session} for {url}");
        Ok(ReplayFrame::new(Arc::clone(&self.portal)))
    }
}

#[derive(Debug, Default)]
struct PageState {
    start: String,
    end: String,
    /// Typed but not yet blurred, keyed by selector.
    typed: HashMap<String, String>,
    focused: Option<String>,
    searching: bool,
    posting_back: bool,
    results: Option<Vec<RawTransaction>>,
    page: usize,
    table_id: String,
    advances: usize,
    dead: bool,
}

#[derive(Debug, Clone)]
struct Shared {
    page: Arc<Mutex<PageState>>,
    revisions: Arc<watch::Sender<u64>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PageState> {
        self.page.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mutates the page and publishes a new revision.
    fn update<R>(&self, f: impl FnOnce(&mut PageState) -> R) -> R {
        let result = {
            let mut page = self.lock();
            f(&mut *page)
        };
        self.revisions.send_modify(|revision| *revision += 1);
        result
    }
}

pub struct ReplayFrame {
    portal: Arc<ReplayPortal>,
    shared: Shared,
}

impl ReplayFrame {
    fn new(portal: Arc<ReplayPortal>) -> Self {
        let (revisions, _) = watch::channel(0);
        Self {
            portal,
            shared: Shared {
                page: Arc::new(Mutex::new(PageState::default())),
                revisions: Arc::new(revisions),
            },
        }
    }

    fn start_search(&self) {
        self.shared.update(|page| page.searching = true);

        let portal = Arc::clone(&self.portal);
        let shared = self.shared.clone();
        tokio::spawn(async move {
            tokio::time::sleep(portal.latency).await;
            shared.update(|page| {
                page.results = portal.search(&page.start, &page.end);
                page.page = 0;
                page.advances = 0;
                page.dead = false;
                page.table_id = TABLE_ID.to_string();
                page.searching = false;
            });
        });
    }
}

/// One page change, as the portal's `__doPostBack` performs it.
async fn post_back(portal: &ReplayPortal, shared: &Shared) {
    shared.update(|page| page.posting_back = true);
    tokio::time::sleep(portal.latency).await;
    shared.update(|page| {
        page.posting_back = false;
        page.advances += 1;
        if portal.die_after.is_some_and(|n| page.advances >= n) {
            page.dead = true;
        }
        if !page.dead {
            page.page += 1;
            page.table_id = TABLE_ID.to_string();
        }
    });
}

#[async_trait]
impl Frame for ReplayFrame {
    async fn loaded(&mut self) -> Result<()> {
        tokio::time::sleep(self.portal.latency).await;
        Ok(())
    }

    fn html(&self) -> String {
        render(&self.shared.lock(), self.portal.page_size)
    }

    fn observe(&self) -> watch::Receiver<u64> {
        self.shared.revisions.subscribe()
    }

    fn set_value(&mut self, selector: &str, value: &str) -> Result<()> {
        if !is_date_input(selector) {
            return Err(ScrapeError::MissingElement(format!("no input at {selector}")));
        }
        self.shared.update(|page| {
            page.typed.insert(selector.to_string(), value.to_string());
        });
        Ok(())
    }

    fn dispatch(&mut self, selector: &str, event: DomEvent) -> Result<()> {
        match event {
            DomEvent::Focus => self.shared.update(|page| page.focused = Some(selector.to_string())),
            // The date pickers only accept a value when the field loses focus.
            DomEvent::Blur => self.shared.update(|page| {
                if page.focused.as_deref() == Some(selector) {
                    page.focused = None;
                    if let Some(value) = page.typed.remove(selector) {
                        if selector == Role::StartDateInput.selector() {
                            page.start = value;
                        } else if selector == Role::EndDateInput.selector() {
                            page.end = value;
                        }
                    }
                }
            }),
            DomEvent::Click if selector == Role::SearchButton.selector() => self.start_search(),
            DomEvent::Click => debug!("Click on {selector} does nothing"),
        }
        Ok(())
    }

    fn set_attribute(&mut self, selector: &str, name: &str, value: &str) -> Result<()> {
        let updated = self.shared.update(|page| {
            let table_present = page.results.is_some() && selector == format!("#{}", page.table_id);
            if table_present && name == "id" {
                page.table_id = value.to_string();
            }
            table_present
        });
        if updated {
            Ok(())
        } else {
            Err(ScrapeError::MissingElement(format!("cannot set {name} on {selector}")))
        }
    }

    async fn inject_bridge(&mut self, script: &str) -> Result<Bridge> {
        tokio::time::sleep(self.portal.latency).await;
        debug!("Injected {script}");

        let (bridge, mut listener) = Bridge::channel();
        let portal = Arc::clone(&self.portal);
        let shared = self.shared.clone();
        tokio::spawn(async move {
            while let Some(message) = listener.recv().await {
                match message {
                    BridgeMessage::Eval { js } if js.starts_with("__doPostBack(") => {
                        post_back(&portal, &shared).await
                    }
                    BridgeMessage::Eval { js } => warn!("Replay page cannot evaluate {js}"),
                }
            }
        });
        Ok(bridge)
    }
}

fn is_date_input(selector: &str) -> bool {
    selector == Role::StartDateInput.selector() || selector == Role::EndDateInput.selector()
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn input_value<'a>(page: &'a PageState, role: Role, committed: &'a str) -> &'a str {
    page.typed
        .get(role.selector())
        .map(String::as_str)
        .unwrap_or(committed)
}

fn render(page: &PageState, page_size: usize) -> String {
    let mut html = String::from(
        "<!DOCTYPE html><html><head><title>Account Transactions</title></head><body><form id=\"aspnetForm\">",
    );

    html.push_str(&format!(
        r#"<input type="text" id="ctl00_MainContent_BeginRadDateTimePicker_dateInput" value="{}">"#,
        escape(input_value(page, Role::StartDateInput, &page.start))
    ));
    html.push_str(&format!(
        r#"<input type="text" id="ctl00_MainContent_EndRadDateTimePicker_dateInput" value="{}">"#,
        escape(input_value(page, Role::EndDateInput, &page.end))
    ));
    html.push_str(r#"<input type="submit" id="MainContent_ContinueButton" value="Continue">"#);
    html.push_str(&format!(
        r#"<div id="MainContent_LoadingPanelAction" style="display: {};">Loading...</div>"#,
        if page.searching { "block" } else { "none" }
    ));

    html.push_str(r#"<div id="MainContent_ResultPanel">"#);
    if page.posting_back {
        html.push_str(
            r#"<div id="MainContent_LoadingPanelWhiteTransparentCenterImageMainContent_ResultPanel" class="RadAjax"></div>"#,
        );
    }
    if let Some(rows) = &page.results {
        render_table(&mut html, page, rows, page_size);
    }
    html.push_str("</div></form></body></html>");
    html
}

fn render_table(html: &mut String, page: &PageState, rows: &[RawTransaction], page_size: usize) {
    html.push_str(&format!(
        r#"<table id="{}" class="rgMasterTable"><thead><tr><th>Date/Time</th><th>Account Name</th><th>Card Number</th><th>Location</th><th>Transaction Type</th><th>Amount</th></tr></thead><tbody>"#,
        escape(&page.table_id)
    ));

    if rows.is_empty() {
        html.push_str(r#"<tr class="rgNoRecords"><td colspan="6">No records to display.</td></tr>"#);
    }
    for row in rows.iter().skip(page.page * page_size).take(page_size) {
        html.push_str(&format!(
            "<tr class=\"rgRow\"><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape(&row.date_time),
            escape(&row.account_name),
            escape(&row.card_number),
            escape(&row.location),
            row.transaction_type,
            escape(&row.amount),
        ));
    }
    html.push_str("</tbody></table>");

    let pages = rows.len().div_ceil(page_size);
    if pages > 1 {
        html.push_str(r#"<div class="rgWrap rgNumPart">"#);
        for i in 0..pages {
            if i == page.page {
                html.push_str(&format!(
                    r#"<a class="rgCurrentPage" href="javascript:void(0);"><span>{}</span></a>"#,
                    i + 1
                ));
            } else {
                html.push_str(&format!(
                    r#"<a href="javascript:__doPostBack('ctl00$MainContent$ResultRadGrid$ctl00$ctl03$ctl01$ctl{:02}','')"><span>{}</span></a>"#,
                    i + 2,
                    i + 1
                ));
            }
        }
        html.push_str("</div>");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{DriverState, PageDriver};
    use crate::transaction::TransactionKind;

    fn row(date_time: &str, amount: &str) -> RawTransaction {
        RawTransaction {
            date_time: date_time.to_string(),
            account_name: "Dining Dollars".to_string(),
            card_number: "0009".to_string(),
            location: "HDH Johns Market Johns 2".to_string(),
            transaction_type: TransactionKind::Debit,
            amount: amount.to_string(),
        }
    }

    fn history() -> Vec<RawTransaction> {
        (0..7)
            .map(|i| row(&format!("2022-01-12 6:0{i} AM"), &format!("-{i}.00 USD")))
            .collect()
    }

    async fn searched(portal: ReplayPortal, start: &str, end: Option<&str>) -> PageDriver<ReplayFrame> {
        let host = ReplayHost::new(portal);
        let mut driver = PageDriver::load(&host, "replay://transactions").await.unwrap();
        driver.set_value(Role::StartDateInput, start).unwrap();
        if let Some(end) = end {
            driver.set_value(Role::EndDateInput, end).unwrap();
        }
        driver.submit_search().await.unwrap();
        driver
    }

    fn times(rows: &[RawTransaction]) -> Vec<&str> {
        rows.iter().map(|r| r.date_time.as_str()).collect()
    }

    #[test]
    fn test_portal_orders_newest_first() {
        let portal = ReplayPortal::new(history()).unwrap();
        let rows = portal.search("", "").unwrap();

        assert_eq!(rows.first().unwrap().date_time, "2022-01-12 6:06 AM");
        assert_eq!(rows.last().unwrap().date_time, "2022-01-12 6:00 AM");
    }

    #[test]
    fn test_portal_search_bounds_are_inclusive() {
        let portal = ReplayPortal::new(history()).unwrap();
        let rows = portal.search("2022-01-12 6:02 AM", "2022-01-12 6:04 AM").unwrap();

        assert_eq!(times(&rows), vec!["2022-01-12 6:04 AM", "2022-01-12 6:03 AM", "2022-01-12 6:02 AM"]);
        assert!(portal.search("not a date", "").is_none());
    }

    #[test]
    fn test_portal_rejects_bad_recorded_dates() {
        assert!(ReplayPortal::new(vec![row("12/01/2022", "1.00 USD")]).is_err());
    }

    #[tokio::test]
    async fn test_driver_pages_through_history() {
        let mut driver = searched(ReplayPortal::new(history()).unwrap().page_size(3), "2000-01-01 12:00 AM", None).await;
        assert_eq!(driver.state(), DriverState::HasResults);

        let mut seen = Vec::new();
        loop {
            let rows = driver.read_results_table().unwrap().unwrap();
            seen.extend(rows.into_iter().map(|r| r.date_time));
            driver.mark_table_consumed().unwrap();
            if !driver.go_to_next_page().await.unwrap() {
                break;
            }
        }

        assert_eq!(seen.len(), 7);
        assert_eq!(seen[0], "2022-01-12 6:06 AM");
        assert_eq!(seen[6], "2022-01-12 6:00 AM");
        assert_eq!(driver.state(), DriverState::Exhausted);
    }

    #[tokio::test]
    async fn test_driver_detects_pagination_death() {
        let portal = ReplayPortal::new(history()).unwrap().page_size(2).die_after(Some(2));
        let mut driver = searched(portal, "2000-01-01 12:00 AM", None).await;

        assert_eq!(driver.read_results_table().unwrap().unwrap().len(), 2);
        driver.mark_table_consumed().unwrap();
        assert!(driver.go_to_next_page().await.unwrap());
        assert_eq!(driver.read_results_table().unwrap().unwrap().len(), 2);
        driver.mark_table_consumed().unwrap();
        assert!(driver.go_to_next_page().await.unwrap());

        assert_eq!(driver.read_results_table().unwrap(), None);
        assert_eq!(driver.state(), DriverState::Dead);
    }

    #[tokio::test]
    async fn test_stale_table_is_reread_unless_consumed() {
        let portal = ReplayPortal::new(history()).unwrap().page_size(2).die_after(Some(1));
        let mut driver = searched(portal, "2000-01-01 12:00 AM", None).await;

        let first = driver.read_results_table().unwrap().unwrap();
        assert!(driver.go_to_next_page().await.unwrap());

        // The dead page still shows the old table under the same id.
        assert_eq!(driver.read_results_table().unwrap(), Some(first));
    }

    #[tokio::test]
    async fn test_end_date_limits_results() {
        let mut driver = searched(
            ReplayPortal::new(history()).unwrap(),
            "2000-01-01 12:00 AM",
            Some("2022-01-12 6:01 AM"),
        )
        .await;

        let rows = driver.read_results_table().unwrap().unwrap();
        assert_eq!(times(&rows), vec!["2022-01-12 6:01 AM", "2022-01-12 6:00 AM"]);
    }

    #[tokio::test]
    async fn test_unblurred_value_is_not_committed() {
        let host = ReplayHost::new(ReplayPortal::new(history()).unwrap());
        let mut frame = host.open("replay://transactions").await.unwrap();
        let start = Role::StartDateInput.selector();

        frame.set_value(start, "2022-01-12 6:05 AM").unwrap();
        frame.dispatch(Role::SearchButton.selector(), DomEvent::Click).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let page = frame.shared.lock();
        assert_eq!(page.start, "");
        assert_eq!(page.results.as_ref().unwrap().len(), 7);
    }

    #[tokio::test]
    async fn test_empty_search_shows_no_records() {
        let mut driver = searched(ReplayPortal::new(history()).unwrap(), "2030-01-01 12:00 AM", None).await;

        assert_eq!(driver.read_results_table().unwrap(), Some(vec![]));
        assert!(!driver.go_to_next_page().await.unwrap());
    }

    #[tokio::test]
    async fn test_sessions_are_counted() {
        let host = ReplayHost::new(ReplayPortal::new(history()).unwrap());
        PageDriver::load(&host, "replay://a").await.unwrap();
        PageDriver::load(&host, "replay://b").await.unwrap();

        assert_eq!(host.sessions(), 2);
    }
}
