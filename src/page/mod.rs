//! Drives the portal's transaction search page inside a hidden frame.

pub mod frame;
pub mod replay;

use std::fmt;

use log::{debug, info, warn};
use scraper::{ElementRef, Html, Selector};

use crate::error::{Result, ScrapeError};
use crate::page::frame::{Bridge, BridgeMessage, DomEvent, Frame, FrameHost, BRIDGE_SCRIPT};
use crate::transaction::RawTransaction;

/// Logical elements of the transaction page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Start of the searched range (inclusive).
    StartDateInput,
    /// End of the searched range; the portal includes the given minute.
    EndDateInput,
    SearchButton,
    /// Loading panel for the first page of results. Always in the DOM.
    ResultsLoading,
    /// Loading panel shown while a postback fetches another page.
    PageLoading,
    ResultsTable,
    NextPage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Input,
    Div,
    Table,
    Anchor,
}

impl ElementKind {
    pub fn tag(self) -> &'static str {
        match self {
            ElementKind::Input => "input",
            ElementKind::Div => "div",
            ElementKind::Table => "table",
            ElementKind::Anchor => "a",
        }
    }
}

impl Role {
    pub fn selector(self) -> &'static str {
        match self {
            Role::StartDateInput => "#ctl00_MainContent_BeginRadDateTimePicker_dateInput",
            Role::EndDateInput => "#ctl00_MainContent_EndRadDateTimePicker_dateInput",
            Role::SearchButton => "#MainContent_ContinueButton",
            Role::ResultsLoading => "#MainContent_LoadingPanelAction",
            Role::PageLoading => {
                "#MainContent_LoadingPanelWhiteTransparentCenterImageMainContent_ResultPanel"
            }
            Role::ResultsTable => "#ctl00_MainContent_ResultRadGrid_ctl00",
            Role::NextPage => ".rgCurrentPage + *",
        }
    }

    pub fn kind(self) -> ElementKind {
        match self {
            Role::StartDateInput | Role::EndDateInput | Role::SearchButton => ElementKind::Input,
            Role::ResultsLoading | Role::PageLoading => ElementKind::Div,
            Role::ResultsTable => ElementKind::Table,
            Role::NextPage => ElementKind::Anchor,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Created,
    Loaded,
    Searching,
    HasResults,
    Paginating,
    /// No further pages, or the search matched nothing.
    Exhausted,
    /// The table vanished after a page change. Only a new frame can continue.
    Dead,
}

pub struct PageDriver<F: Frame> {
    frame: F,
    bridge: Option<Bridge>,
    state: DriverState,
}

impl<F: Frame> PageDriver<F> {
    pub fn new(frame: F) -> Self {
        Self {
            frame,
            bridge: None,
            state: DriverState::Created,
        }
    }

    /// Opens a fresh frame at `url` and waits until it is usable.
    ///
    /// There is no timeout here: a frame that never loads blocks forever,
    /// so callers that need a bound must race this against a timer.
    pub async fn load<H>(host: &H, url: &str) -> Result<Self>
    where
        H: FrameHost<Frame = F>,
    {
        debug!("Opening {url}");
        let frame = host.open(url).await?;
        let mut driver = Self::new(frame);
        driver.await_load().await?;
        Ok(driver)
    }

    pub async fn await_load(&mut self) -> Result<()> {
        self.frame.loaded().await?;
        self.bridge = Some(self.frame.inject_bridge(BRIDGE_SCRIPT).await?);
        self.state = DriverState::Loaded;
        Ok(())
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Writes a form field, then focuses and blurs it so the page's
    /// validation picks the value up.
    pub fn set_value(&mut self, field: Role, value: &str) -> Result<()> {
        if field.kind() != ElementKind::Input {
            return Err(ScrapeError::MissingElement(format!("{field} is not a form field")));
        }
        self.with_document(|doc| element(doc, field).map(|_| ()))?;

        let selector = field.selector();
        self.frame.set_value(selector, value)?;
        self.frame.dispatch(selector, DomEvent::Focus)?;
        self.frame.dispatch(selector, DomEvent::Blur)?;
        Ok(())
    }

    /// Clicks search and waits for the results loading panel to show and
    /// then hide again.
    pub async fn submit_search(&mut self) -> Result<()> {
        self.with_document(|doc| {
            element(doc, Role::SearchButton)?;
            element(doc, Role::ResultsLoading)?;
            Ok(())
        })?;

        info!("Submitting search");
        self.state = DriverState::Searching;
        self.frame.dispatch(Role::SearchButton.selector(), DomEvent::Click)?;

        self.wait_until("results loading panel", |doc| shown(doc, Role::ResultsLoading))
            .await?;
        self.wait_until("search results", |doc| Ok(!shown(doc, Role::ResultsLoading)?))
            .await?;

        self.state = DriverState::HasResults;
        Ok(())
    }

    /// Advances to the next page. Returns `false` when there is none.
    ///
    /// The pager links are postbacks that a synthetic click cannot trigger,
    /// so the link's script is relayed over the bridge into the page world.
    pub async fn go_to_next_page(&mut self) -> Result<bool> {
        let js = self.with_document(|doc| match element_maybe(doc, Role::NextPage)? {
            Some(anchor) => postback_expression(anchor).map(Some),
            None => Ok(None),
        })?;

        let Some(js) = js else {
            debug!("No next page");
            self.state = DriverState::Exhausted;
            return Ok(false);
        };

        let bridge = self
            .bridge
            .as_ref()
            .ok_or_else(|| ScrapeError::Bridge("frame not loaded".to_string()))?;
        self.state = DriverState::Paginating;
        bridge.dispatch(&BridgeMessage::Eval { js })?;

        self.wait_until("page loading panel", |doc| {
            Ok(element_maybe(doc, Role::PageLoading)?.is_some())
        })
        .await?;
        self.wait_until("page loading panel removal", |doc| {
            Ok(element_maybe(doc, Role::PageLoading)?.is_none())
        })
        .await?;

        Ok(true)
    }

    /// Rows of the current results table, or `None` if there is no table.
    ///
    /// A missing table right after a page change is the portal's pagination
    /// death and leaves this driver `Dead`.
    pub fn read_results_table(&mut self) -> Result<Option<Vec<RawTransaction>>> {
        let rows = self.with_document(|doc| match element_maybe(doc, Role::ResultsTable)? {
            Some(table) => table_rows(table).map(Some),
            None => Ok(None),
        })?;

        self.state = match (&rows, self.state) {
            (Some(_), _) => DriverState::HasResults,
            (None, DriverState::Paginating) => {
                warn!("Results table did not come back after a page change");
                DriverState::Dead
            }
            (None, _) => DriverState::Exhausted,
        };
        Ok(rows)
    }

    /// Strips the table's id so the next page's table (which reuses the id)
    /// can be told apart from this one.
    pub fn mark_table_consumed(&mut self) -> Result<()> {
        self.frame.set_attribute(Role::ResultsTable.selector(), "id", "")
    }

    fn with_document<R>(&self, f: impl FnOnce(&Html) -> Result<R>) -> Result<R> {
        let doc = Html::parse_document(&self.frame.html());
        f(&doc)
    }

    /// Resolves once `predicate` holds for the frame's document. Re-checked
    /// on every revision the frame publishes.
    async fn wait_until<P>(&mut self, what: &str, predicate: P) -> Result<()>
    where
        P: Fn(&Html) -> Result<bool> + Send,
    {
        let mut revisions = self.frame.observe();
        loop {
            revisions.borrow_and_update();
            if self.with_document(&predicate)? {
                return Ok(());
            }
            if revisions.changed().await.is_err() {
                return Err(ScrapeError::Load(format!("frame closed while waiting for {what}")));
            }
        }
    }
}

fn compile(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| ScrapeError::Format(format!("selector {css}: {e:?}")))
}

/// Resolves `role` only to an element of its expected kind.
fn element<'a>(doc: &'a Html, role: Role) -> Result<ElementRef<'a>> {
    let selector = compile(role.selector())?;
    let tag = role.kind().tag();

    match doc.select(&selector).next() {
        None => Err(ScrapeError::MissingElement(format!("expected {role}"))),
        Some(el) if el.value().name() == tag => Ok(el),
        Some(el) => Err(ScrapeError::MissingElement(format!(
            "{role} is a <{}>, not a <{tag}>",
            el.value().name()
        ))),
    }
}

fn element_maybe<'a>(doc: &'a Html, role: Role) -> Result<Option<ElementRef<'a>>> {
    match element(doc, role) {
        Ok(el) => Ok(Some(el)),
        Err(ScrapeError::MissingElement(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

fn shown(doc: &Html, role: Role) -> Result<bool> {
    Ok(element_maybe(doc, role)?.is_some_and(|el| {
        let style: String = el
            .value()
            .attr("style")
            .unwrap_or("")
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        !style.to_ascii_lowercase().contains("display:none")
    }))
}

/// Script behind a `javascript:` pager link.
fn postback_expression(anchor: ElementRef<'_>) -> Result<String> {
    anchor
        .value()
        .attr("href")
        .and_then(|href| href.trim().strip_prefix("javascript:"))
        .map(|js| js.trim().to_string())
        .filter(|js| !js.is_empty())
        .ok_or_else(|| ScrapeError::Format("next page control is not a postback link".to_string()))
}

fn table_rows(table: ElementRef<'_>) -> Result<Vec<RawTransaction>> {
    let tbody = compile("tbody")?;
    let Some(body) = table.select(&tbody).next() else {
        return Ok(Vec::new());
    };

    let mut rows = Vec::new();
    for row in body
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|el| el.value().name() == "tr")
    {
        // Telerik's "No records to display." placeholder
        if row.value().classes().any(|c| c == "rgNoRecords") {
            continue;
        }

        let cells: Vec<String> = row
            .children()
            .filter_map(ElementRef::wrap)
            .filter(|el| el.value().name() == "td")
            .map(|td| td.text().collect::<String>().trim().to_string())
            .collect();
        rows.push(raw_transaction(cells)?);
    }
    Ok(rows)
}

/// Maps cells positionally to
/// `[dateTime, accountName, cardNumber, location, transactionType, amount]`.
fn raw_transaction(cells: Vec<String>) -> Result<RawTransaction> {
    if cells.len() < 6 {
        return Err(ScrapeError::Format(format!(
            "expected 6 cells per transaction row, found {}",
            cells.len()
        )));
    }
    let mut cells = cells.into_iter();
    let mut next = || cells.next().unwrap_or_default();

    let date_time = next();
    let account_name = next();
    let card_number = next();
    let location = next();
    let transaction_type = next().parse()?;
    let amount = next();

    Ok(RawTransaction {
        date_time,
        account_name,
        card_number,
        location,
        transaction_type,
        amount,
    })
}
