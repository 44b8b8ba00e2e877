//! The embedded browsing context seen by the page driver, and the channel
//! into the host page's script world.

use async_trait::async_trait;
use log::warn;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::error::{Result, ScrapeError};

/// Custom DOM event the injected helper listens for.
pub const BRIDGE_EVENT: &str = "twocryinggreenvforms";

/// Helper script injected into the frame's document.
pub const BRIDGE_SCRIPT: &str = "./dist/isolation-escape.js";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomEvent {
    Focus,
    Blur,
    Click,
}

impl DomEvent {
    pub fn name(self) -> &'static str {
        match self {
            DomEvent::Focus => "focus",
            DomEvent::Blur => "blur",
            DomEvent::Click => "click",
        }
    }
}

/// A hidden browsing context owned by exactly one page driver.
///
/// Every mutating call addresses elements by CSS selector. Implementations
/// bump the revision published by [`Frame::observe`] whenever the document
/// changes, including changes made by the page's own scripts.
#[async_trait]
pub trait Frame: Send {
    /// Resolves once the context has fired its load-complete signal.
    async fn loaded(&mut self) -> Result<()>;

    /// Serialized current document.
    fn html(&self) -> String;

    fn observe(&self) -> watch::Receiver<u64>;

    fn set_value(&mut self, selector: &str, value: &str) -> Result<()>;

    fn dispatch(&mut self, selector: &str, event: DomEvent) -> Result<()>;

    fn set_attribute(&mut self, selector: &str, name: &str, value: &str) -> Result<()>;

    /// Loads `script` into the page world and returns the channel feeding
    /// its event listener.
    async fn inject_bridge(&mut self, script: &str) -> Result<Bridge>;
}

/// Creates frames. Each call yields a fresh, independent session.
#[async_trait]
pub trait FrameHost: Send + Sync {
    type Frame: Frame + 'static;

    async fn open(&self, url: &str) -> Result<Self::Frame>;
}

/// Wire payload relayed to the page world.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BridgeMessage {
    Eval { js: String },
}

/// Sending half: dispatches `BRIDGE_EVENT` with a JSON detail payload.
#[derive(Debug, Clone)]
pub struct Bridge {
    sender: mpsc::UnboundedSender<String>,
}

impl Bridge {
    pub fn channel() -> (Bridge, BridgeListener) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Bridge { sender }, BridgeListener { receiver })
    }

    pub fn dispatch(&self, message: &BridgeMessage) -> Result<()> {
        let detail = serde_json::to_string(message)?;
        self.sender
            .send(detail)
            .map_err(|_| ScrapeError::Bridge(format!("no listener for {BRIDGE_EVENT}")))
    }
}

/// Receiving half, living in the page world.
#[derive(Debug)]
pub struct BridgeListener {
    receiver: mpsc::UnboundedReceiver<String>,
}

impl BridgeListener {
    /// Next well-formed message; malformed details are dropped.
    pub async fn recv(&mut self) -> Option<BridgeMessage> {
        while let Some(detail) = self.receiver.recv().await {
            match serde_json::from_str(&detail) {
                Ok(message) => return Some(message),
                Err(e) => warn!("Ignoring malformed {BRIDGE_EVENT} detail {detail:?}: {e}"),
            }
        }
        None
    }
}
