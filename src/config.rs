use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const PORTAL_URL: &str =
    "https://eacct-ucsd-sp.transactcampus.com/eAccounts/AccountTransaction.aspx";

/// Start date that covers the whole history kept by the portal.
pub const HISTORY_START: &str = "2000-01-01 12:00 AM";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeConfig {
    #[serde(default = "default_portal_url")]
    pub portal_url: String,
    #[serde(default = "default_history_start")]
    pub history_start: String,
    /// Idle gap that ends one burst of scraped rows.
    #[serde(default = "default_burst_quiet_ms")]
    pub burst_quiet_ms: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

fn default_portal_url() -> String {
    PORTAL_URL.to_string()
}

fn default_history_start() -> String {
    HISTORY_START.to_string()
}

fn default_burst_quiet_ms() -> u64 {
    50
}

fn default_channel_capacity() -> usize {
    100
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            portal_url: default_portal_url(),
            history_start: default_history_start(),
            burst_quiet_ms: default_burst_quiet_ms(),
            channel_capacity: default_channel_capacity(),
            db_path: None,
        }
    }
}

impl ScrapeConfig {
    pub fn burst_quiet(&self) -> Duration {
        Duration::from_millis(self.burst_quiet_ms)
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_path.clone().unwrap_or_else(default_db_path)
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("eaccounts")
        .join("transactions.db")
}

/// Reads the config file if there is one; missing fields take defaults.
pub fn load_config(path: Option<&Path>) -> Result<ScrapeConfig> {
    match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&content)?)
        }
        None => Ok(ScrapeConfig::default()),
    }
}
