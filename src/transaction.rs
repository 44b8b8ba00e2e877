use crate::error::ScrapeError;
use crate::time::{self, MS_PER_MIN};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One row of the portal's results table, as text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransaction {
    /// `YYYY-MM-DD h:MM AM|PM`, minute precision.
    pub date_time: String,
    pub account_name: String,
    pub card_number: String,
    pub location: String,
    pub transaction_type: TransactionKind,
    /// Signed, with a currency suffix and optional thousands separators,
    /// e.g. `-2.50 USD` or `3,749.00 USD`.
    pub amount: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    Debit,
    Credit,
}

impl FromStr for TransactionKind {
    type Err = ScrapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Debit" => Ok(TransactionKind::Debit),
            "Credit" => Ok(TransactionKind::Credit),
            other => Err(ScrapeError::Format(format!(
                "'{other}' is neither Debit nor Credit"
            ))),
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionKind::Debit => f.write_str("Debit"),
            TransactionKind::Credit => f.write_str("Credit"),
        }
    }
}

/// A normalized transaction. `time` doubles as the primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Milliseconds since the epoch, perturbed within its minute so that
    /// simultaneous transactions get distinct keys.
    pub time: i64,
    pub account: String,
    /// Money added to the balance; negative when money was removed.
    pub amount: Decimal,
    pub location: String,
}

impl Transaction {
    /// The display minute this transaction was scraped at.
    pub fn minute(&self) -> i64 {
        self.time.div_euclid(MS_PER_MIN)
    }
}

/// Converts a raw row using only its own minute as `time`. The result is not
/// unique until the normalizer has seen the row's same-minute siblings.
impl TryFrom<&RawTransaction> for Transaction {
    type Error = ScrapeError;

    fn try_from(raw: &RawTransaction) -> Result<Self, Self::Error> {
        Ok(Transaction {
            time: time::parse(&raw.date_time)? * MS_PER_MIN,
            account: raw.account_name.clone(),
            amount: parse_amount(&raw.amount)?,
            location: raw.location.clone(),
        })
    }
}

/// Parses `-2.50 USD` / `3,749.00 USD` into an exact decimal.
pub fn parse_amount(text: &str) -> Result<Decimal, ScrapeError> {
    let cleaned = text.replace(',', "");
    let number = cleaned
        .split_whitespace()
        .next()
        .ok_or_else(|| ScrapeError::Format(format!("empty amount '{text}'")))?;

    Decimal::from_str(number)
        .map_err(|e| ScrapeError::Format(format!("amount '{text}': {e}")))
}
