use std::io::Write;

use chrono::{DateTime, SecondsFormat};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::account::{accumulate, AccumulatedTransaction};
use crate::error::Result;
use crate::store::TransactionStore;

pub const HEADER: [&str; 5] = ["Time", "Balance", "Amount", "Location", "Account"];

pub fn write_csv<W: Write>(writer: W, transactions: &[AccumulatedTransaction]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(HEADER)?;

    for acc in transactions {
        let tx = &acc.transaction;
        wtr.write_record([
            format_time(tx.time),
            two_places(acc.balance),
            signed(tx.amount),
            tx.location.clone(),
            tx.account.clone(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Exports the store oldest first, with balances accumulated over
/// `account` only, or over everything.
pub fn export_store<W: Write>(store: &TransactionStore, account: Option<&str>, writer: W) -> Result<()> {
    let transactions = store.all()?;
    let accumulated = accumulate(&transactions, |tx| account.map_or(true, |a| tx.account == a));
    write_csv(writer, &accumulated)
}

fn format_time(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| ms.to_string())
}

fn two_places(value: Decimal) -> String {
    let mut rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded.to_string()
}

fn signed(value: Decimal) -> String {
    let text = two_places(value);
    if text.starts_with('-') {
        text
    } else {
        format!("+{text}")
    }
}
