pub mod account;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod page;
pub mod store;
pub mod time;
pub mod transaction;

use crate::error::Result;
use crate::transaction::RawTransaction;
use csv::ReaderBuilder;
use log::warn;
use std::fs::File;
use std::path::Path;

/// Reads a recorded portal history, one raw row per CSV record under the
/// header `dateTime,accountName,cardNumber,location,transactionType,amount`.
pub fn read_recorded_rows(path: &Path) -> Result<impl Iterator<Item = RawTransaction>> {
    let file = File::open(path)?;
    let rdr = ReaderBuilder::new().trim(csv::Trim::All).from_reader(file);

    // Rows the portal could never have rendered are skipped
    Ok(rdr
        .into_deserialize::<RawTransaction>()
        .filter_map(|result| match result {
            Ok(row) => Some(row),
            Err(e) => {
                warn!("Skipping invalid recorded row: {e}");
                None
            }
        }))
}
