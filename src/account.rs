use crate::transaction::Transaction;

use rust_decimal::Decimal;
use serde::Serialize;

/// A transaction together with the account balance right after it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccumulatedTransaction {
    #[serde(flatten)]
    pub transaction: Transaction,
    pub balance: Decimal,
}

/// Running balance over a time-ordered slice of transactions, keeping only
/// those accepted by `filter`.
pub fn accumulate<F>(transactions: &[Transaction], filter: F) -> Vec<AccumulatedTransaction>
where
    F: Fn(&Transaction) -> bool,
{
    let mut balance = Decimal::ZERO;

    transactions
        .iter()
        .filter(|tx| filter(tx))
        .map(|tx| {
            balance += tx.amount;
            AccumulatedTransaction {
                transaction: tx.clone(),
                balance,
            }
        })
        .collect()
}

pub fn accumulate_account(transactions: &[Transaction], account: &str) -> Vec<AccumulatedTransaction> {
    accumulate(transactions, |tx| tx.account == account)
}
