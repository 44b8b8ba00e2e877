use eaccounts::config::ScrapeConfig;
use eaccounts::engine::pipeline::{refresh, scrape_into, ScrapeOptions, WriteMode};
use eaccounts::error::ScrapeError;
use eaccounts::page::replay::{ReplayHost, ReplayPortal};
use eaccounts::store::TransactionStore;
use eaccounts::time::{self, MS_PER_MIN};
use eaccounts::transaction::{RawTransaction, TransactionKind};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::str::FromStr;

fn raw(date_time: &str, kind: TransactionKind, amount: &str) -> RawTransaction {
    RawTransaction {
        date_time: date_time.to_string(),
        account_name: "Dining Dollars".to_string(),
        card_number: "000000000000009123".to_string(),
        location: "HDH Market".to_string(),
        transaction_type: kind,
        amount: amount.to_string(),
    }
}

fn debit(date_time: &str, amount: &str) -> RawTransaction {
    raw(date_time, TransactionKind::Debit, amount)
}

fn config() -> ScrapeConfig {
    ScrapeConfig {
        portal_url: "replay://transactions".to_string(),
        burst_quiet_ms: 5,
        ..ScrapeConfig::default()
    }
}

fn host(rows: Vec<RawTransaction>, page_size: usize, die_after: Option<usize>) -> ReplayHost {
    let portal = ReplayPortal::new(rows).unwrap().page_size(page_size).die_after(die_after);
    ReplayHost::new(portal)
}

fn minute_of(date_time: &str) -> i64 {
    time::parse(date_time).unwrap()
}

async fn scrape(host: ReplayHost, store: &mut TransactionStore, mode: WriteMode) -> Result<usize, ScrapeError> {
    let options = ScrapeOptions {
        mode,
        ..ScrapeOptions::default()
    };
    scrape_into(host, store, &config(), &options).await.map(|r| r.written)
}

#[tokio::test]
async fn test_same_minute_debit_and_credit() {
    let rows = vec![
        debit("2022-01-12 6:00 AM", "-2.50 USD"),
        raw("2022-01-12 6:00 AM", TransactionKind::Credit, "8.00 USD"),
    ];
    let mut store = TransactionStore::open_in_memory().unwrap();

    scrape(host(rows, 20, None), &mut store, WriteMode::Put).await.unwrap();

    // Oldest first: the credit was listed second, so it is the older one.
    let t = 1_641_967_200_000;
    let stored = store.all().unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].time, t);
    assert_eq!(stored[0].amount, Decimal::from_str("8.00").unwrap());
    assert_eq!(stored[1].time, t + 1);
    assert_eq!(stored[1].amount, Decimal::from_str("-2.50").unwrap());
}

#[tokio::test]
async fn test_death_resumes_from_penultimate_timestamp() {
    let rows = vec![
        debit("2022-01-12 6:02 AM", "-1.00 USD"),
        debit("2022-01-12 6:01 AM", "-2.00 USD"),
        debit("2022-01-12 6:00 AM", "-3.00 USD"),
        debit("2022-01-12 5:59 AM", "-4.00 USD"),
        debit("2022-01-12 5:58 AM", "-5.00 USD"),
    ];
    let host = host(rows, 3, Some(1));
    let mut store = TransactionStore::open_in_memory().unwrap();

    let written = scrape(host.clone(), &mut store, WriteMode::Put).await.unwrap();

    assert_eq!(written, 5);
    assert_eq!(host.sessions(), 3);
    let amounts: Vec<_> = store.all().unwrap().iter().map(|t| t.amount.to_string()).collect();
    assert_eq!(amounts, vec!["-5.00", "-4.00", "-3.00", "-2.00", "-1.00"]);
}

/// Three rows per minute or two, alternating, counting down from 9:00 AM.
fn dense_history(n: usize) -> Vec<RawTransaction> {
    let start = minute_of("2022-01-12 9:00 AM");
    let mut rows = Vec::new();
    let mut minute = start;
    while rows.len() < n {
        let cluster = if (start - minute) % 2 == 0 { 3 } else { 2 };
        for _ in 0..cluster {
            if rows.len() == n {
                break;
            }
            let cents = rows.len() + 1;
            let amount = format!("-{}.{:02} USD", cents / 100, cents % 100);
            rows.push(debit(&time::format(minute), &amount));
        }
        minute -= 1;
    }
    rows
}

#[tokio::test]
async fn test_every_row_stored_exactly_once_despite_repeated_deaths() {
    let rows = dense_history(60);
    let mut expected: BTreeMap<i64, Vec<String>> = BTreeMap::new();
    for row in &rows {
        expected.entry(minute_of(&row.date_time)).or_default().push(row.amount.replace(" USD", ""));
    }

    let host = host(rows, 7, Some(3));
    let mut store = TransactionStore::open_in_memory().unwrap();
    let written = scrape(host.clone(), &mut store, WriteMode::Put).await.unwrap();

    assert_eq!(written, 60);
    assert!(host.sessions() > 1);

    let stored = store.all().unwrap();
    assert_eq!(stored.len(), 60);
    assert!(stored.windows(2).all(|w| w[0].time < w[1].time));

    let mut actual: BTreeMap<i64, Vec<String>> = BTreeMap::new();
    for tx in &stored {
        assert!(tx.time - tx.minute() * MS_PER_MIN < 3);
        actual.entry(tx.minute()).or_default().push(tx.amount.to_string());
    }
    // Within a minute, listing order is newest first while storage is oldest first.
    for amounts in actual.values_mut() {
        amounts.reverse();
    }
    assert_eq!(actual, expected);
}

#[tokio::test]
async fn test_put_twice_is_idempotent() {
    let rows = dense_history(25);
    let mut store = TransactionStore::open_in_memory().unwrap();

    scrape(host(rows.clone(), 4, Some(4)), &mut store, WriteMode::Put).await.unwrap();
    let first = store.all().unwrap();
    scrape(host(rows, 5, None), &mut store, WriteMode::Put).await.unwrap();

    assert_eq!(store.all().unwrap(), first);
}

#[tokio::test]
async fn test_add_twice_conflicts_on_every_row() {
    let rows = dense_history(12);
    let mut store = TransactionStore::open_in_memory().unwrap();

    let written = scrape(host(rows.clone(), 5, None), &mut store, WriteMode::Add).await.unwrap();
    assert_eq!(written, 12);
    let before = store.all().unwrap();

    match scrape(host(rows, 5, None), &mut store, WriteMode::Add).await {
        Err(ScrapeError::Constraint { mut times }) => {
            times.sort();
            let stored: Vec<_> = before.iter().map(|t| t.time).collect();
            assert_eq!(times, stored);
        }
        other => panic!("expected a constraint error, got {other:?}"),
    }
    assert_eq!(store.all().unwrap(), before);
}

#[tokio::test]
async fn test_add_rolls_back_only_conflicting_batches() {
    let mut store = TransactionStore::open_in_memory().unwrap();
    scrape(host(vec![debit("2022-01-12 6:00 AM", "-1.00 USD")], 5, None), &mut store, WriteMode::Put)
        .await
        .unwrap();

    let rows = vec![
        debit("2022-01-12 6:01 AM", "-2.00 USD"),
        debit("2022-01-12 6:00 AM", "-1.00 USD"),
    ];
    let result = scrape(host(rows, 5, None), &mut store, WriteMode::Add).await;

    assert!(matches!(result, Err(ScrapeError::Constraint { ref times }) if times.len() == 1));
    // Both rows arrive in one burst, so the new one was rolled back with it.
    assert_eq!(store.count().unwrap(), 1);
}

#[tokio::test]
async fn test_refresh_only_writes_newer_transactions() {
    let old = vec![
        debit("2022-01-12 6:03 AM", "-3.00 USD"),
        debit("2022-01-12 6:02 AM", "-2.00 USD"),
        debit("2022-01-12 6:01 AM", "-1.00 USD"),
    ];
    let mut store = TransactionStore::open_in_memory().unwrap();
    scrape(host(old.clone(), 2, None), &mut store, WriteMode::Add).await.unwrap();

    let mut now = vec![
        debit("2022-01-12 6:05 AM", "-5.00 USD"),
        debit("2022-01-12 6:04 AM", "-4.00 USD"),
    ];
    now.extend(old);
    let host = host(now, 2, None);

    let report = refresh(host, &mut store, &config(), WriteMode::Add).await.unwrap();

    assert_eq!(report.written, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(store.count().unwrap(), 5);
    let latest = store.latest().unwrap().unwrap();
    assert_eq!(latest.amount, Decimal::from_str("-5.00").unwrap());
}

#[tokio::test]
async fn test_refresh_picks_up_late_rows_in_the_newest_minute() {
    let mut store = TransactionStore::open_in_memory().unwrap();
    let first = vec![debit("2022-01-12 6:03 AM", "-3.00 USD")];
    scrape(host(first, 5, None), &mut store, WriteMode::Put).await.unwrap();

    let later = vec![
        debit("2022-01-12 6:03 AM", "-9.00 USD"),
        debit("2022-01-12 6:03 AM", "-3.00 USD"),
    ];
    let report = refresh(host(later, 5, None), &mut store, &config(), WriteMode::Add).await.unwrap();

    assert_eq!(report.written, 1);
    let stored = store.all().unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1].amount, Decimal::from_str("-9.00").unwrap());
}

#[tokio::test]
async fn test_refresh_of_empty_store_scrapes_everything() {
    let mut store = TransactionStore::open_in_memory().unwrap();

    let report = refresh(host(dense_history(9), 4, None), &mut store, &config(), WriteMode::Put)
        .await
        .unwrap();

    assert_eq!(report.written, 9);
    assert_eq!(report.skipped, 0);
}

#[tokio::test]
async fn test_format_error_aborts_scrape() {
    let rows = vec![raw("2022-01-12 6:00 AM", TransactionKind::Debit, "lots")];
    let mut store = TransactionStore::open_in_memory().unwrap();

    let result = scrape(host(rows, 5, None), &mut store, WriteMode::Put).await;

    assert!(matches!(result, Err(ScrapeError::Format(_))));
    assert_eq!(store.count().unwrap(), 0);
}
