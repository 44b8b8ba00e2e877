use eaccounts::read_recorded_rows;
use eaccounts::transaction::TransactionKind;
use std::fs;
use tempfile::NamedTempFile;

const HEADER: &str = "dateTime,accountName,cardNumber,location,transactionType,amount";

#[test]
fn test_read_recorded_rows_valid_csv() {
    let temp_file = NamedTempFile::new().unwrap();
    let csv_content = format!(
        r#"{HEADER}
2022-01-12 6:00 AM,Dining Dollars,000000000000009123,HDH 64 Degrees 64-RC,Debit,-2.50 USD
2022-01-12 6:00 AM, Dining Dollars ,000000000000009123,HDH Market,Credit,"3,749.00 USD""#
    );

    fs::write(&temp_file, csv_content).unwrap();

    let rows: Vec<_> = read_recorded_rows(temp_file.path()).unwrap().collect();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].date_time, "2022-01-12 6:00 AM");
    assert_eq!(rows[0].transaction_type, TransactionKind::Debit);
    assert_eq!(rows[0].amount, "-2.50 USD");

    // Fields are trimmed; quoted amounts keep their separators
    assert_eq!(rows[1].account_name, "Dining Dollars");
    assert_eq!(rows[1].transaction_type, TransactionKind::Credit);
    assert_eq!(rows[1].amount, "3,749.00 USD");
}

#[test]
fn test_read_recorded_rows_empty_csv() {
    let temp_file = NamedTempFile::new().unwrap();
    fs::write(&temp_file, HEADER).unwrap();

    let rows: Vec<_> = read_recorded_rows(temp_file.path()).unwrap().collect();

    assert!(rows.is_empty());
}

#[test]
fn test_read_recorded_rows_skips_unknown_types() {
    let temp_file = NamedTempFile::new().unwrap();
    let csv_content = format!(
        "{HEADER}\n\
        2022-01-12 6:01 AM,Triton Cash,0009,Bookstore,Refund,1.00 USD\n\
        2022-01-12 6:00 AM,Triton Cash,0009,Bookstore,Debit,-1.00 USD\n"
    );

    fs::write(&temp_file, csv_content).unwrap();

    let rows: Vec<_> = read_recorded_rows(temp_file.path()).unwrap().collect();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].date_time, "2022-01-12 6:00 AM");
}

#[test]
fn test_read_recorded_rows_invalid_file() {
    let result = read_recorded_rows(std::path::Path::new("nonexistent_file.csv"));
    assert!(result.is_err());
}

#[test]
fn test_read_recorded_rows_large_file() {
    let temp_file = NamedTempFile::new().unwrap();
    let mut csv_content = format!("{HEADER}\n");

    for i in 0..100 {
        csv_content.push_str(&format!(
            "2022-01-12 {}:{:02} PM,Dining Dollars,0009,HDH Market,Debit,-{i}.00 USD\n",
            i / 60 + 1,
            i % 60
        ));
    }

    fs::write(&temp_file, csv_content).unwrap();

    let rows: Vec<_> = read_recorded_rows(temp_file.path()).unwrap().collect();

    assert_eq!(rows.len(), 100);
    assert_eq!(rows[49].amount, "-49.00 USD");
    assert_eq!(rows[99].date_time, "2022-01-12 2:39 PM");
}
