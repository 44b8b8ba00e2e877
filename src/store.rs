use std::collections::VecDeque;
use std::ops::Bound;
use std::path::Path;
use std::str::FromStr;

use log::debug;
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, ErrorCode, TransactionBehavior};
use rust_decimal::Decimal;

use crate::error::{Result, ScrapeError};
use crate::transaction::Transaction;

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS transactions (
    time INTEGER PRIMARY KEY,
    account TEXT NOT NULL,
    amount TEXT NOT NULL,
    location TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS transactions_account ON transactions (account);
";

/// Rows fetched per cursor round trip.
const CURSOR_PAGE: usize = 256;

const PUT: &str =
    "INSERT OR REPLACE INTO transactions (time, account, amount, location) VALUES (?1, ?2, ?3, ?4)";
const ADD: &str = "INSERT INTO transactions (time, account, amount, location) VALUES (?1, ?2, ?3, ?4)";

pub struct TransactionStore {
    conn: Connection,
}

impl TransactionStore {
    /// Opens or creates the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        debug!("Opened store at {}", path.display());
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Runs `body` in one database transaction. An error from `body` rolls
    /// everything back and is returned unchanged.
    pub fn run_transaction<R, F>(&mut self, writable: bool, body: F) -> Result<R>
    where
        F: FnOnce(&StoreTransaction<'_>) -> Result<R>,
    {
        let behavior = if writable {
            TransactionBehavior::Immediate
        } else {
            TransactionBehavior::Deferred
        };
        let tx = self.conn.transaction_with_behavior(behavior)?;
        let result = body(&StoreTransaction { conn: &tx, writable })?;
        tx.commit()?;
        Ok(result)
    }

    pub fn put(&mut self, transaction: &Transaction) -> Result<()> {
        self.run_transaction(true, |tx| tx.put(transaction))
    }

    pub fn add(&mut self, transaction: &Transaction) -> Result<()> {
        self.run_transaction(true, |tx| tx.add(transaction))
    }

    /// Lazily walks the store. With `Index::Account` the walk is ordered by
    /// `(account, time)` and `range` bounds the account.
    pub fn cursor(
        &self,
        range: Option<KeyRange>,
        direction: Direction,
        index: Option<Index>,
    ) -> Result<Cursor<'_>> {
        if let Some(range) = &range {
            range.check(index)?;
        }
        Ok(Cursor {
            conn: &self.conn,
            range,
            direction,
            index,
            position: None,
            buffer: VecDeque::new(),
            exhausted: false,
        })
    }

    /// All transactions, oldest first.
    pub fn all(&self) -> Result<Vec<Transaction>> {
        self.cursor(None, Direction::Next, None)?.collect()
    }

    pub fn latest(&self) -> Result<Option<Transaction>> {
        self.cursor(None, Direction::Prev, None)?.next().transpose()
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT count(*) FROM transactions", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

pub struct StoreTransaction<'a> {
    conn: &'a Connection,
    writable: bool,
}

impl StoreTransaction<'_> {
    fn ensure_writable(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(ScrapeError::ReadOnly)
        }
    }

    /// Inserts, overwriting whatever is stored under the same `time`.
    pub fn put(&self, transaction: &Transaction) -> Result<()> {
        self.ensure_writable()?;
        self.conn.prepare_cached(PUT)?.execute(params![
            transaction.time,
            transaction.account,
            transaction.amount.to_string(),
            transaction.location,
        ])?;
        Ok(())
    }

    /// Inserts, failing if the key is taken.
    pub fn add(&self, transaction: &Transaction) -> Result<()> {
        self.ensure_writable()?;
        let inserted = self.conn.prepare_cached(ADD)?.execute(params![
            transaction.time,
            transaction.account,
            transaction.amount.to_string(),
            transaction.location,
        ]);
        match inserted {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(ScrapeError::Constraint {
                    times: vec![transaction.time],
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get(&self, time: i64) -> Result<Option<Transaction>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT time, account, amount, location FROM transactions WHERE time = ?1")?;
        let mut rows = stmt.query_map(params![time], row_to_transaction)?;
        Ok(rows.next().transpose()?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Ascending.
    #[default]
    Next,
    Prev,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Index {
    Account,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Time(i64),
    Account(String),
}

impl Key {
    fn to_value(&self) -> Value {
        match self {
            Key::Time(time) => Value::Integer(*time),
            Key::Account(account) => Value::Text(account.clone()),
        }
    }

    fn matches(&self, index: Option<Index>) -> bool {
        matches!(
            (self, index),
            (Key::Time(_), None) | (Key::Account(_), Some(Index::Account))
        )
    }
}

impl From<i64> for Key {
    fn from(time: i64) -> Self {
        Key::Time(time)
    }
}

impl From<&str> for Key {
    fn from(account: &str) -> Self {
        Key::Account(account.to_string())
    }
}

impl From<String> for Key {
    fn from(account: String) -> Self {
        Key::Account(account)
    }
}

/// A range of keys, bounds open or closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    lower: Bound<Key>,
    upper: Bound<Key>,
}

fn bound(key: Key, open: bool) -> Bound<Key> {
    if open {
        Bound::Excluded(key)
    } else {
        Bound::Included(key)
    }
}

impl KeyRange {
    pub fn only(key: impl Into<Key>) -> Self {
        let key = key.into();
        Self {
            lower: Bound::Included(key.clone()),
            upper: Bound::Included(key),
        }
    }

    pub fn lower_bound(key: impl Into<Key>, open: bool) -> Self {
        Self {
            lower: bound(key.into(), open),
            upper: Bound::Unbounded,
        }
    }

    pub fn upper_bound(key: impl Into<Key>, open: bool) -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: bound(key.into(), open),
        }
    }

    pub fn bound(
        lower: impl Into<Key>,
        upper: impl Into<Key>,
        lower_open: bool,
        upper_open: bool,
    ) -> Self {
        Self {
            lower: bound(lower.into(), lower_open),
            upper: bound(upper.into(), upper_open),
        }
    }

    fn check(&self, index: Option<Index>) -> Result<()> {
        for b in [&self.lower, &self.upper] {
            if let Bound::Included(key) | Bound::Excluded(key) = b {
                if !key.matches(index) {
                    return Err(ScrapeError::KeyRange(format!("{key:?} cannot bound {index:?}")));
                }
            }
        }
        Ok(())
    }
}

/// Keyset-paginated walk over the store; each page is its own query.
pub struct Cursor<'a> {
    conn: &'a Connection,
    range: Option<KeyRange>,
    direction: Direction,
    index: Option<Index>,
    /// Last yielded `(key, time)`.
    position: Option<(Key, i64)>,
    buffer: VecDeque<Transaction>,
    exhausted: bool,
}

impl Cursor<'_> {
    fn fill(&mut self) -> Result<()> {
        let column = match self.index {
            None => "time",
            Some(Index::Account) => "account",
        };
        let (after, order) = match self.direction {
            Direction::Next => (">", "ASC"),
            Direction::Prev => ("<", "DESC"),
        };

        let mut clauses = Vec::new();
        let mut args = Vec::new();
        if let Some(range) = &self.range {
            for (b, inclusive, exclusive) in [(&range.lower, ">=", ">"), (&range.upper, "<=", "<")] {
                match b {
                    Bound::Included(key) => {
                        clauses.push(format!("{column} {inclusive} ?"));
                        args.push(key.to_value());
                    }
                    Bound::Excluded(key) => {
                        clauses.push(format!("{column} {exclusive} ?"));
                        args.push(key.to_value());
                    }
                    Bound::Unbounded => {}
                }
            }
        }
        match (&self.position, self.index) {
            (Some((_, time)), None) => {
                clauses.push(format!("time {after} ?"));
                args.push(Value::Integer(*time));
            }
            (Some((key, time)), Some(Index::Account)) => {
                clauses.push(format!("(account, time) {after} (?, ?)"));
                args.push(key.to_value());
                args.push(Value::Integer(*time));
            }
            (None, _) => {}
        }

        let filter = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let ordering = match self.index {
            None => format!("time {order}"),
            Some(Index::Account) => format!("account {order}, time {order}"),
        };
        let sql = format!(
            "SELECT time, account, amount, location FROM transactions {filter} ORDER BY {ordering} LIMIT {CURSOR_PAGE}"
        );

        let conn = self.conn;
        let mut stmt = conn.prepare_cached(&sql)?;
        let page = stmt
            .query_map(params_from_iter(args.iter()), row_to_transaction)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        if page.len() < CURSOR_PAGE {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            let key = match self.index {
                None => Key::Time(last.time),
                Some(Index::Account) => Key::Account(last.account.clone()),
            };
            self.position = Some((key, last.time));
        }
        self.buffer.extend(page);
        Ok(())
    }
}

impl Iterator for Cursor<'_> {
    type Item = Result<Transaction>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

fn row_to_transaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<Transaction> {
    let amount: String = row.get(2)?;
    let amount = Decimal::from_str(&amount)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;

    Ok(Transaction {
        time: row.get(0)?,
        account: row.get(1)?,
        amount,
        location: row.get(3)?,
    })
}
