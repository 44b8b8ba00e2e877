use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScrapeError {
    /// The portal rendered something this crate does not understand. Fatal.
    #[error("Unrecognized format: {0}")]
    Format(String),

    #[error("Missing element: {0}")]
    MissingElement(String),

    #[error("Page failed to load: {0}")]
    Load(String),

    #[error("Bridge closed: {0}")]
    Bridge(String),

    #[error("Key already exists for {} transaction(s)", times.len())]
    Constraint { times: Vec<i64> },

    #[error("Write attempted in a read-only store transaction")]
    ReadOnly,

    #[error("Invalid key range: {0}")]
    KeyRange(String),

    #[error("Recovery made no progress past checkpoint {checkpoint:?}")]
    RecoveryStalled { checkpoint: Option<String> },

    #[error("Scrape task failed: {0}")]
    Task(String),

    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ScrapeError>;
