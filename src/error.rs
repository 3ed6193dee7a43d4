use thiserror::Error;

/// Crate-wide error type. Anything that aborts a collection cycle or a
/// persistence step ends up here.
#[derive(Debug, Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned HTTP {status} for {url}")]
    UpstreamStatus { status: u16, url: String },

    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Reasons a single upstream transaction record cannot be analyzed.
/// These skip the transaction; they never abort a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedTx {
    #[error("transaction has no txid")]
    MissingTxid,

    #[error("input {index} has no prevout")]
    MissingPrevout { index: usize },

    #[error("input {index} prevout has no value")]
    MissingInputValue { index: usize },

    #[error("output {index} has no value")]
    MissingOutputValue { index: usize },
}
