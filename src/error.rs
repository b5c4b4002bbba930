//! Error taxonomy. Each enum variant doubles as a machine-readable error
//! category — callers match on the variant instead of parsing a message
//! string.

use thiserror::Error;

/// Errors raised while parsing or validating the config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line}: unknown option {option:?}")]
    UnknownOption { line: usize, option: String },
    #[error("line {line}: invalid value for {option}: {value:?}")]
    InvalidValue {
        line: usize,
        option: String,
        value: String,
    },
    #[error("both update_interval and snapshot_interval are disabled; at least one must run")]
    NoActiveInterval,
}

/// Errors from the SMA-X (Redis-like) source store.
#[derive(Debug, Error)]
pub enum SmaxError {
    #[error("connection failed: {0}")]
    Connection(#[from] redis::RedisError),
    #[error("scan of table {table:?} failed: {source}")]
    Scan {
        table: String,
        #[source]
        source: redis::RedisError,
    },
    #[error("bulk fetch timed out after {0:?}")]
    FetchTimeout(std::time::Duration),
}

/// Errors from the PostgreSQL side.
#[derive(Debug, Error)]
pub enum SqlError {
    #[error("connection failed: {0}")]
    Connection(#[from] sqlx::Error),
    #[error("statement failed: {statement}\ncaused by: {source}")]
    Statement {
        statement: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("identifier {0:?} is not a safe SQL identifier")]
    UnsafeIdentifier(String),
}

/// Errors surfaced by the writer while processing a dequeued sample.
///
/// A `WriterError` never escapes the writer loop: every variant results in
/// the sample being logged and dropped, and the writer continues with the
/// next one.
#[derive(Debug, Error)]
pub enum WriterError {
    #[error(transparent)]
    Sql(#[from] SqlError),
    #[error("programming invariant violated: {0}")]
    Invariant(String),
}
