//! Error types

use thiserror::Error;

/// Why a raw log line could not become a staging record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("line is empty")]
    EmptyLine,
    #[error("malformed line: expected at least {expected} fields, got {found}")]
    MalformedLine { expected: usize, found: usize },
    #[error("invalid {field} value '{value}'")]
    InvalidField { field: &'static str, value: String },
}

/// Failure talking to the warehouse.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),
    #[error("{op} failed: {source}")]
    Query {
        op: &'static str,
        #[source]
        source: sqlx::Error,
    },
    #[error("unsupported database driver '{0}'")]
    UnsupportedDriver(String),
}

impl StoreError {
    pub fn query(op: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| Self::Query { op, source }
    }
}

/// Failures that stop a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("cannot read log file: {0}")]
    Input(#[from] std::io::Error),
    #[error("staging batch of {records} records rejected after {lines_read} lines: {source}")]
    BatchWrite {
        records: usize,
        lines_read: u64,
        #[source]
        source: StoreError,
    },
}

/// Single-instance guard errors.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("another instance holds {path} (pid {pid}, age {age_secs}s)")]
    AlreadyRunning { path: String, pid: String, age_secs: u64 },
    #[error("cannot access pid file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
