//! Error types for the feed reader and the persistent store.

use std::time::Duration;

use thiserror::Error;

/// Failures that end the line reader loop. Reconnecting is the caller's job.
#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },
    #[error("no data received for {0:?}")]
    ReadTimeout(Duration),
    #[error("connection closed by peer")]
    Closed,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("invalid stored value in {column}: {value}")]
    InvalidValue { column: &'static str, value: String },
    #[error("cannot create database directory: {0}")]
    Io(#[from] std::io::Error),
}
