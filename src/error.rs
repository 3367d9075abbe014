//! Error taxonomy for the extraction pipeline.
//!
//! Each variant carries its own blast radius:
//!
//! - [`TapError::Config`] and [`TapError::Schema`] stop the offending table
//!   before (or while) it is read; other tables still run.
//! - [`CoercionError`] is scoped to a single row. The driver drops the row,
//!   logs it and keeps going.
//! - [`TapError::SourceIo`] stops the current file. Its bookmark is never
//!   advanced, so the next run retries the whole file.
//! - [`TapError::Output`] means the message transport itself is broken and
//!   aborts the run.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TapError {
    #[error("table '{table}': invalid configuration: {message}")]
    Config { table: String, message: String },
    #[error("table '{table}': {message}")]
    Schema { table: String, message: String },
    #[error(transparent)]
    Coercion(#[from] CoercionError),
    #[error("reading '{file}': {source}")]
    SourceIo {
        file: String,
        #[source]
        source: io::Error,
    },
    #[error("writing output: {0}")]
    Output(#[source] io::Error),
}

impl TapError {
    pub fn config(table: impl Into<String>, message: impl Into<String>) -> Self {
        TapError::Config {
            table: table.into(),
            message: message.into(),
        }
    }

    pub fn schema(table: impl Into<String>, message: impl Into<String>) -> Self {
        TapError::Schema {
            table: table.into(),
            message: message.into(),
        }
    }

    pub fn source_io(file: impl Into<String>, source: io::Error) -> Self {
        TapError::SourceIo {
            file: file.into(),
            source,
        }
    }

    /// Wraps a third-party reader error (csv, zip, calamine) as a file-scoped failure.
    pub fn invalid_source<E>(file: impl Into<String>, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        TapError::source_io(file, io::Error::new(io::ErrorKind::InvalidData, err))
    }

    /// True when the whole run must stop rather than just the current table.
    pub fn aborts_run(&self) -> bool {
        matches!(self, TapError::Output(_))
    }
}

/// A cell that could not be converted under a column type that excludes null.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("line {line}, column '{column}': {message} (value {value:?})")]
pub struct CoercionError {
    pub column: String,
    pub value: Option<String>,
    pub line: usize,
    pub message: String,
}
