use std::{io, path::PathBuf};

use thiserror::Error;
use uuid::Uuid;

/// Errors raised while reading question sources. All of them are fatal at startup.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{origin}: malformed csv: {source}")]
    Csv {
        origin: String,
        #[source]
        source: csv::Error,
    },
    #[error("{origin}: missing required column `{column}`")]
    MissingColumn { origin: String, column: &'static str },
    #[error("{origin} line {line}: missing value for `{field}`")]
    MissingField {
        origin: String,
        line: u64,
        field: String,
    },
    #[error("{origin} line {line}: {found} choices given, expected between 2 and 10")]
    ChoiceCount {
        origin: String,
        line: u64,
        found: usize,
    },
    #[error("{origin} line {line}: correct choice `{value}` is neither an index nor a letter")]
    InvalidCorrect {
        origin: String,
        line: u64,
        value: String,
    },
    #[error("{origin} line {line}: correct choice {index} is out of range for {choices} choices")]
    CorrectOutOfRange {
        origin: String,
        line: u64,
        index: usize,
        choices: usize,
    },
    #[error("{origin} line {line}: duplicate question in {subject}/{topic}")]
    Duplicate {
        origin: String,
        line: u64,
        subject: String,
        topic: String,
    },
    #[error("{origin}: no questions found")]
    Empty { origin: String },
}

/// Persistence failures of the progress database.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("no pending session for question {question_id}")]
    Stale { question_id: Uuid },
    #[error("choice {chosen} is not one of the {choices} offered choices")]
    InvalidChoice { chosen: usize, choices: usize },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("{0} should be set")]
    Missing(&'static str),
    #[error("{key} has invalid value `{value}`: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}
