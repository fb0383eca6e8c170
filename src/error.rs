//! Error type shared by the parser, planner, session and history layers.

use thiserror::Error;

/// Every failure the tracker can report. All variants are recoverable; the
/// UI shows them as a dismissable toast and keeps running.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TrackerError {
    #[error("unsupported or unreadable file: {0}")]
    Format(String),
    #[error("no data found in the file")]
    EmptyData,
    #[error("{0}")]
    InvalidState(String),
    #[error("no exercise with id {0} in the current workout")]
    UnknownEntry(usize),
    #[error("no workout data to export")]
    EmptyHistory,
    #[error("storage failure: {0}")]
    Persistence(String),
}

impl TrackerError {
    pub(crate) fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }
}

impl From<std::io::Error> for TrackerError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for TrackerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<csv::Error> for TrackerError {
    fn from(err: csv::Error) -> Self {
        Self::Format(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;
