//! Error handling.

use std::error::Error as StdError;
use std::io;

use displaydoc::Display;

pub type BalloonResult<T> = Result<T, BalloonError>;

/// An error.
#[derive(Debug, Display)]
pub enum BalloonError {
    /// Invalid file ID "{id}": {reason}
    InvalidFileId { id: String, reason: &'static str },

    /// Hashing error: {0}
    HashError(super::hash::Error),

    /// I/O error: {error}.
    IoError { error: io::Error },
}

impl BalloonError {
    pub fn name(&self) -> &'static str {
        match self {
            Self::InvalidFileId { .. } => "InvalidFileId",
            Self::HashError(_) => "HashError",
            Self::IoError { .. } => "IoError",
        }
    }
}

impl StdError for BalloonError {}

impl From<io::Error> for BalloonError {
    fn from(error: io::Error) -> Self {
        Self::IoError { error }
    }
}

impl From<super::hash::Error> for BalloonError {
    fn from(error: super::hash::Error) -> Self {
        Self::HashError(error)
    }
}
