use std::{io, result};
use thiserror::Error;

use crate::magnet::MagnetError;

/// The result type of the core engine operations.
pub type Result<T> = result::Result<T, Error>;

/// The errors surfaced by the torrent adapter, piece store and scheduler.
#[derive(Debug, Error)]
pub enum Error {
    /// The given input spec could not be parsed.
    #[error("invalid input, {0}")]
    InvalidInput(String),
    /// An operation was attempted before the engine was ready.
    #[error("the engine is not ready")]
    EngineNotReady,
    /// No torrent metadata was received within the allotted time.
    #[error("connection timed out while fetching torrent metadata")]
    ConnectionTimeout,
    /// The torrent does not contain a file that can be streamed.
    #[error("no video file found in the torrent")]
    NoVideoFile,
    /// The requested file index does not exist within the torrent.
    #[error("file index {0} does not exist in the torrent")]
    InvalidFileIndex(usize),
    /// The piece store reports that the session backing it is gone.
    #[error("the piece store session is no longer active")]
    SessionGone,
    /// An I/O error occurred.
    #[error("an io error occurred, {0}")]
    Io(io::Error),
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::InvalidInput(_), Self::InvalidInput(_)) => true,
            (Self::EngineNotReady, Self::EngineNotReady) => true,
            (Self::ConnectionTimeout, Self::ConnectionTimeout) => true,
            (Self::NoVideoFile, Self::NoVideoFile) => true,
            (Self::InvalidFileIndex(a), Self::InvalidFileIndex(b)) => a == b,
            (Self::SessionGone, Self::SessionGone) => true,
            (Self::Io(_), Self::Io(_)) => true,
            _ => false,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<MagnetError> for Error {
    fn from(e: MagnetError) -> Self {
        Self::InvalidInput(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_eq() {
        assert_eq!(Error::EngineNotReady, Error::EngineNotReady);
        assert_eq!(Error::InvalidFileIndex(2), Error::InvalidFileIndex(2));
        assert_ne!(Error::InvalidFileIndex(1), Error::InvalidFileIndex(2));
        assert_ne!(Error::NoVideoFile, Error::EngineNotReady);
    }
}
