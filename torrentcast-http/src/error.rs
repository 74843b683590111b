use std::{io, result};
use thiserror::Error;

/// The result type of the HTTP/remux module.
pub type Result<T> = result::Result<T, Error>;

/// Errors that can occur while serving or remuxing a video stream.
#[derive(Debug, Error)]
pub enum Error {
    /// The remux child exited with an unexpected error, per spec §7.
    /// Surfaced only as a log: the next player fetch implicitly starts a
    /// fresh remuxer, no restart loop is needed.
    #[error("the remux process failed, {0}")]
    RemuxFailure(String),
    #[error("an io error occurred, {0}")]
    Io(io::Error),
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::RemuxFailure(_), Self::RemuxFailure(_)) => true,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_eq() {
        assert_eq!(
            Error::RemuxFailure("boom".to_string()),
            Error::RemuxFailure("boom".to_string())
        );
        assert_ne!(
            Error::RemuxFailure("boom".to_string()),
            Error::Io(io::Error::new(io::ErrorKind::Other, "boom"))
        );
    }
}
