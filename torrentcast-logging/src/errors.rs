use std::{io, result};
use thiserror::Error;

/// The result type of logging operations.
pub type Result<T> = result::Result<T, Error>;

/// The errors of the logging crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error("a logger instance has already been initialized")]
    AlreadyInitialized,
    #[error("path does not exist")]
    NotFound,
    #[error("configuration file is invalid, {0}")]
    InvalidConfig(String),
    #[error("an io error occurred, {0}")]
    Io(#[from] io::Error),
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::AlreadyInitialized, Self::AlreadyInitialized) => true,
            (Self::NotFound, Self::NotFound) => true,
            (Self::InvalidConfig(a), Self::InvalidConfig(b)) => a == b,
            (Self::Io(_), Self::Io(_)) => true,
            _ => false,
        }
    }
}