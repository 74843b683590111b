use std::path::PathBuf;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

use crate::magnet::Magnet;

const DATA_URI_PREFIX: &str = "data:application/x-bittorrent;base64,";

/// The result type of input spec parsing.
pub type Result<T> = std::result::Result<T, InputError>;

/// Errors produced while interpreting a user-supplied torrent input.
#[derive(Debug, Error, PartialEq)]
pub enum InputError {
    #[error("input is empty")]
    Empty,
    #[error("invalid magnet uri, {0}")]
    Magnet(#[from] crate::magnet::MagnetError),
    #[error("data uri is not valid base64, {0}")]
    InvalidBase64(String),
}

/// A user-supplied torrent input, per spec §6.4: a magnet uri, a path to a
/// `.torrent` file, or a base64 `data:` uri carrying a metainfo blob.
#[derive(Debug, Clone, PartialEq)]
pub enum InputSpec {
    /// A `magnet:?xt=urn:btih:...` uri.
    Magnet(Magnet),
    /// A filesystem path to a `.torrent` metainfo file.
    TorrentFile(PathBuf),
    /// A decoded metainfo blob carried inline as a base64 data uri.
    MetainfoBytes(Vec<u8>),
}

impl InputSpec {
    /// Parses a raw input string into an [InputSpec].
    ///
    /// The value is classified by its prefix: `magnet:` uris are parsed as
    /// such, `data:application/x-bittorrent;base64,` uris are decoded, and
    /// anything else is treated as a filesystem path to a metainfo file.
    pub fn parse(value: &str) -> Result<Self> {
        if value.is_empty() {
            return Err(InputError::Empty);
        }

        if value.starts_with("magnet:") {
            return Ok(Self::Magnet(Magnet::from_str(value)?));
        }

        if let Some(encoded) = value.strip_prefix(DATA_URI_PREFIX) {
            let bytes = STANDARD
                .decode(encoded)
                .map_err(|e| InputError::InvalidBase64(e.to_string()))?;
            return Ok(Self::MetainfoBytes(bytes));
        }

        Ok(Self::TorrentFile(PathBuf::from(value)))
    }
}
