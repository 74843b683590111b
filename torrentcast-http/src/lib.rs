//! Raw HTTP range server and ffmpeg-backed remux pipeline for the
//! TorrentCast streaming engine.

pub mod error;
pub mod media_type;
pub mod piece_stream;
pub mod range;
pub mod remux;
pub mod resource;
pub mod server;

pub use error::{Error, Result};
