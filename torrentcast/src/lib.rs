//! Control surface for the TorrentCast streaming engine: wires the
//! torrent adapter, piece store, bitrate estimator, scheduler and HTTP
//! servers behind the seven operations a client drives a session with.

pub mod engine;

pub use engine::{Engine, EngineError, Result};
