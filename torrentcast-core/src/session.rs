use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::{BufferConfig, QualityTier};
use crate::torrent::{File, PieceIndex, Torrent};

/// The scheduler-private read-head coordinates, per spec §3.
///
/// The byte offset wins when non-zero; otherwise
/// `playback_time_seconds * bytes_per_second` is used.
#[derive(Debug, Default)]
pub struct ReadHead {
    playback_time_seconds: AtomicU64,
    playback_byte_offset: AtomicU64,
}

impl ReadHead {
    /// Records a range request's start byte as the new authoritative
    /// playback position.
    pub fn record_byte_offset(&self, offset: u64) {
        self.playback_byte_offset.store(offset, Ordering::Relaxed);
    }

    /// Records a best-effort playback time update from the player.
    pub fn record_playback_time(&self, seconds: u64) {
        self.playback_time_seconds.store(seconds, Ordering::Relaxed);
    }

    pub fn byte_offset(&self) -> u64 {
        self.playback_byte_offset.load(Ordering::Relaxed)
    }

    pub fn playback_time_seconds(&self) -> u64 {
        self.playback_time_seconds.load(Ordering::Relaxed)
    }

    /// Resolves the current byte position, per spec §3: the byte offset
    /// wins when non-zero, otherwise it is derived from playback time.
    pub fn resolve_byte_position(&self, bytes_per_second: f64) -> u64 {
        let byte_offset = self.byte_offset();
        if byte_offset != 0 {
            return byte_offset;
        }

        (self.playback_time_seconds() as f64 * bytes_per_second) as u64
    }
}

/// Recomputed every scheduler tick, per spec §3.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferInfo {
    pub buffered_ahead_seconds: f32,
    pub buffer_size_mb: f32,
    pub window_start: PieceIndex,
    pub window_end: PieceIndex,
    pub current_piece: PieceIndex,
    pub buffered_start: PieceIndex,
    pub buffered_end: PieceIndex,
    pub quality_tier: QualityTier,
    pub soft_paused: bool,
    pub hard_paused: bool,
}

/// A single active streaming session, identified by infohash, per spec §3.
///
/// Exactly one session exists at a time (enforced by the engine facade, not
/// this type); starting a new one fully tears down the prior one before
/// admitting it.
pub struct Session {
    pub torrent: Arc<dyn Torrent>,
    pub selected_file: File,
    pub buffer_config: BufferConfig,
    pub read_head: ReadHead,
    soft_paused: AtomicBool,
    hard_paused: AtomicBool,
}

impl Session {
    pub fn new(torrent: Arc<dyn Torrent>, selected_file: File) -> Self {
        let buffer_config = BufferConfig::for_file_length(selected_file.length);

        Self {
            torrent,
            selected_file,
            buffer_config,
            read_head: ReadHead::default(),
            soft_paused: AtomicBool::new(false),
            hard_paused: AtomicBool::new(false),
        }
    }

    pub fn info_hash(&self) -> &str {
        self.torrent.info_hash()
    }

    pub fn is_soft_paused(&self) -> bool {
        self.soft_paused.load(Ordering::Relaxed)
    }

    pub fn is_hard_paused(&self) -> bool {
        self.hard_paused.load(Ordering::Relaxed)
    }

    pub fn set_soft_paused(&self, value: bool) {
        self.soft_paused.store(value, Ordering::Relaxed);
    }

    pub fn set_hard_paused(&self, value: bool) {
        self.hard_paused.store(value, Ordering::Relaxed);
    }

    /// The piece range `[start, end]` spanned by the selected file.
    pub fn file_piece_range(&self) -> (PieceIndex, PieceIndex) {
        let piece_length = self.torrent.piece_length().max(1);
        let start = (self.selected_file.offset / piece_length) as usize;
        let end = ((self.selected_file.offset + self.selected_file.length.saturating_sub(1))
            / piece_length) as usize;
        (start, end)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("info_hash", &self.info_hash())
            .field("selected_file", &self.selected_file)
            .field("soft_paused", &self.is_soft_paused())
            .field("hard_paused", &self.is_hard_paused())
            .finish()
    }
}
