use std::collections::BTreeMap;
use std::fmt::Debug;
use std::ops::Range;

use async_trait::async_trait;
use derive_more::Display;
use fx_callback::Callback;
use fx_handle::Handle;

#[cfg(any(test, feature = "testing"))]
pub use mock::*;

/// A unique handle identifier of a [Torrent] session.
pub type TorrentHandle = Handle;

/// The global index of a piece within a torrent's piece sequence.
pub type PieceIndex = usize;

/// The download priority of a piece, as asserted by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PiecePriority {
    /// The piece is not currently of interest.
    None,
    /// The piece is within the sliding window and should be fetched.
    Normal,
    /// The piece is within the critical range ahead of the read head.
    Critical,
}

/// A file contained within a torrent, per spec §3.
#[derive(Debug, Clone, PartialEq)]
pub struct File {
    /// The file's original index within the torrent (not filtered).
    pub index: usize,
    pub name: String,
    /// The byte offset of this file's first byte within the torrent.
    pub offset: u64,
    pub length: u64,
}

impl File {
    /// The half-open byte range `[offset, offset + length)` of this file
    /// within the torrent.
    pub fn byte_range(&self) -> Range<u64> {
        self.offset..(self.offset + self.length)
    }

    /// Returns true if this file's extension suggests it is a video file.
    pub fn is_video(&self) -> bool {
        const VIDEO_EXTENSIONS: &[&str] = &[
            "mp4", "m4v", "mov", "webm", "mkv", "avi", "wmv", "flv", "ts", "m2ts", "mts", "mpg",
            "mpeg", "mpe", "m2v", "3gp", "3g2", "ogv", "ogg",
        ];

        self.name
            .rsplit('.')
            .next()
            .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
            .unwrap_or(false)
    }
}

/// The lifecycle state of a torrent session.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum TorrentState {
    /// Metadata is still being retrieved.
    Initializing,
    /// The swarm is actively fetching pieces.
    Running,
    /// `pause()` has been called; peer connections are preserved.
    Paused,
    /// The session has been removed.
    Removed,
}

/// Telemetry counters exposed by a [Torrent], per spec §4.B.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Metrics {
    pub download_speed: u32,
    pub upload_speed: u32,
    pub num_peers: u32,
    pub downloaded: u64,
    pub ratio: f32,
}

/// Events emitted by a [Torrent] as its state changes.
#[derive(Debug, Clone, PartialEq)]
pub enum TorrentEvent {
    StateChanged(TorrentState),
    PieceFinished(PieceIndex),
    DownloadStatus(Metrics),
}

/// A thin capability facade over a torrent client, per spec §4.B.
///
/// Implementations are interchangeable: a production adapter backed by a
/// real torrent engine, or a deterministic test fake (see [MockTorrent]).
#[async_trait]
pub trait Torrent: Debug + Callback<TorrentEvent> + Send + Sync {
    /// The unique identifier handle of this torrent session.
    fn handle(&self) -> TorrentHandle;

    /// The torrent's infohash.
    fn info_hash(&self) -> &str;

    /// The torrent's display name, e.g. from the magnet `dn` parameter or
    /// the metainfo's `name` field.
    fn name(&self) -> &str;

    /// The files contained in the torrent. May be empty if metadata is not
    /// yet known.
    async fn files(&self) -> Vec<File>;

    /// The largest file in the torrent, if metadata is known.
    async fn largest_file(&self) -> Option<File>;

    /// Checks whether the given byte range is fully present, validated and
    /// written to the piece store.
    async fn has_bytes(&self, bytes: &Range<u64>) -> bool;

    /// Checks whether the given piece is present.
    async fn has_piece(&self, piece: PieceIndex) -> bool;

    /// Marks a file as selected for download.
    async fn select_file(&self, file: &File);

    /// Marks a file as deselected; its pieces are no longer fetched.
    async fn deselect_file(&self, file: &File);

    /// Elevates a contiguous piece range to the highest priority.
    async fn mark_critical(&self, start: PieceIndex, end: PieceIndex);

    /// Prioritizes the given pieces at [PiecePriority::Normal].
    async fn prioritize_pieces(&self, pieces: &[PieceIndex]);

    /// Returns the current piece priorities.
    async fn piece_priorities(&self) -> BTreeMap<PieceIndex, PiecePriority>;

    /// The total number of pieces in the torrent, if known.
    async fn total_pieces(&self) -> Option<usize>;

    /// The configured piece length in bytes.
    fn piece_length(&self) -> u64;

    /// Stops requesting new blocks from peers. Connections are preserved.
    async fn pause(&self);

    /// Resumes requesting blocks from peers.
    async fn resume(&self);

    /// The current lifecycle state of the torrent.
    async fn state(&self) -> TorrentState;

    /// The torrent's telemetry counters.
    fn stats(&self) -> Metrics;
}

/// The engine-level factory that creates and tears down [Torrent]
/// sessions, per spec §4.B `add`/`remove`.
///
/// Mirrors `popcorn_fx_core::core::torrents::manager::TorrentManager`,
/// generalized to this workspace's single-session usage: the teacher's
/// `DowncastSync`/`impl_downcast!` bound and library-wide session
/// bookkeeping are dropped since the Control Surface only ever drives one
/// active session at a time.
#[async_trait]
pub trait TorrentEngine: Debug + Send + Sync {
    /// Adds a torrent from the given input, supplying the piece store as
    /// its only storage backend. Resolves once metadata is known, or fails
    /// with `ConnectionTimeout` after the configured timeout.
    async fn add(&self, input: crate::input::InputSpec) -> crate::Result<std::sync::Arc<dyn Torrent>>;

    /// Cancels all peer connections for the given handle and releases its
    /// piece storage.
    async fn remove(&self, handle: TorrentHandle);
}

#[cfg(any(test, feature = "testing"))]
mod mock {
    use super::*;
    use fx_callback::{Subscriber, Subscription};
    use mockall::mock;

    mock! {
        pub Torrent {}

        impl Debug for Torrent {
            fn fmt<'a>(&self, f: &mut std::fmt::Formatter<'a>) -> std::fmt::Result;
        }

        #[async_trait]
        impl Torrent for Torrent {
            fn handle(&self) -> TorrentHandle;
            fn info_hash(&self) -> &str;
            fn name(&self) -> &str;
            async fn files(&self) -> Vec<File>;
            async fn largest_file(&self) -> Option<File>;
            async fn has_bytes(&self, bytes: &Range<u64>) -> bool;
            async fn has_piece(&self, piece: PieceIndex) -> bool;
            async fn select_file(&self, file: &File);
            async fn deselect_file(&self, file: &File);
            async fn mark_critical(&self, start: PieceIndex, end: PieceIndex);
            async fn prioritize_pieces(&self, pieces: &[PieceIndex]);
            async fn piece_priorities(&self) -> BTreeMap<PieceIndex, PiecePriority>;
            async fn total_pieces(&self) -> Option<usize>;
            fn piece_length(&self) -> u64;
            async fn pause(&self);
            async fn resume(&self);
            async fn state(&self) -> TorrentState;
            fn stats(&self) -> Metrics;
        }

        impl Callback<TorrentEvent> for Torrent {
            fn subscribe(&self) -> Subscription<TorrentEvent>;
            fn subscribe_with(&self, subscriber: Subscriber<TorrentEvent>);
        }
    }

    mock! {
        pub TorrentEngine {}

        impl Debug for TorrentEngine {
            fn fmt<'a>(&self, f: &mut std::fmt::Formatter<'a>) -> std::fmt::Result;
        }

        #[async_trait]
        impl TorrentEngine for TorrentEngine {
            async fn add(&self, input: crate::input::InputSpec) -> crate::Result<std::sync::Arc<dyn Torrent>>;
            async fn remove(&self, handle: TorrentHandle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_is_video() {
        let file = File {
            index: 0,
            name: "Movie.mkv".to_string(),
            offset: 0,
            length: 100,
        };

        assert!(file.is_video());

        let file = File {
            index: 1,
            name: "readme.txt".to_string(),
            offset: 100,
            length: 10,
        };

        assert!(!file.is_video());
    }

    #[test]
    fn test_file_byte_range() {
        let file = File {
            index: 0,
            name: "Movie.mp4".to_string(),
            offset: 1000,
            length: 500,
        };

        assert_eq!(1000..1500, file.byte_range());
    }
}
