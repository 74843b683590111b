use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, error, trace, warn};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::EngineSettings;
use crate::estimator::BitrateEstimator;
use crate::piece_store::PieceStore;
use crate::session::{BufferInfo, Session};
use crate::torrent::PieceIndex;

/// A jump of more than this many seconds in reported playback time is
/// treated as a seek event, per spec §3.
const SEEK_THRESHOLD_SECONDS: u64 = 5;
/// Minimum interval between logged tick failures, per spec §4.D.
const FAILURE_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// `ceil(numerator / denominator)`, per the `⌈ ⌉` piece-count formulas of
/// spec §4.D steps 3 and 5.
fn div_ceil(numerator: u64, denominator: u64) -> u64 {
    let denominator = denominator.max(1);
    (numerator + denominator - 1) / denominator
}

/// The single periodic control loop that computes the piece window around
/// the read head, updates priorities, evicts pieces outside the window and
/// toggles swarm pause/resume, per spec §4.D.
pub struct Scheduler {
    session: Arc<Session>,
    piece_store: Arc<PieceStore>,
    estimator: Arc<BitrateEstimator>,
    settings: EngineSettings,
    cancellation_token: CancellationToken,
    buffer_info: watch::Sender<Option<BufferInfo>>,
    last_failure_log: Mutex<Option<Instant>>,
    remux_active: std::sync::atomic::AtomicBool,
}

impl Scheduler {
    pub fn new(
        session: Arc<Session>,
        piece_store: Arc<PieceStore>,
        estimator: Arc<BitrateEstimator>,
        settings: EngineSettings,
    ) -> Arc<Self> {
        let (tx, _rx) = watch::channel(None);

        Arc::new(Self {
            session,
            piece_store,
            estimator,
            settings,
            cancellation_token: CancellationToken::new(),
            buffer_info: tx,
            last_failure_log: Mutex::new(None),
            remux_active: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// Subscribes to the latest published [BufferInfo].
    pub fn subscribe(&self) -> watch::Receiver<Option<BufferInfo>> {
        self.buffer_info.subscribe()
    }

    /// The most recently published [BufferInfo], if a tick has run.
    pub fn latest(&self) -> Option<BufferInfo> {
        self.buffer_info.borrow().clone()
    }

    /// Marks whether the remux pipeline is currently consuming the read
    /// stream; the scheduler never soft-pauses while this is true, per
    /// spec §4.F.
    pub fn set_remux_active(&self, active: bool) {
        self.remux_active.store(active, Ordering::Relaxed);
    }

    fn remux_active(&self) -> bool {
        self.remux_active.load(Ordering::Relaxed)
    }

    /// Spawns the 500 ms tick loop on the current Tokio runtime. Returns a
    /// cancellation token the caller can use to stop it, mirroring the
    /// teacher's `CancellationToken`-guarded background task idiom.
    pub fn start(self: &Arc<Self>) -> CancellationToken {
        let scheduler = self.clone();
        let cancellation_token = self.cancellation_token.clone();
        let period = self.settings.scheduler_tick;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        debug!("Scheduler loop cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = scheduler.tick().await {
                            scheduler.log_failure_throttled(&e.to_string());
                        }
                    }
                }
            }
        });

        self.cancellation_token.clone()
    }

    /// Stops the scheduler loop.
    pub fn stop(&self) {
        self.cancellation_token.cancel();
    }

    fn log_failure_throttled(&self, message: &str) {
        let mut last = self.last_failure_log.lock().expect("scheduler lock poisoned");
        let now = Instant::now();
        let should_log = last.map(|t| now.duration_since(t) >= FAILURE_LOG_INTERVAL).unwrap_or(true);

        if should_log {
            error!("Scheduler tick failed, {}", message);
            *last = Some(now);
        }
    }

    /// Runs a single scheduler tick, per the nine steps of spec §4.D.
    pub async fn tick(&self) -> Result<(), crate::error::Error> {
        let session = &self.session;
        let piece_length = session.torrent.piece_length().max(1);
        let (file_piece_start, file_piece_end) = session.file_piece_range();

        // 1. Read the read head and derive current_piece.
        let bytes_per_second = self.estimator.bytes_per_second();
        let byte_position = session.read_head.resolve_byte_position(bytes_per_second);
        let current_piece = ((session.selected_file.offset + byte_position) / piece_length)
            .clamp(file_piece_start as u64, file_piece_end as u64) as PieceIndex;

        // 2. bytes_per_second already recomputed above.

        // 3. Compute the piece window.
        let max_combined_bytes = self.settings.soft_cap_bytes;
        let behind_bytes =
            ((session.buffer_config.min_ahead_seconds as f64 * bytes_per_second) as u64)
                .min(max_combined_bytes / 10);
        let pieces_behind = div_ceil(behind_bytes, piece_length) as usize;

        let ahead_bytes = session
            .buffer_config
            .ahead_bytes(bytes_per_second, (max_combined_bytes * 9) / 10);
        let pieces_ahead = div_ceil(ahead_bytes, piece_length).max(1) as usize;

        let window_start = current_piece.saturating_sub(pieces_behind).max(file_piece_start);
        let window_end = (current_piece + pieces_ahead).min(file_piece_end);

        // 4. Reassert file selection.
        for file in session.torrent.files().await {
            if file.index == session.selected_file.index {
                session.torrent.select_file(&file).await;
            } else {
                session.torrent.deselect_file(&file).await;
            }
        }

        // 5. Mark the critical range.
        let critical_bytes =
            (session.buffer_config.critical_seconds as f64 * bytes_per_second) as u64;
        let critical_pieces = div_ceil(critical_bytes, piece_length).max(1) as usize;
        let critical_end = (current_piece + critical_pieces).min(window_end);
        session.torrent.mark_critical(current_piece, critical_end).await;

        // 6. Unconditional eviction of pieces outside the window.
        let evicted = self.piece_store.evict_outside(window_start, window_end);
        if evicted > 0 {
            trace!(
                "Evicted {} pieces outside window [{}, {}]",
                evicted,
                window_start,
                window_end
            );
        }

        // 7. Hard cap check.
        let resident_bytes = self.piece_store.resident_bytes();
        if resident_bytes > self.settings.hard_cap_bytes {
            warn!(
                "Resident bytes {} exceeded hard cap {}, hard-pausing",
                resident_bytes, self.settings.hard_cap_bytes
            );
            session.set_hard_paused(true);
            session.torrent.pause().await;
            self.piece_store.evict_outside(current_piece, current_piece);
        }

        // 8. Soft pause / resume hysteresis.
        let buffered_end = self.buffered_contiguous_end(current_piece, window_end);
        let buffered_ahead_seconds = ((buffered_end.saturating_sub(current_piece)) as f64
            * piece_length as f64
            / bytes_per_second.max(1.0)) as f32;

        let t_full = session.buffer_config.max_ahead_seconds as f32;
        let t_resume = t_full * 0.5;

        if !session.is_hard_paused() {
            if !session.is_soft_paused()
                && buffered_ahead_seconds >= t_full
                && !self.remux_active()
            {
                session.set_soft_paused(true);
                session.torrent.pause().await;
            } else if session.is_soft_paused()
                && (buffered_ahead_seconds < t_resume || self.remux_active())
            {
                session.set_soft_paused(false);
                session.torrent.resume().await;
            }
        }

        if session.is_hard_paused()
            && resident_bytes < (self.settings.soft_cap_bytes * 8) / 10
        {
            session.set_hard_paused(false);
            session.torrent.resume().await;
        }

        // 9. Publish a fresh BufferInfo.
        let info = BufferInfo {
            buffered_ahead_seconds,
            buffer_size_mb: resident_bytes as f32 / (1024.0 * 1024.0),
            window_start,
            window_end,
            current_piece,
            buffered_start: window_start,
            buffered_end,
            quality_tier: session.buffer_config.tier,
            soft_paused: session.is_soft_paused(),
            hard_paused: session.is_hard_paused(),
        };
        let _ = self.buffer_info.send(Some(info));

        Ok(())
    }

    /// Returns the end of the contiguous run of resident pieces starting at
    /// `current_piece`, capped at `window_end`.
    fn buffered_contiguous_end(&self, current_piece: PieceIndex, window_end: PieceIndex) -> PieceIndex {
        let mut end = current_piece;
        while end < window_end && self.piece_store.has(end + 1) {
            end += 1;
        }
        end
    }

    /// Handles a seek event (spec §4.D "Seek handling"): clears both pause
    /// flags, resumes, and marks a fresh critical range around the new
    /// position.
    pub async fn handle_seek(&self, playback_time_seconds: u64) {
        let session = &self.session;
        session.read_head.record_playback_time(playback_time_seconds);
        session.read_head.record_byte_offset(0);

        session.set_soft_paused(false);
        session.set_hard_paused(false);
        session.torrent.resume().await;

        let bytes_per_second = self.estimator.bytes_per_second();
        let piece_length = session.torrent.piece_length().max(1);
        let byte_position = session.read_head.resolve_byte_position(bytes_per_second);
        let (file_piece_start, file_piece_end) = session.file_piece_range();
        let current_piece = ((session.selected_file.offset + byte_position) / piece_length)
            .clamp(file_piece_start as u64, file_piece_end as u64) as PieceIndex;

        let critical_bytes = (15.0 * bytes_per_second) as u64;
        let critical_pieces = div_ceil(critical_bytes, piece_length).max(1) as usize;
        let critical_end = (current_piece + critical_pieces).min(file_piece_end);

        session.torrent.mark_critical(current_piece, critical_end).await;
    }
}

/// Returns whether `new_time` differs from `previous_time` by more than the
/// seek threshold, per spec §3.
pub fn is_seek(previous_time: u64, new_time: u64) -> bool {
    previous_time.abs_diff(new_time) > SEEK_THRESHOLD_SECONDS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineSettings;
    use crate::session::Session;
    use crate::torrent::{File, MockTorrent, Metrics, TorrentState};
    use std::sync::Arc;
    use tokio::sync::mpsc::unbounded_channel;

    fn test_file() -> File {
        File {
            index: 0,
            name: "movie.mp4".to_string(),
            offset: 0,
            length: 100 * 1024 * 1024,
        }
    }

    fn mock_torrent(piece_length: u64) -> MockTorrent {
        let mut torrent = MockTorrent::new();
        torrent.expect_piece_length().return_const(piece_length);
        torrent.expect_files().returning(|| vec![test_file()]);
        torrent.expect_select_file().returning(|_| ());
        torrent.expect_deselect_file().returning(|_| ());
        torrent.expect_mark_critical().returning(|_, _| ());
        torrent.expect_pause().returning(|| ());
        torrent.expect_resume().returning(|| ());
        torrent.expect_stats().returning(Metrics::default);
        torrent.expect_state().returning(|| TorrentState::Running);
        torrent.expect_subscribe().returning(|| {
            let (_tx, rx) = unbounded_channel();
            rx
        });
        torrent
    }

    #[tokio::test]
    async fn test_tick_publishes_buffer_info() {
        let torrent: Arc<dyn crate::torrent::Torrent> = Arc::new(mock_torrent(16 * 1024));
        let session = Arc::new(Session::new(torrent, test_file()));
        let piece_store = Arc::new(PieceStore::new());
        let estimator = Arc::new(BitrateEstimator::new(test_file().length));
        let scheduler = Scheduler::new(session, piece_store, estimator, EngineSettings::default());

        scheduler.tick().await.unwrap();

        let info = scheduler.latest().expect("expected buffer info to be published");
        assert_eq!(0, info.current_piece);
        assert!(!info.hard_paused);
    }

    #[tokio::test]
    async fn test_handle_seek_marks_critical_range() {
        let torrent: Arc<dyn crate::torrent::Torrent> = Arc::new(mock_torrent(16 * 1024));
        let session = Arc::new(Session::new(torrent, test_file()));
        let piece_store = Arc::new(PieceStore::new());
        let estimator = Arc::new(BitrateEstimator::new(test_file().length));
        estimator.apply_probed_duration(120);
        let scheduler = Scheduler::new(session.clone(), piece_store, estimator, EngineSettings::default());

        scheduler.handle_seek(60).await;

        assert!(!session.is_soft_paused());
        assert!(!session.is_hard_paused());
        assert_eq!(60, session.read_head.playback_time_seconds());
    }

    #[test]
    fn test_is_seek() {
        assert!(is_seek(10, 1800));
        assert!(!is_seek(10, 12));
    }
}
