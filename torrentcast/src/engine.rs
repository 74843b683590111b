use std::sync::Arc;

use log::{debug, warn};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use torrentcast_core::config::{BufferConfig, EngineSettings, QualityTier};
use torrentcast_core::estimator::BitrateEstimator;
use torrentcast_core::input::InputSpec;
use torrentcast_core::piece_store::PieceStore;
use torrentcast_core::scheduler::{is_seek, Scheduler};
use torrentcast_core::session::Session;
use torrentcast_core::torrent::{Torrent, TorrentEngine};
use torrentcast_http::media_type::{media_type_for, needs_remux};
use torrentcast_http::remux::RemuxPipeline;
use torrentcast_http::server::{RawServer, RemuxServer};

/// The error surfaced at the Control Surface seam, composing the two
/// sub-crates' error enums, per spec §7 / SPEC_FULL §3.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] torrentcast_core::Error),
    #[error(transparent)]
    Http(#[from] torrentcast_http::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// One file entry in a torrent's catalogue, per spec §4.G `torrent.add`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FileSummary {
    pub index: usize,
    pub name: String,
    pub size: u64,
    pub is_video: bool,
}

/// The catalogue returned by `torrent.add`, per spec §4.G.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TorrentInfo {
    pub name: String,
    pub info_hash: String,
    pub files: Vec<FileSummary>,
    pub total_size: u64,
}

/// The result of selecting a file for streaming, per spec §4.G
/// `torrent.selectFile`/`torrent.start`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SelectedFile {
    pub url: String,
    pub name: String,
    pub size: u64,
    pub content_type: String,
    pub info_hash: String,
    pub transcoded: bool,
    pub estimated_duration: u64,
}

/// A snapshot returned by `torrent.getInfo`, per spec §4.G.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Snapshot {
    pub info_hash: String,
    pub name: String,
    pub selected_file: String,
    pub transcoded: bool,
}

/// The status payload emitted every 500 ms on the `torrent:status` channel,
/// per spec §6.3.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusEvent {
    pub download_speed: u32,
    pub upload_speed: u32,
    pub progress: f32,
    pub num_peers: u32,
    pub downloaded: u64,
    pub ratio: f32,
    pub buffered_ahead_seconds: f32,
    pub buffer_size_mb: f32,
    pub quality_tier: QualityTier,
    pub transcoded: bool,
    pub actual_duration: Option<u64>,
}

struct ActiveSession {
    torrent: Arc<dyn Torrent>,
    session: Arc<Session>,
    piece_store: Arc<PieceStore>,
    scheduler: Arc<Scheduler>,
    scheduler_token: tokio_util::sync::CancellationToken,
    raw_server: Option<RawServer>,
    remux_server: Option<RemuxServer>,
    status_task: JoinHandle<()>,
    probe_task: JoinHandle<()>,
    transcoded: bool,
}

/// The Control Surface, per spec §4.G: wires the Torrent Adapter, Piece
/// Store, Scheduler, Bitrate Estimator and HTTP servers behind one value
/// whose lifecycle is `init -> (add/select/stop)* -> destroy`.
///
/// Grounded on how `popcorn-fx-bootstrap`'s `Bootstrapper` composes
/// long-lived services behind a single entry point, generalized away from
/// that crate's GUI/installer concerns.
pub struct Engine {
    torrent_engine: Arc<dyn TorrentEngine>,
    settings: EngineSettings,
    pending_torrent: Mutex<Option<Arc<dyn Torrent>>>,
    active: Mutex<Option<ActiveSession>>,
    status: watch::Sender<Option<StatusEvent>>,
}

impl Engine {
    pub fn new(torrent_engine: Arc<dyn TorrentEngine>, settings: EngineSettings) -> Arc<Self> {
        let (status, _rx) = watch::channel(None);
        Arc::new(Self {
            torrent_engine,
            settings,
            pending_torrent: Mutex::new(None),
            active: Mutex::new(None),
            status,
        })
    }

    /// `torrent.add`: adds the torrent, deselects every file, and returns
    /// its catalogue.
    pub async fn add(&self, input: InputSpec) -> Result<TorrentInfo> {
        let torrent = self.torrent_engine.add(input).await?;
        let files = torrent.files().await;
        if files.is_empty() {
            self.torrent_engine.remove(torrent.handle()).await;
            return Err(torrentcast_core::Error::NoVideoFile.into());
        }

        for file in &files {
            torrent.deselect_file(file).await;
        }

        let total_size = files.iter().map(|f| f.length).sum();
        let info = TorrentInfo {
            name: torrent.name().to_string(),
            info_hash: torrent.info_hash().to_string(),
            files: files
                .iter()
                .map(|f| FileSummary {
                    index: f.index,
                    name: f.name.clone(),
                    size: f.length,
                    is_video: f.is_video(),
                })
                .collect(),
            total_size,
        };

        *self.pending_torrent.lock().await = Some(torrent);
        Ok(info)
    }

    /// `torrent.selectFile`: deselects every other file, selects the given
    /// one, starts the Scheduler, schedules the duration probe, and
    /// returns the URL of whichever endpoint (raw or remux) will serve it.
    pub async fn select_file(&self, index: usize) -> Result<SelectedFile> {
        let torrent = self
            .pending_torrent
            .lock()
            .await
            .clone()
            .ok_or(torrentcast_core::Error::EngineNotReady)?;

        let files = torrent.files().await;
        let selected = files
            .iter()
            .find(|f| f.index == index)
            .cloned()
            .ok_or(torrentcast_core::Error::InvalidFileIndex(index))?;

        self.teardown_active().await;

        for file in &files {
            if file.index == selected.index {
                torrent.select_file(file).await;
            } else {
                torrent.deselect_file(file).await;
            }
        }

        let session = Arc::new(Session::new(torrent.clone(), selected.clone()));
        let piece_store = Arc::new(PieceStore::new());
        let estimator = Arc::new(BitrateEstimator::new(selected.length));
        let scheduler = Scheduler::new(
            session.clone(),
            piece_store.clone(),
            estimator.clone(),
            self.settings.clone(),
        );
        let scheduler_token = scheduler.start();

        let remux_pipeline = RemuxPipeline::new(
            session.clone(),
            piece_store.clone(),
            estimator.clone(),
            scheduler.clone(),
            self.settings.clone(),
        );

        let transcoded = needs_remux(&selected.name);
        let (raw_server, remux_server, url) = if transcoded {
            let remux_server = RemuxServer::start(remux_pipeline.clone(), &self.settings).await?;
            let url = format!("http://127.0.0.1:{}/", remux_server.addr().port());
            (None, Some(remux_server), url)
        } else {
            let raw_server = RawServer::start(
                session.clone(),
                piece_store.clone(),
                estimator.clone(),
                &self.settings,
            )
            .await?;
            let url = format!("http://127.0.0.1:{}/", raw_server.addr().port());
            (Some(raw_server), None, url)
        };

        let estimated_duration = Arc::new(std::sync::atomic::AtomicU64::new(
            BufferConfig::estimated_duration_seconds(selected.length),
        ));

        let probe_task = {
            let remux_pipeline = remux_pipeline.clone();
            let estimated_duration = estimated_duration.clone();
            tokio::spawn(async move {
                if let Some(duration) = remux_pipeline.probe_duration_with_retry().await {
                    estimated_duration.store(duration, std::sync::atomic::Ordering::Relaxed);
                }
            })
        };

        let status_task = self.spawn_status_task(
            torrent.clone(),
            scheduler.clone(),
            estimated_duration.clone(),
            selected.length,
            transcoded,
        );

        let content_type = media_type_for(&selected.name).to_string();
        let result = SelectedFile {
            url,
            name: selected.name.clone(),
            size: selected.length,
            content_type,
            info_hash: torrent.info_hash().to_string(),
            transcoded,
            estimated_duration: estimated_duration.load(std::sync::atomic::Ordering::Relaxed),
        };

        *self.active.lock().await = Some(ActiveSession {
            torrent,
            session,
            piece_store,
            scheduler,
            scheduler_token,
            raw_server,
            remux_server,
            status_task,
            probe_task,
            transcoded,
        });

        Ok(result)
    }

    /// `torrent.start`: convenience that adds the torrent then auto-picks
    /// the largest video file (or the largest file if none match).
    pub async fn start(&self, input: InputSpec) -> Result<SelectedFile> {
        let info = self.add(input).await?;
        let index = info
            .files
            .iter()
            .filter(|f| f.is_video)
            .max_by_key(|f| f.size)
            .or_else(|| info.files.iter().max_by_key(|f| f.size))
            .map(|f| f.index)
            .ok_or(torrentcast_core::Error::NoVideoFile)?;

        self.select_file(index).await
    }

    /// `torrent.stop`: terminates any remux, stops the Scheduler, removes
    /// the session with its piece storage destroyed, and resets state.
    /// Idempotent.
    pub async fn stop(&self) {
        self.teardown_active().await;
        *self.pending_torrent.lock().await = None;
        let _ = self.status.send(None);
    }

    /// `torrent.getInfo`.
    pub async fn get_info(&self) -> Option<Snapshot> {
        let active = self.active.lock().await;
        active.as_ref().map(|active| Snapshot {
            info_hash: active.session.info_hash().to_string(),
            name: active.torrent.name().to_string(),
            selected_file: active.session.selected_file.name.clone(),
            transcoded: active.transcoded,
        })
    }

    /// `torrent.updatePlayback`: fire-and-forget; triggers the seek path
    /// when the reported time differs from the previous one by more than
    /// 5 seconds.
    pub async fn update_playback(&self, time_seconds: u64) {
        let active = self.active.lock().await;
        let active = match active.as_ref() {
            Some(active) => active,
            None => return,
        };

        let previous = active.session.read_head.playback_time_seconds();
        active.session.read_head.record_playback_time(time_seconds);

        if is_seek(previous, time_seconds) {
            debug!("Seek detected: {}s -> {}s", previous, time_seconds);
            active.scheduler.handle_seek(time_seconds).await;
        }
    }

    /// `torrent.onStatus`: subscribe to status events emitted every 500 ms.
    pub fn on_status(&self) -> watch::Receiver<Option<StatusEvent>> {
        self.status.subscribe()
    }

    async fn teardown_active(&self) {
        let active = self.active.lock().await.take();
        if let Some(active) = active {
            active.status_task.abort();
            active.probe_task.abort();
            if let Some(remux_server) = active.remux_server {
                remux_server.stop();
            }
            if let Some(raw_server) = active.raw_server {
                raw_server.stop();
            }
            active.scheduler_token.cancel();
            active.torrent.pause().await;
            self.torrent_engine.remove(active.torrent.handle()).await;
            active.piece_store.evict_all();
        }
    }

    fn spawn_status_task(
        &self,
        torrent: Arc<dyn Torrent>,
        scheduler: Arc<Scheduler>,
        estimated_duration: Arc<std::sync::atomic::AtomicU64>,
        file_length: u64,
        transcoded: bool,
    ) -> JoinHandle<()> {
        let status = self.status.clone();
        let tick = self.settings.scheduler_tick;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                interval.tick().await;
                let metrics = torrent.stats();
                let buffer = scheduler.latest();
                let duration = estimated_duration.load(std::sync::atomic::Ordering::Relaxed);
                let progress = if metrics.downloaded == 0 || file_length == 0 {
                    0.0
                } else {
                    (metrics.downloaded as f32 / (file_length as f32)).min(1.0)
                };

                let event = StatusEvent {
                    download_speed: metrics.download_speed,
                    upload_speed: metrics.upload_speed,
                    progress,
                    num_peers: metrics.num_peers,
                    downloaded: metrics.downloaded,
                    ratio: metrics.ratio,
                    buffered_ahead_seconds: buffer.as_ref().map(|b| b.buffered_ahead_seconds).unwrap_or(0.0),
                    buffer_size_mb: buffer.as_ref().map(|b| b.buffer_size_mb).unwrap_or(0.0),
                    quality_tier: buffer.map(|b| b.quality_tier).unwrap_or(QualityTier::Hd),
                    transcoded,
                    actual_duration: if duration == 0 { None } else { Some(duration) },
                };

                if status.send(Some(event)).is_err() {
                    warn!("Status channel has no receivers, stopping status task");
                    return;
                }
            }
        })
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use torrentcast_core::torrent::{File, MockTorrent, MockTorrentEngine, Metrics, TorrentState};
    use tokio::sync::mpsc::unbounded_channel;

    fn test_files() -> Vec<File> {
        vec![
            File {
                index: 0,
                name: "movie.mp4".to_string(),
                offset: 0,
                length: 100 * 1024 * 1024,
            },
            File {
                index: 1,
                name: "sample.txt".to_string(),
                offset: 100 * 1024 * 1024,
                length: 1024,
            },
        ]
    }

    fn mock_torrent() -> MockTorrent {
        let mut torrent = MockTorrent::new();
        torrent.expect_handle().returning(Default::default);
        torrent.expect_info_hash().return_const("abc123".to_string());
        torrent.expect_name().return_const("Example Movie".to_string());
        torrent.expect_files().returning(|| test_files());
        torrent.expect_select_file().returning(|_| ());
        torrent.expect_deselect_file().returning(|_| ());
        torrent.expect_mark_critical().returning(|_, _| ());
        torrent.expect_piece_length().return_const(16u64 * 1024);
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
    async fn test_add_returns_catalogue_and_deselects_all() {
        let mut engine = MockTorrentEngine::new();
        engine
            .expect_add()
            .returning(|_| Ok(Arc::new(mock_torrent()) as Arc<dyn Torrent>));

        let engine = Engine::new(Arc::new(engine), EngineSettings::default());
        let info = engine
            .add(InputSpec::parse("magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567").unwrap())
            .await
            .expect("expected add to succeed");

        assert_eq!("Example Movie", info.name);
        assert_eq!(2, info.files.len());
        assert_eq!(100 * 1024 * 1024 + 1024, info.total_size);
    }

    #[tokio::test]
    async fn test_add_rejects_torrent_with_no_files() {
        let mut engine = MockTorrentEngine::new();
        engine
            .expect_add()
            .returning(|_| Ok(Arc::new(mock_torrent_with_no_files()) as Arc<dyn Torrent>));
        engine.expect_remove().returning(|_| ());

        let engine = Engine::new(Arc::new(engine), EngineSettings::default());
        let result = engine
            .add(InputSpec::parse("magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567").unwrap())
            .await;

        assert!(matches!(result, Err(EngineError::Core(torrentcast_core::Error::NoVideoFile))));
    }

    fn mock_torrent_with_no_files() -> MockTorrent {
        let mut torrent = MockTorrent::new();
        torrent.expect_handle().returning(Default::default);
        torrent.expect_files().returning(Vec::new);
        torrent
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let engine = Engine::new(Arc::new(MockTorrentEngine::new()), EngineSettings::default());

        engine.stop().await;
        engine.stop().await;

        assert!(engine.get_info().await.is_none());
    }
}
