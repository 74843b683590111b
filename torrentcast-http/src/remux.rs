use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use log::{debug, error, trace, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;

use torrentcast_core::config::EngineSettings;
use torrentcast_core::estimator::BitrateEstimator;
use torrentcast_core::piece_store::PieceStore;
use torrentcast_core::scheduler::Scheduler;
use torrentcast_core::session::Session;

use crate::error::{Error, Result};
use crate::piece_stream::PieceStream;

/// Generous input probe sizes passed to ffmpeg/ffprobe, per spec §4.F step
/// 4: the source stream skips ahead in bursts as pieces arrive, so the
/// default probe window is too small to reliably find the streams.
const PROBE_SIZE: &str = "50M";
const ANALYZE_DURATION: &str = "20000000";

/// Backoff schedule for the container duration probe, per spec §4.C/§4.G.
const DURATION_PROBE_BACKOFF: &[Duration] = &[
    Duration::from_millis(1500),
    Duration::from_secs(5),
    Duration::from_secs(10),
];

/// Fragments of ffmpeg error output that indicate the remux was simply
/// interrupted by the client rather than having actually failed, per spec
/// §4.F.
const BENIGN_ERROR_MARKERS: &[&str] = &[
    "epipe",
    "broken pipe",
    "readable stream closed",
    "output stream closed",
    "signal: killed",
    "signal: 9",
];

/// Returns true if the given ffmpeg/IO error text should be treated as a
/// normal termination rather than a surfaced [Error::RemuxFailure].
pub fn is_benign_remux_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    BENIGN_ERROR_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Supervises a single ffmpeg remux child at a time, feeding it a
/// [PieceStream] over stdin and exposing its stdout as a response body
/// stream, per spec §4.F.
///
/// Mirrors the teacher's single-background-task-per-resource idiom (see
/// `core::stream::server::StreamServer`): only one remux consumer is
/// active; starting a new one terminates the prior one first.
pub struct RemuxPipeline {
    session: Arc<Session>,
    piece_store: Arc<PieceStore>,
    estimator: Arc<BitrateEstimator>,
    scheduler: Arc<Scheduler>,
    settings: EngineSettings,
    active: Mutex<Option<ActiveRemux>>,
}

struct ActiveRemux {
    child: Child,
    pump: JoinHandle<()>,
}

impl ActiveRemux {
    async fn terminate(mut self) {
        self.pump.abort();
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
    }
}

impl RemuxPipeline {
    pub fn new(
        session: Arc<Session>,
        piece_store: Arc<PieceStore>,
        estimator: Arc<BitrateEstimator>,
        scheduler: Arc<Scheduler>,
        settings: EngineSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            session,
            piece_store,
            estimator,
            scheduler,
            settings,
            active: Mutex::new(None),
        })
    }

    /// Starts a fresh remux at playback time `t_seconds`, terminating any
    /// remux currently in progress first, per spec §4.F step 1.
    pub async fn start(self: &Arc<Self>, t_seconds: f64) -> Result<RemuxBody> {
        let bytes_per_second = self.estimator.bytes_per_second();
        let byte_offset = (t_seconds * bytes_per_second).floor().max(0.0) as u64;
        let file_length = self.session.selected_file.length;

        debug!(
            "Starting remux at t={}s (byte offset {} of {})",
            t_seconds, byte_offset, file_length
        );

        let mut previous = self.active.lock().await;
        if let Some(active) = previous.take() {
            trace!("Terminating in-progress remux before starting a new one");
            active.terminate().await;
        }

        let input_stream = PieceStream::new(
            self.piece_store.clone(),
            self.session.torrent.clone(),
            &self.session.selected_file,
            byte_offset,
            Some(file_length.saturating_sub(1)),
        );

        let mut child = Command::new(&self.settings.ffmpeg_binary)
            .args(self.ffmpeg_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(Error::from)?;

        let stdin = child.stdin.take().expect("piped stdin");
        let stderr = child.stderr.take().expect("piped stderr");
        let pump = tokio::spawn(Self::pump_input(input_stream, stdin));
        tokio::spawn(Self::log_stderr(stderr));

        let stdout = child.stdout.take().expect("piped stdout");
        self.scheduler.set_remux_active(true);

        *previous = Some(ActiveRemux { child, pump });
        drop(previous);

        Ok(RemuxBody {
            reader: ReaderStream::new(stdout),
            pipeline: self.clone(),
        })
    }

    fn ffmpeg_args(&self) -> Vec<String> {
        vec![
            "-probesize".to_string(),
            PROBE_SIZE.to_string(),
            "-analyzeduration".to_string(),
            ANALYZE_DURATION.to_string(),
            "-i".to_string(),
            "pipe:0".to_string(),
            "-c:v".to_string(),
            "copy".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            "192k".to_string(),
            "-ac".to_string(),
            "2".to_string(),
            "-movflags".to_string(),
            "frag_keyframe+empty_moov+default_base_moof+faststart".to_string(),
            "-max_muxing_queue_size".to_string(),
            "9999".to_string(),
            "-avoid_negative_ts".to_string(),
            "make_zero".to_string(),
            "-f".to_string(),
            "mp4".to_string(),
            "pipe:1".to_string(),
        ]
    }

    async fn pump_input(mut input: PieceStream, mut stdin: tokio::process::ChildStdin) {
        while let Some(chunk) = input.next().await {
            match chunk {
                Ok(bytes) => {
                    if let Err(e) = stdin.write_all(&bytes).await {
                        if !is_benign_remux_error(&e.to_string()) {
                            warn!("Remux stdin pump failed, {}", e);
                        }
                        break;
                    }
                }
                Err(e) => {
                    warn!("Remux input stream failed, {}", e);
                    break;
                }
            }
        }
        let _ = stdin.shutdown().await;
    }

    async fn log_stderr(mut stderr: tokio::process::ChildStderr) {
        let mut buf = String::new();
        if stderr.read_to_string(&mut buf).await.is_ok() && !buf.trim().is_empty() {
            if is_benign_remux_error(&buf) {
                trace!("ffmpeg terminated, {}", buf.trim());
            } else {
                // Surfaced only as a log, per spec §7: the next player fetch
                // implicitly starts a fresh remuxer, no restart loop needed.
                error!("{}", Error::RemuxFailure(buf.trim().to_string()));
            }
        }
    }

    async fn finished(&self) {
        self.scheduler.set_remux_active(false);
        let mut active = self.active.lock().await;
        if let Some(current) = active.take() {
            current.terminate().await;
        }
    }

    /// Probes the container's real duration via `ffprobe`, retrying with
    /// the backoff schedule of spec §4.C, by feeding it the first slice of
    /// the selected file over stdin.
    pub async fn probe_duration_with_retry(self: &Arc<Self>) -> Option<u64> {
        for delay in DURATION_PROBE_BACKOFF {
            tokio::time::sleep(*delay).await;
            match self.probe_duration_once().await {
                Some(duration) => {
                    self.estimator.apply_probed_duration(duration);
                    return Some(duration);
                }
                None => continue,
            }
        }
        warn!("Unable to probe container duration after all retries");
        None
    }

    async fn probe_duration_once(&self) -> Option<u64> {
        let probe_window = self.session.selected_file.length.min(32 * 1024 * 1024);
        let input_stream = PieceStream::new(
            self.piece_store.clone(),
            self.session.torrent.clone(),
            &self.session.selected_file,
            0,
            Some(probe_window.saturating_sub(1)),
        );

        let mut child = Command::new(&self.settings.ffprobe_binary)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
                "-probesize",
                PROBE_SIZE,
                "-analyzeduration",
                ANALYZE_DURATION,
                "-i",
                "pipe:0",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .ok()?;

        let stdin = child.stdin.take()?;
        tokio::spawn(Self::pump_input(input_stream, stdin));

        let output = child.wait_with_output().await.ok()?;
        let text = String::from_utf8_lossy(&output.stdout);
        text.trim().parse::<f64>().ok().map(|secs| secs.round() as u64)
    }
}

/// The HTTP response body for a remux request: an [AsyncRead]-backed byte
/// stream over ffmpeg's stdout that tears the child down on drop, per spec
/// §4.F step 5.
pub struct RemuxBody {
    reader: ReaderStream<tokio::process::ChildStdout>,
    pipeline: Arc<RemuxPipeline>,
}

impl futures::Stream for RemuxBody {
    type Item = std::io::Result<Bytes>;

    fn poll_next(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        let this = self.get_mut();
        std::pin::Pin::new(&mut this.reader).poll_next(cx)
    }
}

impl Drop for RemuxBody {
    fn drop(&mut self) {
        let pipeline = self.pipeline.clone();
        tokio::spawn(async move {
            pipeline.finished().await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_benign_remux_error() {
        assert!(is_benign_remux_error("Error: EPIPE"));
        assert!(is_benign_remux_error("signal: 9 (SIGKILL)"));
        assert!(!is_benign_remux_error("Invalid data found when processing input"));
    }
}
