use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc::unbounded_channel;

use torrentcast_core::config::EngineSettings;
use torrentcast_core::estimator::BitrateEstimator;
use torrentcast_core::piece_store::PieceStore;
use torrentcast_core::session::Session;
use torrentcast_core::torrent::{File, Metrics, MockTorrent, Torrent, TorrentState};

use torrentcast_http::server::RawServer;

const PIECE_LENGTH: u64 = 16;

fn test_file() -> File {
    File {
        index: 0,
        name: "movie.mp4".to_string(),
        offset: 0,
        length: 48,
    }
}

fn mock_torrent() -> MockTorrent {
    let mut torrent = MockTorrent::new();
    torrent.expect_piece_length().return_const(PIECE_LENGTH);
    torrent.expect_info_hash().return_const("abc".to_string());
    torrent.expect_subscribe().returning(|| {
        let (_tx, rx) = unbounded_channel();
        rx
    });
    torrent.expect_stats().returning(Metrics::default);
    torrent.expect_state().returning(|| TorrentState::Running);
    torrent
}

/// A full byte sequence 0..48 split across three resident pieces, so range
/// reads can be validated against known content.
fn seed_pieces(store: &PieceStore) {
    let bytes: Vec<u8> = (0u8..48).collect();
    store.put(0, Bytes::copy_from_slice(&bytes[0..16]));
    store.put(1, Bytes::copy_from_slice(&bytes[16..32]));
    store.put(2, Bytes::copy_from_slice(&bytes[32..48]));
}

async fn start_server() -> (RawServer, Arc<PieceStore>) {
    let torrent: Arc<dyn Torrent> = Arc::new(mock_torrent());
    let session = Arc::new(Session::new(torrent, test_file()));
    let piece_store = Arc::new(PieceStore::new());
    seed_pieces(&piece_store);
    let estimator = Arc::new(BitrateEstimator::new(test_file().length));
    let settings = EngineSettings {
        raw_port: 0,
        ..EngineSettings::default()
    };

    let server = RawServer::start(session, piece_store.clone(), estimator, &settings)
        .await
        .expect("expected the raw server to bind");
    (server, piece_store)
}

/// Spec §8 scenario 1 / testable property "range-request response
/// correctness": a 206 response's body length matches `e - s + 1`.
#[tokio::test]
async fn test_partial_range_request_returns_exact_slice() {
    let (server, _store) = start_server().await;
    let url = format!("http://{}/", server.addr());

    let response = reqwest::Client::new()
        .get(&url)
        .header("Range", "bytes=10-19")
        .send()
        .await
        .expect("expected a response");

    assert_eq!(reqwest::StatusCode::PARTIAL_CONTENT, response.status());
    assert_eq!(
        "bytes 10-19/48",
        response.headers().get("content-range").unwrap().to_str().unwrap()
    );
    let body = response.bytes().await.unwrap();
    assert_eq!(10, body.len());
    assert_eq!((10u8..20).collect::<Vec<u8>>(), body.to_vec());

    server.stop();
}

/// Spec §8 scenario 5 "Bad range": an out-of-bounds range returns 416 with
/// `Content-Range: bytes */N`.
#[tokio::test]
async fn test_out_of_bounds_range_returns_416() {
    let (server, _store) = start_server().await;
    let url = format!("http://{}/", server.addr());

    let response = reqwest::Client::new()
        .get(&url)
        .header("Range", "bytes=999999999-")
        .send()
        .await
        .expect("expected a response");

    assert_eq!(416, response.status().as_u16());
    assert_eq!(
        "bytes */48",
        response.headers().get("content-range").unwrap().to_str().unwrap()
    );

    server.stop();
}

/// `HEAD` must return headers without materializing any body bytes.
#[tokio::test]
async fn test_head_returns_headers_without_body() {
    let (server, _store) = start_server().await;
    let url = format!("http://{}/", server.addr());

    let response = reqwest::Client::new()
        .head(&url)
        .send()
        .await
        .expect("expected a response");

    assert_eq!(reqwest::StatusCode::OK, response.status());
    assert_eq!(
        "48",
        response.headers().get("content-length").unwrap().to_str().unwrap()
    );
    assert_eq!(
        "bytes",
        response.headers().get("accept-ranges").unwrap().to_str().unwrap()
    );
    let body = response.bytes().await.unwrap();
    assert!(body.is_empty());

    server.stop();
}

/// A plain `GET` with no `Range` header streams the full file with a `200`.
#[tokio::test]
async fn test_get_without_range_streams_whole_file() {
    let (server, _store) = start_server().await;
    let url = format!("http://{}/", server.addr());

    let response = reqwest::Client::new().get(&url).send().await.unwrap();

    assert_eq!(reqwest::StatusCode::OK, response.status());
    let body = response.bytes().await.unwrap();
    assert_eq!((0u8..48).collect::<Vec<u8>>(), body.to_vec());

    server.stop();
}

/// `OPTIONS` CORS preflight per spec §4.E.
#[tokio::test]
async fn test_options_preflight() {
    let (server, _store) = start_server().await;
    let url = format!("http://{}/", server.addr());

    let response = reqwest::Client::new()
        .request(reqwest::Method::OPTIONS, &url)
        .send()
        .await
        .unwrap();

    assert_eq!(reqwest::StatusCode::OK, response.status());
    assert_eq!(
        "GET, HEAD, OPTIONS",
        response.headers().get("allow-methods").unwrap().to_str().unwrap()
    );

    server.stop();
}
