use std::env;
use std::process::ExitCode;

use log::{error, info, LevelFilter};

use torrentcast_core::input::InputSpec;
use torrentcast_logging::EngineLogger;

/// The process entry point.
///
/// Brings up logging and parses the single positional argument (a magnet
/// uri, a path to a `.torrent` file, or a base64 `data:` uri) into an
/// [InputSpec]. Mirrors the simple builder-then-launch shape of
/// `popcorn-fx-bootstrap`'s `main`, minus the installer/self-update
/// machinery that crate also carries, which is out of scope here.
///
/// This binary does not drive a concrete swarm backend: the engine facade
/// in [torrentcast::Engine] is generic over the `TorrentEngine` trait, and
/// no production implementation ships in this workspace (see DESIGN.md).
/// A host process wires a real adapter in and drives `Engine` directly as
/// a library; this binary only proves that the process can start, log,
/// and parse its input.
fn main() -> ExitCode {
    if let Err(e) = EngineLogger::builder().root_level(LevelFilter::Info).build() {
        eprintln!("Failed to initialize logger, {}", e);
        return ExitCode::FAILURE;
    }

    let input = match env::args().nth(1) {
        Some(value) => value,
        None => {
            error!("Usage: torrentcast <magnet-uri|torrent-file|data-uri>");
            return ExitCode::FAILURE;
        }
    };

    match InputSpec::parse(&input) {
        Ok(spec) => {
            info!("Parsed input spec: {:?}", spec);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Invalid input, {}", e);
            ExitCode::FAILURE
        }
    }
}
