use derive_more::Display;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_CONNECTIONS_LIMIT: fn() -> u32 = || 300;
const DEFAULT_DOWNLOAD_RATE_LIMIT: fn() -> u32 = || 0;
const DEFAULT_UPLOAD_RATE_LIMIT: fn() -> u32 = || 0;
const DEFAULT_SCHEDULER_TICK: fn() -> Duration = || Duration::from_millis(500);
const DEFAULT_SOFT_CAP_BYTES: fn() -> u64 = || 70 * 1024 * 1024;
const DEFAULT_HARD_CAP_BYTES: fn() -> u64 = || 75 * 1024 * 1024;
const DEFAULT_METADATA_TIMEOUT: fn() -> Duration = || Duration::from_secs(60);
const DEFAULT_FFMPEG_BINARY: fn() -> String = || "ffmpeg".to_string();
const DEFAULT_FFPROBE_BINARY: fn() -> String = || "ffprobe".to_string();
const DEFAULT_RAW_PORT: fn() -> u16 = || 9090;
const DEFAULT_REMUX_PORT: fn() -> u16 = || 9091;

/// The engine-wide settings that govern connection limits, memory caps, the
/// scheduler tick period and the external remux binaries, per spec §3/§9.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineSettings {
    /// The max number of peer connections the torrent engine may open.
    #[serde(default = "DEFAULT_CONNECTIONS_LIMIT")]
    pub connections_limit: u32,
    /// The download rate limit, in bytes per second. A value of 0 means unlimited.
    #[serde(default = "DEFAULT_DOWNLOAD_RATE_LIMIT")]
    pub download_rate_limit: u32,
    /// The upload rate limit, in bytes per second. A value of 0 means unlimited.
    #[serde(default = "DEFAULT_UPLOAD_RATE_LIMIT")]
    pub upload_rate_limit: u32,
    /// The period of the sliding window scheduler tick.
    #[serde(default = "DEFAULT_SCHEDULER_TICK")]
    pub scheduler_tick: Duration,
    /// Soft memory cap for resident piece bytes, in bytes.
    #[serde(default = "DEFAULT_SOFT_CAP_BYTES")]
    pub soft_cap_bytes: u64,
    /// Hard memory cap for resident piece bytes, in bytes.
    #[serde(default = "DEFAULT_HARD_CAP_BYTES")]
    pub hard_cap_bytes: u64,
    /// How long to wait for torrent metadata before failing `add`.
    #[serde(default = "DEFAULT_METADATA_TIMEOUT")]
    pub metadata_timeout: Duration,
    /// Path or name of the ffmpeg binary used by the remux pipeline.
    #[serde(default = "DEFAULT_FFMPEG_BINARY")]
    pub ffmpeg_binary: String,
    /// Path or name of the ffprobe binary used for duration probing.
    #[serde(default = "DEFAULT_FFPROBE_BINARY")]
    pub ffprobe_binary: String,
    /// First port to probe for the raw HTTP range server.
    #[serde(default = "DEFAULT_RAW_PORT")]
    pub raw_port: u16,
    /// First port to probe for the remux HTTP server.
    #[serde(default = "DEFAULT_REMUX_PORT")]
    pub remux_port: u16,
}

impl EngineSettings {
    /// Loads settings from a YAML or JSON file, falling back to
    /// [EngineSettings::default] (with a warning) if the file cannot be
    /// read or parsed. Mirrors the teacher's
    /// `PopcornProperties::from_filename`/`from_str` fallback-to-defaults
    /// behavior, generalized to also accept JSON.
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_str(&contents, path.extension().and_then(|e| e.to_str())),
            Err(e) => {
                debug!("Config file {} not found, using defaults, {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Parses settings from a raw YAML or JSON document, falling back to
    /// defaults (with a warning) on a parse error.
    pub fn from_str(contents: &str, extension: Option<&str>) -> Self {
        let parsed = match extension {
            Some("json") => serde_json::from_str(contents).map_err(|e| e.to_string()),
            _ => serde_yaml::from_str(contents).map_err(|e| e.to_string()),
        };

        match parsed {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Failed to parse engine settings, using defaults instead, {}", e);
                Self::default()
            }
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            connections_limit: DEFAULT_CONNECTIONS_LIMIT(),
            download_rate_limit: DEFAULT_DOWNLOAD_RATE_LIMIT(),
            upload_rate_limit: DEFAULT_UPLOAD_RATE_LIMIT(),
            scheduler_tick: DEFAULT_SCHEDULER_TICK(),
            soft_cap_bytes: DEFAULT_SOFT_CAP_BYTES(),
            hard_cap_bytes: DEFAULT_HARD_CAP_BYTES(),
            metadata_timeout: DEFAULT_METADATA_TIMEOUT(),
            ffmpeg_binary: DEFAULT_FFMPEG_BINARY(),
            ffprobe_binary: DEFAULT_FFPROBE_BINARY(),
            raw_port: DEFAULT_RAW_PORT(),
            remux_port: DEFAULT_REMUX_PORT(),
        }
    }
}

/// The quality tier derived from the selected file's size, per spec §3.
#[repr(i32)]
#[derive(Debug, Clone, Copy, Display, Serialize, Deserialize, PartialEq, Eq)]
pub enum QualityTier {
    #[display("4K")]
    UltraHd = 0,
    #[display("1080p_high")]
    FullHdHigh = 1,
    #[display("1080p")]
    FullHd = 2,
    #[display("720p")]
    Hd = 3,
}

/// The buffer sizing policy derived once per selected file, per spec §3's
/// quality-tier table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferConfig {
    pub tier: QualityTier,
    pub min_ahead_seconds: u32,
    pub max_ahead_seconds: u32,
    pub critical_seconds: u32,
}

const GB: u64 = 1024 * 1024 * 1024;

impl BufferConfig {
    /// Derives the buffer config from the selected file's length, per the
    /// quality-tier table in spec §3.
    pub fn for_file_length(file_length: u64) -> Self {
        if file_length > 30 * GB {
            Self {
                tier: QualityTier::UltraHd,
                min_ahead_seconds: 15,
                max_ahead_seconds: 45,
                critical_seconds: 5,
            }
        } else if file_length > 15 * GB {
            Self {
                tier: QualityTier::FullHdHigh,
                min_ahead_seconds: 20,
                max_ahead_seconds: 60,
                critical_seconds: 8,
            }
        } else if file_length > 5 * GB {
            Self {
                tier: QualityTier::FullHd,
                min_ahead_seconds: 30,
                max_ahead_seconds: 90,
                critical_seconds: 10,
            }
        } else {
            Self {
                tier: QualityTier::Hd,
                min_ahead_seconds: 45,
                max_ahead_seconds: 120,
                critical_seconds: 15,
            }
        }
    }

    /// The estimated playback duration in seconds, a step function of file
    /// size per spec §3.
    pub fn estimated_duration_seconds(file_length: u64) -> u64 {
        if file_length > 30 * GB {
            7200
        } else if file_length > 15 * GB {
            5400
        } else if file_length > 5 * GB {
            3600
        } else if file_length > 1 * GB {
            2400
        } else {
            1200
        }
    }

    /// The ahead-byte budget for this tier, capped so that
    /// `ahead + behind <= 70 MiB` per spec §3.
    pub fn ahead_bytes(&self, bytes_per_second: f64, max_combined_bytes: u64) -> u64 {
        let ahead = (self.max_ahead_seconds as f64 * bytes_per_second) as u64;
        ahead.min(max_combined_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_file_length_tiers() {
        assert_eq!(QualityTier::UltraHd, BufferConfig::for_file_length(31 * GB).tier);
        assert_eq!(QualityTier::FullHdHigh, BufferConfig::for_file_length(16 * GB).tier);
        assert_eq!(QualityTier::FullHd, BufferConfig::for_file_length(6 * GB).tier);
        assert_eq!(QualityTier::Hd, BufferConfig::for_file_length(1 * GB).tier);
    }

    #[test]
    fn test_estimated_duration_seconds() {
        assert_eq!(7200, BufferConfig::estimated_duration_seconds(31 * GB));
        assert_eq!(1200, BufferConfig::estimated_duration_seconds(500 * 1024 * 1024));
    }

    #[test]
    fn test_default_settings() {
        let settings = EngineSettings::default();

        assert_eq!(9090, settings.raw_port);
        assert_eq!(9091, settings.remux_port);
        assert_eq!(Duration::from_millis(500), settings.scheduler_tick);
    }

    #[test]
    fn test_from_str_yaml_partial_overrides_fill_in_defaults() {
        let yaml = "raw_port: 9100\nffmpeg_binary: /usr/local/bin/ffmpeg\n";

        let settings = EngineSettings::from_str(yaml, Some("yml"));

        assert_eq!(9100, settings.raw_port);
        assert_eq!("/usr/local/bin/ffmpeg", settings.ffmpeg_binary);
        assert_eq!(9091, settings.remux_port);
    }

    #[test]
    fn test_from_str_json() {
        let json = r#"{"raw_port": 9200}"#;

        let settings = EngineSettings::from_str(json, Some("json"));

        assert_eq!(9200, settings.raw_port);
    }

    #[test]
    fn test_from_str_falls_back_to_defaults_on_parse_error() {
        let settings = EngineSettings::from_str("not: valid: yaml: at: all:", Some("yml"));

        assert_eq!(EngineSettings::default(), settings);
    }

    #[test]
    fn test_from_file_missing_falls_back_to_defaults() {
        let settings = EngineSettings::from_file("/nonexistent/path/torrentcast.yml");

        assert_eq!(EngineSettings::default(), settings);
    }
}
