use std::fmt::{Display, Formatter};
use std::path::Path;

use axum::http::HeaderValue;
use log::debug;

/// A MIME type, as originally defined in RFC 2046, abridged to the
/// extension table of spec §6.2.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaType {
    mime_type: &'static str,
    subtype: &'static str,
}

impl MediaType {
    const fn new(mime_type: &'static str, subtype: &'static str) -> Self {
        Self { mime_type, subtype }
    }

    /// The fallback media type for an unrecognized extension, per spec §6.2.
    pub fn octet_stream() -> Self {
        Self::new("application", "octet-stream")
    }
}

impl Display for MediaType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.mime_type, self.subtype)
    }
}

impl From<MediaType> for HeaderValue {
    fn from(value: MediaType) -> Self {
        HeaderValue::from_str(value.to_string().as_str())
            .expect("media type is always valid ascii")
    }
}

/// The abridged extension -> media type table of spec §6.2.
const MIME_TABLE: &[(&str, MediaType)] = &[
    ("mp4", MediaType::new("video", "mp4")),
    ("m4v", MediaType::new("video", "mp4")),
    ("mov", MediaType::new("video", "mp4")),
    ("webm", MediaType::new("video", "webm")),
    ("mkv", MediaType::new("video", "x-matroska")),
    ("avi", MediaType::new("video", "x-msvideo")),
    ("wmv", MediaType::new("video", "x-ms-wmv")),
    ("flv", MediaType::new("video", "x-flv")),
    ("ts", MediaType::new("video", "mp2t")),
    ("m2ts", MediaType::new("video", "mp2t")),
    ("mts", MediaType::new("video", "mp2t")),
    ("mpg", MediaType::new("video", "mpeg")),
    ("mpeg", MediaType::new("video", "mpeg")),
    ("mpe", MediaType::new("video", "mpeg")),
    ("m2v", MediaType::new("video", "mpeg")),
    ("3gp", MediaType::new("video", "3gpp")),
    ("3g2", MediaType::new("video", "3gpp2")),
    ("ogv", MediaType::new("video", "ogg")),
    ("ogg", MediaType::new("video", "ogg")),
];

/// The set of extensions that cannot be played directly by the browser and
/// must be routed through the remux pipeline, per spec §4.F.
const NEEDS_REMUX: &[&str] = &[
    "mkv", "avi", "wmv", "flv", "ts", "m2ts", "vob", "rm", "rmvb",
];

/// Looks up the [MediaType] for the given filename's extension, falling back
/// to [MediaType::octet_stream] when the extension is unknown, per spec §6.2.
pub fn media_type_for(filename: &str) -> MediaType {
    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    match extension {
        Some(extension) => MIME_TABLE
            .iter()
            .find(|(ext, _)| *ext == extension)
            .map(|(_, media_type)| media_type.clone())
            .unwrap_or_else(|| {
                debug!("No known media type for extension {}", extension);
                MediaType::octet_stream()
            }),
        None => {
            debug!("Unable to extract extension from {}", filename);
            MediaType::octet_stream()
        }
    }
}

/// Returns true if the given filename's extension requires the remux
/// pipeline, per spec §4.F.
pub fn needs_remux(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| NEEDS_REMUX.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_type_for_known_extension() {
        assert_eq!("video/mp4", media_type_for("Movie.mp4").to_string());
        assert_eq!("video/x-matroska", media_type_for("Movie.MKV").to_string());
    }

    #[test]
    fn test_media_type_for_unknown_extension() {
        assert_eq!("application/octet-stream", media_type_for("ipsum.lorem").to_string());
    }

    #[test]
    fn test_media_type_for_no_extension() {
        assert_eq!("application/octet-stream", media_type_for("my-file").to_string());
    }

    #[test]
    fn test_needs_remux() {
        assert!(needs_remux("Movie.mkv"));
        assert!(needs_remux("Movie.TS"));
        assert!(!needs_remux("Movie.mp4"));
        assert!(!needs_remux("Movie.webm"));
    }
}
