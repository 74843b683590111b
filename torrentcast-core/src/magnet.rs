use std::str::FromStr;

use log::{trace, warn};
use thiserror::Error;
use url::Url;

const MAGNET_SCHEME: &str = "magnet";

/// The result type of magnet uri parsing.
pub type Result<T> = std::result::Result<T, MagnetError>;

/// Errors that can occur when parsing a magnet uri.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MagnetError {
    /// Failed to parse the magnet uri.
    #[error("failed to parse magnet uri, {0}")]
    Parse(String),
    /// The specified magnet uri is invalid.
    #[error("invalid magnet uri")]
    InvalidUri,
    /// The specified value is invalid.
    #[error("value \"{0}\" is invalid")]
    InvalidValue(String),
    /// The specified scheme in the uri is not supported.
    #[error("scheme \"{0}\" is not supported")]
    UnsupportedScheme(String),
}

/// A parsed `magnet:?xt=urn:btih:...` uri, per spec §6.4.
#[derive(Debug, Clone, PartialEq)]
pub struct Magnet {
    pub exact_topics: Vec<String>,
    pub display_name: Option<String>,
    pub exact_length: Option<u64>,
    pub address_tracker: Vec<String>,
    pub web_seed: Vec<String>,
    pub acceptable_source: Vec<String>,
    pub exact_source: Option<String>,
    pub keyword_topic: Option<String>,
    pub manifest_topic: Option<String>,
    pub select_only: Option<String>,
    pub peer: Option<String>,
}

impl Magnet {
    /// Gets the `xt` (exact topic) values of the magnet link.
    pub fn xt(&self) -> Vec<&str> {
        self.exact_topics.iter().map(|e| e.as_str()).collect()
    }

    /// Gets the `dn` (display name) of the magnet link, if present.
    pub fn dn(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Gets the `xl` (exact length) of the magnet link, if present.
    pub fn xl(&self) -> Option<u64> {
        self.exact_length
    }

    /// Gets the `tr` (address tracker) values of the magnet link.
    pub fn tr(&self) -> &[String] {
        self.address_tracker.as_slice()
    }

    /// Gets the infohash out of the first `xt` topic, if it is a btih urn.
    pub fn info_hash(&self) -> Option<&str> {
        self.exact_topics
            .iter()
            .find_map(|topic| topic.strip_prefix("urn:btih:"))
    }
}

impl FromStr for Magnet {
    type Err = MagnetError;

    fn from_str(uri: &str) -> Result<Self> {
        let mut uri = uri.to_string();

        if uri.contains("&amp;") {
            uri = uri.replace("&amp;", "&");
        }

        let uri = Url::parse(&uri).map_err(|e| MagnetError::Parse(e.to_string()))?;
        let scheme = uri.scheme();

        if scheme != MAGNET_SCHEME {
            return Err(MagnetError::UnsupportedScheme(scheme.to_string()));
        }

        let mut builder = MagnetBuilder::builder();
        for (key, value) in uri.query_pairs() {
            match key.to_lowercase().as_str() {
                "xt" => {
                    builder.exact_topic(value);
                }
                "dn" => {
                    builder.display_name(value);
                }
                "xl" => {
                    builder.exact_length(u64::from_str(value.as_ref()).map_err(|_| {
                        trace!("Value {} is not a valid number", value);
                        MagnetError::Parse("xl is invalid".to_string())
                    })?);
                }
                "tr" => {
                    builder.address_tracker(value);
                }
                "ws" => {
                    builder.web_seed(value);
                }
                "as" => {
                    builder.acceptable_source(value);
                }
                "xs" => {
                    builder.exact_source(value);
                }
                "kt" => {
                    builder.keyword_topic(value);
                }
                "mt" => {
                    builder.manifest_topic(value);
                }
                "so" => {
                    builder.select_only(value);
                }
                "x.pe" => {
                    builder.peer(value);
                }
                other => warn!("Unsupported magnet parameter {}", other),
            }
        }

        builder.build()
    }
}

/// A builder for constructing a [Magnet].
#[derive(Debug, Clone, Default)]
pub struct MagnetBuilder {
    exact_topics: Option<Vec<String>>,
    display_name: Option<String>,
    exact_length: Option<u64>,
    address_tracker: Vec<String>,
    web_seed: Vec<String>,
    acceptable_source: Vec<String>,
    exact_source: Option<String>,
    keyword_topic: Option<String>,
    manifest_topic: Option<String>,
    select_only: Option<String>,
    peer: Option<String>,
}

impl MagnetBuilder {
    pub fn builder() -> Self {
        Self::default()
    }

    pub fn exact_topic<S: Into<String>>(&mut self, value: S) -> &mut Self {
        self.exact_topics.get_or_insert_with(Vec::new).push(value.into());
        self
    }

    pub fn display_name<S: Into<String>>(&mut self, value: S) -> &mut Self {
        self.display_name = Some(value.into());
        self
    }

    pub fn exact_length(&mut self, value: u64) -> &mut Self {
        self.exact_length = Some(value);
        self
    }

    pub fn address_tracker<S: Into<String>>(&mut self, value: S) -> &mut Self {
        self.address_tracker.push(value.into());
        self
    }

    pub fn web_seed<S: Into<String>>(&mut self, value: S) -> &mut Self {
        self.web_seed.push(value.into());
        self
    }

    pub fn acceptable_source<S: Into<String>>(&mut self, value: S) -> &mut Self {
        self.acceptable_source.push(value.into());
        self
    }

    pub fn exact_source<S: Into<String>>(&mut self, value: S) -> &mut Self {
        self.exact_source = Some(value.into());
        self
    }

    pub fn keyword_topic<S: Into<String>>(&mut self, value: S) -> &mut Self {
        self.keyword_topic = Some(value.into());
        self
    }

    pub fn manifest_topic<S: Into<String>>(&mut self, value: S) -> &mut Self {
        self.manifest_topic = Some(value.into());
        self
    }

    pub fn select_only<S: Into<String>>(&mut self, value: S) -> &mut Self {
        self.select_only = Some(value.into());
        self
    }

    pub fn peer<S: Into<String>>(&mut self, value: S) -> &mut Self {
        self.peer = Some(value.into());
        self
    }

    pub fn build(self) -> Result<Magnet> {
        match self.exact_topics {
            Some(exact_topics) => Ok(Magnet {
                exact_topics,
                display_name: self.display_name,
                exact_length: self.exact_length,
                address_tracker: self.address_tracker,
                web_seed: self.web_seed,
                acceptable_source: self.acceptable_source,
                exact_source: self.exact_source,
                keyword_topic: self.keyword_topic,
                manifest_topic: self.manifest_topic,
                select_only: self.select_only,
                peer: self.peer,
            }),
            None => Err(MagnetError::InvalidUri),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magnet_from_str() {
        let uri = "magnet:?xt=urn:btih:EADAF0EFEA39406914414D359E0EA16416409BD7&dn=debian-12.4.0-amd64-DVD-1.iso&tr=udp%3A%2F%2Ftracker.opentrackr.org%3A1337";

        let magnet = Magnet::from_str(uri).unwrap();

        assert_eq!(
            vec!["urn:btih:EADAF0EFEA39406914414D359E0EA16416409BD7"],
            magnet.xt()
        );
        assert_eq!(Some("debian-12.4.0-amd64-DVD-1.iso"), magnet.dn());
        assert_eq!(
            Some("EADAF0EFEA39406914414D359E0EA16416409BD7"),
            magnet.info_hash()
        );
    }

    #[test]
    fn test_magnet_from_str_encoded_ampersand() {
        let uri = "magnet:?xt=urn:btih:EADAF0EFEA39406914414D359E0EA16416409BD7&amp;dn=debian.iso";

        let magnet = Magnet::from_str(uri).unwrap();

        assert_eq!(Some("debian.iso"), magnet.dn());
    }

    #[test]
    fn test_magnet_from_str_invalid_scheme() {
        let uri = "custom:?xt=urn:btih:EADAF0EFEA39406914414D359E0EA1641640007";

        let result = Magnet::from_str(uri);

        assert_eq!(
            Err(MagnetError::UnsupportedScheme("custom".to_string())),
            result
        );
    }

    #[test]
    fn test_magnet_from_str_missing_xt() {
        let uri = "magnet:?dn=debian.iso";

        let result = Magnet::from_str(uri);

        assert_eq!(Err(MagnetError::InvalidUri), result);
    }
}
