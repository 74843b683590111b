use std::fmt::{Display, Formatter};

use thiserror::Error;

const BYTES_PREFIX: &str = "bytes=";
const BYTES_LEN: usize = BYTES_PREFIX.len();

/// The result of the [Range] actions.
pub type Result<T> = std::result::Result<T, RangeError>;

/// The range errors that can occur.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RangeError {
    #[error("range value {0} is invalid")]
    InvalidValue(String),
    #[error("range parse error, {0}")]
    Parse(String),
}

/// An HTTP byte range per RFC 7233. Only the `bytes` unit is supported, per
/// spec §4.E; any other unit is rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct Range {
    pub start: u64,
    pub end: Option<u64>,
}

impl Range {
    /// Parses the value of an HTTP `Range` header into one or more [Range]s.
    pub fn parse(value: &str) -> Result<Vec<Self>> {
        if !value.starts_with(BYTES_PREFIX) {
            return Err(RangeError::InvalidValue(value.to_string()));
        }

        value[BYTES_LEN..]
            .split(',')
            .map(Self::parse_value)
            .collect()
    }

    fn parse_value(value: &str) -> Result<Self> {
        let values: Vec<&str> = value.split('-').collect();
        if values.len() != 2 {
            return Err(RangeError::Parse(value.to_string()));
        }

        let start = values[0]
            .trim()
            .parse::<u64>()
            .map_err(|e| RangeError::Parse(e.to_string()))?;
        let end_value = values[1].trim();
        let end = if end_value.is_empty() {
            None
        } else {
            Some(
                end_value
                    .parse::<u64>()
                    .map_err(|e| RangeError::Parse(e.to_string()))?,
            )
        };

        Ok(Self { start, end })
    }

    /// Resolves this range against the given resource length, per spec §4.E:
    /// `0 <= start <= end < resource_len`. Returns `None` when unsatisfiable.
    pub fn resolve(&self, resource_len: u64) -> Option<(u64, u64)> {
        let end = self.end.unwrap_or(resource_len.saturating_sub(1));
        if resource_len == 0 || self.start > end || end >= resource_len {
            return None;
        }
        Some((self.start, end))
    }
}

impl Display for Range {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}",
            self.start,
            self.end.map(|e| e.to_string()).unwrap_or_default()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let ranges = Range::parse("bytes=0-1023").expect("expected a valid range");
        let range = ranges.first().expect("expected 1 range");

        assert_eq!(0, range.start);
        assert_eq!(1023, range.end.unwrap());
    }

    #[test]
    fn test_parse_invalid_prefix() {
        let result = Range::parse("kb=0-1485");

        assert!(matches!(result, Err(RangeError::InvalidValue(_))));
    }

    #[test]
    fn test_parse_invalid_start_value() {
        let result = Range::parse("bytes=lorem-1023");

        assert!(matches!(result, Err(RangeError::Parse(_))));
    }

    #[test]
    fn test_parse_no_end_value() {
        let ranges = Range::parse("bytes=0-").expect("expected a valid range");
        let range = ranges.first().expect("expected 1 range");

        assert_eq!(None, range.end);
    }

    #[test]
    fn test_resolve_within_bounds() {
        let range = Range {
            start: 0,
            end: Some(1023),
        };

        assert_eq!(Some((0, 1023)), range.resolve(2048));
    }

    #[test]
    fn test_resolve_out_of_bounds() {
        let range = Range {
            start: 999_999_999,
            end: None,
        };

        assert_eq!(None, range.resolve(100 * 1024 * 1024));
    }

    #[test]
    fn test_resolve_no_end_defaults_to_last_byte() {
        let range = Range {
            start: 10,
            end: None,
        };

        assert_eq!(Some((10, 99)), range.resolve(100));
    }
}
