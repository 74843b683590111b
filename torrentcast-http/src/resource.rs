use std::fmt::Debug;

use crate::error::Result;

/// The byte range, within the streamed file, that a [Stream] will yield.
pub type StreamRange = std::ops::Range<u64>;

/// A single chunk of bytes yielded by a [Stream].
pub type StreamBytesResult = Result<bytes::Bytes>;

/// A stream of bytes served out of the piece store for a byte range of the
/// selected file, per spec §4.A/§4.E.
///
/// Generalizes the teacher's file-backed stream abstraction so the same
/// range/content-range bookkeeping works whether bytes come from a local
/// file or, as here, from pieces that are still arriving over the swarm.
pub trait Stream: Debug + futures::Stream<Item = StreamBytesResult> + Send {
    /// The half-open byte range `[start, end)` this stream will yield.
    fn range(&self) -> StreamRange;

    /// The total length of the resource being streamed, regardless of how
    /// much of it this particular stream covers.
    fn resource_len(&self) -> u64;

    /// The HTTP `Content-Range` value for this stream's range.
    fn content_range(&self) -> String {
        let range = self.range();
        format!(
            "bytes {}-{}/{}",
            range.start,
            range.end.saturating_sub(1),
            self.resource_len()
        )
    }
}
