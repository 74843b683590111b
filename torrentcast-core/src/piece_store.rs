use std::collections::HashMap;
use std::sync::RwLock;

use bytes::Bytes;
use log::trace;

use crate::torrent::PieceIndex;

/// A bounded, in-memory cache of piece bytes keyed by global piece index,
/// per spec §4.A.
///
/// Piece slots are stored as [Bytes] (a reference-counted, cheaply cloned
/// byte buffer) so that a read in flight can hold its own clone of a piece
/// while [PieceStore::evict] concurrently drops the store's own handle —
/// the store and any in-flight reader are independent owners of the same
/// underlying allocation, per the cyclic-ownership design note.
#[derive(Debug, Default)]
pub struct PieceStore {
    pieces: RwLock<HashMap<PieceIndex, Bytes>>,
}

impl PieceStore {
    /// Creates an empty piece store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the bytes for the given piece index.
    pub fn put(&self, index: PieceIndex, bytes: Bytes) {
        self.pieces.write().expect("piece store lock poisoned").insert(index, bytes);
    }

    /// Returns a cheap clone of the bytes for the given piece, if present.
    pub fn get(&self, index: PieceIndex) -> Option<Bytes> {
        self.pieces
            .read()
            .expect("piece store lock poisoned")
            .get(&index)
            .cloned()
    }

    /// Returns a `[offset, offset+length)` slice of the given piece, if the
    /// piece is present and the range is within bounds.
    pub fn get_slice(&self, index: PieceIndex, offset: usize, length: usize) -> Option<Bytes> {
        let piece = self.get(index)?;
        let end = offset.checked_add(length)?;
        if end > piece.len() {
            return None;
        }
        Some(piece.slice(offset..end))
    }

    /// Returns true if the given piece is currently resident.
    pub fn has(&self, index: PieceIndex) -> bool {
        self.pieces.read().expect("piece store lock poisoned").contains_key(&index)
    }

    /// Drops the bytes for the given piece, if present. A subsequent read
    /// from that region must be re-fetched from the swarm.
    pub fn evict(&self, index: PieceIndex) {
        let removed = self
            .pieces
            .write()
            .expect("piece store lock poisoned")
            .remove(&index)
            .is_some();

        if removed {
            trace!("Evicted piece {}", index);
        }
    }

    /// Evicts every resident piece whose index falls outside
    /// `[window_start, window_end]`.
    pub fn evict_outside(&self, window_start: PieceIndex, window_end: PieceIndex) -> usize {
        let mut pieces = self.pieces.write().expect("piece store lock poisoned");
        let stale: Vec<PieceIndex> = pieces
            .keys()
            .copied()
            .filter(|i| *i < window_start || *i > window_end)
            .collect();

        for index in &stale {
            pieces.remove(index);
        }

        stale.len()
    }

    /// Drops every resident piece immediately, used for the hard-cap
    /// aggressive-eviction path (spec §4.D step 7).
    pub fn evict_all(&self) -> usize {
        let mut pieces = self.pieces.write().expect("piece store lock poisoned");
        let count = pieces.len();
        pieces.clear();
        count
    }

    /// The sum of lengths of all present pieces.
    pub fn resident_bytes(&self) -> u64 {
        self.pieces
            .read()
            .expect("piece store lock poisoned")
            .values()
            .map(|b| b.len() as u64)
            .sum()
    }

    /// The number of pieces currently resident.
    pub fn resident_count(&self) -> usize {
        self.pieces.read().expect("piece store lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get() {
        let store = PieceStore::new();

        store.put(0, Bytes::from_static(b"hello"));

        assert_eq!(Some(Bytes::from_static(b"hello")), store.get(0));
        assert!(store.has(0));
        assert_eq!(None, store.get(1));
    }

    #[test]
    fn test_evict() {
        let store = PieceStore::new();
        store.put(0, Bytes::from_static(b"hello"));

        store.evict(0);

        assert!(!store.has(0));
        assert_eq!(0, store.resident_bytes());
    }

    #[test]
    fn test_evict_outside_window() {
        let store = PieceStore::new();
        for i in 0..10 {
            store.put(i, Bytes::from_static(b"x"));
        }

        let evicted = store.evict_outside(4, 6);

        assert_eq!(7, evicted);
        assert!(store.has(4));
        assert!(store.has(5));
        assert!(store.has(6));
        assert!(!store.has(0));
        assert!(!store.has(9));
    }

    #[test]
    fn test_resident_bytes() {
        let store = PieceStore::new();
        store.put(0, Bytes::from_static(b"hello"));
        store.put(1, Bytes::from_static(b"world!"));

        assert_eq!(11, store.resident_bytes());
        assert_eq!(2, store.resident_count());
    }

    #[test]
    fn test_get_slice() {
        let store = PieceStore::new();
        store.put(0, Bytes::from_static(b"hello world"));

        let result = store.get_slice(0, 6, 5).unwrap();

        assert_eq!(Bytes::from_static(b"world"), result);
        assert_eq!(None, store.get_slice(0, 6, 100));
    }

    #[test]
    fn test_evict_all() {
        let store = PieceStore::new();
        for i in 0..5 {
            store.put(i, Bytes::from_static(b"x"));
        }

        let evicted = store.evict_all();

        assert_eq!(5, evicted);
        assert_eq!(0, store.resident_count());
    }
}
