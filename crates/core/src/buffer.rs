//! Priority-ordered handoff queue absorbing out-of-order arrival.
//!
//! A [`ReorderBuffer`] keeps `(key, value)` entries sorted ascending by
//! key; [`get`](ReorderBuffer::get) always removes the entry with the
//! smallest key. It is used at two layers on the receiving side:
//!
//! - within one frame/chunk, keyed by wire sequence number, to tolerate
//!   fragment-level reordering until the marker fragment arrives;
//! - across frames/chunks, keyed by frame/chunk index, to tolerate
//!   whole-unit reordering before the paced playback loop.
//!
//! Insertion scans from the tail, so in-order arrival is O(1) and the
//! cost only grows with how far out of order a packet actually is. The
//! buffer is expected to stay short — a handful of concurrently
//! reordered fragments or frames.

use std::collections::VecDeque;

use parking_lot::Mutex;

/// Thread-safe sorted handoff queue. All operations serialize on one
/// per-instance lock; `get()` on an empty buffer returns immediately
/// rather than blocking.
#[derive(Debug, Default)]
pub struct ReorderBuffer<T> {
    entries: Mutex<VecDeque<(i64, T)>>,
}

impl<T> ReorderBuffer<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Insert an entry at its sorted position, scanning from the tail.
    ///
    /// Duplicate keys are kept; the newer entry lands after the older one.
    pub fn put(&self, key: i64, value: T) {
        let mut entries = self.entries.lock();
        let pos = entries
            .iter()
            .rposition(|(k, _)| *k <= key)
            .map_or(0, |i| i + 1);
        entries.insert(pos, (key, value));
    }

    /// Remove and return the entry with the smallest key, if any.
    pub fn get(&self) -> Option<(i64, T)> {
        self.entries.lock().pop_front()
    }

    /// Drop all entries. Used on seek/speed/quality changes to discard
    /// stale in-flight data.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yields_ascending_key_order() {
        let buffer = ReorderBuffer::new();
        buffer.put(3, 'c');
        buffer.put(1, 'a');
        buffer.put(2, 'b');

        assert_eq!(buffer.get(), Some((1, 'a')));
        assert_eq!(buffer.get(), Some((2, 'b')));
        assert_eq!(buffer.get(), Some((3, 'c')));
        assert_eq!(buffer.get(), None);
    }

    #[test]
    fn empty_get_returns_none_without_blocking() {
        let buffer: ReorderBuffer<u8> = ReorderBuffer::new();
        assert_eq!(buffer.get(), None);
        assert!(buffer.is_empty());
    }

    #[test]
    fn in_order_inserts_append() {
        let buffer = ReorderBuffer::new();
        for i in 0..5 {
            buffer.put(i, i);
        }
        for i in 0..5 {
            assert_eq!(buffer.get(), Some((i, i)));
        }
    }

    #[test]
    fn clear_drops_everything() {
        let buffer = ReorderBuffer::new();
        buffer.put(1, ());
        buffer.put(2, ());
        assert_eq!(buffer.len(), 2);

        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.get(), None);
    }

    #[test]
    fn duplicate_keys_preserve_insertion_order() {
        let buffer = ReorderBuffer::new();
        buffer.put(1, "first");
        buffer.put(1, "second");
        assert_eq!(buffer.get(), Some((1, "first")));
        assert_eq!(buffer.get(), Some((1, "second")));
    }

    #[test]
    fn concurrent_put_get() {
        use std::sync::Arc;
        use std::thread;

        let buffer = Arc::new(ReorderBuffer::new());
        let writer = {
            let buffer = buffer.clone();
            thread::spawn(move || {
                for i in (0..100).rev() {
                    buffer.put(i, i);
                }
            })
        };
        writer.join().unwrap();

        let mut last = -1;
        while let Some((key, _)) = buffer.get() {
            assert!(key > last);
            last = key;
        }
        assert_eq!(last, 99);
    }
}
