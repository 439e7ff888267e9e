//! Lock-free slot bitmap.

use std::sync::atomic::{AtomicU64, Ordering};

/// Tracks which slots of a pool are loaned out. A set bit is a loaned slot.
pub struct AtomicBitmap {
    words: Box<[AtomicU64]>,
    num_slots: usize,
}

impl AtomicBitmap {
    /// All `num_slots` slots free.
    pub fn new(num_slots: usize) -> Self {
        let words = (0..num_slots.div_ceil(64))
            .map(|_| AtomicU64::new(0))
            .collect();
        Self { words, num_slots }
    }

    /// Claim the lowest free slot.
    pub fn acquire_slot(&self) -> Option<usize> {
        for (word_idx, word) in self.words.iter().enumerate() {
            let mut current = word.load(Ordering::Relaxed);
            while current != u64::MAX {
                let bit = (!current).trailing_zeros() as usize;
                let slot = word_idx * 64 + bit;
                if slot >= self.num_slots {
                    return None;
                }
                match word.compare_exchange_weak(
                    current,
                    current | (1 << bit),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => return Some(slot),
                    Err(actual) => current = actual,
                }
            }
        }
        None
    }

    /// Return a slot. Returns false if the slot was not loaned out, which
    /// means a double release.
    pub fn release_slot(&self, slot: usize) -> bool {
        if slot >= self.num_slots {
            return false;
        }
        let mask = 1u64 << (slot % 64);
        let previous = self.words[slot / 64].fetch_and(!mask, Ordering::AcqRel);
        previous & mask != 0
    }

    /// Number of free slots (snapshot).
    pub fn count_free(&self) -> usize {
        let loaned: usize = self
            .words
            .iter()
            .map(|w| w.load(Ordering::Relaxed).count_ones() as usize)
            .sum();
        self.num_slots - loaned
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.num_slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_acquire_until_full() {
        let bitmap = AtomicBitmap::new(70);
        let slots: Vec<_> = (0..70).map(|_| bitmap.acquire_slot().unwrap()).collect();
        assert_eq!(slots, (0..70).collect::<Vec<_>>());
        assert_eq!(bitmap.acquire_slot(), None);
        assert_eq!(bitmap.count_free(), 0);
    }

    #[test]
    fn test_double_release_detected() {
        let bitmap = AtomicBitmap::new(4);
        let slot = bitmap.acquire_slot().unwrap();
        assert!(bitmap.release_slot(slot));
        assert!(!bitmap.release_slot(slot));
        assert_eq!(bitmap.count_free(), 4);
    }

    #[test]
    fn test_concurrent_acquire_is_unique() {
        let bitmap = Arc::new(AtomicBitmap::new(256));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let bitmap = bitmap.clone();
                std::thread::spawn(move || {
                    (0..64).map(|_| bitmap.acquire_slot().unwrap()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for slot in h.join().unwrap() {
                assert!(seen.insert(slot));
            }
        }
        assert_eq!(seen.len(), 256);
    }
}
