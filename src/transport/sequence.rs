//! 16-bit sequence numbers.
//!
//! All arithmetic is modulo 65536. "Ahead" and "distance" are wrap-aware and
//! never use a naive signed comparison of the raw values.

use crate::core::constants::SEQUENCE_HALF_RANGE;

/// Forward distance from `from` to `to` on the u16 ring.
#[inline]
pub fn distance(from: u16, to: u16) -> u16 {
    to.wrapping_sub(from)
}

/// Whether `seq` lies strictly ahead of `reference` (within half the ring).
#[inline]
pub fn is_ahead(seq: u16, reference: u16) -> bool {
    let d = distance(reference, seq);
    d != 0 && d < SEQUENCE_HALF_RANGE
}

/// Per-channel, per-direction sequence counter.
///
/// [`peek`](Self::peek) reads the next value; [`next`](Self::next) is the
/// only way to advance it.
#[derive(Debug, Clone, Default)]
pub struct SequenceAllocator {
    next: u16,
}

impl SequenceAllocator {
    /// Create an allocator starting at 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an allocator starting at `start`.
    pub fn starting_at(start: u16) -> Self {
        Self { next: start }
    }

    /// The value the next call to [`next`](Self::next) will return.
    pub fn peek(&self) -> u16 {
        self.next
    }

    /// Return the current value and advance, wrapping after 65535.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> u16 {
        let seq = self.next;
        self.next = self.next.wrapping_add(1);
        tracing::trace!(seq, next = self.next, "sequence: assigned");
        seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocator_counts_up() {
        let mut alloc = SequenceAllocator::new();
        assert_eq!(alloc.next(), 0);
        assert_eq!(alloc.next(), 1);
        assert_eq!(alloc.next(), 2);
    }

    #[test]
    fn test_allocator_wraps() {
        let mut alloc = SequenceAllocator::starting_at(u16::MAX);
        assert_eq!(alloc.next(), u16::MAX);
        assert_eq!(alloc.next(), 0);
        assert_eq!(alloc.next(), 1);
    }

    #[test]
    fn test_peek_does_not_advance() {
        let mut alloc = SequenceAllocator::starting_at(7);
        assert_eq!(alloc.peek(), 7);
        assert_eq!(alloc.peek(), 7);
        assert_eq!(alloc.next(), 7);
        assert_eq!(alloc.peek(), 8);
    }

    #[test]
    fn test_full_cycle_returns_to_start() {
        let mut alloc = SequenceAllocator::new();
        for _ in 0..65536u32 {
            alloc.next();
        }
        assert_eq!(alloc.next(), 0);
    }

    #[test]
    fn test_distance_wraps() {
        assert_eq!(distance(0, 5), 5);
        assert_eq!(distance(65530, 3), 9);
        assert_eq!(distance(6, 3), 65533);
    }

    #[test]
    fn test_is_ahead() {
        assert!(is_ahead(1, 0));
        assert!(is_ahead(2, 65535));
        assert!(!is_ahead(0, 0));
        assert!(!is_ahead(65535, 0));
        assert!(!is_ahead(0x8000, 0));
        assert!(is_ahead(0x7FFF, 0));
    }
}
