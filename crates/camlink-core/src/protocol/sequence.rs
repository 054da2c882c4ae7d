//! Per-device sequence counter for correlating responses with commands.
//!
//! Each registered camera owns one counter.  The value travels in the 16-bit
//! `sequence_number` header field, so the counter wraps from 65535 back to 0.
//! A value is only ever reused after 65536 further allocations, and at most
//! one command per device is in flight, so a wrapped number never collides
//! with a pending one.

use std::sync::atomic::{AtomicU16, Ordering};

/// A thread-safe, wrapping 16-bit sequence counter.
///
/// # Examples
///
/// ```rust
/// use camlink_core::protocol::SequenceCounter;
///
/// let counter = SequenceCounter::starting_at(65535);
/// assert_eq!(counter.next(), 65535);
/// assert_eq!(counter.next(), 0);
/// ```
#[derive(Debug)]
pub struct SequenceCounter {
    inner: AtomicU16,
}

impl SequenceCounter {
    /// Creates a new counter starting at 0.
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Creates a counter whose first allocated number is `start`.
    pub fn starting_at(start: u16) -> Self {
        Self {
            inner: AtomicU16::new(start),
        }
    }

    /// Returns the next sequence number and advances the counter.
    ///
    /// `fetch_add` on an atomic integer wraps on overflow, so 65535 is
    /// followed by 0 without panicking.
    pub fn next(&self) -> u16 {
        self.inner.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the number the next call to [`next`](Self::next) will allocate.
    pub fn current(&self) -> u16 {
        self.inner.load(Ordering::Relaxed)
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}
