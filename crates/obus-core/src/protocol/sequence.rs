//! Thread-safe call handle counter.
//!
//! # What is a call handle? (for beginners)
//!
//! Method calls are asynchronous: the client sends a CALL packet and the
//! server answers later with an ACK packet.  Both packets carry the same
//! 16-bit *call handle* so the client can match the answer to the request.
//!
//! Handle 0 is reserved to mean "not assigned yet", so the counter skips it
//! when it wraps around: `..., 65534, 65535, 1, 2, ...`.
//!
//! # Thread safety
//!
//! The counter uses `AtomicU16` with a compare-and-swap loop
//! ([`AtomicU16::fetch_update`]) so that the "increment, wrap and skip 0" step
//! happens as a single indivisible operation.

use std::sync::atomic::{AtomicU16, Ordering};

/// A thread-safe counter producing non-zero 16-bit call handles.
///
/// The counter starts at 1 and is pre-incremented, so the first handle handed
/// out is 2.  After 65535 it wraps to 1, never to 0.
///
/// # Examples
///
/// ```rust
/// use obus_core::protocol::CallHandleCounter;
///
/// let counter = CallHandleCounter::new();
/// assert_eq!(counter.next(), 2);
/// assert_eq!(counter.next(), 3);
/// ```
#[derive(Debug)]
pub struct CallHandleCounter {
    inner: AtomicU16,
}

impl CallHandleCounter {
    /// Creates a new counter whose first handle will be 2.
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Creates a counter whose *last issued* handle is `current`.
    ///
    /// Mostly useful in tests to exercise the wraparound without issuing
    /// 65535 calls first.
    pub fn starting_at(current: u16) -> Self {
        Self {
            inner: AtomicU16::new(current),
        }
    }

    /// Returns the next call handle, skipping the reserved value 0.
    pub fn next(&self) -> u16 {
        let bump = |cur: u16| match cur.wrapping_add(1) {
            0 => 1,
            n => n,
        };
        // The closure never returns None, so both arms carry the previous value.
        let prev = match self
            .inner
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| Some(bump(cur)))
        {
            Ok(prev) | Err(prev) => prev,
        };
        bump(prev)
    }

    /// Returns the last issued handle without incrementing.
    pub fn current(&self) -> u16 {
        self.inner.load(Ordering::Relaxed)
    }
}

impl Default for CallHandleCounter {
    fn default() -> Self {
        Self::new()
    }
}
