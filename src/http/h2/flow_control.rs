//! Flow-control windows (RFC 9113 Section 5.2)
//!
//! Windows exist per stream and for the connection; a DATA frame debits
//! both, padding included.
//!
//! The two directions are tracked differently:
//! - [`FlowControlWindow`] is a receive window, owned by the read loop
//!   (connection level) or guarded by the stream's receive state
//! - [`SendWindow`] is an atomic counter, debited by request writers and
//!   credited by the read loop when WINDOW_UPDATE or SETTINGS arrive

use super::error::{Error, Result};
use super::{DEFAULT_INITIAL_WINDOW_SIZE, MAX_WINDOW_SIZE};
use std::sync::atomic::{AtomicI64, Ordering};

/// Receive-side flow control window
///
/// Tracks how many more bytes the peer may send before we must replenish.
#[derive(Debug, Clone)]
pub struct FlowControlWindow {
    /// Size the window is restored to by WINDOW_UPDATE
    initial_size: u32,
    /// Never negative: overruns are rejected in `receive`
    current_size: i64,
}

impl FlowControlWindow {
    pub fn new() -> Self {
        Self::with_initial_size(DEFAULT_INITIAL_WINDOW_SIZE)
    }

    pub fn with_initial_size(initial_size: u32) -> Self {
        FlowControlWindow {
            initial_size,
            current_size: initial_size as i64,
        }
    }

    /// Create a window whose current size differs from its target size
    ///
    /// The connection window starts at 65535 regardless of configuration and
    /// is raised to its target by the first WINDOW_UPDATE.
    pub fn with_sizes(initial_size: u32, current_size: u32) -> Self {
        FlowControlWindow {
            initial_size,
            current_size: current_size as i64,
        }
    }

    /// Bytes the peer may still send
    pub fn size(&self) -> i64 {
        self.current_size
    }

    pub fn initial_size(&self) -> u32 {
        self.initial_size
    }

    /// Debit a received DATA frame
    ///
    /// `amount` is the full flow-controlled length, padding included.
    pub fn receive(&mut self, amount: usize) -> Result<()> {
        if amount as i64 > self.current_size {
            return Err(Error::FlowControl(format!(
                "received {} bytes with only {} bytes of window",
                amount, self.current_size
            )));
        }
        self.current_size -= amount as i64;
        Ok(())
    }

    /// WINDOW_UPDATE increment due, if any
    ///
    /// Returns the increment restoring the full initial size once less than
    /// half of it remains, and credits the window by that amount.
    pub fn take_window_update(&mut self) -> Option<u32> {
        let initial_size = self.initial_size as i64;

        if self.current_size < initial_size / 2 {
            let increment = (initial_size - self.current_size) as u32;
            self.current_size = initial_size;
            Some(increment)
        } else {
            None
        }
    }
}

impl Default for FlowControlWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// Send-side flow control window shared between writers and the read loop
///
/// The value is signed: a SETTINGS frame shrinking the initial window can
/// leave it negative until enough WINDOW_UPDATE credit arrives.
#[derive(Debug)]
pub struct SendWindow(AtomicI64);

impl SendWindow {
    /// Create a window with the given initial size
    pub fn new(initial_size: u32) -> Self {
        SendWindow(AtomicI64::new(initial_size as i64))
    }

    /// Bytes that may be sent right now (may be negative)
    pub fn available(&self) -> i64 {
        self.0.load(Ordering::Acquire)
    }

    /// Take up to `max` bytes of window
    ///
    /// Returns the amount reserved, zero if the window is exhausted.
    pub fn reserve(&self, max: usize) -> usize {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if current <= 0 || max == 0 {
                return 0;
            }
            let take = current.min(max as i64);
            match self.0.compare_exchange_weak(
                current,
                current - take,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return take as usize,
                Err(actual) => current = actual,
            }
        }
    }

    /// Return window reserved but not used
    pub fn release(&self, amount: usize) {
        self.0.fetch_add(amount as i64, Ordering::AcqRel);
    }

    /// Apply a WINDOW_UPDATE increment
    ///
    /// Exceeding 2^31-1 is a FLOW_CONTROL_ERROR (RFC 7540 Section 6.9.1).
    pub fn increase(&self, increment: u32) -> Result<i64> {
        self.adjust(increment as i64)
    }

    /// Apply a signed delta from a SETTINGS_INITIAL_WINDOW_SIZE change
    pub fn adjust(&self, delta: i64) -> Result<i64> {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                let updated = current + delta;
                (updated <= MAX_WINDOW_SIZE as i64).then_some(updated)
            })
            .map(|previous| previous + delta)
            .map_err(|current| {
                Error::FlowControl(format!(
                    "window {} + {} exceeds maximum (2^31-1)",
                    current, delta
                ))
            })
    }
}
