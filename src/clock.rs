//! Injectable wall-clock source.
//!
//! The teacher reads wall-clock seconds directly at each mutation; this
//! keeps the same behavior for real use (see [`SystemClock`]) but routes it
//! through a trait so tests can assert `ctime` monotonicity and `atime`
//! updates without depending on real time.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A source of POSIX-style timestamps (seconds since the Unix epoch).
pub trait Clock: Send + Sync {
    /// Returns the current time in seconds since the Unix epoch.
    fn now(&self) -> u32;
}

/// The default clock, backed by [`SystemTime::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0)
    }
}

/// A test double that advances by one second every time it's read, so tests
/// can assert `ctime`/`mtime`/`atime` monotonicity without real-time
/// flakiness (§4.12).
#[derive(Debug, Default)]
pub struct SteppingClock {
    seconds: AtomicU32,
}

impl SteppingClock {
    pub fn starting_at(seconds: u32) -> Self {
        Self {
            seconds: AtomicU32::new(seconds),
        }
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> u32 {
        self.seconds.fetch_add(1, Ordering::Relaxed)
    }
}
