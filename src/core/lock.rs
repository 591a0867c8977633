//! Time-windowed, key-protected lock
//!
//! A [`TimedLock`] refuses every unlock attempt until its window has
//! elapsed. If it was armed with a [`Secret`], only a caller presenting the
//! same secret can release it afterwards. The clock is monotonic
//! (`tokio::time::Instant`), so paused-time tests can drive it.

use rand::RngCore;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Length of generated secrets in bytes
pub const SECRET_LEN: usize = 32;

/// Opaque shared secret used to arm and release a [`TimedLock`]
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(Vec<u8>);

impl Secret {
    /// Wrap caller-provided key material
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Generate a fresh random secret
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; SECRET_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Compare without short-circuiting on the first differing byte
    pub fn ct_eq(&self, other: &Secret) -> bool {
        if self.0.len() != other.0.len() {
            return false;
        }
        self.0
            .iter()
            .zip(other.0.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(<{} bytes>)", self.0.len())
    }
}

#[derive(Debug, Clone)]
struct Armed {
    locked_at: Instant,
    duration: Duration,
    secret: Option<Secret>,
}

/// Time-window + shared-secret gate
#[derive(Debug, Clone, Default)]
pub struct TimedLock {
    armed: Option<Armed>,
}

impl TimedLock {
    /// Create an unlocked lock
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the lock for `duration`, optionally keyed.
    ///
    /// Re-arming an already locked instance restarts the window and
    /// replaces the key.
    pub fn lock(&mut self, duration: Duration, key: Option<Secret>) {
        self.armed = Some(Armed {
            locked_at: Instant::now(),
            duration,
            secret: key,
        });
    }

    /// Try to release the lock.
    ///
    /// Returns `true` when the lock is (now) unlocked. Before the window has
    /// elapsed every attempt fails. Afterwards a keyless lock opens for
    /// anyone, a keyed lock only for the matching key. A wrong key leaves
    /// the lock engaged until it is re-armed.
    pub fn attempt_unlock(&mut self, key: Option<&Secret>) -> bool {
        let Some(armed) = &self.armed else {
            return true;
        };

        if armed.locked_at.elapsed() < armed.duration {
            return false;
        }

        let released = match (&armed.secret, key) {
            (None, _) => true,
            (Some(stored), Some(presented)) => stored.ct_eq(presented),
            (Some(_), None) => false,
        };

        if released {
            self.armed = None;
        }
        released
    }

    /// Whether the lock is currently engaged
    pub fn is_locked(&self) -> bool {
        self.armed.is_some()
    }

    /// Time left in the current window, if locked and not yet elapsed
    pub fn remaining(&self) -> Option<Duration> {
        self.armed
            .as_ref()
            .and_then(|a| a.duration.checked_sub(a.locked_at.elapsed()))
            .filter(|d| !d.is_zero())
    }
}
