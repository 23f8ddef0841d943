//! ResetGate - mutual exclusion for the reset sequence
//!
//! A reset spans several suspension points (stop, wait, rewind, wait), so it
//! needs a real async lock. Acquisition is bounded; the permit releases on
//! drop, including on error paths and task cancellation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::{timeout, Instant};
use tracing::warn;

use crate::error::DispatchError;

/// Holds longer than this are logged on release
pub const LONG_HOLD: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ResetGate {
    lock: Arc<Mutex<()>>,
    acquire_timeout: Duration,
}

impl ResetGate {
    pub fn new(acquire_timeout: Duration) -> Self {
        Self {
            lock: Arc::new(Mutex::new(())),
            acquire_timeout,
        }
    }

    /// Wait for the gate, at most `acquire_timeout`
    pub async fn acquire(&self, holder: &'static str) -> Result<GatePermit, DispatchError> {
        let started = Instant::now();
        match timeout(self.acquire_timeout, Arc::clone(&self.lock).lock_owned()).await {
            Ok(guard) => Ok(GatePermit {
                _guard: guard,
                holder,
                acquired_at: Instant::now(),
            }),
            Err(_) => Err(DispatchError::GateTimeout {
                waited_ms: started.elapsed().as_millis() as u64,
            }),
        }
    }

    /// Whether a permit is currently held
    pub fn is_held(&self) -> bool {
        self.lock.try_lock().is_err()
    }
}

/// Proof of holding the gate
#[derive(Debug)]
pub struct GatePermit {
    _guard: OwnedMutexGuard<()>,
    holder: &'static str,
    acquired_at: Instant,
}

impl GatePermit {
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        let held = self.held_for();
        if held > LONG_HOLD {
            warn!(holder = self.holder, held_ms = held.as_millis() as u64, "Reset gate held for a long time");
        }
    }
}
