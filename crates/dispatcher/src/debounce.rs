//! Debouncer - rate limiting keyed by command name
//!
//! Pure and synchronous. The caller supplies the clock so behaviour is
//! fully deterministic under test.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Per-key debounce state
///
/// Created on first use of a key and never expired; the key space is the
/// small, fixed set of command names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebounceEntry {
    pub key: String,
    pub last_accepted_at: Instant,
    pub suppressed_count: u32,
}

/// Result of a debounce check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub execute: bool,
    /// Rejections since the last accepted occurrence
    pub suppressed_count: u32,
}

#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    entries: HashMap<String, DebounceEntry>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Decide whether `key` may run at `now`
    ///
    /// The first call for a key always passes. Calls inside the window of the
    /// last accepted call are rejected and counted. A call outside the window
    /// passes and resets the window and the counter.
    pub fn should_execute(&mut self, key: &str, now: Instant) -> Decision {
        match self.entries.get_mut(key) {
            None => {
                self.entries.insert(
                    key.to_string(),
                    DebounceEntry {
                        key: key.to_string(),
                        last_accepted_at: now,
                        suppressed_count: 0,
                    },
                );
                Decision {
                    execute: true,
                    suppressed_count: 0,
                }
            }
            Some(entry) if now.saturating_duration_since(entry.last_accepted_at) < self.window => {
                entry.suppressed_count += 1;
                Decision {
                    execute: false,
                    suppressed_count: entry.suppressed_count,
                }
            }
            Some(entry) => {
                entry.last_accepted_at = now;
                entry.suppressed_count = 0;
                Decision {
                    execute: true,
                    suppressed_count: 0,
                }
            }
        }
    }

    pub fn entry(&self, key: &str) -> Option<&DebounceEntry> {
        self.entries.get(key)
    }

    /// Forget one key, or every key when `None`
    pub fn reset(&mut self, key: Option<&str>) {
        match key {
            Some(key) => {
                self.entries.remove(key);
            }
            None => self.entries.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(500);

    #[test]
    fn test_window_semantics() {
        let mut d = Debouncer::new(WINDOW);
        let t0 = Instant::now();

        assert!(d.should_execute("reset", t0).execute);

        let second = d.should_execute("reset", t0 + Duration::from_millis(10));
        assert!(!second.execute);
        assert_eq!(second.suppressed_count, 1);

        let third = d.should_execute("reset", t0 + Duration::from_millis(20));
        assert_eq!(third.suppressed_count, 2);

        let after = d.should_execute("reset", t0 + WINDOW + Duration::from_millis(1));
        assert!(after.execute);
        assert_eq!(after.suppressed_count, 0);
        assert_eq!(d.entry("reset").unwrap().suppressed_count, 0);
    }

    #[test]
    fn test_rejections_do_not_extend_window() {
        let mut d = Debouncer::new(WINDOW);
        let t0 = Instant::now();
        d.should_execute("start_simulation", t0);
        d.should_execute("start_simulation", t0 + Duration::from_millis(400));
        // measured from the accepted call at t0, not the rejection at 400ms
        assert!(d.should_execute("start_simulation", t0 + Duration::from_millis(510)).execute);
    }

    #[test]
    fn test_keys_are_independent() {
        let mut d = Debouncer::new(WINDOW);
        let t0 = Instant::now();
        assert!(d.should_execute("reset", t0).execute);
        assert!(d.should_execute("stop_simulation", t0).execute);
        assert!(d.should_execute("set_mass", t0).execute);
        assert!(!d.should_execute("reset", t0).execute);
    }

    #[test]
    fn test_zero_window_never_suppresses() {
        let mut d = Debouncer::new(Duration::ZERO);
        let t0 = Instant::now();
        assert!(d.should_execute("reset", t0).execute);
        assert!(d.should_execute("reset", t0).execute);
    }

    #[test]
    fn test_reset() {
        let mut d = Debouncer::new(WINDOW);
        let t0 = Instant::now();
        d.should_execute("reset", t0);
        d.reset(Some("reset"));
        assert!(d.should_execute("reset", t0).execute);
        d.reset(None);
        assert!(d.entry("reset").is_none());
    }
}
