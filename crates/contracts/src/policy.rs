//! Access policy
//!
//! Decides whether the engine may advance on its own. Both flags live under
//! one lock so a reader never sees half of an update.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Snapshot of the access policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicyState {
    pub auto_stop_enabled: bool,
    pub user_control_enabled: bool,
}

impl AccessPolicyState {
    /// Engine must be held stopped
    pub fn forbids_advancing(&self) -> bool {
        self.auto_stop_enabled && !self.user_control_enabled
    }
}

/// Process-wide access policy, shared by reference with every loop
#[derive(Debug)]
pub struct AccessPolicy {
    state: RwLock<AccessPolicyState>,
}

impl AccessPolicy {
    /// Starts with user control disabled
    pub fn new(auto_stop_enabled: bool) -> Self {
        Self {
            state: RwLock::new(AccessPolicyState {
                auto_stop_enabled,
                user_control_enabled: false,
            }),
        }
    }

    pub fn snapshot(&self) -> AccessPolicyState {
        *self.state.read()
    }

    /// Returns the state after the change
    pub fn set_user_control(&self, enabled: bool) -> AccessPolicyState {
        let mut state = self.state.write();
        state.user_control_enabled = enabled;
        *state
    }

    /// Returns the state after the change
    pub fn set_auto_stop(&self, enabled: bool) -> AccessPolicyState {
        let mut state = self.state.write();
        state.auto_stop_enabled = enabled;
        *state
    }
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self::new(true)
    }
}
