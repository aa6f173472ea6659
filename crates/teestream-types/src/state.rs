//! Session lifecycle state.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a capture session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Built but not yet acquired.
    #[default]
    Idle,

    /// Pipes are open and reader threads are running.
    Active {
        /// Whether a single merge coordinator reads both channels.
        merged: bool,
    },

    /// Released; the session cannot be reopened.
    Released,
}

impl SessionState {
    /// Returns true if the session has not been acquired yet.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns true if the session is capturing.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    /// Returns true if the session has been released.
    pub fn is_released(&self) -> bool {
        matches!(self, Self::Released)
    }

    /// Returns true if a merge coordinator is running.
    pub fn is_merged(&self) -> bool {
        matches!(self, Self::Active { merged: true })
    }

    /// Returns a simple string representation of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Active { .. } => "Active",
            Self::Released => "Released",
        }
    }
}
