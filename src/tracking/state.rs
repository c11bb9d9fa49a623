//! Tracking state machine.
//!
//! `NotInitialized → Initializing → Working`; `Working` is never left.

/// State of the tracker, ordered by progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum TrackingState {
    /// Waiting for the odometry → camera transform and the first frame.
    #[default]
    NotInitialized,
    /// A reference frame exists but no frame has tracked well against it yet.
    Initializing,
    /// Tracking against the reference frame; landmarks are being mapped.
    Working,
}

impl TrackingState {
    /// Whether the reference frame exists and frames are being tracked.
    pub fn is_tracking(&self) -> bool {
        matches!(self, TrackingState::Initializing | TrackingState::Working)
    }
}

impl std::fmt::Display for TrackingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TrackingState::NotInitialized => "NOT_INITIALIZED",
            TrackingState::Initializing => "INITIALIZING",
            TrackingState::Working => "WORKING",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_states_ordered_by_progress() {
        assert!(TrackingState::NotInitialized < TrackingState::Initializing);
        assert!(TrackingState::Initializing < TrackingState::Working);
        assert!(!TrackingState::default().is_tracking());
    }

    #[test]
    fn test_display_names() {
        assert_eq!(TrackingState::Working.to_string(), "WORKING");
        assert_eq!(TrackingState::NotInitialized.to_string(), "NOT_INITIALIZED");
    }
}
