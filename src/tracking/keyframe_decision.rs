//! Reference-frame replacement and map injection policy.
//!
//! A low inlier count is the only signal of weak tracking. While
//! initializing, the reference frame simply follows the latest frame until
//! one tracks well; once working, a weak cycle anchors a fresh reference
//! frame at the latest odometry pose and pushes its landmarks to the map.

use crate::tracking::TrackingState;

/// What happens to the reference frame after a tracking attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceUpdate {
    /// Still initializing: the current frame becomes the reference as is.
    /// Nothing is sent to the map and the reset flag is left alone.
    Replace,
    /// Initialization completed: the existing reference frame computes its
    /// world points and is sent to the map; it stays the reference.
    Promote,
    /// Tracking weak: the current frame becomes the reference, computes its
    /// world points and is sent to the map.
    Reset,
    /// Tracking good: the reference frame is kept.
    Keep,
}

/// Output of the keyframe policy for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyframeDecision {
    pub next_state: TrackingState,
    pub update: ReferenceUpdate,
}

impl KeyframeDecision {
    /// New value of the "reference just reset" flag, `None` to keep it.
    pub fn reset_flag(&self) -> Option<bool> {
        match self.update {
            ReferenceUpdate::Replace => None,
            ReferenceUpdate::Reset => Some(true),
            ReferenceUpdate::Promote | ReferenceUpdate::Keep => Some(false),
        }
    }

    /// Whether the current frame takes over as reference.
    pub fn replaces_reference(&self) -> bool {
        matches!(self.update, ReferenceUpdate::Replace | ReferenceUpdate::Reset)
    }

    /// Whether a frame is sent to the map this cycle.
    pub fn injects_landmarks(&self) -> bool {
        matches!(self.update, ReferenceUpdate::Promote | ReferenceUpdate::Reset)
    }
}

/// Inlier-count driven keyframe policy.
#[derive(Debug, Clone, Copy)]
pub struct KeyframePolicy {
    min_inliers: usize,
}

impl KeyframePolicy {
    pub fn new(min_inliers: usize) -> Self {
        Self { min_inliers }
    }

    pub fn min_inliers(&self) -> usize {
        self.min_inliers
    }

    /// Decide what to do with the reference frame given this cycle's inliers.
    ///
    /// Only meaningful while tracking; `NotInitialized` is returned unchanged
    /// with the reference kept.
    pub fn decide(&self, state: TrackingState, n_inliers: usize) -> KeyframeDecision {
        let weak = n_inliers < self.min_inliers;

        match state {
            TrackingState::NotInitialized => KeyframeDecision {
                next_state: state,
                update: ReferenceUpdate::Keep,
            },
            TrackingState::Initializing if weak => KeyframeDecision {
                next_state: TrackingState::Initializing,
                update: ReferenceUpdate::Replace,
            },
            // Initialization completes; the working checks that follow on the
            // same cycle see a strong count and keep the reference.
            TrackingState::Initializing => KeyframeDecision {
                next_state: TrackingState::Working,
                update: ReferenceUpdate::Promote,
            },
            TrackingState::Working if weak => KeyframeDecision {
                next_state: TrackingState::Working,
                update: ReferenceUpdate::Reset,
            },
            TrackingState::Working => KeyframeDecision {
                next_state: TrackingState::Working,
                update: ReferenceUpdate::Keep,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: usize = 12;

    #[test]
    fn test_initializing_weak_replaces_without_map() {
        let d = KeyframePolicy::new(MIN).decide(TrackingState::Initializing, MIN - 1);

        assert_eq!(d.next_state, TrackingState::Initializing);
        assert_eq!(d.update, ReferenceUpdate::Replace);
        assert!(d.replaces_reference());
        assert!(!d.injects_landmarks());
        assert_eq!(d.reset_flag(), None);
    }

    #[test]
    fn test_initializing_at_threshold_promotes() {
        let d = KeyframePolicy::new(MIN).decide(TrackingState::Initializing, MIN);

        assert_eq!(d.next_state, TrackingState::Working);
        assert_eq!(d.update, ReferenceUpdate::Promote);
        assert!(!d.replaces_reference());
        assert!(d.injects_landmarks());
        assert_eq!(d.reset_flag(), Some(false));
    }

    #[test]
    fn test_working_weak_resets() {
        let d = KeyframePolicy::new(MIN).decide(TrackingState::Working, 0);

        assert_eq!(d.next_state, TrackingState::Working);
        assert_eq!(d.update, ReferenceUpdate::Reset);
        assert!(d.replaces_reference());
        assert!(d.injects_landmarks());
        assert_eq!(d.reset_flag(), Some(true));
    }

    #[test]
    fn test_working_strong_keeps() {
        let d = KeyframePolicy::new(MIN).decide(TrackingState::Working, 200);

        assert_eq!(d.update, ReferenceUpdate::Keep);
        assert_eq!(d.reset_flag(), Some(false));
        assert!(!d.injects_landmarks());
    }

    #[test]
    fn test_working_is_never_left() {
        let policy = KeyframePolicy::new(MIN);
        for n in [0, MIN - 1, MIN, 10 * MIN] {
            assert_eq!(policy.decide(TrackingState::Working, n).next_state, TrackingState::Working);
        }
    }
}
