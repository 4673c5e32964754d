//! Actions returned to the present loop and the abort rules shared by both
//! roles.
//!
//! Nothing here performs I/O. The coordinators in framelock-node read the
//! cluster state and the clock, then ask this module what to do.

use framelock_types::InitializationState;

/// What the rendering thread does after a present attempt returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresentAction {
    /// Present again, within the same frame.
    RepeatPresent,
    /// Done with this frame, keep warming up on the next one.
    ContinueToNextFrame,
    /// The barrier is warmed up: end the frame and stop calling back.
    BarrierWarmedUp,
}

impl PresentAction {
    /// Whether this action ends the current frame.
    pub fn ends_frame(self) -> bool {
        !matches!(self, Self::RepeatPresent)
    }
}

/// Reason to abandon the warmup, if any.
///
/// A passed deadline wins over a terminating cluster since it is the more
/// specific of the two.
pub fn abort_reason(terminated: bool, deadline_expired: bool) -> Option<InitializationState> {
    if deadline_expired {
        Some(InitializationState::BarrierWarmupTimeout)
    } else if terminated {
        Some(InitializationState::UnexpectedTermination)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_to_abort() {
        assert_eq!(abort_reason(false, false), None);
    }

    #[test]
    fn termination_aborts() {
        assert_eq!(
            abort_reason(true, false),
            Some(InitializationState::UnexpectedTermination)
        );
    }

    #[test]
    fn timeout_wins_over_termination() {
        assert_eq!(
            abort_reason(true, true),
            Some(InitializationState::BarrierWarmupTimeout)
        );
        assert_eq!(
            abort_reason(false, true),
            Some(InitializationState::BarrierWarmupTimeout)
        );
    }

    #[test]
    fn only_repeat_keeps_the_frame_open() {
        assert!(!PresentAction::RepeatPresent.ends_frame());
        assert!(PresentAction::ContinueToNextFrame.ends_frame());
        assert!(PresentAction::BarrierWarmedUp.ends_frame());
    }
}
