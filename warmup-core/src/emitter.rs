//! Emitter side of the warmup handshake.
//!
//! The emitter owns the authoritative stage. It advances only once every
//! known repeater reported completion of the current stage, and while the
//! repeaters are paused it counts how many presents it can issue before one
//! blocks: that count is the depth of the present pipeline.

use framelock_types::{Heartbeat, NodeIdBitVector, Status, WarmupStage};

use crate::PresentAction;

/// Default divisor applied to the measured pipeline depth.
///
/// Emitter and repeaters can both account for the presents straddling the
/// moment the barrier engages, so the raw count is halved. The value comes
/// from observation of the driver, not from first principles.
pub const DEFAULT_PIPELINE_DEPTH_DIVISOR: u32 = 2;

/// Number of extra presents repeaters must perform for a measured depth.
pub fn additional_present_count(pipeline_depth: u32, divisor: u32) -> u32 {
    pipeline_depth / divisor.max(1)
}

/// What the emitter's rendering thread should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitterDecision {
    /// Return this action to the present loop right away.
    Return(PresentAction),
    /// Every repeater saw its present block. Give the emitter time to start
    /// a present that may now be slow, then pause the repeaters.
    SettleThenPause,
    /// Wait (bounded) for a repeater to complete the current stage. On
    /// timeout return `on_timeout`, or evaluate again when it is `None`.
    AwaitRepeaters {
        /// Action to return when no repeater completed in time.
        on_timeout: Option<PresentAction>,
    },
    /// Repeaters are paused: watch the next present for blocking.
    ProbePresent,
    /// Every repeater confirmed the final burst.
    WarmedUp,
}

/// Emitter progress through the handshake. No I/O, no clock.
#[derive(Debug, Clone)]
pub struct EmitterProgress {
    heartbeat: Heartbeat,
    completed: NodeIdBitVector,
    presents_to_skip: u32,
    presents_while_paused: u32,
    depth_divisor: u32,
    finished: bool,
}

impl EmitterProgress {
    /// Start in [`WarmupStage::RepeaterFastPresent`].
    ///
    /// When repeaters start one frame behind, the first present is let
    /// through untouched so we do not try to synchronize before they even
    /// began rendering.
    pub fn new(repeaters_delayed: bool) -> Self {
        Self {
            heartbeat: Heartbeat::new(WarmupStage::RepeaterFastPresent),
            completed: NodeIdBitVector::new(),
            presents_to_skip: u32::from(repeaters_delayed),
            presents_while_paused: 0,
            depth_divisor: DEFAULT_PIPELINE_DEPTH_DIVISOR,
            finished: false,
        }
    }

    /// Use another divisor for the measured pipeline depth (minimum 1).
    pub fn with_depth_divisor(mut self, divisor: u32) -> Self {
        self.depth_divisor = divisor.max(1);
        self
    }

    /// Heartbeat to broadcast; its stage is the current stage.
    pub fn heartbeat(&self) -> Heartbeat {
        self.heartbeat
    }

    /// Current stage.
    pub fn stage(&self) -> WarmupStage {
        self.heartbeat.stage
    }

    /// Repeaters that completed the current stage.
    pub fn completed(&self) -> &NodeIdBitVector {
        &self.completed
    }

    /// Presents issued while the repeaters were paused.
    pub fn present_pipeline_depth(&self) -> u32 {
        self.presents_while_paused
    }

    /// Whether the handshake is over (warmed up or abandoned).
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Mark the handshake as over; nothing advances afterwards.
    pub fn finish(&mut self) {
        self.finished = true;
    }

    /// Record a repeater status.
    ///
    /// Only completions of the current stage count; stale retransmissions for
    /// earlier stages and pending statuses are ignored. Returns `true` when
    /// the repeater was not already known to be done.
    pub fn record_status(&mut self, status: &Status) -> bool {
        if self.finished || !status.completed || status.stage != self.heartbeat.stage {
            return false;
        }
        self.completed.insert(status.node_id)
    }

    /// Completions are counted, not matched against the presence set: a
    /// node that sent a completion but is not (or no longer) listed as
    /// present still counts toward `repeater_count`.
    fn all_repeaters_completed(&self, repeater_count: usize) -> bool {
        self.completed.set_bits_count() >= repeater_count
    }

    /// Decide what to do after a present attempt returned.
    pub fn decide(&mut self, repeater_count: usize) -> EmitterDecision {
        if self.finished {
            return EmitterDecision::Return(PresentAction::ContinueToNextFrame);
        }

        match self.heartbeat.stage {
            WarmupStage::RepeaterFastPresent => {
                if self.presents_to_skip > 0 {
                    self.presents_to_skip -= 1;
                    EmitterDecision::Return(PresentAction::ContinueToNextFrame)
                } else if repeater_count == 0 {
                    self.finished = true;
                    EmitterDecision::WarmedUp
                } else if self.all_repeaters_completed(repeater_count) {
                    EmitterDecision::SettleThenPause
                } else {
                    // Repeaters not detecting bloat most likely means our own
                    // barrier is not up yet: present once more.
                    EmitterDecision::AwaitRepeaters {
                        on_timeout: Some(PresentAction::RepeatPresent),
                    }
                }
            }
            WarmupStage::RepeatersPaused => {
                if self.all_repeaters_completed(repeater_count) {
                    EmitterDecision::ProbePresent
                } else {
                    EmitterDecision::AwaitRepeaters { on_timeout: None }
                }
            }
            WarmupStage::LastRepeatersBurst => {
                if self.all_repeaters_completed(repeater_count) {
                    self.finished = true;
                    EmitterDecision::WarmedUp
                } else {
                    EmitterDecision::AwaitRepeaters { on_timeout: None }
                }
            }
        }
    }

    /// Move to [`WarmupStage::RepeatersPaused`].
    ///
    /// Returns the new heartbeat, or `None` if that would not be the next
    /// stage.
    pub fn pause_repeaters(&mut self) -> Option<Heartbeat> {
        self.advance(Heartbeat::new(WarmupStage::RepeatersPaused))
    }

    /// Record the outcome of one probed present while repeaters are paused.
    ///
    /// A long present proves the barrier holds the emitter back: the depth
    /// measurement is complete and the handshake moves to
    /// [`WarmupStage::LastRepeatersBurst`], whose heartbeat is returned.
    pub fn record_probe(&mut self, long_present: bool) -> Option<Heartbeat> {
        if self.finished || self.heartbeat.stage != WarmupStage::RepeatersPaused {
            return None;
        }
        self.presents_while_paused += 1;
        if !long_present {
            return None;
        }
        let count = additional_present_count(self.presents_while_paused, self.depth_divisor);
        self.advance(Heartbeat::last_burst(count))
    }

    fn advance(&mut self, next: Heartbeat) -> Option<Heartbeat> {
        if self.finished || self.heartbeat.stage.next() != Some(next.stage) {
            return None;
        }
        self.heartbeat = next;
        self.completed.clear();
        Some(next)
    }
}
