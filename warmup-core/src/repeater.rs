//! Repeater side of the warmup handshake.
//!
//! A repeater mirrors the stage announced by the last heartbeat it received,
//! proves its own barrier is up by detecting a blocking present, stops
//! presenting while paused and performs the extra presents it is asked for.

use framelock_types::{Heartbeat, NodeId, Status, WarmupStage};

use crate::PresentAction;

/// Effect of a received heartbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatUpdate {
    /// The heartbeat differs from the last one seen and was kept.
    pub changed: bool,
    /// Our status changed as a consequence (pause acknowledged).
    pub status_changed: bool,
}

/// What the repeater's rendering thread should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeaterDecision {
    /// Present again as fast as possible. When `probe` is set the next
    /// present must be watched for blocking.
    FastPresent {
        /// Watch the next present.
        probe: bool,
    },
    /// Paused: do not present, wait for the heartbeat to change.
    AwaitHeartbeat,
    /// Return this action to the present loop.
    Return(PresentAction),
    /// The final burst was announced but our status is not where it should
    /// be. Presenting again is the best we can do.
    OutOfSequence,
}

/// Repeater progress through the handshake. No I/O, no clock.
#[derive(Debug, Clone)]
pub struct RepeaterProgress {
    node_id: NodeId,
    last_heartbeat: Option<Heartbeat>,
    status: Status,
    performed_additional_presents: u32,
    finished: bool,
    acknowledged: bool,
}

impl RepeaterProgress {
    /// Fresh progress of repeater `node_id`.
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            last_heartbeat: None,
            status: Status::pending(node_id, WarmupStage::RepeaterFastPresent),
            performed_additional_presents: 0,
            finished: false,
            acknowledged: false,
        }
    }

    /// Our node id.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Status to send to the emitter.
    pub fn status(&self) -> Status {
        self.status
    }

    /// Last heartbeat kept, if any.
    pub fn last_heartbeat(&self) -> Option<Heartbeat> {
        self.last_heartbeat
    }

    /// Stage we follow: the one of the last heartbeat, fast present before
    /// any heartbeat arrived.
    pub fn stage(&self) -> WarmupStage {
        self.last_heartbeat
            .map(|heartbeat| heartbeat.stage)
            .unwrap_or_default()
    }

    /// Presents performed during the final burst.
    pub fn performed_additional_presents(&self) -> u32 {
        self.performed_additional_presents
    }

    /// Whether the rendering thread is done with the handshake.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Whether the emitter was seen moving on after our final completion.
    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged
    }

    /// Mark the handshake as over for the rendering thread.
    pub fn finish(&mut self) {
        self.finished = true;
    }

    /// Record a received heartbeat.
    ///
    /// Retransmissions of the last heartbeat and heartbeats of an older stage
    /// are ignored.
    pub fn on_heartbeat(&mut self, heartbeat: Heartbeat) -> HeartbeatUpdate {
        let mut update = HeartbeatUpdate::default();

        match self.last_heartbeat {
            Some(last) if last == heartbeat || heartbeat.stage < last.stage => {}
            _ => {
                self.last_heartbeat = Some(heartbeat);
                update.changed = true;
            }
        }

        // Pausing only needs us to confirm we got the message.
        if self.stage() == WarmupStage::RepeatersPaused {
            let paused = Status::completed(self.node_id, WarmupStage::RepeatersPaused);
            if self.status != paused {
                self.status = paused;
                update.status_changed = true;
            }
        }

        update
    }

    /// The present being probed took longer than the blocking threshold: our
    /// barrier is up, the fast present stage is done for us.
    ///
    /// Returns `true` if the status changed.
    pub fn on_long_present(&mut self) -> bool {
        if self.finished || self.status.stage != WarmupStage::RepeaterFastPresent {
            return false;
        }
        let done = Status::completed(self.node_id, WarmupStage::RepeaterFastPresent);
        let changed = self.status != done;
        self.status = done;
        changed
    }

    /// Record a frame data message.
    ///
    /// Once the final burst is completed, frame data of a frame past the
    /// first proves the emitter saw our completion. Returns `true` the first
    /// time this happens.
    pub fn on_frame_data(&mut self, frame_index: u64) -> bool {
        let completed = Status::completed(self.node_id, WarmupStage::LastRepeatersBurst);
        if self.acknowledged || self.status != completed || frame_index == 0 {
            return false;
        }
        self.acknowledged = true;
        true
    }

    /// Decide what to do after a present attempt returned.
    pub fn decide(&mut self) -> RepeaterDecision {
        if self.finished {
            return RepeaterDecision::Return(PresentAction::ContinueToNextFrame);
        }

        match self.stage() {
            WarmupStage::RepeaterFastPresent => RepeaterDecision::FastPresent {
                probe: !self.status.completed,
            },
            WarmupStage::RepeatersPaused => RepeaterDecision::AwaitHeartbeat,
            WarmupStage::LastRepeatersBurst => self.last_burst(),
        }
    }

    fn last_burst(&mut self) -> RepeaterDecision {
        match self.status.stage {
            WarmupStage::RepeatersPaused => {
                self.status = Status::pending(self.node_id, WarmupStage::LastRepeatersBurst);
            }
            WarmupStage::LastRepeatersBurst => {
                self.performed_additional_presents += 1;
            }
            WarmupStage::RepeaterFastPresent => return RepeaterDecision::OutOfSequence,
        }

        let requested = self
            .last_heartbeat
            .map_or(0, |heartbeat| heartbeat.additional_present_count);
        if self.performed_additional_presents < requested {
            RepeaterDecision::Return(PresentAction::RepeatPresent)
        } else {
            self.status = Status::completed(self.node_id, WarmupStage::LastRepeatersBurst);
            self.finished = true;
            RepeaterDecision::Return(PresentAction::BarrierWarmedUp)
        }
    }
}
