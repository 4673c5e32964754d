//! Emitter warmup coordinator.
//!
//! Owns the authoritative stage. Three threads cooperate:
//! - the rendering thread runs the warmup callback after every present
//! - the heartbeat loop retransmits the current heartbeat until the warmup
//!   ends
//! - while repeaters are paused, a short-lived probe thread watches one
//!   present and reports whether the barrier held it back
//!
//! Received statuses are sniffed from the transport before the rest of the
//! node sees them.

use framelock_core::{
    abort_reason, Deadline, EmitterDecision, EmitterProgress, PresentAction,
};
use framelock_types::{Heartbeat, InitializationState, Message, NodeIdBitVector};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use crate::config::WarmupConfig;
use crate::context::{InitializationReport, NodeContext};
use crate::error::NodeError;
use crate::signal::{AutoResetEvent, ManualResetEvent};
use crate::transport::{HookId, PreProcessResult, MESSAGE_SNIFFING_PRIORITY};

/// Warmup coordinator of the emitter node.
pub struct EmitterWarmup {
    shared: Arc<EmitterShared>,
    heartbeat_loop: Mutex<Option<JoinHandle<()>>>,
}

struct EmitterShared {
    context: NodeContext,
    config: WarmupConfig,
    report: InitializationReport,
    deadline: Deadline,
    inner: Mutex<EmitterInner>,
    /// A repeater completed the current stage.
    repeater_completed: AutoResetEvent,
    /// The heartbeat changed and should go out before the next beat.
    heartbeat_changed: AutoResetEvent,
}

struct EmitterInner {
    progress: EmitterProgress,
    hook: Option<HookId>,
    /// Set by the callback once the probed present returned.
    present_done: Option<Arc<ManualResetEvent>>,
    probe: Option<JoinHandle<()>>,
    stop_heartbeats: bool,
}

impl EmitterWarmup {
    /// Start the warmup: sniff statuses, install the warmup callback and
    /// start the heartbeat loop.
    ///
    /// The handshake deadline starts now.
    pub fn start(
        context: NodeContext,
        config: WarmupConfig,
        report: InitializationReport,
    ) -> Result<Self, NodeError> {
        config.validate()?;
        let progress = EmitterProgress::new(config.repeaters_delayed)
            .with_depth_divisor(config.pipeline_depth_divisor);
        let shared = Arc::new(EmitterShared {
            deadline: Deadline::after(config.handshake_timeout()),
            context,
            config,
            report,
            inner: Mutex::new(EmitterInner {
                progress,
                hook: None,
                present_done: None,
                probe: None,
                stop_heartbeats: false,
            }),
            repeater_completed: AutoResetEvent::new(),
            heartbeat_changed: AutoResetEvent::new(),
        });

        let weak = Arc::downgrade(&shared);
        let hook = shared.context.transport.add_preprocess(
            MESSAGE_SNIFFING_PRIORITY,
            Arc::new(move |message: &Message| {
                if let Some(shared) = weak.upgrade() {
                    shared.sniff(message);
                }
                PreProcessResult::PassThrough
            }),
        );
        shared.inner.lock().hook = Some(hook);

        let weak: Weak<EmitterShared> = Arc::downgrade(&shared);
        shared
            .context
            .driver
            .set_warmup_callback(Some(Arc::new(move || match weak.upgrade() {
                Some(shared) => shared.on_present(),
                None => PresentAction::ContinueToNextFrame,
            })));

        let looping = Arc::clone(&shared);
        let heartbeat_loop = thread::Builder::new()
            .name("framelock-heartbeat".to_string())
            .spawn(move || looping.heartbeat_loop());
        let heartbeat_loop = match heartbeat_loop {
            Ok(handle) => handle,
            Err(e) => {
                shared.stop();
                return Err(e.into());
            }
        };

        tracing::info!(
            "Emitter barrier warmup started (timeout {:?}, repeaters delayed: {})",
            shared.config.handshake_timeout(),
            shared.config.repeaters_delayed
        );
        Ok(Self {
            shared,
            heartbeat_loop: Mutex::new(Some(heartbeat_loop)),
        })
    }

    /// Heartbeat currently broadcast.
    pub fn heartbeat(&self) -> Heartbeat {
        self.shared.inner.lock().progress.heartbeat()
    }

    /// Presents issued while the repeaters were paused.
    pub fn present_pipeline_depth(&self) -> u32 {
        self.shared.inner.lock().progress.present_pipeline_depth()
    }

    /// Repeaters that completed the current stage.
    pub fn completed_repeaters(&self) -> NodeIdBitVector {
        *self.shared.inner.lock().progress.completed()
    }

    /// Whether the warmup is over, successfully or not.
    pub fn is_finished(&self) -> bool {
        self.shared.inner.lock().progress.is_finished()
    }

    /// Run the warmup callback, as the driver does after a present.
    pub fn on_present(&self) -> PresentAction {
        self.shared.on_present()
    }

    /// Stop everything: hooks, callback, heartbeat loop and probe thread.
    pub fn dispose(&self) {
        let probe = self.shared.stop();
        if let Some(probe) = probe {
            if probe.join().is_err() {
                tracing::error!("Long present detection thread panicked");
            }
        }
        if let Some(handle) = self.heartbeat_loop.lock().take() {
            if handle.join().is_err() {
                tracing::error!("Heartbeat loop panicked");
            }
        }
    }
}

impl Drop for EmitterWarmup {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for EmitterWarmup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("EmitterWarmup")
            .field("progress", &inner.progress)
            .finish()
    }
}

impl EmitterShared {
    fn abort_reason(&self) -> Option<InitializationState> {
        abort_reason(
            self.context.cluster.is_terminated(),
            self.deadline.is_expired(),
        )
    }

    /// Warmup callback, on the rendering thread.
    fn on_present(self: &Arc<Self>) -> PresentAction {
        // Tell the probe thread the present is over and wait for its verdict.
        let probe = {
            let mut inner = self.inner.lock();
            if let Some(present_done) = inner.present_done.take() {
                present_done.set();
            }
            inner.probe.take()
        };
        if let Some(probe) = probe {
            if probe.join().is_err() {
                tracing::error!("Long present detection thread panicked");
            }
        }

        if self.inner.lock().progress.is_finished() {
            return PresentAction::ContinueToNextFrame;
        }
        if let Some(reason) = self.abort_reason() {
            self.fail(reason);
            return PresentAction::ContinueToNextFrame;
        }

        let block_delay = self.config.block_delay();
        loop {
            let repeater_count = self.context.cluster.repeater_presence().set_bits_count();
            let decision = self.inner.lock().progress.decide(repeater_count);

            match decision {
                EmitterDecision::Return(action) => return action,
                EmitterDecision::SettleThenPause => {
                    // The last repeater may have blocked right when we started
                    // another present: give that present time to block too.
                    thread::sleep(block_delay);
                    let paused = self.inner.lock().progress.pause_repeaters();
                    if paused.is_some() {
                        tracing::info!("Every repeater is blocked by the barrier, pausing repeaters");
                        self.heartbeat_changed.set();
                    }
                }
                EmitterDecision::AwaitRepeaters { on_timeout } => {
                    let wait = if on_timeout.is_some() {
                        block_delay * 2
                    } else {
                        block_delay
                    };
                    let wait = self.deadline.remaining().map_or(wait, |left| wait.min(left));
                    if !self.repeater_completed.wait_timeout(wait) {
                        if let Some(action) = on_timeout {
                            return action;
                        }
                    }
                    if let Some(reason) = self.abort_reason() {
                        self.fail(reason);
                        return PresentAction::ContinueToNextFrame;
                    }
                }
                EmitterDecision::ProbePresent => return self.probe_next_present(),
                EmitterDecision::WarmedUp => {
                    self.warmed_up();
                    return PresentAction::BarrierWarmedUp;
                }
            }
        }
    }

    fn probe_next_present(self: &Arc<Self>) -> PresentAction {
        let present_done = Arc::new(ManualResetEvent::new());
        let watched = Arc::clone(&present_done);
        let shared = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("framelock-long-present".to_string())
            .spawn(move || shared.detect_long_present(&watched));

        match spawned {
            Ok(probe) => {
                let mut inner = self.inner.lock();
                inner.present_done = Some(present_done);
                inner.probe = Some(probe);
                PresentAction::RepeatPresent
            }
            Err(e) => {
                tracing::error!("Failed to start long present detection: {}", e);
                self.fail(InitializationState::SwapChainOrBarrierGenericFailure);
                PresentAction::ContinueToNextFrame
            }
        }
    }

    /// Probe thread: a present still running after the block delay is held
    /// by the barrier, which ends the depth measurement.
    ///
    /// Once the deadline passed the verdict is dropped: the stage stays put
    /// and the next callback reports the timeout.
    fn detect_long_present(&self, present_done: &ManualResetEvent) {
        let long_present = !present_done.wait_timeout(self.config.block_delay());

        let (announced, depth) = {
            let mut inner = self.inner.lock();
            if self.deadline.is_expired() {
                tracing::debug!("Handshake deadline passed while watching a present");
                return;
            }
            let announced = inner.progress.record_probe(long_present);
            (announced, inner.progress.present_pipeline_depth())
        };

        match announced {
            Some(heartbeat) => {
                tracing::info!(
                    "Present pipeline depth is {}, repeaters perform {} additional presents",
                    depth,
                    heartbeat.additional_present_count
                );
                self.heartbeat_changed.set();
            }
            None => {
                tracing::debug!(
                    "Present was not blocked ({} presents while repeaters are paused)",
                    depth
                );
            }
        }
    }

    fn sniff(&self, message: &Message) {
        if let Message::Status(status) = message {
            let recorded = self.inner.lock().progress.record_status(status);
            if recorded {
                tracing::debug!(
                    "Repeater {} completed stage {:?}",
                    status.node_id,
                    status.stage
                );
                self.repeater_completed.set();
            }
        }
    }

    fn heartbeat_loop(&self) {
        let interval = self.config.repeat_message_interval();
        while self.report.is_success() {
            if self.context.cluster.is_terminated() {
                break;
            }

            let (heartbeat, last) = {
                let inner = self.inner.lock();
                (inner.progress.heartbeat(), inner.stop_heartbeats)
            };

            if let Err(e) = self.context.transport.send(&Message::Heartbeat(heartbeat)) {
                if last {
                    break;
                }
                // Retransmission is not critical: keep going, the deadline
                // catches persistent failures.
                tracing::warn!("Failed to send heartbeat: {}", e);
                thread::sleep(self.config.retransmit_error_backoff());
                continue;
            }

            if last {
                break;
            }
            self.heartbeat_changed.wait_timeout(interval);
        }
        tracing::debug!("Heartbeat loop stopped");
    }

    fn warmed_up(&self) {
        let (hook, depth) = {
            let mut inner = self.inner.lock();
            inner.stop_heartbeats = true;
            (inner.hook.take(), inner.progress.present_pipeline_depth())
        };
        self.unhook(hook);
        self.heartbeat_changed.set();
        tracing::info!("Swap barrier warmed up (present pipeline depth {})", depth);
    }

    /// Report `reason` once and abandon the warmup.
    fn fail(&self, reason: InitializationState) {
        let hook = {
            let mut inner = self.inner.lock();
            if inner.progress.is_finished() {
                return;
            }
            inner.progress.finish();
            inner.stop_heartbeats = true;
            inner.hook.take()
        };
        self.unhook(hook);
        self.heartbeat_changed.set();

        tracing::error!("Barrier warmup failed: {}", reason.description());
        self.report.set(reason);
        if self.config.terminate_cluster_on_failure {
            self.context.cluster.terminate();
        }
    }

    /// Finish without reporting anything. Returns the probe thread to join.
    fn stop(&self) -> Option<JoinHandle<()>> {
        let (hook, present_done, probe) = {
            let mut inner = self.inner.lock();
            inner.progress.finish();
            inner.stop_heartbeats = true;
            (
                inner.hook.take(),
                inner.present_done.take(),
                inner.probe.take(),
            )
        };
        self.unhook(hook);
        if let Some(present_done) = present_done {
            present_done.set();
        }
        self.heartbeat_changed.set();
        probe
    }

    /// Remove the message hook and the warmup callback, if still installed.
    fn unhook(&self, hook: Option<HookId>) {
        if let Some(hook) = hook {
            self.context.transport.remove_preprocess(hook);
            self.context.driver.set_warmup_callback(None);
        }
    }
}
