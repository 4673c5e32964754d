//! Software model of a swap barrier and of the driver in front of it.
//!
//! Until it activates, the barrier lets every present through after one
//! simulated frame time, like a driver whose barrier is not up yet. Once
//! active, each node's present blocks until no node is more than `slack`
//! presents behind it. `slack = 0` behaves like a driver presenting with no
//! extra latency (the emitter measures a pipeline depth of 2); `slack = 1`
//! behaves like a driver waiting before presenting (depth 4).

use super::{
    DriverCommand, DriverError, DriverState, HardwareSyncDriver, PresentationSettings,
    WarmupCallback,
};
use framelock_core::PresentAction;
use framelock_types::{InitializationState, NodeId};
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Behaviour of a [`SimulatedBarrier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierSettings {
    /// How many presents a node may run ahead of the slowest node.
    pub slack: u64,
    /// Time after creation before the barrier starts blocking.
    pub activation_delay: Duration,
    /// Duration of a present that is not held by the barrier.
    pub frame_time: Duration,
}

impl Default for BarrierSettings {
    fn default() -> Self {
        Self {
            slack: 0,
            activation_delay: Duration::ZERO,
            frame_time: Duration::from_millis(5),
        }
    }
}

#[derive(Debug, Default)]
struct BarrierState {
    /// Presents performed by each node since activation.
    counts: BTreeMap<NodeId, u64>,
    active: bool,
    shutdown: bool,
}

impl BarrierState {
    fn slowest(&self) -> Option<u64> {
        self.counts.values().copied().min()
    }
}

/// Swap barrier shared by the simulated drivers of a cluster.
#[derive(Debug)]
pub struct SimulatedBarrier {
    settings: BarrierSettings,
    created: Instant,
    state: Mutex<BarrierState>,
    released: Condvar,
}

impl SimulatedBarrier {
    /// Create a barrier; the activation delay starts now.
    pub fn new(settings: BarrierSettings) -> Self {
        Self {
            settings,
            created: Instant::now(),
            state: Mutex::new(BarrierState::default()),
            released: Condvar::new(),
        }
    }

    /// Settings of this barrier.
    pub fn settings(&self) -> BarrierSettings {
        self.settings
    }

    /// Make `node_id` take part in the barrier.
    pub fn join(&self, node_id: NodeId) {
        let mut state = self.state.lock();
        let start = state.slowest().unwrap_or(0);
        state.counts.entry(node_id).or_insert(start);
    }

    /// Remove `node_id`; nobody waits on it anymore.
    pub fn leave(&self, node_id: NodeId) {
        let mut state = self.state.lock();
        if state.counts.remove(&node_id).is_some() {
            tracing::debug!("Node {} left the simulated barrier", node_id);
            self.released.notify_all();
        }
    }

    /// Release every blocked present; later presents return immediately.
    pub fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.released.notify_all();
    }

    /// Whether the barrier blocks presents.
    pub fn is_active(&self) -> bool {
        let mut state = self.state.lock();
        self.activate_if_due(&mut state);
        state.active
    }

    /// Presents performed by `node_id` since activation.
    pub fn present_count(&self, node_id: NodeId) -> Option<u64> {
        self.state.lock().counts.get(&node_id).copied()
    }

    fn activate_if_due(&self, state: &mut BarrierState) {
        if !state.active && self.created.elapsed() >= self.settings.activation_delay {
            state.active = true;
            for count in state.counts.values_mut() {
                *count = 0;
            }
            tracing::debug!("Simulated barrier is now active");
        }
    }

    /// Present one frame of `node_id`.
    ///
    /// Returns `false` if the present was cut short by [`shutdown`](Self::shutdown).
    pub fn present(&self, node_id: NodeId) -> bool {
        let mut state = self.state.lock();
        if state.shutdown {
            return false;
        }

        self.activate_if_due(&mut state);
        if !state.active {
            drop(state);
            std::thread::sleep(self.settings.frame_time);
            return true;
        }

        let count = {
            let count = state.counts.entry(node_id).or_insert(0);
            *count += 1;
            *count
        };
        self.released.notify_all();

        let slack = self.settings.slack;
        self.released.wait_while(&mut state, |state| {
            !state.shutdown && state.slowest().map_or(false, |slowest| slowest + slack < count)
        });
        !state.shutdown
    }
}

#[derive(Default)]
struct DriverInner {
    state: DriverState,
    settings: Option<PresentationSettings>,
    callback: Option<WarmupCallback>,
    barrier_enabled: bool,
    skip_sync_next_frame: bool,
    unsynchronized_presents: u64,
    commands: Vec<DriverCommand>,
    fail_initialization: Option<InitializationState>,
    fail_next_command: Option<String>,
}

/// Outcome of [`SimulatedDriver::present_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePresentation {
    /// Presents performed for the frame.
    pub presents: u32,
    /// Last action returned by the warmup callback, if one was installed.
    pub action: Option<PresentAction>,
}

/// Driver of one node presenting through a [`SimulatedBarrier`].
pub struct SimulatedDriver {
    node_id: NodeId,
    barrier: Arc<SimulatedBarrier>,
    inner: Mutex<DriverInner>,
}

impl SimulatedDriver {
    /// Driver of `node_id`, joining `barrier` right away.
    pub fn new(node_id: NodeId, barrier: Arc<SimulatedBarrier>) -> Self {
        barrier.join(node_id);
        Self {
            node_id,
            barrier,
            inner: Mutex::new(DriverInner::default()),
        }
    }

    /// Node presenting through this driver.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Make the next `Initialize` report `state` instead of succeeding.
    pub fn fail_initialization_with(&self, state: InitializationState) {
        self.inner.lock().fail_initialization = Some(state);
    }

    /// Cause the next command to fail with the given reason.
    pub fn fail_next_command(&self, reason: &str) {
        self.inner.lock().fail_next_command = Some(reason.to_string());
    }

    /// Every command issued so far, in order.
    pub fn issued_commands(&self) -> Vec<DriverCommand> {
        self.inner.lock().commands.clone()
    }

    /// Last presentation settings applied.
    pub fn presentation_settings(&self) -> Option<PresentationSettings> {
        self.inner.lock().settings
    }

    /// Whether a warmup callback is installed.
    pub fn has_warmup_callback(&self) -> bool {
        self.inner.lock().callback.is_some()
    }

    /// Presents that bypassed the barrier.
    pub fn unsynchronized_presents(&self) -> u64 {
        self.inner.lock().unsynchronized_presents
    }

    /// Present one frame.
    ///
    /// Presents, then invokes the warmup callback (if any) and acts on its
    /// answer, until the frame ends.
    pub fn present_frame(&self) -> FramePresentation {
        let mut skip_sync = std::mem::take(&mut self.inner.lock().skip_sync_next_frame);
        let mut frame = FramePresentation {
            presents: 0,
            action: None,
        };

        loop {
            self.present_once(std::mem::take(&mut skip_sync));
            frame.presents += 1;

            // Never invoke the callback with our lock held.
            let callback = self.inner.lock().callback.clone();
            let action = match callback {
                Some(callback) => callback(),
                None => return frame,
            };
            frame.action = Some(action);

            if !action.ends_frame() {
                continue;
            }
            if action == PresentAction::BarrierWarmedUp {
                self.inner.lock().callback = None;
            }
            return frame;
        }
    }

    fn present_once(&self, skip_sync: bool) {
        let through_barrier = self.inner.lock().barrier_enabled && !skip_sync;

        let presented = if through_barrier {
            self.barrier.present(self.node_id)
        } else {
            if skip_sync {
                tracing::debug!("Node {} presenting without waiting on the barrier", self.node_id);
            }
            std::thread::sleep(self.barrier.settings().frame_time);
            true
        };

        let mut inner = self.inner.lock();
        if !through_barrier {
            inner.unsynchronized_presents += 1;
        }
        if presented {
            inner.state.presented_frames_success += 1;
        } else {
            inner.state.presented_frames_failed += 1;
        }
    }
}

impl std::fmt::Debug for SimulatedDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedDriver")
            .field("node_id", &self.node_id)
            .field("state", &self.inner.lock().state)
            .finish()
    }
}

impl HardwareSyncDriver for SimulatedDriver {
    fn configure_presentation(&self, settings: PresentationSettings) {
        self.inner.lock().settings = Some(settings);
    }

    fn issue_command(&self, command: DriverCommand) -> Result<(), DriverError> {
        let mut inner = self.inner.lock();
        inner.commands.push(command);

        // Check for forced failure
        if let Some(reason) = inner.fail_next_command.take() {
            return Err(DriverError::CommandFailed { command, reason });
        }

        if command != DriverCommand::Initialize
            && !inner.state.initialization_state.is_success()
        {
            return Err(DriverError::NotInitialized);
        }

        match command {
            DriverCommand::Initialize => match inner.fail_initialization.take() {
                Some(failure) => {
                    inner.state.initialization_state = failure;
                }
                None => {
                    inner.state.initialization_state = InitializationState::Initialized;
                    inner.state.swap_group_id = 1;
                    inner.state.swap_barrier_id = 1;
                    inner.barrier_enabled = true;
                }
            },
            DriverCommand::Dispose => {
                inner.state = DriverState::default();
                inner.barrier_enabled = false;
                inner.callback = None;
                drop(inner);
                self.barrier.leave(self.node_id);
            }
            DriverCommand::SkipSyncForNextFrame => {
                inner.skip_sync_next_frame = true;
            }
        }
        Ok(())
    }

    fn fetch_state(&self) -> DriverState {
        self.inner.lock().state
    }

    fn set_warmup_callback(&self, callback: Option<WarmupCallback>) {
        self.inner.lock().callback = callback;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    const E: NodeId = NodeId::new(0);
    const R: NodeId = NodeId::new(1);

    fn barrier(slack: u64) -> Arc<SimulatedBarrier> {
        let barrier = Arc::new(SimulatedBarrier::new(BarrierSettings {
            slack,
            ..BarrierSettings::default()
        }));
        barrier.join(E);
        barrier.join(R);
        barrier
    }

    /// Present on another thread, reporting completion on the returned channel.
    fn present_async(barrier: &Arc<SimulatedBarrier>, node: NodeId) -> mpsc::Receiver<bool> {
        let (tx, rx) = mpsc::channel();
        let barrier = Arc::clone(barrier);
        thread::spawn(move || {
            let _ = tx.send(barrier.present(node));
        });
        rx
    }

    #[test]
    fn present_waits_for_slowest_node() {
        let barrier = barrier(0);
        let done = present_async(&barrier, R);
        assert!(done.recv_timeout(Duration::from_millis(50)).is_err());

        assert!(barrier.present(E));
        assert_eq!(done.recv_timeout(Duration::from_secs(5)), Ok(true));
    }

    #[test]
    fn slack_lets_a_node_run_ahead() {
        let barrier = barrier(1);
        assert!(barrier.present(R));
        assert_eq!(barrier.present_count(R), Some(1));

        let done = present_async(&barrier, R);
        assert!(done.recv_timeout(Duration::from_millis(50)).is_err());
        assert!(barrier.present(E));
        assert_eq!(done.recv_timeout(Duration::from_secs(5)), Ok(true));
    }

    #[test]
    fn inactive_barrier_does_not_block() {
        let barrier = Arc::new(SimulatedBarrier::new(BarrierSettings {
            activation_delay: Duration::from_secs(3600),
            frame_time: Duration::from_millis(1),
            ..BarrierSettings::default()
        }));
        barrier.join(E);
        barrier.join(R);

        assert!(!barrier.is_active());
        for _ in 0..3 {
            assert!(barrier.present(R));
        }
        assert_eq!(barrier.present_count(R), Some(0));
    }

    #[test]
    fn leaving_releases_waiters() {
        let barrier = barrier(0);
        let done = present_async(&barrier, R);
        assert!(done.recv_timeout(Duration::from_millis(20)).is_err());

        barrier.leave(E);
        assert_eq!(done.recv_timeout(Duration::from_secs(5)), Ok(true));
    }

    #[test]
    fn shutdown_releases_waiters() {
        let barrier = barrier(0);
        let done = present_async(&barrier, R);
        assert!(done.recv_timeout(Duration::from_millis(20)).is_err());

        barrier.shutdown();
        assert_eq!(done.recv_timeout(Duration::from_secs(5)), Ok(false));
        assert!(!barrier.present(E));
    }

    fn lone_driver() -> SimulatedDriver {
        let barrier = Arc::new(SimulatedBarrier::new(BarrierSettings {
            frame_time: Duration::from_millis(1),
            ..BarrierSettings::default()
        }));
        SimulatedDriver::new(E, barrier)
    }

    #[test]
    fn initialize_joins_the_swap_group() {
        let driver = lone_driver();
        assert!(matches!(
            driver.issue_command(DriverCommand::SkipSyncForNextFrame),
            Err(DriverError::NotInitialized)
        ));

        driver.issue_command(DriverCommand::Initialize).unwrap();
        let state = driver.fetch_state();
        assert!(state.initialization_state.is_success());
        assert_eq!(state.swap_group_id, 1);
        assert_eq!(state.swap_barrier_id, 1);
    }

    #[test]
    fn forced_initialization_failure() {
        let driver = lone_driver();
        driver.fail_initialization_with(InitializationState::NoSwapGroupDetected);

        driver.issue_command(DriverCommand::Initialize).unwrap();
        assert_eq!(
            driver.fetch_state().initialization_state,
            InitializationState::NoSwapGroupDetected
        );
    }

    #[test]
    fn forced_command_failure() {
        let driver = lone_driver();
        driver.fail_next_command("device lost");
        let result = driver.issue_command(DriverCommand::Initialize);
        assert!(matches!(
            result,
            Err(DriverError::CommandFailed {
                command: DriverCommand::Initialize,
                ..
            })
        ));
        assert_eq!(driver.issued_commands(), vec![DriverCommand::Initialize]);
    }

    #[test]
    fn callback_drives_the_frame() {
        let driver = lone_driver();
        driver.issue_command(DriverCommand::Initialize).unwrap();

        let calls = Arc::new(Mutex::new(0u32));
        let counter = Arc::clone(&calls);
        driver.set_warmup_callback(Some(Arc::new(move || {
            let mut calls = counter.lock();
            *calls += 1;
            if *calls < 3 {
                PresentAction::RepeatPresent
            } else {
                PresentAction::BarrierWarmedUp
            }
        })));

        let frame = driver.present_frame();
        assert_eq!(frame.presents, 3);
        assert_eq!(frame.action, Some(PresentAction::BarrierWarmedUp));
        assert!(!driver.has_warmup_callback());

        // Without callback a frame is a single present.
        assert_eq!(driver.present_frame().presents, 1);
        assert_eq!(driver.fetch_state().presented_frames_success, 4);
    }

    #[test]
    fn skip_sync_applies_to_one_present() {
        let driver = lone_driver();
        driver.issue_command(DriverCommand::Initialize).unwrap();
        driver
            .issue_command(DriverCommand::SkipSyncForNextFrame)
            .unwrap();

        driver.present_frame();
        driver.present_frame();
        assert_eq!(driver.unsynchronized_presents(), 1);
    }

    #[test]
    fn dispose_leaves_the_barrier() {
        let driver = lone_driver();
        driver.issue_command(DriverCommand::Initialize).unwrap();
        driver.set_warmup_callback(Some(Arc::new(|| PresentAction::ContinueToNextFrame)));

        driver.issue_command(DriverCommand::Dispose).unwrap();
        assert!(!driver.has_warmup_callback());
        assert_eq!(driver.fetch_state(), DriverState::default());
        assert_eq!(driver.barrier.present_count(E), None);
    }
}
