//! Repeater warmup coordinator.
//!
//! Follows the heartbeats of the emitter, reports its status until the
//! emitter moves on, and watches for a backup promotion when repeaters run
//! one frame behind.

use framelock_core::{abort_reason, Deadline, PresentAction, RepeaterDecision, RepeaterProgress};
use framelock_types::{Heartbeat, InitializationState, Message, Status, WarmupStage};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use crate::cluster::{ClusterSyncState, NodeRole, SubscriptionId};
use crate::config::WarmupConfig;
use crate::context::{InitializationReport, NodeContext};
use crate::driver::{DriverCommand, HardwareSyncDriver};
use crate::error::NodeError;
use crate::signal::{AutoResetEvent, ManualResetEvent};
use crate::transport::{HookId, PreProcessResult, MESSAGE_SNIFFING_PRIORITY};

/// Warmup coordinator of a repeater (or backup) node.
pub struct RepeaterWarmup {
    shared: Arc<RepeaterShared>,
    status_loop: Mutex<Option<JoinHandle<()>>>,
    promotion: Option<StandbyPromotion>,
}

struct RepeaterShared {
    context: NodeContext,
    config: WarmupConfig,
    report: InitializationReport,
    deadline: Deadline,
    inner: Mutex<RepeaterInner>,
    heartbeat_changed: AutoResetEvent,
    status_changed: AutoResetEvent,
}

struct RepeaterInner {
    progress: RepeaterProgress,
    hook: Option<HookId>,
    present_done: Option<Arc<ManualResetEvent>>,
    stop_status: bool,
}

impl RepeaterWarmup {
    /// Start the warmup: follow heartbeats, install the warmup callback and
    /// start the status loop.
    ///
    /// A backup node of a cluster whose repeaters run one frame behind also
    /// starts watching for its promotion to emitter.
    pub fn start(
        context: NodeContext,
        config: WarmupConfig,
        report: InitializationReport,
    ) -> Result<Self, NodeError> {
        config.validate()?;
        let promotion = StandbyPromotion::watch(&context);
        let shared = Arc::new(RepeaterShared {
            deadline: Deadline::after(config.handshake_timeout()),
            inner: Mutex::new(RepeaterInner {
                progress: RepeaterProgress::new(config.node_id()),
                hook: None,
                present_done: None,
                stop_status: false,
            }),
            context,
            config,
            report,
            heartbeat_changed: AutoResetEvent::new(),
            status_changed: AutoResetEvent::new(),
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

        let weak: Weak<RepeaterShared> = Arc::downgrade(&shared);
        shared
            .context
            .driver
            .set_warmup_callback(Some(Arc::new(move || match weak.upgrade() {
                Some(shared) => shared.on_present(),
                None => PresentAction::ContinueToNextFrame,
            })));

        let looping = Arc::clone(&shared);
        let status_loop = thread::Builder::new()
            .name("framelock-status".to_string())
            .spawn(move || looping.status_loop());
        let status_loop = match status_loop {
            Ok(handle) => handle,
            Err(e) => {
                shared.stop();
                if let Some(promotion) = &promotion {
                    promotion.cancel();
                }
                return Err(e.into());
            }
        };

        tracing::info!(
            "Repeater {} barrier warmup started (timeout {:?})",
            shared.config.node_id,
            shared.config.handshake_timeout()
        );
        Ok(Self {
            shared,
            status_loop: Mutex::new(Some(status_loop)),
            promotion,
        })
    }

    /// Status currently reported to the emitter.
    pub fn status(&self) -> Status {
        self.shared.inner.lock().progress.status()
    }

    /// Last heartbeat received.
    pub fn last_heartbeat(&self) -> Option<Heartbeat> {
        self.shared.inner.lock().progress.last_heartbeat()
    }

    /// Stage followed.
    pub fn stage(&self) -> WarmupStage {
        self.shared.inner.lock().progress.stage()
    }

    /// Presents performed during the final burst.
    pub fn performed_additional_presents(&self) -> u32 {
        self.shared
            .inner
            .lock()
            .progress
            .performed_additional_presents()
    }

    /// Whether the rendering thread is done with the warmup.
    pub fn is_finished(&self) -> bool {
        self.shared.inner.lock().progress.is_finished()
    }

    /// Whether the emitter acknowledged our final completion.
    pub fn is_acknowledged(&self) -> bool {
        self.shared.inner.lock().progress.is_acknowledged()
    }

    /// Whether a backup promotion is still being watched for.
    pub fn is_watching_promotion(&self) -> bool {
        self.promotion
            .as_ref()
            .is_some_and(StandbyPromotion::is_subscribed)
    }

    /// Run the warmup callback, as the driver does after a present.
    pub fn on_present(&self) -> PresentAction {
        self.shared.on_present()
    }

    /// Stop everything: hooks, callback, status loop and promotion watch.
    pub fn dispose(&self) {
        self.shared.stop();
        if let Some(promotion) = &self.promotion {
            promotion.cancel();
        }
        if let Some(handle) = self.status_loop.lock().take() {
            if handle.join().is_err() {
                tracing::error!("Status loop panicked");
            }
        }
    }
}

impl Drop for RepeaterWarmup {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for RepeaterWarmup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("RepeaterWarmup")
            .field("progress", &inner.progress)
            .finish()
    }
}

impl RepeaterShared {
    fn abort_reason(&self) -> Option<InitializationState> {
        abort_reason(
            self.context.cluster.is_terminated(),
            self.deadline.is_expired(),
        )
    }

    /// Warmup callback, on the rendering thread.
    fn on_present(self: &Arc<Self>) -> PresentAction {
        if let Some(present_done) = self.inner.lock().present_done.take() {
            present_done.set();
        }

        if self.inner.lock().progress.is_finished() {
            return PresentAction::ContinueToNextFrame;
        }
        if let Some(reason) = self.abort_reason() {
            self.fail(reason);
            return PresentAction::ContinueToNextFrame;
        }

        loop {
            let (decision, status_changed) = {
                let mut inner = self.inner.lock();
                let before = inner.progress.status();
                let decision = inner.progress.decide();
                (decision, inner.progress.status() != before)
            };
            if status_changed {
                self.status_changed.set();
            }

            match decision {
                RepeaterDecision::FastPresent { probe } => {
                    if probe {
                        self.probe_next_present();
                    }
                    return PresentAction::RepeatPresent;
                }
                RepeaterDecision::AwaitHeartbeat => {
                    let wait = self.config.block_delay();
                    let wait = self.deadline.remaining().map_or(wait, |left| wait.min(left));
                    self.heartbeat_changed.wait_timeout(wait);
                    if let Some(reason) = self.abort_reason() {
                        self.fail(reason);
                        return PresentAction::ContinueToNextFrame;
                    }
                }
                RepeaterDecision::Return(action) => {
                    if action == PresentAction::BarrierWarmedUp {
                        // Keep sniffing and reporting until the emitter moves on.
                        self.context.driver.set_warmup_callback(None);
                        tracing::info!(
                            "Repeater {} swap barrier warmed up",
                            self.config.node_id
                        );
                    }
                    return action;
                }
                RepeaterDecision::OutOfSequence => {
                    tracing::error!(
                        "Final burst announced before repeater {} paused",
                        self.config.node_id
                    );
                    return PresentAction::RepeatPresent;
                }
            }
        }
    }

    fn probe_next_present(self: &Arc<Self>) {
        let present_done = Arc::new(ManualResetEvent::new());
        let watched = Arc::clone(&present_done);
        let shared = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("framelock-long-present".to_string())
            .spawn(move || shared.detect_long_present(&watched));

        match spawned {
            // Detached: it lives for one block delay at most.
            Ok(_) => self.inner.lock().present_done = Some(present_done),
            Err(e) => tracing::warn!("Failed to start long present detection: {}", e),
        }
    }

    fn detect_long_present(&self, present_done: &ManualResetEvent) {
        if present_done.wait_timeout(self.config.block_delay()) {
            return;
        }
        let changed = {
            let mut inner = self.inner.lock();
            !self.deadline.is_expired() && inner.progress.on_long_present()
        };
        if changed {
            tracing::info!(
                "Present of repeater {} blocked, its swap barrier is up",
                self.config.node_id
            );
            self.status_changed.set();
        }
    }

    fn sniff(&self, message: &Message) {
        match message {
            Message::Heartbeat(heartbeat) => {
                let update = self.inner.lock().progress.on_heartbeat(*heartbeat);
                if update.changed {
                    tracing::debug!(
                        "Repeater {} received heartbeat {:?}",
                        self.config.node_id,
                        heartbeat
                    );
                    self.heartbeat_changed.set();
                }
                if update.status_changed {
                    self.status_changed.set();
                }
            }
            Message::FrameData(frame) => {
                let hook = {
                    let mut inner = self.inner.lock();
                    if !inner.progress.on_frame_data(frame.frame_index) {
                        return;
                    }
                    inner.stop_status = true;
                    inner.hook.take()
                };
                self.status_changed.set();
                if let Some(hook) = hook {
                    self.context.transport.remove_preprocess(hook);
                }
                tracing::info!(
                    "Emitter presented frame {}, repeater {} warmup complete",
                    frame.frame_index,
                    self.config.node_id
                );
            }
            Message::Status(_) => {}
        }
    }

    fn status_loop(&self) {
        let interval = self.config.repeat_message_interval();
        while self.report.is_success() {
            if self.context.cluster.is_terminated() {
                break;
            }

            let status = {
                let inner = self.inner.lock();
                if inner.stop_status {
                    break;
                }
                inner.progress.status()
            };

            if let Err(e) = self.context.transport.send(&Message::Status(status)) {
                tracing::warn!("Failed to send status: {}", e);
                thread::sleep(self.config.retransmit_error_backoff());
                continue;
            }

            self.status_changed.wait_timeout(interval);
        }
        tracing::debug!("Status loop of repeater {} stopped", self.config.node_id);
    }

    /// Report `reason` once and abandon the warmup. Repeaters leave the
    /// cluster fate to the emitter.
    fn fail(&self, reason: InitializationState) {
        let hook = {
            let mut inner = self.inner.lock();
            if inner.progress.is_finished() {
                return;
            }
            inner.progress.finish();
            inner.stop_status = true;
            inner.hook.take()
        };
        if let Some(hook) = hook {
            self.context.transport.remove_preprocess(hook);
        }
        self.context.driver.set_warmup_callback(None);
        self.status_changed.set();

        tracing::error!(
            "Barrier warmup of repeater {} failed: {}",
            self.config.node_id,
            reason.description()
        );
        self.report.set(reason);
    }

    fn stop(&self) {
        let (hook, present_done, finished) = {
            let mut inner = self.inner.lock();
            let finished = inner.progress.is_finished();
            inner.progress.finish();
            inner.stop_status = true;
            (inner.hook.take(), inner.present_done.take(), finished)
        };
        if let Some(hook) = hook {
            self.context.transport.remove_preprocess(hook);
        }
        if !finished {
            self.context.driver.set_warmup_callback(None);
        }
        if let Some(present_done) = present_done {
            present_done.set();
        }
        self.status_changed.set();
        self.heartbeat_changed.set();
    }
}

/// Watch for the promotion of a backup node to emitter.
///
/// When repeaters render one frame behind, the promoted node must present its
/// next frame without waiting on the barrier to catch up with its former
/// peers. Lives independently of the warmup itself.
struct StandbyPromotion {
    cluster: Weak<dyn ClusterSyncState>,
    subscription: Arc<Mutex<Option<SubscriptionId>>>,
}

impl StandbyPromotion {
    fn watch(context: &NodeContext) -> Option<Self> {
        let cluster = &context.cluster;
        if cluster.node_role() != NodeRole::Backup || !cluster.repeaters_delayed_one_frame() {
            return None;
        }

        let subscription = Arc::new(Mutex::new(None));
        let weak_cluster = Arc::downgrade(cluster);

        // Hold the slot while subscribing so a concurrent notification finds
        // the id.
        let mut slot = subscription.lock();
        let handler = {
            let cluster = Weak::clone(&weak_cluster);
            let driver = Arc::clone(&context.driver);
            let subscription = Arc::clone(&subscription);
            Arc::new(move |role: NodeRole| {
                if let Some(cluster) = cluster.upgrade() {
                    on_role_changed(cluster.as_ref(), driver.as_ref(), &subscription, role);
                }
            })
        };
        *slot = Some(cluster.subscribe_role_changed(handler));
        drop(slot);

        tracing::debug!("Watching for promotion of this backup node to emitter");
        Some(Self {
            cluster: weak_cluster,
            subscription,
        })
    }

    fn is_subscribed(&self) -> bool {
        self.subscription.lock().is_some()
    }

    fn cancel(&self) {
        let id = self.subscription.lock().take();
        if let (Some(id), Some(cluster)) = (id, self.cluster.upgrade()) {
            cluster.unsubscribe_role_changed(id);
        }
    }
}

fn on_role_changed(
    cluster: &dyn ClusterSyncState,
    driver: &dyn HardwareSyncDriver,
    subscription: &Mutex<Option<SubscriptionId>>,
    role: NodeRole,
) {
    match role {
        NodeRole::Backup | NodeRole::Unassigned => {}
        NodeRole::Emitter if cluster.repeaters_delayed_one_frame() => {
            let Some(id) = subscription.lock().take() else {
                return;
            };
            cluster.unsubscribe_role_changed(id);

            tracing::info!("Backup promoted to emitter, next frame skips the swap barrier");
            if let Err(e) = driver.issue_command(DriverCommand::SkipSyncForNextFrame) {
                tracing::error!("Failed to skip sync for the next frame: {}", e);
            }
        }
        _ => {
            if let Some(id) = subscription.lock().take() {
                cluster.unsubscribe_role_changed(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::LocalClusterState;
    use crate::driver::{BarrierSettings, SimulatedBarrier, SimulatedDriver};
    use crate::transport::MockTransport;
    use framelock_types::{FrameData, NodeId};
    use std::time::{Duration, Instant};

    const ME: NodeId = NodeId::new(2);

    struct Harness {
        transport: MockTransport,
        driver: Arc<SimulatedDriver>,
        cluster: Arc<LocalClusterState>,
        report: InitializationReport,
    }

    impl Harness {
        fn new(role: NodeRole) -> Self {
            let barrier = Arc::new(SimulatedBarrier::new(BarrierSettings::default()));
            let driver = Arc::new(SimulatedDriver::new(ME, barrier));
            driver.issue_command(DriverCommand::Initialize).unwrap();
            Self {
                transport: MockTransport::new(),
                driver,
                cluster: Arc::new(LocalClusterState::new(role)),
                report: InitializationReport::initialized(),
            }
        }

        fn start(&self, config: WarmupConfig) -> RepeaterWarmup {
            let context = NodeContext::new(
                Arc::new(self.transport.clone()),
                self.driver.clone(),
                self.cluster.clone(),
            );
            RepeaterWarmup::start(context, config, self.report.clone()).unwrap()
        }

        fn heartbeat(&self, heartbeat: Heartbeat) {
            self.transport.deliver(&Message::Heartbeat(heartbeat));
        }

        fn last_status(&self) -> Option<Status> {
            self.transport
                .sent_messages()
                .into_iter()
                .rev()
                .find_map(|message| match message {
                    Message::Status(status) => Some(status),
                    _ => None,
                })
        }
    }

    fn fast_config() -> WarmupConfig {
        WarmupConfig {
            node_id: ME.value(),
            handshake_timeout_ms: 10_000,
            block_delay_ms: 50,
            repeat_message_interval_ms: 5,
            ..WarmupConfig::default()
        }
    }

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        condition()
    }

    /// Repeater that got through fast present and the pause.
    fn paused(harness: &Harness) -> RepeaterWarmup {
        let repeater = harness.start(fast_config());
        assert_eq!(repeater.on_present(), PresentAction::RepeatPresent);
        thread::sleep(Duration::from_millis(150));
        assert_eq!(repeater.on_present(), PresentAction::RepeatPresent);
        harness.heartbeat(Heartbeat::new(WarmupStage::RepeatersPaused));
        assert_eq!(
            repeater.status(),
            Status::completed(ME, WarmupStage::RepeatersPaused)
        );
        repeater
    }

    // ===== Fast present =====

    #[test]
    fn quick_presents_do_not_complete_fast_present() {
        let harness = Harness::new(NodeRole::Repeater);
        let repeater = harness.start(fast_config());

        assert_eq!(repeater.on_present(), PresentAction::RepeatPresent);
        assert_eq!(repeater.on_present(), PresentAction::RepeatPresent);
        assert_eq!(
            repeater.status(),
            Status::pending(ME, WarmupStage::RepeaterFastPresent)
        );
        repeater.dispose();
    }

    #[test]
    fn blocked_present_completes_fast_present() {
        let harness = Harness::new(NodeRole::Repeater);
        let repeater = harness.start(fast_config());

        assert_eq!(repeater.on_present(), PresentAction::RepeatPresent);
        thread::sleep(Duration::from_millis(150));
        assert_eq!(
            repeater.status(),
            Status::completed(ME, WarmupStage::RepeaterFastPresent)
        );

        assert!(wait_until(Duration::from_secs(5), || {
            harness.last_status() == Some(Status::completed(ME, WarmupStage::RepeaterFastPresent))
        }));
        assert_eq!(repeater.on_present(), PresentAction::RepeatPresent);
        repeater.dispose();
    }

    // ===== Pause and final burst =====

    #[test]
    fn paused_repeater_waits_for_the_final_burst() {
        let harness = Harness::new(NodeRole::Repeater);
        let repeater = paused(&harness);

        let transport = harness.transport.clone();
        let announcer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            transport.deliver(&Message::Heartbeat(Heartbeat::last_burst(2)));
        });

        let start = Instant::now();
        assert_eq!(repeater.on_present(), PresentAction::RepeatPresent);
        assert!(start.elapsed() >= Duration::from_millis(80));
        announcer.join().unwrap();

        assert_eq!(
            repeater.status(),
            Status::pending(ME, WarmupStage::LastRepeatersBurst)
        );
        assert_eq!(repeater.on_present(), PresentAction::RepeatPresent);
        assert_eq!(repeater.on_present(), PresentAction::BarrierWarmedUp);
        assert_eq!(repeater.performed_additional_presents(), 2);
        assert_eq!(
            repeater.status(),
            Status::completed(ME, WarmupStage::LastRepeatersBurst)
        );
        assert!(!harness.driver.has_warmup_callback());

        // Still reporting until the emitter moves on.
        assert_eq!(harness.transport.hook_count(), 1);
        assert!(wait_until(Duration::from_secs(5), || {
            harness.last_status() == Some(Status::completed(ME, WarmupStage::LastRepeatersBurst))
        }));
    }

    #[test]
    fn frame_data_past_the_first_frame_acknowledges() {
        let harness = Harness::new(NodeRole::Repeater);
        let repeater = paused(&harness);
        harness.heartbeat(Heartbeat::last_burst(0));
        assert_eq!(repeater.on_present(), PresentAction::BarrierWarmedUp);

        harness.transport.deliver(&Message::FrameData(FrameData::empty(0)));
        assert!(!repeater.is_acknowledged());
        assert_eq!(harness.transport.hook_count(), 1);

        harness.transport.deliver(&Message::FrameData(FrameData::empty(1)));
        assert!(repeater.is_acknowledged());
        assert_eq!(harness.transport.hook_count(), 0);

        // The status loop winds down on its own.
        let handle = repeater.status_loop.lock().take().unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn stale_heartbeats_are_ignored() {
        let harness = Harness::new(NodeRole::Repeater);
        let repeater = paused(&harness);

        harness.heartbeat(Heartbeat::new(WarmupStage::RepeaterFastPresent));
        assert_eq!(repeater.stage(), WarmupStage::RepeatersPaused);
        repeater.dispose();
    }

    // ===== Failures =====

    #[test]
    fn timeout_is_reported_without_terminating() {
        let harness = Harness::new(NodeRole::Repeater);
        let repeater = harness.start(WarmupConfig {
            handshake_timeout_ms: 0,
            ..fast_config()
        });
        thread::sleep(Duration::from_millis(5));

        assert_eq!(repeater.on_present(), PresentAction::ContinueToNextFrame);
        assert_eq!(
            harness.report.state(),
            InitializationState::BarrierWarmupTimeout
        );
        assert!(!harness.cluster.is_terminated());
        assert_eq!(harness.transport.hook_count(), 0);
        assert!(!harness.driver.has_warmup_callback());
    }

    #[test]
    fn termination_releases_a_paused_repeater() {
        let harness = Harness::new(NodeRole::Repeater);
        let repeater = paused(&harness);

        let cluster = harness.cluster.clone();
        let terminator = thread::spawn(move || {
            thread::sleep(Duration::from_millis(60));
            cluster.terminate();
        });

        assert_eq!(repeater.on_present(), PresentAction::ContinueToNextFrame);
        terminator.join().unwrap();
        assert_eq!(
            harness.report.state(),
            InitializationState::UnexpectedTermination
        );
    }

    // ===== Backup promotion =====

    #[test]
    fn promoted_backup_skips_sync_once() {
        let harness = Harness::new(NodeRole::Backup);
        harness.cluster.set_repeaters_delayed_one_frame(true);
        let repeater = harness.start(fast_config());
        assert!(repeater.is_watching_promotion());
        assert_eq!(harness.cluster.subscriber_count(), 1);

        harness.cluster.set_role(NodeRole::Emitter);
        harness.cluster.set_role(NodeRole::Repeater);
        harness.cluster.set_role(NodeRole::Emitter);

        let skips = harness
            .driver
            .issued_commands()
            .into_iter()
            .filter(|command| *command == DriverCommand::SkipSyncForNextFrame)
            .count();
        assert_eq!(skips, 1);
        assert!(!repeater.is_watching_promotion());
        assert_eq!(harness.cluster.subscriber_count(), 0);

        repeater.dispose();
        harness.driver.present_frame();
        harness.driver.present_frame();
        assert_eq!(harness.driver.unsynchronized_presents(), 1);
    }

    #[test]
    fn other_role_changes_stop_watching() {
        let harness = Harness::new(NodeRole::Backup);
        harness.cluster.set_repeaters_delayed_one_frame(true);
        let repeater = harness.start(fast_config());

        harness.cluster.set_role(NodeRole::Repeater);
        assert!(!repeater.is_watching_promotion());
        harness.cluster.set_role(NodeRole::Emitter);
        assert!(!harness
            .driver
            .issued_commands()
            .contains(&DriverCommand::SkipSyncForNextFrame));
    }

    #[test]
    fn no_watch_without_delayed_repeaters() {
        let harness = Harness::new(NodeRole::Backup);
        let repeater = harness.start(fast_config());
        assert!(!repeater.is_watching_promotion());
        assert_eq!(harness.cluster.subscriber_count(), 0);
    }
}
