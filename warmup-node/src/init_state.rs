//! Per-frame entry point of hardware sync on a node.
//!
//! The first frame configures presentation, initializes the driver and starts
//! the warmup coordinator matching the node's role. Later frames do nothing
//! until the node is disposed.

use framelock_types::{InitializationState, WarmupError};

use crate::cluster::NodeRole;
use crate::config::WarmupConfig;
use crate::context::{InitializationReport, NodeContext};
use crate::driver::{DriverCommand, PresentationSettings};
use crate::emitter::EmitterWarmup;
use crate::error::NodeError;
use crate::repeater::RepeaterWarmup;

/// Warmup coordinator running on a node.
#[derive(Debug)]
pub enum WarmupCoordinator {
    /// The node drives the warmup.
    Emitter(EmitterWarmup),
    /// The node follows the emitter.
    Repeater(RepeaterWarmup),
}

impl WarmupCoordinator {
    /// Whether the rendering thread is done with the warmup.
    pub fn is_finished(&self) -> bool {
        match self {
            Self::Emitter(emitter) => emitter.is_finished(),
            Self::Repeater(repeater) => repeater.is_finished(),
        }
    }

    /// Stop the coordinator's threads and hooks.
    pub fn dispose(&self) {
        match self {
            Self::Emitter(emitter) => emitter.dispose(),
            Self::Repeater(repeater) => repeater.dispose(),
        }
    }
}

/// Hardware sync state of a node.
#[derive(Debug)]
pub struct HardwareSyncInitState {
    context: NodeContext,
    config: WarmupConfig,
    report: InitializationReport,
    coordinator: Option<WarmupCoordinator>,
    initialized: bool,
}

impl HardwareSyncInitState {
    /// Hardware sync of a node, initialized on the first frame.
    pub fn new(context: NodeContext, config: WarmupConfig) -> Self {
        Self {
            context,
            config,
            report: InitializationReport::new(),
            coordinator: None,
            initialized: false,
        }
    }

    /// Run before presenting each frame.
    ///
    /// Initialization and the start of the coordinator are attempted once,
    /// on the first frame. A failure is returned by that call only; later
    /// frames do nothing. Initialization failures stay visible through
    /// [`initialization_state`](Self::initialization_state).
    pub fn do_frame(&mut self) -> Result<(), NodeError> {
        if self.initialized {
            return Ok(());
        }
        self.initialized = true;
        self.initialize()?;
        self.coordinator = Some(self.start_coordinator()?);
        Ok(())
    }

    fn initialize(&mut self) -> Result<(), NodeError> {
        let driver = &self.context.driver;
        driver.configure_presentation(PresentationSettings::swap_barrier());

        if let Err(e) = driver.issue_command(DriverCommand::Initialize) {
            tracing::error!("Failed to initialize hardware sync: {}", e);
            self.report
                .set(InitializationState::SwapChainOrBarrierGenericFailure);
            return Err(e.into());
        }

        let state = driver.fetch_state();
        let outcome = match state.initialization_state {
            InitializationState::NotInitialized => {
                InitializationState::SwapChainOrBarrierGenericFailure
            }
            outcome => outcome,
        };
        self.report.set(outcome);

        if outcome.is_success() {
            tracing::info!(
                "Hardware sync initialized (swap group {}, swap barrier {})",
                state.swap_group_id,
                state.swap_barrier_id
            );
            Ok(())
        } else {
            tracing::error!("Hardware sync initialization failed: {}", outcome.description());
            Err(WarmupError::Initialization(outcome).into())
        }
    }

    fn start_coordinator(&self) -> Result<WarmupCoordinator, NodeError> {
        let context = self.context.clone();
        let config = self.config.clone();
        let report = self.report.clone();

        match self.context.cluster.node_role() {
            NodeRole::Emitter => Ok(WarmupCoordinator::Emitter(EmitterWarmup::start(
                context, config, report,
            )?)),
            NodeRole::Repeater | NodeRole::Backup => Ok(WarmupCoordinator::Repeater(
                RepeaterWarmup::start(context, config, report)?,
            )),
            role => {
                tracing::error!("Node has no warmup role ({:?}), barrier stays cold", role);
                Err(NodeError::NoWarmupRole(role))
            }
        }
    }

    /// Current initialization state.
    pub fn initialization_state(&self) -> InitializationState {
        self.report.state()
    }

    /// `Ok` unless initialization or the warmup failed.
    pub fn check(&self) -> Result<(), WarmupError> {
        self.report.check()
    }

    /// Whether the swap barrier is warmed up on this node.
    pub fn is_barrier_warmed_up(&self) -> bool {
        self.report.is_success()
            && self
                .coordinator
                .as_ref()
                .is_some_and(WarmupCoordinator::is_finished)
    }

    /// Running coordinator, if any.
    pub fn coordinator(&self) -> Option<&WarmupCoordinator> {
        self.coordinator.as_ref()
    }

    /// Stop the coordinator and release the driver.
    pub fn dispose(&mut self) {
        if let Some(coordinator) = self.coordinator.take() {
            coordinator.dispose();
        }
        if self.initialized && self.context.driver.fetch_state().initialization_state.is_success() {
            if let Err(e) = self.context.driver.issue_command(DriverCommand::Dispose) {
                tracing::warn!("Failed to dispose hardware sync: {}", e);
            }
        }
        self.initialized = false;
    }
}

impl Drop for HardwareSyncInitState {
    fn drop(&mut self) {
        self.dispose();
    }
}
