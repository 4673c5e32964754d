//! Collaborators shared by the coordinators of a node.

use framelock_types::{InitializationState, WarmupError};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::cluster::ClusterSyncState;
use crate::driver::HardwareSyncDriver;
use crate::transport::MessageTransport;

/// External collaborators of a node.
#[derive(Clone)]
pub struct NodeContext {
    /// Network used for heartbeats and statuses.
    pub transport: Arc<dyn MessageTransport>,
    /// Hardware sync driver.
    pub driver: Arc<dyn HardwareSyncDriver>,
    /// Cluster state.
    pub cluster: Arc<dyn ClusterSyncState>,
}

impl NodeContext {
    /// Bundle the collaborators of a node.
    pub fn new(
        transport: Arc<dyn MessageTransport>,
        driver: Arc<dyn HardwareSyncDriver>,
        cluster: Arc<dyn ClusterSyncState>,
    ) -> Self {
        Self {
            transport,
            driver,
            cluster,
        }
    }
}

impl std::fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeContext")
            .field("role", &self.cluster.node_role())
            .finish_non_exhaustive()
    }
}

/// Initialization state of the hardware sync layer, shared between the
/// rendering thread and the background threads.
///
/// Once a failure is reported it sticks: later reports are ignored.
#[derive(Debug, Clone, Default)]
pub struct InitializationReport {
    state: Arc<Mutex<InitializationState>>,
}

impl InitializationReport {
    /// Report in [`InitializationState::NotInitialized`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Report already in [`InitializationState::Initialized`].
    pub fn initialized() -> Self {
        let report = Self::new();
        report.set(InitializationState::Initialized);
        report
    }

    /// Current state.
    pub fn state(&self) -> InitializationState {
        *self.state.lock()
    }

    /// Whether hardware sync is usable.
    pub fn is_success(&self) -> bool {
        self.state().is_success()
    }

    /// `Ok` unless a failure was reported.
    pub fn check(&self) -> Result<(), WarmupError> {
        let state = self.state();
        if state.is_failure() {
            Err(WarmupError::Initialization(state))
        } else {
            Ok(())
        }
    }

    /// Record `state` unless a failure is already recorded.
    ///
    /// Returns `true` if the state was recorded.
    pub fn set(&self, state: InitializationState) -> bool {
        let mut current = self.state.lock();
        if current.is_failure() {
            return false;
        }
        *current = state;
        true
    }
}
