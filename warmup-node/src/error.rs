//! Errors of the warmup coordinators.

use thiserror::Error;

use crate::cluster::NodeRole;
use crate::config::ConfigError;
use crate::driver::DriverError;
use crate::transport::TransportError;
use framelock_types::WarmupError;

/// Errors starting or running a node's warmup.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Driver error.
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Protocol or initialization error.
    #[error("{0}")]
    Warmup(#[from] WarmupError),

    /// A background thread could not be started.
    #[error("failed to spawn thread: {0}")]
    Thread(#[from] std::io::Error),

    /// The node has no role taking part in the warmup.
    #[error("node role {0:?} takes no part in the barrier warmup")]
    NoWarmupRole(NodeRole),
}

#[cfg(test)]
mod tests {
    use super::*;
    use framelock_types::InitializationState;

    #[test]
    fn wraps_initialization_failure() {
        let err: NodeError =
            WarmupError::Initialization(InitializationState::UnexpectedTermination).into();
        assert_eq!(
            err.to_string(),
            "hardware sync initialization failed: Cluster terminated during barrier warmup"
        );
    }

    #[test]
    fn role_error_names_the_role() {
        let err = NodeError::NoWarmupRole(NodeRole::Unassigned);
        assert!(err.to_string().contains("Unassigned"));
    }
}
