//! Initialization state of the hardware sync layer.

use serde::{Deserialize, Serialize};

use crate::WarmupError;

/// Where the hardware sync layer stands: not yet initialized, initialized
/// (and possibly still warming up its barrier), or failed for a given reason.
///
/// Every value other than [`NotInitialized`](Self::NotInitialized) and
/// [`Initialized`](Self::Initialized) is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum InitializationState {
    /// Nothing was initialized yet.
    NotInitialized = 0,
    /// Initialized and usable.
    Initialized = 1,
    /// The rendering engine did not provide its native interfaces.
    MissingEngineInterfaces = 2,
    /// The graphics backend is not supported by the driver.
    UnsupportedGraphicApi = 3,
    /// No graphics device could be obtained.
    MissingDevice = 4,
    /// No swap chain could be obtained.
    MissingSwapChain = 5,
    /// Generic failure while setting up the swap chain or barrier.
    SwapChainOrBarrierGenericFailure = 6,
    /// No swap group support detected (is the hardware present?).
    NoSwapGroupDetected = 7,
    /// Querying swap group information failed.
    QuerySwapGroupFailed = 8,
    /// Joining the swap group failed.
    FailedToJoinSwapGroup = 9,
    /// Swap group identifier does not match the available swap groups.
    SwapGroupMismatch = 10,
    /// Binding the swap barrier failed.
    FailedToBindSwapBarrier = 11,
    /// Swap barrier identifier does not match the available swap barriers.
    SwapBarrierIdMismatch = 12,
    /// The cluster terminated while the barrier was warming up.
    UnexpectedTermination = 13,
    /// The barrier did not warm up before the handshake deadline.
    BarrierWarmupTimeout = 14,
}

impl InitializationState {
    /// Whether this state allows hardware sync to be used.
    pub fn is_success(self) -> bool {
        self == Self::Initialized
    }

    /// Whether this state reports a failure.
    pub fn is_failure(self) -> bool {
        !matches!(self, Self::NotInitialized | Self::Initialized)
    }

    /// Short descriptive text for logs and reports.
    pub fn description(self) -> &'static str {
        match self {
            Self::NotInitialized => "Not initialized",
            Self::Initialized => "Initialized",
            Self::MissingEngineInterfaces => "Rendering engine interfaces missing",
            Self::UnsupportedGraphicApi => "Unsupported graphic api",
            Self::MissingDevice => "Failed to get the graphics device",
            Self::MissingSwapChain => "Failed to get the swap chain",
            Self::SwapChainOrBarrierGenericFailure => "Error during setup of swap chain or barrier",
            Self::NoSwapGroupDetected => "No swap group detected (is the hardware present?)",
            Self::QuerySwapGroupFailed => "Failed to query information about swap groups",
            Self::FailedToJoinSwapGroup => "Failed to join swap group",
            Self::SwapGroupMismatch => {
                "Mismatch between swap group identifier and available swap groups"
            }
            Self::FailedToBindSwapBarrier => "Failed to bind swap barrier",
            Self::SwapBarrierIdMismatch => {
                "Mismatch between swap barrier identifier and available swap barriers"
            }
            Self::UnexpectedTermination => "Cluster terminated during barrier warmup",
            Self::BarrierWarmupTimeout => "Timed out warming up the swap barrier",
        }
    }
}

impl Default for InitializationState {
    fn default() -> Self {
        Self::NotInitialized
    }
}

impl TryFrom<u32> for InitializationState {
    type Error = WarmupError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::NotInitialized,
            1 => Self::Initialized,
            2 => Self::MissingEngineInterfaces,
            3 => Self::UnsupportedGraphicApi,
            4 => Self::MissingDevice,
            5 => Self::MissingSwapChain,
            6 => Self::SwapChainOrBarrierGenericFailure,
            7 => Self::NoSwapGroupDetected,
            8 => Self::QuerySwapGroupFailed,
            9 => Self::FailedToJoinSwapGroup,
            10 => Self::SwapGroupMismatch,
            11 => Self::FailedToBindSwapBarrier,
            12 => Self::SwapBarrierIdMismatch,
            13 => Self::UnexpectedTermination,
            14 => Self::BarrierWarmupTimeout,
            _ => return Err(WarmupError::InvalidInitializationState(value)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_initialized_is_success() {
        for raw in 0..=14u32 {
            let state = InitializationState::try_from(raw).unwrap();
            assert_eq!(state as u32, raw);
            assert_eq!(state.is_success(), raw == 1);
            assert_eq!(state.is_failure(), raw > 1);
        }
    }

    #[test]
    fn unknown_value_is_rejected() {
        assert!(matches!(
            InitializationState::try_from(15),
            Err(WarmupError::InvalidInitializationState(15))
        ));
    }

    #[test]
    fn default_is_not_initialized() {
        assert_eq!(
            InitializationState::default(),
            InitializationState::NotInitialized
        );
    }
}
