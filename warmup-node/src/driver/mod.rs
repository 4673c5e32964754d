//! Hardware sync driver seam.
//!
//! The driver owns the swap group and swap barrier. The warmup talks to it
//! through a handful of commands and a callback invoked by the rendering
//! thread after each present attempt.
//!
//! # Warmup callback contract
//!
//! While a callback is installed, the driver invokes it on the rendering
//! thread every time a present returns:
//! - [`PresentAction::RepeatPresent`] presents again, within the same frame
//! - [`PresentAction::ContinueToNextFrame`] ends the frame
//! - [`PresentAction::BarrierWarmedUp`] ends the frame and uninstalls the
//!   callback
//!
//! The callback may install or remove callbacks itself; drivers must not
//! hold their own locks while invoking it.

mod simulated;

pub use simulated::{BarrierSettings, FramePresentation, SimulatedBarrier, SimulatedDriver};

use framelock_core::PresentAction;
use framelock_types::InitializationState;
use std::sync::Arc;
use thiserror::Error;

/// Callback invoked on the rendering thread after each present attempt.
pub type WarmupCallback = Arc<dyn Fn() -> PresentAction + Send + Sync>;

/// Driver errors.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The command needs an initialized driver.
    #[error("driver not initialized")]
    NotInitialized,

    /// The driver rejected the command.
    #[error("command {command:?} failed: {reason}")]
    CommandFailed {
        /// Rejected command.
        command: DriverCommand,
        /// Reason reported by the driver.
        reason: String,
    },
}

/// Commands understood by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverCommand {
    /// Join the swap group and bind the swap barrier.
    Initialize,
    /// Leave the swap barrier and swap group.
    Dispose,
    /// Present the next frame without waiting on the barrier.
    SkipSyncForNextFrame,
}

/// Presentation parameters applied before initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentationSettings {
    /// Wait for vertical sync.
    pub vsync: bool,
    /// Maximum number of frames queued for presentation.
    pub max_queued_frames: u32,
}

impl PresentationSettings {
    /// Settings required by the swap barrier: vsync on, one queued frame.
    pub fn swap_barrier() -> Self {
        Self {
            vsync: true,
            max_queued_frames: 1,
        }
    }
}

/// Snapshot of the driver state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverState {
    /// Outcome of the last initialization.
    pub initialization_state: InitializationState,
    /// Swap group joined, 0 when none.
    pub swap_group_id: u32,
    /// Swap barrier bound, 0 when none.
    pub swap_barrier_id: u32,
    /// Frames presented successfully.
    pub presented_frames_success: u64,
    /// Frames whose present failed.
    pub presented_frames_failed: u64,
}

/// Hardware sync driver.
pub trait HardwareSyncDriver: Send + Sync {
    /// Apply presentation settings.
    fn configure_presentation(&self, settings: PresentationSettings);

    /// Issue a command.
    fn issue_command(&self, command: DriverCommand) -> Result<(), DriverError>;

    /// Fetch the current state. Not free: call it when needed only.
    fn fetch_state(&self) -> DriverState;

    /// Install (or remove, with `None`) the warmup callback.
    fn set_warmup_callback(&self, callback: Option<WarmupCallback>);
}
