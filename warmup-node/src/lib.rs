//! # framelock-node
//!
//! Threaded swap-barrier warmup for the nodes of a framelock cluster.
//!
//! Before a cluster can render in lockstep, the swap barrier of every node
//! must be up and the present pipelines of all nodes must be aligned. The
//! emitter and its repeaters run a short handshake over the cluster network
//! to get there.
//!
//! ## Features
//!
//! - **Pure state machines**: decisions come from framelock-core, this crate
//!   adds the threads, waits and I/O around them
//! - **Transport Abstraction**: pluggable transport (loopback, mock)
//! - **Driver Abstraction**: hardware sync driver behind a trait, with a
//!   simulated barrier
//! - **Simulation**: a whole cluster in one process, see [`simulation`]
//! - **Bounded waits**: every wait honours the handshake deadline and cluster
//!   termination
//!
//! ## Example
//!
//! ```ignore
//! use framelock_node::{HardwareSyncInitState, NodeContext, WarmupConfig};
//!
//! let mut sync = HardwareSyncInitState::new(context, WarmupConfig::default());
//! loop {
//!     sync.do_frame()?;
//!     driver.present_frame();
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cluster;
pub mod config;
pub mod context;
pub mod driver;
pub mod emitter;
pub mod error;
pub mod init_state;
pub mod repeater;
pub mod signal;
pub mod simulation;
pub mod transport;

pub use cluster::{ClusterSyncState, LocalClusterState, NodeRole, RoleChangedHandler, SubscriptionId};
pub use config::{ConfigError, WarmupConfig};
pub use context::{InitializationReport, NodeContext};
pub use driver::{
    BarrierSettings, DriverCommand, DriverError, DriverState, FramePresentation,
    HardwareSyncDriver, PresentationSettings, SimulatedBarrier, SimulatedDriver, WarmupCallback,
};
pub use emitter::EmitterWarmup;
pub use error::NodeError;
pub use init_state::{HardwareSyncInitState, WarmupCoordinator};
pub use repeater::RepeaterWarmup;
pub use simulation::{run_simulation, NodeReport, SimulationReport, SimulationSettings};
pub use transport::{
    HookId, LoopbackEndpoint, LoopbackHub, MessageTransport, MockTransport, PreProcessHook,
    PreProcessResult, TransportError, MESSAGE_SNIFFING_PRIORITY,
};
