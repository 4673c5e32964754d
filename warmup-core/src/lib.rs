//! # framelock-core
//!
//! Pure stage logic of the swap-barrier warmup handshake (no I/O, no
//! threads, instant tests).
//!
//! ## Design Philosophy
//!
//! Every type in this crate is **pure**: it takes what a coordinator observed
//! (a received message, the outcome of a probed present, the number of
//! repeaters present) and answers with what to do next. This enables:
//! - Instant unit tests (no mocks, no threads, no clock)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about stage transitions
//!
//! The actual waiting, presenting and messaging is performed by
//! `framelock-node`, which interprets the decisions produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod deadline;
pub mod emitter;
pub mod repeater;
pub mod state;

pub use deadline::Deadline;
pub use emitter::{
    additional_present_count, EmitterDecision, EmitterProgress, DEFAULT_PIPELINE_DEPTH_DIVISOR,
};
pub use repeater::{HeartbeatUpdate, RepeaterDecision, RepeaterProgress};
pub use state::{abort_reason, PresentAction};
