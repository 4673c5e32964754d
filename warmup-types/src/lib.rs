//! # framelock-types
//!
//! Wire format types for the framelock swap-barrier warmup protocol.
//!
//! This crate provides the foundational types used across all framelock crates:
//! - [`NodeId`], [`NodeIdBitVector`] - Node identity and node sets
//! - [`Envelope`] - Message wrapper with routing metadata
//! - [`Message`] - Protocol messages (Heartbeat, Status, FrameData)
//! - [`InitializationState`] - Outcome of the hardware sync setup
//! - [`WarmupError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod envelope;
mod error;
mod ids;
mod initialization;
mod messages;

pub use envelope::{Envelope, PROTOCOL_VERSION};
pub use error::WarmupError;
pub use ids::{NodeId, NodeIdBitVector};
pub use initialization::InitializationState;
pub use messages::{FrameData, Heartbeat, Message, MessageType, Status, WarmupStage};
