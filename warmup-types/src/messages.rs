//! Protocol messages of the barrier warmup handshake.
//!
//! These are the payloads carried inside an [`Envelope`](crate::Envelope).

use serde::{Deserialize, Serialize};

use crate::{NodeId, WarmupError};

// Re-export MessageType from envelope for convenience
pub use crate::envelope::MessageType;

/// Stage of the barrier warmup handshake.
///
/// Stages only ever move forward, in declaration order. The terminal
/// "barrier warmed up" state is not a stage: it is the end of the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum WarmupStage {
    /// Repeaters present as fast as they can while the emitter presents
    /// slowly, until every repeater sees its own present block.
    RepeaterFastPresent = 0,
    /// Repeaters stop presenting while the emitter counts how many presents
    /// it can issue before blocking (the present pipeline depth).
    RepeatersPaused = 1,
    /// Repeaters perform the extra presents announced by the emitter so every
    /// present queue is aligned.
    LastRepeatersBurst = 2,
}

impl WarmupStage {
    /// The stage following this one, `None` for the last stage.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::RepeaterFastPresent => Some(Self::RepeatersPaused),
            Self::RepeatersPaused => Some(Self::LastRepeatersBurst),
            Self::LastRepeatersBurst => None,
        }
    }
}

impl Default for WarmupStage {
    fn default() -> Self {
        Self::RepeaterFastPresent
    }
}

impl TryFrom<u8> for WarmupStage {
    type Error = WarmupError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::RepeaterFastPresent),
            1 => Ok(Self::RepeatersPaused),
            2 => Ok(Self::LastRepeatersBurst),
            _ => Err(WarmupError::InvalidStage(value)),
        }
    }
}

/// All messages exchanged by the warmup handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Emitter's view of the current stage
    Heartbeat(Heartbeat),
    /// A repeater's progress in the stage it believes is current
    Status(Status),
    /// Regular per-frame data, only used here as a liveness signal
    FrameData(FrameData),
}

impl Message {
    /// Discriminator of this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Heartbeat(_) => MessageType::Heartbeat,
            Message::Status(_) => MessageType::Status,
            Message::FrameData(_) => MessageType::FrameData,
        }
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WarmupError> {
        rmp_serde::to_vec(self).map_err(WarmupError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WarmupError> {
        rmp_serde::from_slice(bytes).map_err(WarmupError::Deserialization)
    }
}

/// Broadcast by the emitter, repeatedly, to announce the current stage.
///
/// Retransmissions are identical, so receivers compare by value to decide
/// whether anything changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Current stage of the handshake.
    pub stage: WarmupStage,
    /// Only meaningful in [`WarmupStage::LastRepeatersBurst`]: how many
    /// presents every repeater performs before declaring completion.
    pub additional_present_count: u32,
}

impl Heartbeat {
    /// Heartbeat of a stage that carries no additional present count.
    pub fn new(stage: WarmupStage) -> Self {
        Self {
            stage,
            additional_present_count: 0,
        }
    }

    /// Heartbeat announcing the final repeater burst.
    pub fn last_burst(additional_present_count: u32) -> Self {
        Self {
            stage: WarmupStage::LastRepeatersBurst,
            additional_present_count,
        }
    }
}

/// Sent by a repeater, repeatedly, to report its progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Status {
    /// Repeater sending the status.
    pub node_id: NodeId,
    /// Stage the repeater believes is current.
    pub stage: WarmupStage,
    /// Whether the repeater is done with that stage.
    pub completed: bool,
}

impl Status {
    /// Status of a repeater that has not completed `stage` yet.
    pub fn pending(node_id: NodeId, stage: WarmupStage) -> Self {
        Self {
            node_id,
            stage,
            completed: false,
        }
    }

    /// Status of a repeater that completed `stage`.
    pub fn completed(node_id: NodeId, stage: WarmupStage) -> Self {
        Self {
            node_id,
            stage,
            completed: true,
        }
    }
}

/// Per-frame data sent by the emitter once frames flow normally.
///
/// Its content is opaque to the warmup; only its arrival matters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameData {
    /// Index of the frame the data belongs to
    pub frame_index: u64,
    /// Opaque frame payload
    pub payload: Vec<u8>,
}

impl FrameData {
    /// Frame data without payload.
    pub fn empty(frame_index: u64) -> Self {
        Self {
            frame_index,
            payload: Vec::new(),
        }
    }
}
