//! Envelope - the wire format wrapper for warmup messages.

use serde::{Deserialize, Serialize};

use crate::{Message, NodeId, WarmupError};

/// Current envelope version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Message type discriminator for envelope routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Emitter stage announcement
    Heartbeat = 1,
    /// Repeater progress report
    Status = 2,
    /// Regular frame data
    FrameData = 3,
}

impl TryFrom<u8> for MessageType {
    type Error = WarmupError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageType::Heartbeat),
            2 => Ok(MessageType::Status),
            3 => Ok(MessageType::FrameData),
            _ => Err(WarmupError::InvalidMessageType(value)),
        }
    }
}

/// The envelope wraps a MessagePack-encoded message with routing metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version
    pub version: u8,
    /// Message type discriminator
    pub msg_type: u8,
    /// Node that sent the message
    pub sender: NodeId,
    /// MessagePack-encoded inner message
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Wrap `message` for sending by `sender`.
    pub fn seal(sender: NodeId, message: &Message) -> Result<Self, WarmupError> {
        Ok(Self {
            version: PROTOCOL_VERSION,
            msg_type: message.message_type() as u8,
            sender,
            payload: message.to_bytes()?,
        })
    }

    /// Decode the inner message.
    ///
    /// Fails if the version is unknown or the payload does not match the
    /// announced message type.
    pub fn open(&self) -> Result<Message, WarmupError> {
        if self.version != PROTOCOL_VERSION {
            return Err(WarmupError::UnsupportedVersion(self.version));
        }
        let announced = self.message_type()?;
        let message = Message::from_bytes(&self.payload)?;
        if message.message_type() != announced {
            return Err(WarmupError::InvalidData(format!(
                "envelope announced {:?} but carries {:?}",
                announced,
                message.message_type()
            )));
        }
        Ok(message)
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WarmupError> {
        rmp_serde::to_vec(self).map_err(WarmupError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WarmupError> {
        rmp_serde::from_slice(bytes).map_err(WarmupError::Deserialization)
    }

    /// Get the message type as an enum.
    pub fn message_type(&self) -> Result<MessageType, WarmupError> {
        MessageType::try_from(self.msg_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Heartbeat, WarmupStage};

    #[test]
    fn sealed_envelope_opens_to_same_message() {
        let message = Message::Heartbeat(Heartbeat::new(WarmupStage::RepeatersPaused));
        let envelope = Envelope::seal(NodeId::new(0), &message).unwrap();

        let bytes = envelope.to_bytes().unwrap();
        let restored = Envelope::from_bytes(&bytes).unwrap();

        assert_eq!(restored.sender, NodeId::new(0));
        assert_eq!(restored.message_type().unwrap(), MessageType::Heartbeat);
        assert_eq!(restored.open().unwrap(), message);
    }

    #[test]
    fn message_type_roundtrip() {
        for val in 1..=3u8 {
            let mt = MessageType::try_from(val).unwrap();
            assert_eq!(mt as u8, val);
        }
    }

    #[test]
    fn invalid_message_type_fails() {
        assert!(MessageType::try_from(0).is_err());
        assert!(MessageType::try_from(4).is_err());
        assert!(MessageType::try_from(255).is_err());
    }

    #[test]
    fn mismatched_type_is_rejected() {
        let message = Message::Heartbeat(Heartbeat::default());
        let mut envelope = Envelope::seal(NodeId::new(1), &message).unwrap();
        envelope.msg_type = MessageType::Status as u8;

        assert!(matches!(envelope.open(), Err(WarmupError::InvalidData(_))));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let message = Message::Heartbeat(Heartbeat::default());
        let mut envelope = Envelope::seal(NodeId::new(1), &message).unwrap();
        envelope.version = 9;

        assert!(matches!(
            envelope.open(),
            Err(WarmupError::UnsupportedVersion(9))
        ));
    }
}
