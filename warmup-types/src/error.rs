//! Error types for the framelock warmup protocol.

use thiserror::Error;

use crate::InitializationState;

/// Errors that can occur while encoding, decoding or running the warmup.
#[derive(Debug, Error)]
pub enum WarmupError {
    /// MessagePack serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),

    /// Invalid message type discriminator
    #[error("invalid message type: {0}")]
    InvalidMessageType(u8),

    /// Invalid warmup stage discriminator
    #[error("invalid warmup stage: {0}")]
    InvalidStage(u8),

    /// Invalid initialization state discriminator
    #[error("invalid initialization state: {0}")]
    InvalidInitializationState(u32),

    /// Invalid envelope version
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Invalid data format
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Hardware sync could not be initialized or warmed up
    #[error("hardware sync initialization failed: {}", .0.description())]
    Initialization(InitializationState),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = WarmupError::InvalidMessageType(99);
        assert_eq!(err.to_string(), "invalid message type: 99");
    }

    #[test]
    fn initialization_error_uses_description() {
        let err = WarmupError::Initialization(InitializationState::BarrierWarmupTimeout);
        assert_eq!(
            err.to_string(),
            "hardware sync initialization failed: Timed out warming up the swap barrier"
        );
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<WarmupError>();
    }
}
