//! Mock transport for testing.
//!
//! Captures sent messages and lets tests deliver messages to the registered
//! hooks.

use super::{HookId, HookRegistry, MessageTransport, PreProcessHook, PreProcessResult, TransportError};
use framelock_types::Message;
use parking_lot::Mutex;
use std::sync::Arc;

/// Mock transport for testing.
///
/// Clones share the same state.
#[derive(Debug, Default, Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
    hooks: Arc<HookRegistry>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    sent_messages: Vec<Message>,
    fail_next_send: Option<String>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `message` to the registered hooks, as if received.
    pub fn deliver(&self, message: &Message) -> PreProcessResult {
        self.hooks.dispatch(message)
    }

    /// Get all messages that were sent.
    pub fn sent_messages(&self) -> Vec<Message> {
        self.inner.lock().sent_messages.clone()
    }

    /// Get the last message that was sent.
    pub fn last_sent(&self) -> Option<Message> {
        self.inner.lock().sent_messages.last().cloned()
    }

    /// Number of registered hooks.
    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        self.inner.lock().fail_next_send = Some(error.to_string());
    }
}

impl MessageTransport for MockTransport {
    fn send(&self, message: &Message) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();

        // Check for forced failure
        if let Some(error) = inner.fail_next_send.take() {
            return Err(TransportError::SendFailed(error));
        }

        inner.sent_messages.push(message.clone());
        Ok(())
    }

    fn add_preprocess(&self, priority: i32, hook: PreProcessHook) -> HookId {
        self.hooks.add(priority, hook)
    }

    fn remove_preprocess(&self, id: HookId) -> bool {
        self.hooks.remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framelock_types::{Heartbeat, NodeId, Status, WarmupStage};

    // ===========================================
    // MockTransport Basic Tests
    // ===========================================

    #[test]
    fn mock_transport_sends_messages() {
        let transport = MockTransport::new();
        let first = Message::Heartbeat(Heartbeat::default());
        let second = Message::Heartbeat(Heartbeat::new(WarmupStage::RepeatersPaused));

        transport.send(&first).unwrap();
        transport.send(&second).unwrap();

        assert_eq!(transport.sent_messages(), vec![first, second.clone()]);
        assert_eq!(transport.last_sent(), Some(second));
    }

    #[test]
    fn mock_transport_delivers_to_hooks() {
        let transport = MockTransport::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        transport.add_preprocess(
            0,
            Arc::new(move |message: &Message| {
                sink.lock().push(message.clone());
                PreProcessResult::PassThrough
            }),
        );

        let status = Message::Status(Status::completed(NodeId::new(1), WarmupStage::RepeatersPaused));
        assert_eq!(transport.deliver(&status), PreProcessResult::PassThrough);
        assert_eq!(*seen.lock(), vec![status]);
    }

    // ===========================================
    // Error Condition Tests
    // ===========================================

    #[test]
    fn forced_send_failure() {
        let transport = MockTransport::new();
        transport.fail_next_send("buffer full");

        let message = Message::Heartbeat(Heartbeat::default());
        let result = transport.send(&message);
        assert!(matches!(result, Err(TransportError::SendFailed(_))));

        // Next send should work
        transport.send(&message).unwrap();
        assert_eq!(transport.sent_messages().len(), 1);
    }

    // ===========================================
    // Clone and Shared State Tests
    // ===========================================

    #[test]
    fn mock_transport_clone_shares_state() {
        let transport1 = MockTransport::new();
        let transport2 = transport1.clone();

        let id = transport2.add_preprocess(0, Arc::new(|_| PreProcessResult::Consumed));
        transport1.send(&Message::Heartbeat(Heartbeat::default())).unwrap();

        assert_eq!(transport2.sent_messages().len(), 1);
        assert_eq!(transport1.hook_count(), 1);
        assert!(transport1.remove_preprocess(id));
    }
}
