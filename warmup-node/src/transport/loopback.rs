//! In-process network connecting the nodes of a simulated cluster.
//!
//! Every message goes through the real wire format: it is sealed in an
//! [`Envelope`], encoded with MessagePack, then decoded on the receiving side
//! and handed to that endpoint's hooks. Delivery is a broadcast to every
//! other endpoint, synchronous on the sender's thread.

use super::{HookId, HookRegistry, MessageTransport, PreProcessHook, TransportError};
use framelock_types::{Envelope, Message, NodeId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Shared medium of a set of [`LoopbackEndpoint`]s.
#[derive(Debug, Clone, Default)]
pub struct LoopbackHub {
    inner: Arc<HubInner>,
}

#[derive(Debug, Default)]
struct HubInner {
    endpoints: Mutex<Vec<(NodeId, Arc<HookRegistry>)>>,
    /// Drop every n-th message, 0 to deliver everything.
    drop_every: u64,
    sent: AtomicU64,
    dropped: AtomicU64,
    undecodable: AtomicU64,
}

impl LoopbackHub {
    /// Hub delivering every message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hub dropping every `n`-th message sent (0 drops nothing).
    pub fn with_drop_every(n: u64) -> Self {
        Self {
            inner: Arc::new(HubInner {
                drop_every: n,
                ..HubInner::default()
            }),
        }
    }

    /// Attach a new endpoint for `node_id`.
    pub fn endpoint(&self, node_id: NodeId) -> LoopbackEndpoint {
        let hooks = Arc::new(HookRegistry::new());
        self.inner
            .endpoints
            .lock()
            .push((node_id, Arc::clone(&hooks)));
        LoopbackEndpoint {
            node_id,
            hub: Arc::clone(&self.inner),
            hooks,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Messages sent through the hub, dropped ones included.
    pub fn sent_messages(&self) -> u64 {
        self.inner.sent.load(Ordering::Relaxed)
    }

    /// Messages dropped by the loss pattern.
    pub fn dropped_messages(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Deliver raw bytes as if `sender` had sent them.
    pub fn inject(&self, sender: NodeId, bytes: &[u8]) {
        self.inner.deliver(sender, bytes);
    }

    /// Received datagrams that could not be decoded.
    pub fn undecodable_messages(&self) -> u64 {
        self.inner.undecodable.load(Ordering::Relaxed)
    }
}

impl HubInner {
    fn route(&self, sender: NodeId, bytes: &[u8]) {
        let sequence = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        if self.drop_every > 0 && sequence % self.drop_every == 0 {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::trace!("Dropping message #{} from node {}", sequence, sender);
            return;
        }
        self.deliver(sender, bytes);
    }

    fn deliver(&self, sender: NodeId, bytes: &[u8]) {
        let targets: Vec<Arc<HookRegistry>> = self
            .endpoints
            .lock()
            .iter()
            .filter(|(node_id, _)| *node_id != sender)
            .map(|(_, hooks)| Arc::clone(hooks))
            .collect();

        for hooks in targets {
            match Envelope::from_bytes(bytes).and_then(|envelope| envelope.open()) {
                Ok(message) => {
                    hooks.dispatch(&message);
                }
                Err(e) => {
                    self.undecodable.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Discarding undecodable message from node {}: {}", sender, e);
                }
            }
        }
    }
}

/// One node's attachment to a [`LoopbackHub`].
#[derive(Debug, Clone)]
pub struct LoopbackEndpoint {
    node_id: NodeId,
    hub: Arc<HubInner>,
    hooks: Arc<HookRegistry>,
    closed: Arc<AtomicBool>,
}

impl LoopbackEndpoint {
    /// Node this endpoint sends as.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Number of hooks registered on this endpoint.
    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    /// Refuse every later send.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl MessageTransport for LoopbackEndpoint {
    fn send(&self, message: &Message) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let bytes = Envelope::seal(self.node_id, message)?.to_bytes()?;
        self.hub.route(self.node_id, &bytes);
        Ok(())
    }

    fn add_preprocess(&self, priority: i32, hook: PreProcessHook) -> HookId {
        self.hooks.add(priority, hook)
    }

    fn remove_preprocess(&self, id: HookId) -> bool {
        self.hooks.remove(id)
    }
}
