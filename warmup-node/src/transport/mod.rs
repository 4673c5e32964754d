//! Message transport seam of the warmup.
//!
//! The warmup only needs two things from the network: sending a message and
//! looking at received messages before the rest of the node does.
//!
//! # Design
//!
//! The transport trait is synchronous and message-oriented:
//! - `send()` broadcasts a message (delivery is not guaranteed)
//! - `add_preprocess()` registers a hook that sees every received message
//! - `remove_preprocess()` unregisters it
//!
//! Hooks run in descending priority order. A hook may remove itself, or any
//! other hook, while it is running.
//!
//! # Example
//!
//! ```ignore
//! let transport = MockTransport::new();
//! let id = transport.add_preprocess(MESSAGE_SNIFFING_PRIORITY, Arc::new(|message| {
//!     println!("saw {:?}", message.message_type());
//!     PreProcessResult::PassThrough
//! }));
//! transport.send(&Message::Heartbeat(Heartbeat::default()))?;
//! transport.remove_preprocess(id);
//! ```

mod loopback;
mod mock;

pub use loopback::{LoopbackEndpoint, LoopbackHub};
pub use mock::MockTransport;

use framelock_types::{Message, WarmupError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Priority of hooks that only observe messages; they run before anything
/// else.
pub const MESSAGE_SNIFFING_PRIORITY: i32 = i32::MAX;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Message could not be encoded.
    #[error("encoding failed: {0}")]
    Encoding(#[from] WarmupError),

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Transport was closed.
    #[error("transport closed")]
    Closed,
}

/// Outcome of a pre-processing hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreProcessResult {
    /// Let the message continue to the next hook and the node.
    PassThrough,
    /// The message was handled, nobody else sees it.
    Consumed,
}

/// Identifier of a registered pre-processing hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

/// Hook invoked for every received message.
pub type PreProcessHook = Arc<dyn Fn(&Message) -> PreProcessResult + Send + Sync>;

/// Transport trait for the warmup messages.
///
/// Implementations handle the underlying delivery mechanism (UDP multicast,
/// in-process loopback, mock).
pub trait MessageTransport: Send + Sync {
    /// Send a message to the other nodes.
    ///
    /// Success only means the message left; it may still be lost.
    fn send(&self, message: &Message) -> Result<(), TransportError>;

    /// Register a hook that sees received messages before the node does.
    fn add_preprocess(&self, priority: i32, hook: PreProcessHook) -> HookId;

    /// Unregister a hook. Returns `false` if it was not registered.
    fn remove_preprocess(&self, id: HookId) -> bool;
}

struct RegisteredHook {
    priority: i32,
    id: HookId,
    hook: PreProcessHook,
}

/// Ordered set of pre-processing hooks shared by the transports.
#[derive(Default)]
pub struct HookRegistry {
    hooks: Mutex<Vec<RegisteredHook>>,
    next_id: AtomicU64,
}

impl HookRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `hook`. Hooks of equal priority run in registration order.
    pub fn add(&self, priority: i32, hook: PreProcessHook) -> HookId {
        let id = HookId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut hooks = self.hooks.lock();
        let position = hooks
            .iter()
            .position(|registered| registered.priority < priority)
            .unwrap_or(hooks.len());
        hooks.insert(position, RegisteredHook { priority, id, hook });
        id
    }

    /// Unregister a hook.
    pub fn remove(&self, id: HookId) -> bool {
        let mut hooks = self.hooks.lock();
        let before = hooks.len();
        hooks.retain(|registered| registered.id != id);
        hooks.len() != before
    }

    /// Number of registered hooks.
    pub fn len(&self) -> usize {
        self.hooks.lock().len()
    }

    /// Whether no hook is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run the hooks on `message` until one consumes it.
    ///
    /// Hooks run on a snapshot taken without holding the lock, so a hook can
    /// add or remove hooks.
    pub fn dispatch(&self, message: &Message) -> PreProcessResult {
        let snapshot: Vec<PreProcessHook> = self
            .hooks
            .lock()
            .iter()
            .map(|registered| Arc::clone(&registered.hook))
            .collect();

        for hook in snapshot {
            if hook(message) == PreProcessResult::Consumed {
                return PreProcessResult::Consumed;
            }
        }
        PreProcessResult::PassThrough
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("hooks", &self.len())
            .finish()
    }
}
