//! Cluster state as seen by the warmup.
//!
//! Membership and role election live elsewhere; the warmup only reads the
//! outcome and gets told when this node's role changes.

use framelock_types::{NodeId, NodeIdBitVector};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Role of a node in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NodeRole {
    /// No role yet.
    #[default]
    Unassigned,
    /// Drives the cluster.
    Emitter,
    /// Follows the emitter.
    Repeater,
    /// Follows the emitter, ready to replace it.
    Backup,
}

/// Handler invoked with the new role when this node's role changes.
pub type RoleChangedHandler = Arc<dyn Fn(NodeRole) + Send + Sync>;

/// Identifier of a role-change subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Cluster state accessor.
pub trait ClusterSyncState: Send + Sync {
    /// Whether the cluster is shutting down.
    fn is_terminated(&self) -> bool;

    /// Ask the whole cluster to shut down.
    fn terminate(&self);

    /// Current role of this node.
    fn node_role(&self) -> NodeRole;

    /// Whether repeaters render one frame behind the emitter.
    fn repeaters_delayed_one_frame(&self) -> bool;

    /// Repeaters known to be part of the cluster.
    fn repeater_presence(&self) -> NodeIdBitVector;

    /// Get notified of role changes. Handlers may unsubscribe themselves.
    fn subscribe_role_changed(&self, handler: RoleChangedHandler) -> SubscriptionId;

    /// Stop notifying a handler. Returns `false` if it was not subscribed.
    fn unsubscribe_role_changed(&self, id: SubscriptionId) -> bool;
}

#[derive(Debug, Default)]
struct SharedCluster {
    terminated: AtomicBool,
    repeaters_delayed_one_frame: AtomicBool,
    repeater_presence: Mutex<NodeIdBitVector>,
}

#[derive(Default)]
struct LocalNode {
    role: NodeRole,
    subscribers: Vec<(SubscriptionId, RoleChangedHandler)>,
}

/// In-process cluster state.
///
/// Termination, repeater presence and the delayed-repeaters flag are shared
/// with every sibling created by [`sibling`](Self::sibling); the role is
/// per node.
pub struct LocalClusterState {
    shared: Arc<SharedCluster>,
    node: Mutex<LocalNode>,
    next_subscription: AtomicU64,
}

impl LocalClusterState {
    /// A cluster of one node with `role`.
    pub fn new(role: NodeRole) -> Self {
        Self::with_shared(Arc::new(SharedCluster::default()), role)
    }

    fn with_shared(shared: Arc<SharedCluster>, role: NodeRole) -> Self {
        Self {
            shared,
            node: Mutex::new(LocalNode {
                role,
                subscribers: Vec::new(),
            }),
            next_subscription: AtomicU64::new(0),
        }
    }

    /// State of another node of the same cluster.
    pub fn sibling(&self, role: NodeRole) -> Self {
        Self::with_shared(Arc::clone(&self.shared), role)
    }

    /// Declare `node_id` as a present repeater.
    pub fn add_repeater(&self, node_id: NodeId) {
        self.shared.repeater_presence.lock().insert(node_id);
    }

    /// Set whether repeaters render one frame behind.
    pub fn set_repeaters_delayed_one_frame(&self, delayed: bool) {
        self.shared
            .repeaters_delayed_one_frame
            .store(delayed, Ordering::Release);
    }

    /// Change this node's role and notify the subscribers.
    pub fn set_role(&self, role: NodeRole) {
        let handlers: Vec<RoleChangedHandler> = {
            let mut node = self.node.lock();
            if node.role == role {
                return;
            }
            node.role = role;
            node.subscribers
                .iter()
                .map(|(_, handler)| Arc::clone(handler))
                .collect()
        };

        tracing::info!("Node role changed to {:?}", role);
        for handler in handlers {
            handler(role);
        }
    }

    /// Number of role-change subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.node.lock().subscribers.len()
    }
}

impl std::fmt::Debug for LocalClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalClusterState")
            .field("role", &self.node_role())
            .field("terminated", &self.is_terminated())
            .field("repeaters", &self.repeater_presence())
            .finish()
    }
}

impl ClusterSyncState for LocalClusterState {
    fn is_terminated(&self) -> bool {
        self.shared.terminated.load(Ordering::Acquire)
    }

    fn terminate(&self) {
        if !self.shared.terminated.swap(true, Ordering::AcqRel) {
            tracing::warn!("Cluster terminating");
        }
    }

    fn node_role(&self) -> NodeRole {
        self.node.lock().role
    }

    fn repeaters_delayed_one_frame(&self) -> bool {
        self.shared
            .repeaters_delayed_one_frame
            .load(Ordering::Acquire)
    }

    fn repeater_presence(&self) -> NodeIdBitVector {
        *self.shared.repeater_presence.lock()
    }

    fn subscribe_role_changed(&self, handler: RoleChangedHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.node.lock().subscribers.push((id, handler));
        id
    }

    fn unsubscribe_role_changed(&self, id: SubscriptionId) -> bool {
        let mut node = self.node.lock();
        let before = node.subscribers.len();
        node.subscribers.retain(|(subscribed, _)| *subscribed != id);
        node.subscribers.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn siblings_share_termination_and_presence() {
        let emitter = LocalClusterState::new(NodeRole::Emitter);
        let repeater = emitter.sibling(NodeRole::Repeater);

        emitter.add_repeater(NodeId::new(1));
        repeater.add_repeater(NodeId::new(2));
        assert_eq!(emitter.repeater_presence().set_bits_count(), 2);

        repeater.set_repeaters_delayed_one_frame(true);
        assert!(emitter.repeaters_delayed_one_frame());

        emitter.terminate();
        assert!(repeater.is_terminated());

        assert_eq!(emitter.node_role(), NodeRole::Emitter);
        assert_eq!(repeater.node_role(), NodeRole::Repeater);
    }

    #[test]
    fn role_change_notifies_subscribers() {
        let cluster = LocalClusterState::new(NodeRole::Backup);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        cluster.subscribe_role_changed(Arc::new(move |role| sink.lock().push(role)));

        cluster.set_role(NodeRole::Backup);
        cluster.set_role(NodeRole::Emitter);
        assert_eq!(*seen.lock(), vec![NodeRole::Emitter]);
    }

    #[test]
    fn handler_can_unsubscribe_itself() {
        let cluster = Arc::new(LocalClusterState::new(NodeRole::Backup));
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicU64::new(0));

        let handler: RoleChangedHandler = {
            let cluster = Arc::clone(&cluster);
            let slot = Arc::clone(&slot);
            let calls = Arc::clone(&calls);
            Arc::new(move |_| {
                calls.fetch_add(1, Ordering::Relaxed);
                if let Some(id) = slot.lock().take() {
                    cluster.unsubscribe_role_changed(id);
                }
            })
        };
        *slot.lock() = Some(cluster.subscribe_role_changed(handler));

        cluster.set_role(NodeRole::Emitter);
        cluster.set_role(NodeRole::Repeater);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert_eq!(cluster.subscriber_count(), 0);
    }
}
