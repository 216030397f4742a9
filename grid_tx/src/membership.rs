// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cluster view notifications consumed by the transaction core.
//!
//! The membership component itself lives outside this crate. It is reached
//! through [`MembershipNotifier`], which the transaction factory receives at
//! startup instead of looking up a process-wide manager. [`LocalMembership`]
//! is an in-process notifier for single-node deployments and tests.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Address of a cluster member, in the transport's textual form.
pub type NodeId = String;

/// Handle returned when registering a [`ViewListener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A single installed cluster view as seen from the local node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewChange {
    /// Address of the node receiving the view.
    pub local_address: NodeId,
    /// Members in the transport's canonical order.
    pub members: Vec<NodeId>,
    /// View sequence number (increments on every change).
    pub view_id: u64,
}

impl ViewChange {
    pub fn new(local_address: impl Into<NodeId>, members: Vec<NodeId>, view_id: u64) -> Self {
        Self {
            local_address: local_address.into(),
            members,
            view_id,
        }
    }

    /// Position of the local node in the member list.
    pub fn local_index(&self) -> Option<usize> {
        self.members.iter().position(|m| *m == self.local_address)
    }

    pub fn contains(&self, node: &str) -> bool {
        self.members.iter().any(|m| m == node)
    }
}

/// Callback trait for cluster view changes.
pub trait ViewListener: Send + Sync {
    /// Called for the initial view and every subsequent one.
    fn on_view_change(&self, view: &ViewChange);
}

/// Subscription surface of the cluster membership component.
pub trait MembershipNotifier: Send + Sync {
    fn register_listener(&self, listener: Arc<dyn ViewListener>) -> ListenerId;

    /// Returns false if the id was not registered.
    fn unregister_listener(&self, id: ListenerId) -> bool;

    /// The most recently installed view, if any.
    fn current_view(&self) -> Option<ViewChange>;
}

/// In-process membership notifier.
///
/// Views are installed explicitly with [`LocalMembership::install_view`].
/// Listeners are invoked synchronously on the installing thread, after the
/// internal locks are released.
pub struct LocalMembership {
    local_address: NodeId,
    view: RwLock<Option<ViewChange>>,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn ViewListener>)>>,
    next_listener: AtomicU64,
}

impl LocalMembership {
    pub fn new(local_address: impl Into<NodeId>) -> Self {
        Self {
            local_address: local_address.into(),
            view: RwLock::new(None),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(0),
        }
    }

    pub fn local_address(&self) -> &str {
        &self.local_address
    }

    /// Install a new view with the next view id and notify listeners.
    pub fn install_view(&self, members: Vec<NodeId>) -> ViewChange {
        let view = {
            let mut current = self.view.write();
            let view_id = current.as_ref().map_or(1, |v| v.view_id + 1);
            let view = ViewChange::new(self.local_address.clone(), members, view_id);
            *current = Some(view.clone());
            view
        };

        tracing::debug!(
            view_id = view.view_id,
            members = view.members.len(),
            "Installed cluster view"
        );

        let listeners: Vec<Arc<dyn ViewListener>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener.on_view_change(&view);
        }
        view
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }
}

impl MembershipNotifier for LocalMembership {
    fn register_listener(&self, listener: Arc<dyn ViewListener>) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    fn unregister_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    fn current_view(&self) -> Option<ViewChange> {
        self.view.read().clone()
    }
}

impl std::fmt::Debug for LocalMembership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalMembership")
            .field("local_address", &self.local_address)
            .field("view", &*self.view.read())
            .field("listeners", &self.listener_count())
            .finish()
    }
}
