//! Node registry: the local view of the root and its sub-nodes.
//!
//! The registry is owned by exactly one discovery engine and mutated only
//! through the methods below. It knows nothing about the protocol or the
//! transport; it only keeps addresses unique and timestamps current.
//!
//! Membership belongs to the current root. Switching to a different root or
//! removing the root discards every member.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use canopy_core::clock::{Clock, Timestamp};
use canopy_core::wire::Address;

use crate::error::TopologyError;

/// One known device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NodeEntry {
    pub address: Address,
    /// Last time the node was confirmed reachable.
    pub last_seen: Timestamp,
}

/// Owned copy of the registry, safe to hand to other tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TopologyView {
    pub root: Option<NodeEntry>,
    pub members: Vec<NodeEntry>,
}

/// The authoritative root + members view.
pub struct Registry {
    root: Option<NodeEntry>,
    members: Vec<NodeEntry>,
    clock: Arc<dyn Clock>,
}

impl Registry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            root: None,
            members: Vec::new(),
            clock,
        }
    }

    /// Adopt `addr` as root.
    ///
    /// A different root replaces the old one and discards all members; the
    /// same root is a no-op. Returns `true` once `addr` is the root.
    pub fn set_root(&mut self, addr: Address) -> Result<bool, TopologyError> {
        if addr.is_broadcast() {
            return Err(TopologyError::InvalidArgument(
                "broadcast address cannot be a root".into(),
            ));
        }

        match self.root {
            Some(current) if current.address == addr => return Ok(true),
            Some(current) => {
                tracing::info!(from = %current.address, to = %addr, "switching root");
                self.clear();
            }
            None => tracing::info!(root = %addr, "setting new root"),
        }

        self.root = Some(NodeEntry {
            address: addr,
            last_seen: self.clock.now(),
        });
        Ok(true)
    }

    pub fn root(&self) -> Option<NodeEntry> {
        self.root
    }

    pub fn contains(&self, addr: &Address) -> bool {
        self.is_root(addr) || self.position(addr).is_some()
    }

    /// Append every address not already known. Returns how many were added.
    ///
    /// Known addresses keep their timestamp; refreshing is [`Registry::touch`]'s job.
    pub fn add(&mut self, addrs: &[Address]) -> Result<usize, TopologyError> {
        if self.root.is_none() {
            return Err(TopologyError::NoRoot);
        }

        let now = self.clock.now();
        let mut added = 0;
        for addr in addrs {
            if addr.is_broadcast() || self.contains(addr) {
                continue;
            }
            self.members.push(NodeEntry {
                address: *addr,
                last_seen: now,
            });
            added += 1;
        }
        Ok(added)
    }

    /// Refresh the timestamp of every known address. Returns how many were touched.
    pub fn touch(&mut self, addrs: &[Address]) -> usize {
        let now = self.clock.now();
        let mut touched = 0;
        for addr in addrs {
            if self.is_root(addr) {
                if let Some(root) = self.root.as_mut() {
                    root.last_seen = now;
                }
                touched += 1;
            } else if let Some(i) = self.position(addr) {
                self.members[i].last_seen = now;
                touched += 1;
            }
        }
        touched
    }

    /// Remove addresses. Removing the root clears everything and ends the call.
    pub fn remove(&mut self, addrs: &[Address]) {
        for addr in addrs {
            if self.is_root(addr) {
                tracing::info!(root = %addr, "root removed, clearing registry");
                self.clear();
                return;
            }
            if let Some(i) = self.position(addr) {
                self.members.remove(i);
            }
        }
    }

    /// Drop members not confirmed within `threshold` of `now`. The root is never evicted.
    pub fn evict_stale(&mut self, threshold: Duration, now: Timestamp) -> usize {
        let before = self.members.len();
        let mut i = self.members.len();
        while i > 0 {
            i -= 1;
            if now.saturating_duration_since(self.members[i].last_seen) > threshold {
                let evicted = self.members.remove(i);
                tracing::debug!(node = %evicted.address, "evicted stale sub-node");
            }
        }
        before - self.members.len()
    }

    /// Borrowed view of the members. No mutation can happen while it is held.
    pub fn snapshot(&self) -> &[NodeEntry] {
        &self.members
    }

    /// Number of members, root excluded.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Reset to the empty state.
    pub fn clear(&mut self) {
        self.root = None;
        self.members.clear();
    }

    pub fn view(&self) -> TopologyView {
        TopologyView {
            root: self.root,
            members: self.members.clone(),
        }
    }

    /// Log the full registry at debug level.
    pub fn log_contents(&self) {
        let Some(root) = self.root else {
            tracing::debug!("registry is empty");
            return;
        };
        tracing::debug!(root = %root.address, members = self.members.len(), "registered nodes");
        for (index, entry) in self.members.iter().enumerate() {
            tracing::debug!(index, node = %entry.address, "  member");
        }
    }

    fn is_root(&self, addr: &Address) -> bool {
        self.root.is_some_and(|r| r.address == *addr)
    }

    fn position(&self, addr: &Address) -> Option<usize> {
        self.members.iter().position(|e| e.address == *addr)
    }
}
