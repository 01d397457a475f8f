//! Cluster membership view.
//!
//! The membership service is the writer; the coordinator reads a snapshot
//! per operation. Heartbeats keep members online, and a sweep marks the
//! silent ones offline.

use livequery_core::{unix_millis, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Liveness state of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberStatus {
    /// Accepting subscriptions and searches.
    Online,
    /// Missed its heartbeat window.
    Offline,
    /// Leaving gracefully; no new subscriptions.
    Draining,
}

/// One cluster member as seen by this node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    /// The member's identifier.
    pub id: NodeId,
    /// Network address, `host:port`.
    pub address: String,
    /// Unix millis of the last heartbeat.
    pub last_heartbeat: u64,
    /// Current liveness state.
    pub status: MemberStatus,
}

impl MemberInfo {
    /// Describe a member at an address.
    pub fn new(id: NodeId, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
            last_heartbeat: 0,
            status: MemberStatus::Online,
        }
    }
}

/// Registry of the cluster members known to this node.
#[derive(Debug, Default)]
pub struct MemberRegistry {
    members: HashMap<NodeId, MemberInfo>,
    heartbeat_timeout_ms: u64,
}

impl MemberRegistry {
    /// Create a registry with the default heartbeat window.
    pub fn new() -> Self {
        Self {
            members: HashMap::new(),
            heartbeat_timeout_ms: 30_000,
        }
    }

    /// Create a registry with a custom heartbeat window.
    pub fn with_heartbeat_timeout(timeout_ms: u64) -> Self {
        Self {
            members: HashMap::new(),
            heartbeat_timeout_ms: timeout_ms,
        }
    }

    /// Add or refresh a member.
    pub fn register(&mut self, mut info: MemberInfo) {
        info.last_heartbeat = unix_millis();
        info.status = MemberStatus::Online;
        self.members.insert(info.id.clone(), info);
    }

    /// Remove a member, returning its last known info.
    pub fn remove(&mut self, id: &NodeId) -> Option<MemberInfo> {
        self.members.remove(id)
    }

    /// Lookup one member.
    pub fn get(&self, id: &NodeId) -> Option<&MemberInfo> {
        self.members.get(id)
    }

    /// Whether a node is a known member.
    pub fn contains(&self, id: &NodeId) -> bool {
        self.members.contains_key(id)
    }

    /// Number of known members.
    pub fn count(&self) -> usize {
        self.members.len()
    }

    /// All member ids, sorted for deterministic iteration.
    pub fn member_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.members.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// All members currently online, sorted by id.
    pub fn online_members(&self) -> Vec<MemberInfo> {
        let mut members: Vec<MemberInfo> = self
            .members
            .values()
            .filter(|m| m.status == MemberStatus::Online)
            .cloned()
            .collect();
        members.sort_by(|a, b| a.id.cmp(&b.id));
        members
    }

    /// Record a heartbeat from a member.
    pub fn heartbeat(&mut self, id: &NodeId) {
        if let Some(member) = self.members.get_mut(id) {
            member.last_heartbeat = unix_millis();
            if member.status == MemberStatus::Offline {
                member.status = MemberStatus::Online;
            }
        }
    }

    /// Record a heartbeat at an explicit timestamp (tests, remote sync).
    pub fn heartbeat_at(&mut self, id: &NodeId, timestamp: u64) {
        if let Some(member) = self.members.get_mut(id) {
            member.last_heartbeat = timestamp;
        }
    }

    /// Set a member's status.
    pub fn set_status(&mut self, id: &NodeId, status: MemberStatus) {
        if let Some(member) = self.members.get_mut(id) {
            member.status = status;
        }
    }

    /// Mark members outside the heartbeat window offline; returns them.
    pub fn check_dead_members(&mut self) -> Vec<NodeId> {
        let now = unix_millis();
        let timeout = self.heartbeat_timeout_ms;
        let mut dead = Vec::new();
        for (id, member) in self.members.iter_mut() {
            if member.status == MemberStatus::Online
                && now.saturating_sub(member.last_heartbeat) > timeout
            {
                member.status = MemberStatus::Offline;
                dead.push(id.clone());
            }
        }
        dead.sort();
        dead
    }
}
