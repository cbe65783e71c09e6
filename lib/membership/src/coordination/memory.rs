// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! In-process coordination backend.
//!
//! All sessions opened from one [`MemoryCoordinator`] (and its clones) share a
//! node tree, so several managers in one process can observe each other. Used
//! for tests and single-process deployments.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{CoordinationError, CoordinationSession, NodeAcl, SessionConnector};

#[derive(Debug, Clone)]
struct MemoryNode {
    data: Vec<u8>,
    owner: u64,
    acl: NodeAcl,
}

#[derive(Debug, Default)]
struct Registry {
    nodes: BTreeMap<String, MemoryNode>,
    live_sessions: HashSet<u64>,
    next_session_id: u64,
    connect_attempts: usize,
    last_endpoints: Vec<String>,
    refuse_connections: bool,
}

impl Registry {
    fn release(&mut self, session_id: u64) -> bool {
        let was_live = self.live_sessions.remove(&session_id);
        self.nodes.retain(|_, node| node.owner != session_id);
        was_live
    }
}

/// Shared in-memory coordination service.
#[derive(Debug, Clone, Default)]
pub struct MemoryCoordinator {
    registry: Arc<Mutex<Registry>>,
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent `connect` calls fail, simulating an unreachable service.
    pub fn refuse_connections(&self, refuse: bool) {
        self.registry.lock().refuse_connections = refuse;
    }

    /// Payload of the node at `path`, if present.
    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.registry.lock().nodes.get(path).map(|n| n.data.clone())
    }

    /// Access control the node at `path` was created with.
    pub fn node_acl(&self, path: &str) -> Option<NodeAcl> {
        self.registry.lock().nodes.get(path).map(|n| n.acl)
    }

    /// Names of the direct children of `path`.
    pub fn children(&self, path: &str) -> Vec<String> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        self.registry
            .lock()
            .nodes
            .keys()
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter(|rest| !rest.is_empty() && !rest.contains('/'))
            .map(str::to_string)
            .collect()
    }

    /// Number of `connect` calls seen, successful or not.
    pub fn connect_attempts(&self) -> usize {
        self.registry.lock().connect_attempts
    }

    pub fn last_endpoints(&self) -> Vec<String> {
        self.registry.lock().last_endpoints.clone()
    }

    pub fn live_sessions(&self) -> usize {
        self.registry.lock().live_sessions.len()
    }

    /// Drops a session as if it had missed its renewals: its nodes disappear
    /// and the session reports itself expired.
    pub fn expire_session(&self, session_id: &str) -> bool {
        match session_id.parse::<u64>() {
            Ok(id) => self.registry.lock().release(id),
            Err(_) => false,
        }
    }

    fn open_session(&self) -> MemorySession {
        let mut registry = self.registry.lock();
        registry.next_session_id += 1;
        let id = registry.next_session_id;
        registry.live_sessions.insert(id);
        MemorySession {
            id,
            coordinator: self.clone(),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl SessionConnector for MemoryCoordinator {
    async fn connect(
        &self,
        endpoints: &[String],
        timeout: Duration,
    ) -> Result<Box<dyn CoordinationSession>, CoordinationError> {
        {
            let mut registry = self.registry.lock();
            registry.connect_attempts += 1;
            registry.last_endpoints = endpoints.to_vec();
            if registry.refuse_connections {
                return Err(CoordinationError::Timeout(timeout));
            }
        }
        if endpoints.is_empty() {
            return Err(CoordinationError::NoEndpoints);
        }

        let session = self.open_session();
        tracing::debug!(session_id = session.id, "Opened in-memory session");
        Ok(Box::new(session))
    }
}

/// Session handed out by [`MemoryCoordinator`].
#[derive(Debug)]
pub struct MemorySession {
    id: u64,
    coordinator: MemoryCoordinator,
    closed: AtomicBool,
}

#[async_trait]
impl CoordinationSession for MemorySession {
    fn session_id(&self) -> String {
        self.id.to_string()
    }

    async fn create_ephemeral(
        &self,
        path: &str,
        data: Vec<u8>,
        acl: NodeAcl,
    ) -> Result<(), CoordinationError> {
        let mut registry = self.coordinator.registry.lock();
        if self.closed.load(Ordering::Acquire) || !registry.live_sessions.contains(&self.id) {
            return Err(CoordinationError::SessionClosed);
        }
        if registry.nodes.contains_key(path) {
            return Err(CoordinationError::NodeExists {
                path: path.to_string(),
            });
        }
        registry.nodes.insert(
            path.to_string(),
            MemoryNode {
                data,
                owner: self.id,
                acl,
            },
        );
        Ok(())
    }

    async fn close(&self) -> Result<(), CoordinationError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.coordinator.registry.lock().release(self.id);
        tracing::debug!(session_id = self.id, "Closed in-memory session");
        Ok(())
    }

    fn is_expired(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
            && !self.coordinator.registry.lock().live_sessions.contains(&self.id)
    }
}
