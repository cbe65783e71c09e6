// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Coordination service abstraction.
//!
//! Membership needs exactly two capabilities from the coordination service:
//! create a node bound to the session lifetime, and close the session. Both
//! backends ([`etcd`] and [`memory`]) implement [`SessionConnector`] and
//! [`CoordinationSession`] so the manager is backend agnostic.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod etcd;
pub mod memory;

pub use etcd::{EtcdConnector, EtcdSession};
pub use memory::{MemoryCoordinator, MemorySession};

/// Access control applied to a created node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeAcl {
    /// Anyone may read, write, create children, delete and administer.
    #[default]
    Open,
}

#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("node already exists: {path}")]
    NodeExists { path: String },

    #[error("session is closed or expired")]
    SessionClosed,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("no coordination endpoints configured")]
    NoEndpoints,

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// A live session with the coordination service.
#[async_trait]
pub trait CoordinationSession: Send + Sync {
    /// Backend identifier for the session (lease id, session number).
    fn session_id(&self) -> String;

    /// Creates `path` holding `data`, removed automatically when the session
    /// ends. Fails with [`CoordinationError::NodeExists`] if the path is taken.
    async fn create_ephemeral(
        &self,
        path: &str,
        data: Vec<u8>,
        acl: NodeAcl,
    ) -> Result<(), CoordinationError>;

    /// Ends the session, releasing every ephemeral node it owns. Closing an
    /// already closed session succeeds.
    async fn close(&self) -> Result<(), CoordinationError>;

    /// True once the service has dropped the session (e.g. missed renewals).
    fn is_expired(&self) -> bool;
}

/// Opens sessions against a coordination service.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(
        &self,
        endpoints: &[String],
        timeout: Duration,
    ) -> Result<Box<dyn CoordinationSession>, CoordinationError>;
}
