// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Membership error taxonomy.
//!
//! Every failure surfaced by [`crate::MembershipManager::connect`] is a
//! [`MembershipError`]. Callers decide on a retry policy by inspecting
//! [`MembershipError::kind`] rather than matching individual variants.

use std::fmt;

use thiserror::Error;

use crate::coordination::CoordinationError;

/// Coarse categories used to decide what a caller should do about a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Configuration must be fixed before retrying.
    Configuration,
    /// The runtime environment (host name lookup) failed.
    Environment,
    /// The presence record could not be serialised. Indicates a defect.
    Encoding,
    /// Session or node operation against the coordination service failed.
    Coordination,
    /// The bootstrap schema fetch failed.
    SchemaSync,
    /// Lifecycle call made in the wrong state.
    Lifecycle,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Configuration => write!(f, "Configuration"),
            ErrorKind::Environment => write!(f, "Environment"),
            ErrorKind::Encoding => write!(f, "Encoding"),
            ErrorKind::Coordination => write!(f, "Coordination"),
            ErrorKind::SchemaSync => write!(f, "SchemaSync"),
            ErrorKind::Lifecycle => write!(f, "Lifecycle"),
        }
    }
}

#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("invalid instance name: cluster.instance_name must not be empty")]
    InvalidInstanceName,

    #[error("invalid {field} '{value}': must be non-empty and must not contain '/'")]
    InvalidPathSegment { field: &'static str, value: String },

    #[error("invalid membership configuration")]
    InvalidConfig(#[source] validator::ValidationErrors),

    #[error("membership manager is already connected")]
    AlreadyConnected,

    #[error("failed to resolve local host name")]
    HostResolution(#[source] std::io::Error),

    #[error("failed to encode presence record")]
    Encoding(#[source] serde_json::Error),

    #[error("failed to open coordination session")]
    Connect(#[source] CoordinationError),

    #[error("instance node already exists at {path}")]
    NodeExists { path: String },

    #[error("coordination service request failed")]
    Coordination(#[source] CoordinationError),

    #[error("bootstrap schema sync failed")]
    SchemaSync(#[source] anyhow::Error),
}

impl MembershipError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MembershipError::InvalidInstanceName
            | MembershipError::InvalidPathSegment { .. }
            | MembershipError::InvalidConfig(_) => ErrorKind::Configuration,
            MembershipError::AlreadyConnected => ErrorKind::Lifecycle,
            MembershipError::HostResolution(_) => ErrorKind::Environment,
            MembershipError::Encoding(_) => ErrorKind::Encoding,
            MembershipError::Connect(_)
            | MembershipError::NodeExists { .. }
            | MembershipError::Coordination(_) => ErrorKind::Coordination,
            MembershipError::SchemaSync(_) => ErrorKind::SchemaSync,
        }
    }

    /// Session or node failures other than a name collision may clear up on
    /// their own; everything else needs an operator.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MembershipError::Connect(_)
                | MembershipError::Coordination(_)
                | MembershipError::SchemaSync(_)
        )
    }
}
