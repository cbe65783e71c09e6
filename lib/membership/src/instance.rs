// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Presence record and the coordination paths derived from cluster identity.

use serde::{Deserialize, Serialize};

use crate::error::MembershipError;

/// Root of every path this crate writes in the coordination service
pub const CONTROLLER_ROOT: &str = "/ares_controller";

const PATH_SEPARATOR: char = '/';

/// Identity record published as the payload of the presence node.
///
/// Serialised as `{"Name": ..., "Host": ..., "Port": ...}`. There is no
/// version field; readers across the cluster depend on this exact shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Instance {
    pub name: String,
    pub host: String,
    pub port: u16,
}

impl Instance {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// `(cluster_name, instance_name)` pair scoping presence and schema sync.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClusterIdentity {
    cluster_name: String,
    instance_name: String,
}

impl ClusterIdentity {
    pub fn new(cluster_name: impl Into<String>, instance_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            instance_name: instance_name.into(),
        }
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    /// Checks the identity can be turned into a presence path.
    ///
    /// An empty instance name is reported as [`MembershipError::InvalidInstanceName`];
    /// any other unusable segment as [`MembershipError::InvalidPathSegment`].
    pub fn validate(&self) -> Result<(), MembershipError> {
        if self.instance_name.is_empty() {
            return Err(MembershipError::InvalidInstanceName);
        }
        validate_path_segment("instance_name", &self.instance_name)?;
        validate_path_segment("cluster_name", &self.cluster_name)
    }

    /// Path of this instance's presence node.
    pub fn instance_path(&self) -> String {
        instance_path(&self.cluster_name, &self.instance_name)
    }
}

/// Parent of all presence nodes of a cluster.
pub fn instances_path(cluster_name: &str) -> String {
    format!("{CONTROLLER_ROOT}/{cluster_name}/instances")
}

/// `/ares_controller/{cluster_name}/instances/{instance_name}`
pub fn instance_path(cluster_name: &str, instance_name: &str) -> String {
    format!("{}/{}", instances_path(cluster_name), instance_name)
}

fn validate_path_segment(field: &'static str, value: &str) -> Result<(), MembershipError> {
    if value.is_empty() || value.contains(PATH_SEPARATOR) {
        return Err(MembershipError::InvalidPathSegment {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Resolves the host name published in the presence record.
pub trait HostResolver: Send + Sync {
    fn host_name(&self) -> std::io::Result<String>;
}

/// Resolves the host name from the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHostResolver;

impl HostResolver for SystemHostResolver {
    fn host_name(&self) -> std::io::Result<String> {
        hostname::get()?.into_string().map_err(|raw| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("host name is not valid UTF-8: {raw:?}"),
            )
        })
    }
}

/// Always returns the same host name. Useful when the published host must be
/// pinned (containers with generated host names, tests).
#[derive(Debug, Clone)]
pub struct StaticHostResolver(String);

impl StaticHostResolver {
    pub fn new(host: impl Into<String>) -> Self {
        Self(host.into())
    }
}

impl HostResolver for StaticHostResolver {
    fn host_name(&self) -> std::io::Result<String> {
        Ok(self.0.clone())
    }
}
