// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Ares cluster membership.
//!
//! A data-serving node uses this crate to announce itself to a cluster and to
//! keep its local table schemas in step with the cluster-wide definitions.
//!
//! - [`MembershipManager`] opens a coordination session, publishes an ephemeral
//!   presence record at `/ares_controller/{cluster}/instances/{instance}` and
//!   owns the background schema sync task.
//! - [`schema::SchemaSyncTask`] fetches the cluster schema, validates it and
//!   applies the difference to the local schema store on a fixed interval.
//! - [`coordination`] abstracts the coordination service behind
//!   [`coordination::SessionConnector`] and [`coordination::CoordinationSession`],
//!   with an etcd backend and an in-memory backend.

pub use anyhow::{
    anyhow as error, bail as raise, Context as ErrorContext, Error, Ok as OK, Result,
};

pub mod config;
pub mod coordination;
pub mod error;
pub mod instance;
pub mod logging;
pub mod manager;
pub mod schema;

pub use config::{ConfigError, MembershipConfig};
pub use error::{ErrorKind, MembershipError};
pub use instance::{ClusterIdentity, HostResolver, Instance, SystemHostResolver};
pub use manager::{MembershipManager, MembershipManagerBuilder, MembershipState};
pub use tokio_util::sync::CancellationToken;
