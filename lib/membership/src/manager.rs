// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The [`MembershipManager`] joins this node to a cluster and leaves it again.
//!
//! Joining opens a coordination session, publishes the presence record as an
//! ephemeral node, applies the cluster schema once and then keeps it in sync
//! from a background task. Leaving closes the session (which removes the
//! presence record) and stops that task.
//!
//! Lifecycle calls take `&mut self`, so they cannot overlap on one manager.
//! There is no automatic reconnection: if the session expires the manager
//! keeps reporting [`MembershipState::Connected`] until the caller notices
//! [`MembershipManager::session_expired`] and runs `disconnect` + `connect`.

use std::sync::Arc;

use derive_builder::Builder;
use validator::Validate;

use crate::config::MembershipConfig;
use crate::coordination::{CoordinationError, CoordinationSession, NodeAcl, SessionConnector};
use crate::error::MembershipError;
use crate::instance::{ClusterIdentity, HostResolver, Instance, SystemHostResolver};
use crate::schema::{
    LocalSchemaStore, SchemaSource, SchemaSyncTask, SchemaValidator, TableSchemaValidator,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MembershipState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Owns at most one coordination session and at most one schema sync task.
///
/// # Example
///
/// ```rust,ignore
/// let mut manager = MembershipManager::builder()
///     .config(config.clone())
///     .connector(Arc::new(EtcdConnector::from_config(&config.coordination)))
///     .schema_source(source)
///     .schema_store(store)
///     .build()?;
///
/// manager.connect().await?;
/// // serve traffic
/// manager.disconnect().await;
/// ```
#[derive(Builder)]
#[builder(pattern = "owned")]
pub struct MembershipManager {
    config: MembershipConfig,

    connector: Arc<dyn SessionConnector>,

    schema_source: Arc<dyn SchemaSource>,

    schema_store: Arc<dyn LocalSchemaStore>,

    #[builder(default = "Arc::new(TableSchemaValidator) as Arc<dyn SchemaValidator>")]
    schema_validator: Arc<dyn SchemaValidator>,

    #[builder(default = "Arc::new(SystemHostResolver) as Arc<dyn HostResolver>")]
    host_resolver: Arc<dyn HostResolver>,

    #[builder(setter(skip))]
    session: Option<Box<dyn CoordinationSession>>,

    #[builder(setter(skip))]
    schema_sync: Option<Arc<SchemaSyncTask>>,

    #[builder(setter(skip))]
    state: MembershipState,
}

impl MembershipManager {
    pub fn builder() -> MembershipManagerBuilder {
        MembershipManagerBuilder::default()
    }

    pub fn config(&self) -> &MembershipConfig {
        &self.config
    }

    pub fn identity(&self) -> ClusterIdentity {
        self.config.identity()
    }

    pub fn state(&self) -> MembershipState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == MembershipState::Connected
    }

    pub fn session_id(&self) -> Option<String> {
        self.session.as_ref().map(|s| s.session_id())
    }

    /// True if a session is held but the coordination service has dropped it;
    /// the presence record is gone and the caller should reconnect.
    pub fn session_expired(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_expired())
    }

    /// Joins the cluster.
    ///
    /// Fails without touching the coordination service if the identity or
    /// the configuration is unusable. On any later failure the steps already taken are left in
    /// place (e.g. an open session); call [`Self::disconnect`] to clean up.
    /// Returns once the presence node exists and the schema has been applied
    /// once; periodic sync continues in the background.
    pub async fn connect(&mut self) -> Result<(), MembershipError> {
        if self.schema_sync.is_some() {
            return Err(MembershipError::AlreadyConnected);
        }

        let identity = self.identity();
        identity.validate()?;
        self.config
            .validate()
            .map_err(MembershipError::InvalidConfig)?;

        self.state = MembershipState::Connecting;
        let result = self.join(&identity).await;
        self.state = match result {
            Ok(()) => MembershipState::Connected,
            Err(_) => MembershipState::Disconnected,
        };

        if let Err(e) = &result {
            tracing::warn!(
                cluster = identity.cluster_name(),
                instance = identity.instance_name(),
                kind = %e.kind(),
                error = %e,
                "Failed to join cluster"
            );
        }
        result
    }

    async fn join(&mut self, identity: &ClusterIdentity) -> Result<(), MembershipError> {
        self.ensure_session().await?;
        let Some(session) = self.session.as_deref() else {
            return Err(MembershipError::Coordination(CoordinationError::SessionClosed));
        };

        let host = self
            .host_resolver
            .host_name()
            .map_err(MembershipError::HostResolution)?;
        let instance = Instance::new(identity.instance_name(), host, self.config.port);
        let payload = instance.to_bytes().map_err(MembershipError::Encoding)?;

        let path = identity.instance_path();
        session
            .create_ephemeral(&path, payload, NodeAcl::Open)
            .await
            .map_err(|e| match e {
                CoordinationError::NodeExists { path } => MembershipError::NodeExists { path },
                other => MembershipError::Coordination(other),
            })?;

        tracing::info!(
            %path,
            host = %instance.host,
            port = instance.port,
            session_id = %session.session_id(),
            "Published instance presence"
        );

        let task = Arc::new(SchemaSyncTask::new(
            identity.cluster_name(),
            self.schema_source.clone(),
            self.schema_validator.clone(),
            self.schema_store.clone(),
            self.config.schema_sync.interval(),
        ));
        task.fetch_apply_schema(true)
            .await
            .map_err(MembershipError::SchemaSync)?;
        task.start();
        self.schema_sync = Some(task);

        tracing::info!(
            cluster = identity.cluster_name(),
            instance = identity.instance_name(),
            "Joined cluster"
        );
        Ok(())
    }

    /// Opens a session unless a live one is already held. An expired session
    /// is replaced.
    async fn ensure_session(&mut self) -> Result<(), MembershipError> {
        if let Some(session) = &self.session {
            if !session.is_expired() {
                return Ok(());
            }
            tracing::warn!(
                session_id = %session.session_id(),
                "Coordination session expired, opening a new one"
            );
            self.session = None;
        }

        let endpoints = self.config.coordination.endpoint_list();
        let timeout = self.config.coordination.timeout();
        let session = self
            .connector
            .connect(&endpoints, timeout)
            .await
            .map_err(MembershipError::Connect)?;

        tracing::debug!(session_id = %session.session_id(), endpoints = ?endpoints, "Opened coordination session");
        self.session = Some(session);
        Ok(())
    }

    /// Leaves the cluster: closes the session, then stops schema sync.
    ///
    /// Never fails; problems are logged. Safe before `connect` and when called
    /// more than once.
    pub async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            match session.close().await {
                Ok(()) => tracing::info!(session_id = %session.session_id(), "Closed coordination session"),
                Err(e) => tracing::warn!(session_id = %session.session_id(), error = %e, "Failed to close coordination session"),
            }
        }

        if let Some(task) = self.schema_sync.take() {
            task.stop().await;
        }

        self.state = MembershipState::Disconnected;
    }
}

impl Drop for MembershipManager {
    fn drop(&mut self) {
        if let Some(task) = &self.schema_sync {
            task.cancel();
        }
    }
}
