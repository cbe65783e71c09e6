// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! etcd coordination backend.
//!
//! A session is an etcd lease kept alive by a background task. Ephemeral
//! nodes are keys attached to that lease, created with a transaction that only
//! succeeds if the key has never been written (`create_revision == 0`).
//! Revoking the lease deletes every key attached to it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use etcd_client::{
    Client, Compare, CompareOp, ConnectOptions, LeaseKeepAliveStream, LeaseKeeper, PutOptions, Txn,
    TxnOp,
};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{CoordinationError, CoordinationSession, NodeAcl, SessionConnector};
use crate::config::CoordinationConfig;

/// Lower bound on the renewal period.
const MIN_KEEP_ALIVE_PERIOD: Duration = Duration::from_millis(500);

/// Opens lease-backed sessions against an etcd cluster.
#[derive(Debug, Clone)]
pub struct EtcdConnector {
    session_ttl: Duration,
}

impl EtcdConnector {
    pub fn new(session_ttl: Duration) -> Self {
        Self { session_ttl }
    }

    pub fn from_config(config: &CoordinationConfig) -> Self {
        Self::new(config.session_ttl())
    }
}

#[async_trait]
impl SessionConnector for EtcdConnector {
    async fn connect(
        &self,
        endpoints: &[String],
        timeout: Duration,
    ) -> Result<Box<dyn CoordinationSession>, CoordinationError> {
        if endpoints.is_empty() {
            return Err(CoordinationError::NoEndpoints);
        }

        let options = ConnectOptions::new()
            .with_connect_timeout(timeout)
            .with_timeout(timeout);

        let client = tokio::time::timeout(
            timeout,
            Client::connect(endpoints.to_vec(), Some(options)),
        )
        .await
        .map_err(|_| CoordinationError::Timeout(timeout))?
        .with_context(|| {
            format!(
                "Unable to connect to etcd server at {}. Check etcd server status",
                endpoints.join(", ")
            )
        })?;

        let session = EtcdSession::open(client, self.session_ttl).await?;
        Ok(Box::new(session))
    }
}

/// Lease-backed etcd session.
pub struct EtcdSession {
    client: Client,
    lease_id: i64,
    cancel_token: CancellationToken,
    expired: Arc<AtomicBool>,
    closed: AtomicBool,
    keep_alive: Mutex<Option<JoinHandle<()>>>,
}

impl EtcdSession {
    async fn open(mut client: Client, ttl: Duration) -> Result<Self, CoordinationError> {
        let ttl_secs = ttl.as_secs() as i64;
        let lease = client
            .lease_grant(ttl_secs, None)
            .await
            .context("Failed to create session lease")?;
        let lease_id = lease.id();

        tracing::info!(lease_id, ttl_secs, "Opened etcd session");

        let cancel_token = CancellationToken::new();
        let expired = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(keep_alive_loop(
            client.clone(),
            lease_id,
            ttl,
            cancel_token.clone(),
            expired.clone(),
        ));

        Ok(Self {
            client,
            lease_id,
            cancel_token,
            expired,
            closed: AtomicBool::new(false),
            keep_alive: Mutex::new(Some(handle)),
        })
    }

    pub fn lease_id(&self) -> i64 {
        self.lease_id
    }
}

#[async_trait]
impl CoordinationSession for EtcdSession {
    fn session_id(&self) -> String {
        format!("{:x}", self.lease_id)
    }

    async fn create_ephemeral(
        &self,
        path: &str,
        data: Vec<u8>,
        acl: NodeAcl,
    ) -> Result<(), CoordinationError> {
        if self.closed.load(Ordering::Acquire) || self.is_expired() {
            return Err(CoordinationError::SessionClosed);
        }
        // etcd has no per-key ACLs; an open ACL is the only mode and needs no setup.
        match acl {
            NodeAcl::Open => {}
        }

        let txn = Txn::new()
            .when(vec![Compare::create_revision(path, CompareOp::Equal, 0)])
            .and_then(vec![TxnOp::put(
                path,
                data,
                Some(PutOptions::new().with_lease(self.lease_id)),
            )]);

        let mut client = self.client.clone();
        let resp = client
            .txn(txn)
            .await
            .with_context(|| format!("Failed to create node {path}"))?;

        if !resp.succeeded() {
            return Err(CoordinationError::NodeExists {
                path: path.to_string(),
            });
        }

        tracing::debug!(path, lease_id = self.lease_id, "Created ephemeral node");
        Ok(())
    }

    async fn close(&self) -> Result<(), CoordinationError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.cancel_token.cancel();
        let handle = self.keep_alive.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Lease keep-alive task ended abnormally");
            }
        }

        if self.is_expired() {
            tracing::debug!(lease_id = self.lease_id, "Lease already expired, skipping revoke");
            return Ok(());
        }

        let mut client = self.client.clone();
        client
            .lease_revoke(self.lease_id)
            .await
            .with_context(|| format!("Failed to revoke lease {}", self.lease_id))?;

        tracing::info!(lease_id = self.lease_id, "Closed etcd session");
        Ok(())
    }

    fn is_expired(&self) -> bool {
        self.expired.load(Ordering::Acquire)
    }
}

impl Drop for EtcdSession {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Renewal period: a third of the TTL, never below [`MIN_KEEP_ALIVE_PERIOD`].
fn keep_alive_period(ttl: Duration) -> Duration {
    std::cmp::max(ttl / 3, MIN_KEEP_ALIVE_PERIOD)
}

async fn keep_alive_loop(
    mut client: Client,
    lease_id: i64,
    ttl: Duration,
    cancel_token: CancellationToken,
    expired: Arc<AtomicBool>,
) {
    let (keeper, stream) = match client.lease_keep_alive(lease_id).await {
        Ok(pair) => pair,
        Err(e) => {
            tracing::error!(lease_id, error = %e, "Failed to start lease keep-alive");
            expired.store(true, Ordering::Release);
            return;
        }
    };

    let renewal = EtcdLeaseRenewal { keeper, stream };
    renew_until_cancelled(renewal, lease_id, ttl, cancel_token, expired).await;
}

/// One keep-alive round trip against the coordination service.
#[async_trait]
trait LeaseRenewal: Send {
    /// Returns the TTL in seconds the server granted; zero means the lease is gone.
    async fn renew(&mut self) -> crate::Result<i64>;
}

struct EtcdLeaseRenewal {
    keeper: LeaseKeeper,
    stream: LeaseKeepAliveStream,
}

#[async_trait]
impl LeaseRenewal for EtcdLeaseRenewal {
    async fn renew(&mut self) -> crate::Result<i64> {
        self.keeper
            .keep_alive()
            .await
            .context("keep-alive request failed")?;
        match self
            .stream
            .message()
            .await
            .context("keep-alive response failed")?
        {
            Some(resp) => Ok(resp.ttl()),
            None => crate::raise!("keep-alive stream closed"),
        }
    }
}

/// Renews every `ttl / 3` until cancelled.
///
/// Each round trip is bounded by the renewal period and can be interrupted by
/// the cancel token. A round trip that times out is retried on the next tick;
/// once no renewal has succeeded for a full TTL the lease is considered lost.
async fn renew_until_cancelled<R: LeaseRenewal>(
    mut renewal: R,
    lease_id: i64,
    ttl: Duration,
    cancel_token: CancellationToken,
    expired: Arc<AtomicBool>,
) {
    let period = keep_alive_period(ttl);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_renewed = Instant::now();

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            r = tokio::time::timeout(period, renewal.renew()) => r,
        };

        match result {
            Ok(Ok(granted)) if granted > 0 => {
                last_renewed = Instant::now();
                tracing::trace!(lease_id, ttl = granted, "Lease renewed");
            }
            Ok(Ok(_)) => {
                tracing::error!(lease_id, "Lease expired; presence has been lost");
                break;
            }
            Ok(Err(e)) => {
                tracing::error!(lease_id, error = %format!("{e:#}"), "Lease keep-alive failed");
                break;
            }
            Err(_) if last_renewed.elapsed() >= ttl => {
                tracing::error!(lease_id, ?ttl, "No lease renewal within TTL; presence has been lost");
                break;
            }
            Err(_) => {
                tracing::warn!(lease_id, timeout = ?period, "Lease keep-alive timed out, retrying");
            }
        }
    }

    if !cancel_token.is_cancelled() {
        expired.store(true, Ordering::Release);
    }
}
