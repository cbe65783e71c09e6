// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Periodic schema synchronisation.
//!
//! [`SchemaSyncTask::fetch_apply_schema`] runs one cycle: fetch the cluster
//! schema hash, and if it moved since the last clean cycle fetch every table,
//! validate it and create, update or delete local tables to match.
//! [`SchemaSyncTask::start`] runs the cycle on a fixed interval in a tokio task
//! until [`SchemaSyncTask::stop`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{LocalSchemaStore, SchemaSource, SchemaValidator, Table};
use crate::{ErrorContext, Result};

/// A table that could not be applied during a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableFailure {
    pub table: String,
    pub error: String,
}

/// Outcome of one fetch-and-apply cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// The schema hash was unchanged and nothing was fetched.
    pub skipped: bool,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub failed: Vec<TableFailure>,
}

impl SyncReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Default::default()
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn changes(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

/// Shortest loop period; a zero interval is raised to this.
pub const MIN_SYNC_INTERVAL: Duration = Duration::from_secs(1);

/// Fetches the cluster schema and applies it to the local store.
pub struct SchemaSyncTask {
    cluster_name: String,
    source: Arc<dyn SchemaSource>,
    validator: Arc<dyn SchemaValidator>,
    store: Arc<dyn LocalSchemaStore>,
    interval: Duration,
    last_hash: Mutex<Option<String>>,
    cancel_token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SchemaSyncTask {
    pub fn new(
        cluster_name: impl Into<String>,
        source: Arc<dyn SchemaSource>,
        validator: Arc<dyn SchemaValidator>,
        store: Arc<dyn LocalSchemaStore>,
        interval: Duration,
    ) -> Self {
        let cluster_name = cluster_name.into();
        if interval < MIN_SYNC_INTERVAL {
            tracing::warn!(cluster = %cluster_name, ?interval, min = ?MIN_SYNC_INTERVAL, "Schema sync interval too short, clamping");
        }
        Self {
            cluster_name,
            source,
            validator,
            store,
            interval: interval.max(MIN_SYNC_INTERVAL),
            last_hash: Mutex::new(None),
            cancel_token: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// True while the background loop is running.
    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Runs one fetch-validate-apply cycle.
    ///
    /// `initial` marks the bootstrap call made while joining the cluster and
    /// only affects logging. Fetch failures are returned. Per-table validation or apply failures are
    /// collected in the report; the hash is only remembered after a clean cycle
    /// so failed tables are retried next time.
    pub async fn fetch_apply_schema(&self, initial: bool) -> Result<SyncReport> {
        let hash = self
            .source
            .schema_hash(&self.cluster_name)
            .await
            .with_context(|| format!("failed to fetch schema hash for cluster {}", self.cluster_name))?;

        if self.last_hash.lock().as_deref() == Some(hash.as_str()) {
            tracing::trace!(cluster = %self.cluster_name, %hash, "Schema unchanged");
            return Ok(SyncReport::skipped());
        }

        let remote = self
            .source
            .tables(&self.cluster_name)
            .await
            .with_context(|| format!("failed to fetch tables for cluster {}", self.cluster_name))?;
        let local = self
            .store
            .list_tables()
            .await
            .context("failed to list local tables")?;

        let report = self.apply(remote, local).await;

        if report.is_clean() {
            *self.last_hash.lock() = Some(hash.clone());
        }

        if initial {
            tracing::info!(
                cluster = %self.cluster_name,
                %hash,
                created = report.created,
                updated = report.updated,
                deleted = report.deleted,
                failed = report.failed.len(),
                "Bootstrap schema sync complete"
            );
        } else if report.changes() > 0 || !report.is_clean() {
            tracing::info!(
                cluster = %self.cluster_name,
                %hash,
                created = report.created,
                updated = report.updated,
                deleted = report.deleted,
                failed = report.failed.len(),
                "Applied schema changes"
            );
        }

        Ok(report)
    }

    async fn apply(&self, remote: Vec<Table>, local: Vec<Table>) -> SyncReport {
        let mut report = SyncReport::default();
        let local: HashMap<String, Table> =
            local.into_iter().map(|t| (t.name.clone(), t)).collect();
        let mut remote_names = HashSet::with_capacity(remote.len());

        for table in remote {
            remote_names.insert(table.name.clone());
            let name = table.name.clone();

            let result = match local.get(&name) {
                Some(existing) if existing == &table => {
                    report.unchanged += 1;
                    continue;
                }
                Some(existing) => self.update(table, existing).await.map(|_| report.updated += 1),
                None => self.create(table).await.map(|_| report.created += 1),
            };

            if let Err(e) = result {
                tracing::warn!(cluster = %self.cluster_name, table = %name, error = %format!("{e:#}"), "Failed to apply table schema");
                report.failed.push(TableFailure {
                    table: name,
                    error: format!("{e:#}"),
                });
            }
        }

        for name in local.keys().filter(|name| !remote_names.contains(*name)) {
            match self.store.delete_table(name).await {
                Ok(()) => report.deleted += 1,
                Err(e) => {
                    tracing::warn!(cluster = %self.cluster_name, table = %name, error = %format!("{e:#}"), "Failed to delete table");
                    report.failed.push(TableFailure {
                        table: name.clone(),
                        error: format!("{e:#}"),
                    });
                }
            }
        }

        report
    }

    async fn create(&self, table: Table) -> Result<()> {
        self.validator.validate(&table, None)?;
        tracing::debug!(table = %table.name, "Creating table");
        self.store.create_table(table).await
    }

    async fn update(&self, table: Table, existing: &Table) -> Result<()> {
        self.validator.validate(&table, Some(existing))?;
        tracing::debug!(table = %table.name, version = table.version, "Updating table");
        self.store.update_table(table).await
    }

    /// Loops over [`Self::fetch_apply_schema`] every interval until stopped.
    /// Failed cycles are logged and the loop carries on.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!(cluster = %self.cluster_name, interval = ?self.interval, "Schema sync loop started");

        loop {
            tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.fetch_apply_schema(false).await {
                        tracing::warn!(cluster = %self.cluster_name, error = %format!("{e:#}"), "Schema sync failed, will retry");
                    }
                }
            }
        }

        tracing::debug!(cluster = %self.cluster_name, "Schema sync loop stopped");
    }

    /// Spawns [`Self::run`] on the current tokio runtime. Returns false if the
    /// loop was already started.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return false;
        }
        let task = self.clone();
        *handle = Some(tokio::spawn(async move { task.run().await }));
        true
    }

    /// Signals the loop to exit without waiting for it.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Signals the loop to exit and waits for the in-flight cycle, if any, to
    /// finish. Safe to call repeatedly and before [`Self::start`].
    pub async fn stop(&self) {
        self.cancel_token.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(cluster = %self.cluster_name, error = %e, "Schema sync task ended abnormally");
            }
        }
    }
}

impl std::fmt::Debug for SchemaSyncTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaSyncTask")
            .field("cluster_name", &self.cluster_name)
            .field("interval", &self.interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, MemorySchemaSource, MemorySchemaStore, TableSchemaValidator};

    const INTERVAL: Duration = Duration::from_secs(10);

    fn table(name: &str) -> Table {
        Table::new(
            name,
            vec![Column::new("id", "UUID"), Column::new("value", "Int32")],
            vec![0],
        )
    }

    fn task(source: &MemorySchemaSource, store: &MemorySchemaStore) -> Arc<SchemaSyncTask> {
        Arc::new(SchemaSyncTask::new(
            "c1",
            Arc::new(source.clone()),
            Arc::new(TableSchemaValidator),
            Arc::new(store.clone()),
            INTERVAL,
        ))
    }

    #[tokio::test]
    async fn test_creates_updates_and_deletes() {
        let source = MemorySchemaSource::new();
        let store = MemorySchemaStore::with_tables([table("stale"), table("drivers")]);

        let mut drivers = table("drivers");
        drivers.columns.push(Column::new("rating", "Float32"));
        drivers.version = 1;
        source.set_tables("c1", vec![table("trips"), drivers.clone()]);

        let report = task(&source, &store).fetch_apply_schema(true).await.unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(report.deleted, 1);
        assert!(report.is_clean());
        assert_eq!(store.table_names(), vec!["drivers", "trips"]);
        assert_eq!(store.table("drivers"), Some(drivers));
    }

    #[tokio::test]
    async fn test_unchanged_hash_is_skipped() {
        let source = MemorySchemaSource::new();
        let store = MemorySchemaStore::new();
        source.set_tables("c1", vec![table("trips")]);
        let task = task(&source, &store);

        let report = task.fetch_apply_schema(true).await.unwrap();
        assert!(!report.skipped);
        assert_eq!(report.created, 1);

        let report = task.fetch_apply_schema(false).await.unwrap();
        assert!(report.skipped);

        // the bootstrap flag does not bypass the hash check
        let report = task.fetch_apply_schema(true).await.unwrap();
        assert!(report.skipped);
        assert_eq!(source.table_fetches(), 1);

        source.set_tables("c1", vec![table("trips"), table("drivers")]);
        let report = task.fetch_apply_schema(false).await.unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.unchanged, 1);
    }

    #[tokio::test]
    async fn test_invalid_table_is_reported_and_retried() {
        let source = MemorySchemaSource::new();
        let store = MemorySchemaStore::with_tables([table("trips")]);
        let mut retyped = table("trips");
        retyped.columns[1].data_type = "Int64".to_string();
        source.set_tables("c1", vec![retyped, table("drivers")]);
        let task = task(&source, &store);

        let report = task.fetch_apply_schema(false).await.unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].table, "trips");
        assert_eq!(store.table("trips"), Some(table("trips")));

        // hash was not recorded, so the next cycle fetches again
        let report = task.fetch_apply_schema(false).await.unwrap();
        assert!(!report.skipped);
        assert_eq!(source.table_fetches(), 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_returned() {
        let source = MemorySchemaSource::new();
        source.set_unavailable(true);
        let store = MemorySchemaStore::new();
        let err = task(&source, &store).fetch_apply_schema(true).await.unwrap_err();
        assert!(format!("{err:#}").contains("schema source unavailable"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_survives_failed_iterations() {
        let source = MemorySchemaSource::new();
        let store = MemorySchemaStore::new();
        let task = task(&source, &store);
        task.fetch_apply_schema(true).await.unwrap();

        source.set_unavailable(true);
        assert!(task.start());
        assert!(!task.start());

        tokio::time::sleep(INTERVAL * 2 + Duration::from_secs(1)).await;
        assert_eq!(source.hash_fetches(), 3);
        assert!(task.is_running());

        source.set_unavailable(false);
        source.set_tables("c1", vec![table("trips")]);
        tokio::time::sleep(INTERVAL).await;
        assert_eq!(store.table_names(), vec!["trips"]);

        task.stop().await;
        assert!(!task.is_running());
        let fetches = source.hash_fetches();
        tokio::time::sleep(INTERVAL * 3).await;
        assert_eq!(source.hash_fetches(), fetches);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_clamped() {
        let source = MemorySchemaSource::new();
        let store = MemorySchemaStore::new();
        let task = Arc::new(SchemaSyncTask::new(
            "c1",
            Arc::new(source.clone()),
            Arc::new(TableSchemaValidator),
            Arc::new(store.clone()),
            Duration::ZERO,
        ));
        assert_eq!(task.interval(), MIN_SYNC_INTERVAL);

        assert!(task.start());
        source.set_tables("c1", vec![table("trips")]);
        tokio::time::sleep(MIN_SYNC_INTERVAL + Duration::from_millis(100)).await;
        assert!(task.is_running());
        assert_eq!(store.table_names(), vec!["trips"]);
        task.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let source = MemorySchemaSource::new();
        let store = MemorySchemaStore::new();
        let task = task(&source, &store);

        task.stop().await;
        task.start();
        task.stop().await;
        task.stop().await;
        assert!(!task.is_running());
    }
}
