// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! In-memory schema source and local store.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{LocalSchemaStore, SchemaSource, Table};
use crate::{raise, Result};

#[derive(Debug, Default)]
struct ClusterSchema {
    tables: Vec<Table>,
    generation: u64,
}

#[derive(Debug, Default)]
struct SourceState {
    clusters: HashMap<String, ClusterSchema>,
    unavailable: bool,
    hash_fetches: usize,
    table_fetches: usize,
}

/// Schema source backed by a map of cluster name to table list.
///
/// The hash is a generation counter bumped on every [`Self::set_tables`], so
/// any replacement counts as a change. Unknown clusters have no tables.
#[derive(Debug, Clone, Default)]
pub struct MemorySchemaSource {
    state: Arc<Mutex<SourceState>>,
}

impl MemorySchemaSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tables(&self, cluster_name: &str, tables: Vec<Table>) {
        let mut state = self.state.lock();
        let cluster = state.clusters.entry(cluster_name.to_string()).or_default();
        cluster.tables = tables;
        cluster.generation += 1;
    }

    /// While unavailable every fetch fails.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    pub fn hash_fetches(&self) -> usize {
        self.state.lock().hash_fetches
    }

    pub fn table_fetches(&self) -> usize {
        self.state.lock().table_fetches
    }
}

#[async_trait]
impl SchemaSource for MemorySchemaSource {
    async fn schema_hash(&self, cluster_name: &str) -> Result<String> {
        let mut state = self.state.lock();
        state.hash_fetches += 1;
        if state.unavailable {
            raise!("schema source unavailable");
        }
        let generation = state
            .clusters
            .get(cluster_name)
            .map(|c| c.generation)
            .unwrap_or_default();
        Ok(format!("{cluster_name}:{generation:x}"))
    }

    async fn tables(&self, cluster_name: &str) -> Result<Vec<Table>> {
        let mut state = self.state.lock();
        state.table_fetches += 1;
        if state.unavailable {
            raise!("schema source unavailable");
        }
        Ok(state
            .clusters
            .get(cluster_name)
            .map(|c| c.tables.clone())
            .unwrap_or_default())
    }
}

/// Local schema catalogue held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySchemaStore {
    tables: Arc<Mutex<BTreeMap<String, Table>>>,
}

impl MemorySchemaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tables(tables: impl IntoIterator<Item = Table>) -> Self {
        let store = Self::new();
        store
            .tables
            .lock()
            .extend(tables.into_iter().map(|t| (t.name.clone(), t)));
        store
    }

    pub fn table(&self, name: &str) -> Option<Table> {
        self.tables.lock().get(name).cloned()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.lock().keys().cloned().collect()
    }
}

#[async_trait]
impl LocalSchemaStore for MemorySchemaStore {
    async fn list_tables(&self) -> Result<Vec<Table>> {
        Ok(self.tables.lock().values().cloned().collect())
    }

    async fn get_table(&self, name: &str) -> Result<Option<Table>> {
        Ok(self.table(name))
    }

    async fn create_table(&self, table: Table) -> Result<()> {
        let mut tables = self.tables.lock();
        if tables.contains_key(&table.name) {
            raise!("table {} already exists", table.name);
        }
        tables.insert(table.name.clone(), table);
        Ok(())
    }

    async fn update_table(&self, table: Table) -> Result<()> {
        let mut tables = self.tables.lock();
        match tables.get_mut(&table.name) {
            Some(existing) => {
                *existing = table;
                Ok(())
            }
            None => raise!("table {} does not exist", table.name),
        }
    }

    async fn delete_table(&self, name: &str) -> Result<()> {
        if self.tables.lock().remove(name).is_none() {
            raise!("table {name} does not exist");
        }
        Ok(())
    }
}
