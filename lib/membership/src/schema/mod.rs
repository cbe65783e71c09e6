// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Table schema model and the collaborators schema sync runs against.
//!
//! - [`SchemaSource`] is the cluster-wide source of truth.
//! - [`SchemaValidator`] decides whether a fetched table may be applied.
//! - [`LocalSchemaStore`] is this node's own schema catalogue.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

mod memory;
mod sync;
mod validation;

pub use memory::{MemorySchemaSource, MemorySchemaStore};
pub use sync::{SchemaSyncTask, SyncReport, TableFailure, MIN_SYNC_INTERVAL};
pub use validation::{SchemaValidationError, SchemaValidator, TableSchemaValidator};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: String,
    /// Columns are never physically removed; dropping one marks it deleted.
    #[serde(default)]
    pub deleted: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            deleted: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub primary_key_column_indices: Vec<usize>,
    #[serde(default)]
    pub is_fact_table: bool,
    #[serde(default)]
    pub version: u32,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<Column>, primary_key: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            columns,
            primary_key_column_indices: primary_key,
            is_fact_table: false,
            version: 0,
        }
    }
}

/// Cluster-wide schema source of truth.
#[async_trait]
pub trait SchemaSource: Send + Sync {
    /// Opaque digest of every table definition in the cluster; changes
    /// whenever any definition changes.
    async fn schema_hash(&self, cluster_name: &str) -> Result<String>;

    /// All table definitions of the cluster.
    async fn tables(&self, cluster_name: &str) -> Result<Vec<Table>>;
}

/// This node's schema catalogue.
#[async_trait]
pub trait LocalSchemaStore: Send + Sync {
    async fn list_tables(&self) -> Result<Vec<Table>>;

    async fn get_table(&self, name: &str) -> Result<Option<Table>>;

    async fn create_table(&self, table: Table) -> Result<()>;

    async fn update_table(&self, table: Table) -> Result<()>;

    async fn delete_table(&self, name: &str) -> Result<()>;
}
