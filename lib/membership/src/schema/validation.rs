// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;

use thiserror::Error;

use super::Table;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaValidationError {
    #[error("table name must not be empty")]
    EmptyTableName,

    #[error("table {table} has no columns")]
    NoColumns { table: String },

    #[error("table {table} has a column with an empty name")]
    EmptyColumnName { table: String },

    #[error("table {table} has duplicate column {column}")]
    DuplicateColumn { table: String, column: String },

    #[error("table {table} has no primary key")]
    NoPrimaryKey { table: String },

    #[error("table {table} primary key references column index {index} which is out of range or deleted")]
    InvalidPrimaryKey { table: String, index: usize },

    #[error("table {table} removes existing columns ({old} -> {new})")]
    ColumnsRemoved {
        table: String,
        old: usize,
        new: usize,
    },

    #[error("table {table} changes column {index} from {old} to {new}")]
    ColumnChanged {
        table: String,
        index: usize,
        old: String,
        new: String,
    },

    #[error("table {table} changes its primary key")]
    PrimaryKeyChanged { table: String },

    #[error("table {table} changes between fact and dimension table")]
    TableTypeChanged { table: String },
}

/// Decides whether a fetched table definition may be applied locally.
pub trait SchemaValidator: Send + Sync {
    /// `existing` is the local definition when the table is being updated.
    fn validate(&self, table: &Table, existing: Option<&Table>)
        -> Result<(), SchemaValidationError>;
}

/// Structural checks for new tables plus append-only rules for updates:
/// columns may be added or marked deleted, never removed, renamed or retyped;
/// primary key and table type are fixed at creation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableSchemaValidator;

impl SchemaValidator for TableSchemaValidator {
    fn validate(
        &self,
        table: &Table,
        existing: Option<&Table>,
    ) -> Result<(), SchemaValidationError> {
        validate_structure(table)?;
        if let Some(existing) = existing {
            validate_update(table, existing)?;
        }
        Ok(())
    }
}

fn validate_structure(table: &Table) -> Result<(), SchemaValidationError> {
    if table.name.is_empty() {
        return Err(SchemaValidationError::EmptyTableName);
    }
    if table.columns.is_empty() {
        return Err(SchemaValidationError::NoColumns {
            table: table.name.clone(),
        });
    }

    let mut seen = HashSet::with_capacity(table.columns.len());
    for column in &table.columns {
        if column.name.is_empty() {
            return Err(SchemaValidationError::EmptyColumnName {
                table: table.name.clone(),
            });
        }
        if !seen.insert(column.name.as_str()) {
            return Err(SchemaValidationError::DuplicateColumn {
                table: table.name.clone(),
                column: column.name.clone(),
            });
        }
    }

    if table.primary_key_column_indices.is_empty() {
        return Err(SchemaValidationError::NoPrimaryKey {
            table: table.name.clone(),
        });
    }
    for &index in &table.primary_key_column_indices {
        match table.columns.get(index) {
            Some(column) if !column.deleted => {}
            _ => {
                return Err(SchemaValidationError::InvalidPrimaryKey {
                    table: table.name.clone(),
                    index,
                })
            }
        }
    }
    Ok(())
}

fn validate_update(table: &Table, existing: &Table) -> Result<(), SchemaValidationError> {
    if table.columns.len() < existing.columns.len() {
        return Err(SchemaValidationError::ColumnsRemoved {
            table: table.name.clone(),
            old: existing.columns.len(),
            new: table.columns.len(),
        });
    }

    for (index, (old, new)) in existing.columns.iter().zip(&table.columns).enumerate() {
        if old.name != new.name {
            return Err(SchemaValidationError::ColumnChanged {
                table: table.name.clone(),
                index,
                old: old.name.clone(),
                new: new.name.clone(),
            });
        }
        if old.data_type != new.data_type {
            return Err(SchemaValidationError::ColumnChanged {
                table: table.name.clone(),
                index,
                old: old.data_type.clone(),
                new: new.data_type.clone(),
            });
        }
    }

    if table.primary_key_column_indices != existing.primary_key_column_indices {
        return Err(SchemaValidationError::PrimaryKeyChanged {
            table: table.name.clone(),
        });
    }
    if table.is_fact_table != existing.is_fact_table {
        return Err(SchemaValidationError::TableTypeChanged {
            table: table.name.clone(),
        });
    }
    Ok(())
}
