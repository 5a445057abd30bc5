//! Result data models.
//!
//! [`NormalizedResult`] is the single row shape every engine's output is turned
//! into. The remaining types are the payloads of the catalog and diagnostic
//! operations, plus the response envelopes the route layer serves.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// One result row: column name to portable value, in column order.
pub type Row = serde_json::Map<String, JsonValue>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedResult {
    pub columns: Vec<String>,
    /// Normalized type names, parallel to `columns`. Empty when the driver
    /// reported no type information.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub column_types: Vec<String>,
    pub rows: Vec<Row>,
    /// Set for statements without a result set when the driver reports a count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
    #[serde(default)]
    pub execution_time_ms: u64,
}

impl NormalizedResult {
    /// Create an empty result (DDL, or DML without a reported count).
    pub fn empty(execution_time_ms: u64) -> Self {
        Self {
            execution_time_ms,
            ..Self::default()
        }
    }

    /// Get the number of rows in the result.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Check if the result carries neither columns nor rows.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.rows.is_empty()
    }

    /// Values of one column across all rows, in row order.
    pub fn column_values(&self, index: usize) -> impl Iterator<Item = &JsonValue> + '_ {
        let name = self.columns.get(index);
        self.rows
            .iter()
            .filter_map(move |row| name.and_then(|n| row.get(n)))
    }
}

/// A column as reported by a catalog lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub name: String,
    /// Engine-native type name, as the catalog stores it.
    pub data_type: String,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// What the server says about itself and the session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub version: Option<String>,
    pub database: Option<String>,
    pub user: Option<String>,
}

/// Snapshot of one pool's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub fingerprint: String,
    pub engine: String,
    /// Live handles (idle + in use).
    pub size: usize,
    pub idle: usize,
    pub in_use: usize,
    pub max_size: usize,
}

/// `{ ok }` envelope of a connection test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResponse {
    pub ok: bool,
}

/// `{ tables }` envelope of a table listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TablesResponse {
    pub tables: Vec<String>,
}

/// `{ columns }` envelope of a column listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnsResponse {
    pub columns: Vec<ColumnInfo>,
}
