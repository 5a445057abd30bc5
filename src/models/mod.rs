//! Data models for the database gateway.
//!
//! This module re-exports all model types used throughout the crate.

pub mod profile;
pub mod result;

// Re-export commonly used types
pub use profile::{ConnectionProfile, EngineType, PoolKey};
pub use result::{
    ColumnInfo, ColumnsResponse, NormalizedResult, PoolStats, Row, ServerInfo, TablesResponse,
    TestResponse,
};
