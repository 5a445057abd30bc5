//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - The engine adapter contract and its four implementations
//! - Per-profile connection pools and the manager that owns them
//! - Normalization of driver results into one row shape

pub mod adapter;
pub mod mssql;
pub mod mysql;
pub mod normalize;
pub mod oracle;
pub mod pool;
pub mod pool_manager;
pub mod postgres;

pub use adapter::{AdapterRegistry, BindValue, EngineAdapter, EngineConnection, TableName};
pub use normalize::{NativeColumn, NativeResult, ResultNormalizer};
pub use pool::{ConnectionPool, PooledConnection};
pub use pool_manager::ConnectionPoolManager;
