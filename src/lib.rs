//! Database Gateway Library
//!
//! One pooled, normalized contract over MySQL, SQL Server, Oracle and
//! PostgreSQL: test a connection, run SQL, list tables and list columns.

pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod secret;

pub use config::{Config, GatewayConfig, PoolOptions};
pub use error::{DbError, DbResult, ErrorKind};
pub use gateway::Gateway;
pub use models::{ColumnInfo, ConnectionProfile, EngineType, NormalizedResult};
