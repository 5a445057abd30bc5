//! Engine adapter contract.
//!
//! An [`EngineAdapter`] knows how to open a connection for one engine and which
//! catalog SQL that engine's dialect needs. The connection it opens is an
//! [`EngineConnection`]: ping, run a statement, reset the session, close. Everything
//! dialect-specific stays behind these two traits, so the pool and the gateway
//! never branch on engine type.

use crate::db::normalize::NativeResult;
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionProfile, EngineType};
use crate::secret::Secret;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// A single live engine-native connection.
///
/// Implementations are owned by exactly one task at a time; the pool never
/// lends one handle to two callers.
#[async_trait]
pub trait EngineConnection: Send {
    /// Run the engine's cheapest no-op query. Failure is `ConnectFailed`.
    async fn ping(&mut self) -> DbResult<()>;

    /// Run caller-supplied SQL verbatim.
    ///
    /// Only the first result set is returned. Dropping the returned future
    /// abandons the in-flight read; the pool then discards this handle.
    async fn run(&mut self, sql: &str) -> DbResult<NativeResult>;

    /// Run one prepared statement with `params` bound to its positional
    /// placeholders, written in the engine's own syntax (`?`, `$1`, `@P1`, `:1`).
    async fn run_with_params(&mut self, sql: &str, params: &[BindValue]) -> DbResult<NativeResult>;

    /// Undo session state a borrower may have left behind: roll back an open
    /// transaction and return to the profile's database.
    async fn reset(&mut self) -> DbResult<()>;

    /// Release engine-native resources. Errors are logged, not returned.
    async fn close(self: Box<Self>);
}

/// Engine-specific connection factory and catalog dialect.
#[async_trait]
pub trait EngineAdapter: Send + Sync {
    fn engine(&self) -> EngineType;

    /// Open one connection, giving up after `connect_timeout`.
    async fn open(
        &self,
        profile: &ConnectionProfile,
        secret: &Secret,
        connect_timeout: Duration,
    ) -> DbResult<Box<dyn EngineConnection>>;

    /// Catalog query listing the tables of the profile's database.
    fn list_tables_query(&self) -> String;

    /// Catalog query returning `(name, data type)` rows for one table, in
    /// physical column order.
    fn list_columns_query(&self, table: &TableName) -> String;

    /// Query returning one `(version, database, user)` row.
    fn server_info_query(&self) -> String;
}

/// A positional statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl BindValue {
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                // Above i64::MAX: keep every digit
                None if n.is_u64() => Self::Text(n.to_string()),
                None => n.as_f64().map_or(Self::Null, Self::Float),
            },
            JsonValue::String(s) => Self::Text(s.clone()),
            // Arrays and objects bind as their JSON text
            other => Self::Text(other.to_string()),
        }
    }

    pub fn from_json_slice(values: &[JsonValue]) -> Vec<Self> {
        values.iter().map(Self::from_json).collect()
    }
}

/// Bound `connect` by `connect_timeout`, mapping expiry to `ConnectFailed`.
pub async fn connect_within<T, F>(
    engine: EngineType,
    connect_timeout: Duration,
    connect: F,
) -> DbResult<T>
where
    F: Future<Output = DbResult<T>>,
{
    match tokio::time::timeout(connect_timeout, connect).await {
        Ok(result) => result,
        Err(_) => Err(DbError::connect_failed(
            format!(
                "{} connect timed out after {}ms",
                engine.display_name(),
                connect_timeout.as_millis()
            ),
            "Check that the host is reachable and the port is open",
        )),
    }
}

/// A table name that is safe to interpolate into catalog queries.
///
/// Accepts plain identifiers only: an ASCII letter or underscore followed by
/// up to 127 ASCII letters, digits, `_`, `$` or `#`. Quoted identifiers and
/// schema-qualified names are rejected rather than escaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName(String);

impl TableName {
    pub const MAX_LEN: usize = 128;

    pub fn parse(raw: &str) -> DbResult<Self> {
        let mut chars = raw.chars();
        let valid_start = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '#'));

        if !valid_start || !valid_rest || raw.len() > Self::MAX_LEN {
            return Err(DbError::invalid_input(format!(
                "'{}' is not a plain table identifier (letters, digits, _, $, #; max {} chars)",
                raw.chars().take(Self::MAX_LEN).collect::<String>(),
                Self::MAX_LEN
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Upper-cased form, as Oracle's catalog stores unquoted identifiers.
    pub fn to_upper(&self) -> String {
        self.0.to_ascii_uppercase()
    }
}

impl std::fmt::Display for TableName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Engine type to adapter lookup.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<EngineType, Arc<dyn EngineAdapter>>,
}

impl AdapterRegistry {
    /// A registry with no adapters.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the MySQL, SQL Server, Oracle and PostgreSQL adapters.
    pub fn with_default_adapters() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::db::mysql::MySqlAdapter));
        registry.register(Arc::new(crate::db::mssql::MsSqlAdapter));
        registry.register(Arc::new(crate::db::oracle::OracleAdapter));
        registry.register(Arc::new(crate::db::postgres::PostgresAdapter));
        registry
    }

    /// Register an adapter, replacing any previous one for the same engine.
    pub fn register(&mut self, adapter: Arc<dyn EngineAdapter>) {
        self.adapters.insert(adapter.engine(), adapter);
    }

    pub fn get(&self, engine: EngineType) -> DbResult<Arc<dyn EngineAdapter>> {
        self.adapters
            .get(&engine)
            .cloned()
            .ok_or_else(|| DbError::unsupported_engine(engine.as_str()))
    }

    pub fn engines(&self) -> Vec<EngineType> {
        let mut engines: Vec<_> = self.adapters.keys().copied().collect();
        engines.sort_by_key(|e| e.as_str());
        engines
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("engines", &self.engines())
            .finish()
    }
}
