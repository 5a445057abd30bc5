//! Gateway façade.
//!
//! Every operation has the same shape: pick the adapter for the profile's
//! engine, borrow a pooled handle, run, normalize, and let the handle go back
//! to its pool when it drops.

use crate::config::GatewayConfig;
use crate::db::adapter::{AdapterRegistry, BindValue, EngineAdapter, TableName};
use crate::db::normalize::ResultNormalizer;
use crate::db::pool_manager::ConnectionPoolManager;
use crate::error::{DbError, DbResult};
use crate::models::{ColumnInfo, ConnectionProfile, NormalizedResult, PoolStats, ServerInfo};
use crate::secret::SecretResolver;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::timeout;
use tracing::{debug, info, warn};

pub struct Gateway {
    config: GatewayConfig,
    adapters: AdapterRegistry,
    pools: Arc<ConnectionPoolManager>,
}

impl Gateway {
    /// Create a gateway serving the four built-in engines.
    ///
    /// Spawns the pool reaper, so this must run inside a tokio runtime.
    pub fn new(config: GatewayConfig, secrets: Arc<dyn SecretResolver>) -> DbResult<Self> {
        Self::with_adapters(config, secrets, AdapterRegistry::with_default_adapters())
    }

    /// Create a gateway with an explicit adapter set.
    pub fn with_adapters(
        config: GatewayConfig,
        secrets: Arc<dyn SecretResolver>,
        adapters: AdapterRegistry,
    ) -> DbResult<Self> {
        config.validate()?;
        let pools =
            ConnectionPoolManager::new(config.pool.clone(), config.connect_timeout(), secrets);
        info!(
            engines = ?adapters.engines(),
            connect_timeout_secs = config.connect_timeout_secs,
            query_timeout_secs = config.query_timeout_secs,
            "Gateway ready"
        );
        Ok(Self {
            config,
            adapters,
            pools,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    fn adapter_for(&self, profile: &ConnectionProfile) -> DbResult<Arc<dyn EngineAdapter>> {
        profile.validate()?;
        self.adapters.get(profile.engine())
    }

    /// Whether the target answers a ping. Never fails: the reason for a
    /// `false` goes to the log.
    ///
    /// Does not wait for a pool slot: a busy pool still reports a reachable
    /// server. Open and ping are each bounded by the connect timeout.
    pub async fn test_connection(&self, profile: &ConnectionProfile) -> bool {
        let engine = profile.engine();
        let check = async {
            let adapter = self.adapter_for(profile)?;
            self.pools.check_reachable(profile, adapter).await
        };
        // Open, ping and close, each with its own bound
        let overall = self.config.connect_timeout() * 3;

        match timeout(overall, check).await {
            Ok(Ok(())) => {
                debug!(engine = %engine, host = %profile.host(), "Connection test succeeded");
                true
            }
            Ok(Err(e)) => {
                warn!(
                    engine = %engine,
                    host = %profile.host(),
                    kind = %e.kind(),
                    error = %e,
                    "Connection test failed"
                );
                false
            }
            Err(_) => {
                warn!(
                    engine = %engine,
                    host = %profile.host(),
                    timeout_secs = self.config.connect_timeout_secs,
                    "Connection test timed out"
                );
                false
            }
        }
    }

    /// Run `sql` verbatim and return its first result set.
    ///
    /// Statements without a result set yield an empty result (with
    /// `rows_affected` when the engine reports it).
    pub async fn execute(&self, profile: &ConnectionProfile, sql: &str) -> DbResult<NormalizedResult> {
        let adapter = self.adapter_for(profile)?;
        self.run(profile, adapter, sql).await
    }

    /// Run `sql` with positional parameters bound in order.
    ///
    /// Placeholders use the engine's own syntax: `?` for MySQL, `$1` for
    /// PostgreSQL, `@P1` for SQL Server and `:1` for Oracle. Strings, numbers,
    /// booleans and null bind as themselves; arrays and objects bind as JSON
    /// text.
    pub async fn execute_with_params(
        &self,
        profile: &ConnectionProfile,
        sql: &str,
        params: &[JsonValue],
    ) -> DbResult<NormalizedResult> {
        let adapter = self.adapter_for(profile)?;
        if params.is_empty() {
            return self.run(profile, adapter, sql).await;
        }
        let params = BindValue::from_json_slice(params);
        self.run_bound(profile, adapter, sql, Some(&params)).await
    }

    async fn run(
        &self,
        profile: &ConnectionProfile,
        adapter: Arc<dyn EngineAdapter>,
        sql: &str,
    ) -> DbResult<NormalizedResult> {
        self.run_bound(profile, adapter, sql, None).await
    }

    async fn run_bound(
        &self,
        profile: &ConnectionProfile,
        adapter: Arc<dyn EngineAdapter>,
        sql: &str,
        params: Option<&[BindValue]>,
    ) -> DbResult<NormalizedResult> {
        let mut conn = self.pools.acquire(profile, adapter).await?;
        let query_timeout = self.config.query_timeout();
        debug!(
            engine = %profile.engine(),
            sql_len = sql.len(),
            params = params.map_or(0, <[BindValue]>::len),
            "Executing statement"
        );

        let start = Instant::now();
        let outcome = match params {
            Some(params) => timeout(query_timeout, conn.run_with_params(sql, params)).await,
            None => timeout(query_timeout, conn.run(sql)).await,
        };
        let native = match outcome {
            Ok(result) => result?,
            Err(_) => {
                conn.mark_broken();
                warn!(
                    engine = %profile.engine(),
                    timeout_secs = query_timeout.as_secs(),
                    "Statement timed out, discarding connection"
                );
                return Err(DbError::query_failed(
                    format!("Statement timed out after {}s", query_timeout.as_secs()),
                    None,
                ));
            }
        };
        let elapsed = start.elapsed();
        drop(conn);

        let result = ResultNormalizer::normalize(native, elapsed);
        debug!(
            engine = %profile.engine(),
            rows = result.row_count(),
            elapsed_ms = result.execution_time_ms,
            "Statement finished"
        );
        Ok(result)
    }

    /// Names of the tables in the profile's database, in catalog order.
    pub async fn list_tables(&self, profile: &ConnectionProfile) -> DbResult<Vec<String>> {
        let adapter = self.adapter_for(profile)?;
        let sql = adapter.list_tables_query();
        let result = self.run(profile, adapter, &sql).await?;
        Ok(result.column_values(0).filter_map(scalar_text).collect())
    }

    /// Columns of `table` in physical order. Empty for an unknown table and
    /// for engines without an adapter.
    pub async fn list_columns(
        &self,
        profile: &ConnectionProfile,
        table: &str,
    ) -> DbResult<Vec<ColumnInfo>> {
        profile.validate()?;
        let adapter = match self.adapters.get(profile.engine()) {
            Ok(adapter) => adapter,
            Err(DbError::UnsupportedEngine { engine }) => {
                debug!(engine = %engine, "No adapter, returning no columns");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };
        let table = TableName::parse(table)?;

        let sql = adapter.list_columns_query(&table);
        let result = self.run(profile, adapter, &sql).await?;
        let (Some(name_col), Some(type_col)) = (result.columns.first(), result.columns.get(1))
        else {
            return Ok(Vec::new());
        };

        Ok(result
            .rows
            .iter()
            .filter_map(|row| {
                let name = row.get(name_col).and_then(scalar_text)?;
                let data_type = row.get(type_col).and_then(scalar_text).unwrap_or_default();
                Some(ColumnInfo::new(name, data_type))
            })
            .collect())
    }

    /// Server version, current database and session user.
    pub async fn server_info(&self, profile: &ConnectionProfile) -> DbResult<ServerInfo> {
        let adapter = self.adapter_for(profile)?;
        let sql = adapter.server_info_query();
        let result = self.run(profile, adapter, &sql).await?;

        let Some(row) = result.rows.first() else {
            return Ok(ServerInfo::default());
        };
        let field = |idx: usize| {
            result
                .columns
                .get(idx)
                .and_then(|name| row.get(name))
                .and_then(scalar_text)
        };
        Ok(ServerInfo {
            version: field(0),
            database: field(1),
            user: field(2),
        })
    }

    pub async fn pool_stats(&self) -> Vec<PoolStats> {
        self.pools.stats().await
    }

    /// Close every pool and stop the reaper. Handles still lent out are
    /// closed when they are returned.
    pub async fn shutdown(&self) {
        info!("Shutting down gateway");
        self.pools.close_all().await;
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("config", &self.config)
            .field("adapters", &self.adapters)
            .finish()
    }
}

/// Text of a catalog cell. Strings pass through, other scalars are rendered,
/// NULL is skipped.
fn scalar_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
