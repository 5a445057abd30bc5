//! Scripted in-memory engine shared by the integration tests.
//!
//! `FakeEngine` answers statements from a script and counts how many
//! connections were opened, closed and alive at once, so pool and gateway
//! behaviour can be checked without a database.

#![allow(dead_code)]

use async_trait::async_trait;
use db_gateway::config::{GatewayConfig, PoolOptions};
use db_gateway::db::{
    AdapterRegistry, BindValue, EngineAdapter, EngineConnection, NativeColumn, NativeResult,
    TableName,
};
use db_gateway::error::{DbError, DbResult};
use db_gateway::gateway::Gateway;
use db_gateway::models::{ConnectionProfile, EngineType};
use db_gateway::secret::{Secret, StaticSecretResolver};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SECRET_REF: &str = "SHOP_DB";
pub const PASSWORD: &str = "s3cret-pw";
pub const TABLES_SQL: &str = "FAKE LIST TABLES";
pub const INFO_SQL: &str = "FAKE SERVER INFO";
/// Answered with the session's current database.
pub const CURRENT_DB_SQL: &str = "SELECT DATABASE()";

#[derive(Default)]
pub struct FakeEngine {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    live: AtomicUsize,
    pub max_live: AtomicUsize,
    pub fail_open: AtomicBool,
    pub fail_ping: AtomicBool,
    /// Ping never completes.
    pub hang_ping: AtomicBool,
    pub fail_reset: AtomicBool,
    pub resets: AtomicUsize,
    pub executed: Mutex<Vec<String>>,
    pub bound: Mutex<Vec<Vec<BindValue>>>,
    script: Mutex<HashMap<String, NativeResult>>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer `sql` with `result` from now on.
    pub fn script(&self, sql: impl Into<String>, result: NativeResult) {
        self.script.lock().unwrap().insert(sql.into(), result);
    }

    pub fn script_rows(&self, sql: &str, columns: &[(&str, &str)], rows: Vec<Vec<JsonValue>>) {
        let columns = columns
            .iter()
            .map(|(name, ty)| NativeColumn::new(*name, *ty))
            .collect();
        self.script(sql, NativeResult::with_rows(columns, rows));
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn bound(&self) -> Vec<Vec<BindValue>> {
        self.bound.lock().unwrap().clone()
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    fn answer(&self, sql: &str) -> NativeResult {
        self.script
            .lock()
            .unwrap()
            .get(sql)
            .cloned()
            .unwrap_or_else(NativeResult::empty)
    }
}

pub struct FakeAdapter {
    engine: EngineType,
    state: Arc<FakeEngine>,
}

impl FakeAdapter {
    pub fn new(engine: EngineType, state: Arc<FakeEngine>) -> Arc<Self> {
        Arc::new(Self { engine, state })
    }
}

#[async_trait]
impl EngineAdapter for FakeAdapter {
    fn engine(&self) -> EngineType {
        self.engine
    }

    async fn open(
        &self,
        profile: &ConnectionProfile,
        secret: &Secret,
        _connect_timeout: Duration,
    ) -> DbResult<Box<dyn EngineConnection>> {
        if self.state.fail_open.load(Ordering::SeqCst) {
            return Err(DbError::connect_failed(
                format!("Access denied (using password: {})", secret.expose()),
                "Check credentials",
            )
            .redact(secret.expose()));
        }
        if secret.expose() != PASSWORD {
            return Err(DbError::connect_failed("Access denied", "Check credentials"));
        }
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        let live = self.state.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_live.fetch_max(live, Ordering::SeqCst);
        Ok(Box::new(FakeConnection {
            state: Arc::clone(&self.state),
            home: profile.database().map(str::to_string),
            current: profile.database().map(str::to_string),
        }))
    }

    fn list_tables_query(&self) -> String {
        TABLES_SQL.to_string()
    }

    fn list_columns_query(&self, table: &TableName) -> String {
        columns_sql(table.as_str())
    }

    fn server_info_query(&self) -> String {
        INFO_SQL.to_string()
    }
}

pub fn columns_sql(table: &str) -> String {
    format!("FAKE LIST COLUMNS {}", table)
}

struct FakeConnection {
    state: Arc<FakeEngine>,
    home: Option<String>,
    current: Option<String>,
}

#[async_trait]
impl EngineConnection for FakeConnection {
    async fn ping(&mut self) -> DbResult<()> {
        if self.state.hang_ping.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.state.fail_ping.load(Ordering::SeqCst) {
            return Err(DbError::connection_lost("server has gone away"));
        }
        Ok(())
    }

    /// `SLEEP <secs>` waits, `FAIL` is a server-side error, `DROP` loses the
    /// connection and `USE <db>` switches database. Anything else is
    /// answered from the script.
    async fn run(&mut self, sql: &str) -> DbResult<NativeResult> {
        self.state.executed.lock().unwrap().push(sql.to_string());
        if let Some(database) = sql.strip_prefix("USE ") {
            self.current = Some(database.trim().to_string());
            return Ok(NativeResult::empty());
        }
        if sql == CURRENT_DB_SQL {
            let column = NativeColumn::new("DATABASE()", "VARCHAR");
            let value = self.current.clone().map_or(JsonValue::Null, JsonValue::String);
            return Ok(NativeResult::with_rows(vec![column], vec![vec![value]]));
        }
        if let Some(secs) = sql.strip_prefix("SLEEP ") {
            let secs: u64 = secs.trim().parse().unwrap_or(1);
            tokio::time::sleep(Duration::from_secs(secs)).await;
            return Ok(NativeResult::empty());
        }
        match sql {
            "FAIL" => Err(DbError::query_failed(
                "You have an error in your SQL syntax",
                Some("42000".to_string()),
            )),
            "DROP" => Err(DbError::connection_lost("Lost connection to server during query")),
            _ => Ok(self.state.answer(sql)),
        }
    }

    async fn run_with_params(&mut self, sql: &str, params: &[BindValue]) -> DbResult<NativeResult> {
        self.state.bound.lock().unwrap().push(params.to_vec());
        self.run(sql).await
    }

    async fn reset(&mut self) -> DbResult<()> {
        self.state.resets.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_reset.load(Ordering::SeqCst) {
            return Err(DbError::connection_lost("reset failed"));
        }
        self.current = self.home.clone();
        Ok(())
    }

    async fn close(self: Box<Self>) {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        self.state.live.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn shop_profile() -> ConnectionProfile {
    ConnectionProfile::new(EngineType::MySql, "db.example.com", "shop_user", SECRET_REF)
        .with_database("shop")
}

pub fn secrets() -> Arc<StaticSecretResolver> {
    Arc::new(StaticSecretResolver::new().with_secret(SECRET_REF, PASSWORD))
}

pub fn pool_options(max_connections: u32, acquire_timeout_secs: u64) -> PoolOptions {
    PoolOptions {
        max_connections: Some(max_connections),
        acquire_timeout_secs: Some(acquire_timeout_secs),
        ..PoolOptions::default()
    }
}

/// A gateway whose MySQL adapter is the fake engine.
pub fn fake_gateway(state: &Arc<FakeEngine>, pool: PoolOptions) -> Gateway {
    fake_gateway_with(state, pool, 30)
}

pub fn fake_gateway_with(state: &Arc<FakeEngine>, pool: PoolOptions, query_timeout_secs: u64) -> Gateway {
    let mut adapters = AdapterRegistry::new();
    adapters.register(FakeAdapter::new(EngineType::MySql, Arc::clone(state)));
    let config = GatewayConfig {
        query_timeout_secs,
        pool,
        ..GatewayConfig::default()
    };
    Gateway::with_adapters(config, secrets(), adapters).unwrap()
}

/// Let spawned check-in tasks run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
