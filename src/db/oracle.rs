//! Oracle adapter.
//!
//! The `oracle` crate wraps ODPI-C and blocks the calling thread, so every call
//! runs on tokio's blocking pool. A statement abandoned by its caller (timeout
//! or cancellation) is interrupted with `break_execution` so the blocking
//! thread is released and the session can be discarded.

use crate::db::adapter::{BindValue, EngineAdapter, EngineConnection, TableName, connect_within};
use crate::db::normalize::{self, NativeResult};
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionProfile, EngineType};
use crate::secret::Secret;
use async_trait::async_trait;
use oracle::Connection;
use oracle::sql_type::{OracleType, ToSql};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const PING_SQL: &str = "SELECT 1 FROM DUAL";

pub struct OracleAdapter;

impl OracleAdapter {
    /// Easy Connect string: `[tcps://]host:port[/service]`.
    pub fn connect_string(profile: &ConnectionProfile) -> String {
        let scheme = if profile.use_tls() { "tcps://" } else { "//" };
        match profile.database() {
            Some(service) => format!("{}{}:{}/{}", scheme, profile.host(), profile.port(), service),
            None => format!("{}{}:{}", scheme, profile.host(), profile.port()),
        }
    }
}

#[async_trait]
impl EngineAdapter for OracleAdapter {
    fn engine(&self) -> EngineType {
        EngineType::Oracle
    }

    async fn open(
        &self,
        profile: &ConnectionProfile,
        secret: &Secret,
        connect_timeout: Duration,
    ) -> DbResult<Box<dyn EngineConnection>> {
        let username = profile.username().to_string();
        let password = secret.clone();
        let connect_string = Self::connect_string(profile);

        // A connect that outlives the timeout finishes on the blocking pool and is dropped there
        let conn = connect_within(EngineType::Oracle, connect_timeout, async move {
            tokio::task::spawn_blocking(move || {
                let mut conn = Connection::connect(&username, password.expose(), &connect_string)
                    .map_err(|e| DbError::from(e).into_connect_failed())?;
                conn.set_autocommit(true);
                Ok::<_, DbError>(conn)
            })
            .await
            .map_err(|e| DbError::internal(format!("Oracle connect task failed: {}", e)))?
        })
        .await
        .map_err(|e| e.redact(secret.expose()))?;

        debug!(host = %profile.host(), port = profile.port(), "Opened Oracle connection");
        Ok(Box::new(OracleEngineConnection {
            conn: Arc::new(conn),
        }))
    }

    fn list_tables_query(&self) -> String {
        "SELECT TABLE_NAME FROM USER_TABLES".to_string()
    }

    fn list_columns_query(&self, table: &TableName) -> String {
        // Unquoted identifiers are stored upper-cased in the data dictionary
        format!(
            "SELECT COLUMN_NAME, DATA_TYPE FROM USER_TAB_COLUMNS \
             WHERE TABLE_NAME = '{}' ORDER BY COLUMN_ID",
            table.to_upper()
        )
    }

    fn server_info_query(&self) -> String {
        "SELECT BANNER, SYS_CONTEXT('USERENV', 'DB_NAME'), USER FROM V$VERSION WHERE ROWNUM = 1"
            .to_string()
    }
}

struct OracleEngineConnection {
    conn: Arc<Connection>,
}

impl OracleEngineConnection {
    async fn blocking<T, F>(&self, op: F) -> DbResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> DbResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let mut guard = BreakOnDrop {
            conn: Some(Arc::clone(&self.conn)),
        };
        let result = tokio::task::spawn_blocking(move || op(&conn))
            .await
            .map_err(|e| DbError::internal(format!("Oracle task failed: {}", e)));
        guard.disarm();
        result?
    }
}

#[async_trait]
impl EngineConnection for OracleEngineConnection {
    async fn ping(&mut self) -> DbResult<()> {
        self.blocking(|conn| {
            conn.query_row(PING_SQL, &[])
                .map(|_| ())
                .map_err(DbError::from)
        })
        .await
        .map_err(DbError::into_connect_failed)
    }

    async fn run(&mut self, sql: &str) -> DbResult<NativeResult> {
        let sql = statement_text(sql).to_string();
        self.blocking(move |conn| run_blocking(conn, &sql, &[])).await
    }

    async fn run_with_params(&mut self, sql: &str, params: &[BindValue]) -> DbResult<NativeResult> {
        let sql = statement_text(sql).to_string();
        let params = params.to_vec();
        self.blocking(move |conn| {
            let values: Vec<Box<dyn ToSql>> = params.iter().map(oracle_value).collect();
            let refs: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref()).collect();
            run_blocking(conn, &sql, &refs)
        })
        .await
    }

    async fn reset(&mut self) -> DbResult<()> {
        // Sessions run in autocommit; this only matters after an explicit
        // transaction or a failed PL/SQL block
        self.blocking(|conn| conn.rollback().map_err(DbError::from))
            .await
    }

    async fn close(self: Box<Self>) {
        let conn = self.conn;
        let closed = tokio::task::spawn_blocking(move || conn.close()).await;
        match closed {
            Ok(Err(e)) => debug!(error = %e, "Error closing Oracle connection"),
            Err(e) => debug!(error = %e, "Oracle close task failed"),
            Ok(Ok(())) => {}
        }
    }
}

/// BOOLEAN is only bindable from SQL on 23ai, so booleans go over as 1/0.
fn oracle_value(param: &BindValue) -> Box<dyn ToSql> {
    match param {
        BindValue::Null => Box::new(None::<String>),
        BindValue::Bool(b) => Box::new(i64::from(*b)),
        BindValue::Int(i) => Box::new(*i),
        BindValue::Float(f) => Box::new(*f),
        BindValue::Text(t) => Box::new(t.clone()),
    }
}

fn run_blocking(conn: &Connection, sql: &str, params: &[&dyn ToSql]) -> DbResult<NativeResult> {
    let mut stmt = conn.statement(sql).build()?;

    if stmt.is_query() {
        let result_set = stmt.query(params)?;
        let columns = normalize::oracle::columns(result_set.column_info());
        let types: Vec<OracleType> = result_set
            .column_info()
            .iter()
            .map(|c| c.oracle_type().clone())
            .collect();

        let mut rows = Vec::new();
        for row in result_set {
            rows.push(normalize::oracle::decode_row(&row?, &types));
        }
        return Ok(NativeResult::with_rows(columns, rows));
    }

    stmt.execute(params)?;
    if stmt.is_dml() {
        Ok(NativeResult::affected(stmt.row_count()?))
    } else {
        Ok(NativeResult::empty())
    }
}

/// SQL as OCI accepts it: a trailing `;` is a syntax error (ORA-00911) except
/// as the terminator of a PL/SQL block.
fn statement_text(sql: &str) -> &str {
    let trimmed = sql.trim_end();
    let is_plsql_block = trimmed.to_ascii_uppercase().ends_with("END;");
    match trimmed.strip_suffix(';') {
        Some(stripped) if !is_plsql_block => stripped.trim_end(),
        _ => trimmed,
    }
}

/// Interrupts the session's running call if the awaiting future is dropped.
struct BreakOnDrop {
    conn: Option<Arc<Connection>>,
}

impl BreakOnDrop {
    fn disarm(&mut self) {
        self.conn = None;
    }
}

impl Drop for BreakOnDrop {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.break_execution() {
                warn!(error = %e, "Failed to interrupt abandoned Oracle call");
            } else {
                debug!("Interrupted abandoned Oracle call");
            }
        }
    }
}
