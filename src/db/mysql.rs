//! MySQL adapter over a single `sqlx::MySqlConnection`.

use crate::db::adapter::{BindValue, EngineAdapter, EngineConnection, TableName, connect_within};
use crate::db::normalize::{self, NativeColumn, NativeResult};
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionProfile, EngineType};
use crate::secret::Secret;
use async_trait::async_trait;
use futures_util::TryStreamExt;
use futures_util::stream::BoxStream;
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlQueryResult, MySqlRow, MySqlSslMode};
use sqlx::{ConnectOptions, Connection, Either, Executor, Row};
use std::time::Duration;
use tracing::debug;

const PING_SQL: &str = "SELECT 1";

pub struct MySqlAdapter;

#[async_trait]
impl EngineAdapter for MySqlAdapter {
    fn engine(&self) -> EngineType {
        EngineType::MySql
    }

    async fn open(
        &self,
        profile: &ConnectionProfile,
        secret: &Secret,
        connect_timeout: Duration,
    ) -> DbResult<Box<dyn EngineConnection>> {
        let mut options = MySqlConnectOptions::new()
            .host(profile.host())
            .port(profile.port())
            .username(profile.username())
            .password(secret.expose())
            .charset("utf8mb4")
            .ssl_mode(if profile.use_tls() {
                MySqlSslMode::Required
            } else {
                MySqlSslMode::Disabled
            });
        if let Some(database) = profile.database() {
            options = options.database(database);
        }

        let conn = connect_within(EngineType::MySql, connect_timeout, async {
            options
                .connect()
                .await
                .map_err(|e| DbError::from(e).into_connect_failed())
        })
        .await
        .map_err(|e| e.redact(secret.expose()))?;

        debug!(host = %profile.host(), port = profile.port(), "Opened MySQL connection");
        Ok(Box::new(MySqlEngineConnection {
            conn,
            database: profile.database().map(str::to_string),
        }))
    }

    fn list_tables_query(&self) -> String {
        // Data-dictionary names are utf8mb3_bin, which the protocol flags as binary
        "SELECT CONVERT(TABLE_NAME USING utf8mb4) AS table_name \
         FROM INFORMATION_SCHEMA.TABLES \
         WHERE TABLE_SCHEMA = DATABASE()"
            .to_string()
    }

    fn list_columns_query(&self, table: &TableName) -> String {
        format!(
            "SELECT CONVERT(COLUMN_NAME USING utf8mb4) AS column_name, \
             CONVERT(DATA_TYPE USING utf8mb4) AS data_type \
             FROM INFORMATION_SCHEMA.COLUMNS \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = '{}' \
             ORDER BY ORDINAL_POSITION",
            table
        )
    }

    fn server_info_query(&self) -> String {
        "SELECT VERSION(), DATABASE(), USER()".to_string()
    }
}

struct MySqlEngineConnection {
    conn: MySqlConnection,
    /// The profile's database, restored on reset.
    database: Option<String>,
}

type Steps<'c> = BoxStream<'c, Result<Either<MySqlQueryResult, MySqlRow>, sqlx::Error>>;

/// Rows of the first result set plus the summed affected-row counts.
struct FirstSet {
    columns: Option<Vec<NativeColumn>>,
    rows: Vec<Vec<JsonValue>>,
    rows_affected: u64,
}

async fn first_set(mut stream: Steps<'_>) -> DbResult<FirstSet> {
    let mut set = FirstSet {
        columns: None,
        rows: Vec::new(),
        rows_affected: 0,
    };
    let mut first_set_done = false;

    while let Some(step) = stream.try_next().await? {
        match step {
            Either::Left(done) => {
                set.rows_affected += done.rows_affected();
                if set.columns.is_some() {
                    first_set_done = true;
                }
            }
            Either::Right(row) if !first_set_done => {
                if set.columns.is_none() {
                    set.columns = Some(normalize::sqlx_columns(row.columns()));
                }
                set.rows.push(normalize::mysql::decode_row(&row));
            }
            Either::Right(_) => {}
        }
    }
    Ok(set)
}

impl MySqlEngineConnection {
    /// Columns of an empty result come from describing the statement.
    async fn finish(&mut self, sql: &str, set: FirstSet) -> DbResult<NativeResult> {
        if let Some(columns) = set.columns {
            return Ok(NativeResult::with_rows(columns, set.rows));
        }
        match self.conn.describe(sql).await {
            Ok(described) if !described.columns().is_empty() => Ok(NativeResult::with_rows(
                normalize::sqlx_columns(described.columns()),
                Vec::new(),
            )),
            Ok(_) => Ok(NativeResult::affected(set.rows_affected)),
            Err(e) => {
                debug!(error = %e, "Describe failed, treating statement as rowless");
                Ok(NativeResult::affected(set.rows_affected))
            }
        }
    }
}

#[async_trait]
impl EngineConnection for MySqlEngineConnection {
    async fn ping(&mut self) -> DbResult<()> {
        (&mut self.conn)
            .execute(sqlx::raw_sql(PING_SQL))
            .await
            .map(|_| ())
            .map_err(|e| DbError::from(e).into_connect_failed())
    }

    async fn run(&mut self, sql: &str) -> DbResult<NativeResult> {
        let set = first_set(sqlx::raw_sql(sql).fetch_many(&mut self.conn)).await?;
        self.finish(sql, set).await
    }

    async fn run_with_params(&mut self, sql: &str, params: &[BindValue]) -> DbResult<NativeResult> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = match param {
                BindValue::Null => query.bind(None::<String>),
                BindValue::Bool(b) => query.bind(*b),
                BindValue::Int(i) => query.bind(*i),
                BindValue::Float(f) => query.bind(*f),
                BindValue::Text(t) => query.bind(t.clone()),
            };
        }
        let set = first_set((&mut self.conn).fetch_many(query)).await?;
        self.finish(sql, set).await
    }

    async fn reset(&mut self) -> DbResult<()> {
        (&mut self.conn).execute(sqlx::raw_sql("ROLLBACK")).await?;
        if let Some(database) = &self.database {
            let use_db = format!("USE `{}`", database.replace('`', "``"));
            (&mut self.conn).execute(sqlx::raw_sql(&use_db)).await?;
        }
        Ok(())
    }

    async fn close(self: Box<Self>) {
        if let Err(e) = self.conn.close().await {
            debug!(error = %e, "Error closing MySQL connection");
        }
    }
}
