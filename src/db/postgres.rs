//! PostgreSQL adapter over a single `sqlx::PgConnection`.

use crate::db::adapter::{BindValue, EngineAdapter, EngineConnection, TableName, connect_within};
use crate::db::normalize::{self, NativeColumn, NativeResult};
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionProfile, EngineType};
use crate::secret::Secret;
use async_trait::async_trait;
use futures_util::TryStreamExt;
use futures_util::stream::BoxStream;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgQueryResult, PgRow, PgSslMode};
use sqlx::{ConnectOptions, Connection, Either, Executor, Row};
use std::time::Duration;
use tracing::debug;

const PING_SQL: &str = "SELECT 1";

/// Schema searched by the catalog operations.
const CATALOG_SCHEMA: &str = "public";

/// Statements that return a session to its freshly-opened state. `DISCARD ALL`
/// is avoided: it would deallocate the statements sqlx keeps prepared.
const RESET_STATEMENTS: [&str; 4] = [
    "ROLLBACK",
    "RESET ALL",
    "DISCARD TEMP",
    "SELECT pg_advisory_unlock_all()",
];

pub struct PostgresAdapter;

#[async_trait]
impl EngineAdapter for PostgresAdapter {
    fn engine(&self) -> EngineType {
        EngineType::PostgreSql
    }

    async fn open(
        &self,
        profile: &ConnectionProfile,
        secret: &Secret,
        connect_timeout: Duration,
    ) -> DbResult<Box<dyn EngineConnection>> {
        let mut options = PgConnectOptions::new()
            .host(profile.host())
            .port(profile.port())
            .username(profile.username())
            .password(secret.expose())
            .application_name(env!("CARGO_PKG_NAME"))
            .ssl_mode(if profile.use_tls() {
                PgSslMode::Require
            } else {
                PgSslMode::Disable
            });
        if let Some(database) = profile.database() {
            options = options.database(database);
        }

        let conn = connect_within(EngineType::PostgreSql, connect_timeout, async {
            options
                .connect()
                .await
                .map_err(|e| DbError::from(e).into_connect_failed())
        })
        .await
        .map_err(|e| e.redact(secret.expose()))?;

        debug!(host = %profile.host(), port = profile.port(), "Opened PostgreSQL connection");
        Ok(Box::new(PgEngineConnection { conn }))
    }

    fn list_tables_query(&self) -> String {
        format!(
            "SELECT tablename FROM pg_catalog.pg_tables WHERE schemaname = '{}'",
            CATALOG_SCHEMA
        )
    }

    fn list_columns_query(&self, table: &TableName) -> String {
        format!(
            "SELECT column_name, data_type \
             FROM information_schema.columns \
             WHERE table_schema = '{}' AND table_name = '{}' \
             ORDER BY ordinal_position",
            CATALOG_SCHEMA, table
        )
    }

    fn server_info_query(&self) -> String {
        "SELECT version(), current_database(), current_user".to_string()
    }
}

struct PgEngineConnection {
    conn: PgConnection,
}

type Steps<'c> = BoxStream<'c, Result<Either<PgQueryResult, PgRow>, sqlx::Error>>;

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
                set.rows.push(normalize::postgres::decode_row(&row));
            }
            Either::Right(_) => {}
        }
    }
    Ok(set)
}

impl PgEngineConnection {
    async fn finish(&mut self, sql: &str, set: FirstSet) -> DbResult<NativeResult> {
        if let Some(columns) = set.columns {
            return Ok(NativeResult::with_rows(columns, set.rows));
        }

        // Describing a multi-statement string fails; that only costs the column
        // names of an empty result
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
impl EngineConnection for PgEngineConnection {
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
        for statement in RESET_STATEMENTS {
            (&mut self.conn).execute(sqlx::raw_sql(statement)).await?;
        }
        Ok(())
    }

    async fn close(self: Box<Self>) {
        if let Err(e) = self.conn.close().await {
            debug!(error = %e, "Error closing PostgreSQL connection");
        }
    }
}
