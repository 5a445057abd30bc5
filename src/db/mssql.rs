//! SQL Server adapter over a single tiberius client.

use crate::db::adapter::{BindValue, EngineAdapter, EngineConnection, TableName, connect_within};
use crate::db::normalize::{self, NativeResult};
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionProfile, EngineType};
use crate::secret::Secret;
use async_trait::async_trait;
use std::time::Duration;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel, Query, QueryStream};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

const PING_SQL: &str = "SELECT 1";

type TdsClient = Client<Compat<TcpStream>>;

pub struct MsSqlAdapter;

impl MsSqlAdapter {
    fn config(profile: &ConnectionProfile, secret: &Secret) -> Config {
        let mut config = Config::new();
        config.host(profile.host());
        config.port(profile.port());
        config.authentication(AuthMethod::sql_server(profile.username(), secret.expose()));
        config.application_name(env!("CARGO_PKG_NAME"));
        if let Some(database) = profile.database() {
            config.database(database);
        }
        if profile.use_tls() {
            config.encryption(EncryptionLevel::Required);
        } else {
            // Only the login packet is encrypted; servers ship self-signed certificates
            config.encryption(EncryptionLevel::Off);
            config.trust_cert();
        }
        config
    }
}

#[async_trait]
impl EngineAdapter for MsSqlAdapter {
    fn engine(&self) -> EngineType {
        EngineType::MsSql
    }

    async fn open(
        &self,
        profile: &ConnectionProfile,
        secret: &Secret,
        connect_timeout: Duration,
    ) -> DbResult<Box<dyn EngineConnection>> {
        let config = Self::config(profile, secret);

        let client = connect_within(EngineType::MsSql, connect_timeout, async move {
            let tcp = TcpStream::connect(config.get_addr()).await.map_err(|e| {
                DbError::connect_failed(
                    format!("Failed to reach SQL Server: {}", e),
                    "Check that the host is reachable and the port is open",
                )
            })?;
            tcp.set_nodelay(true)
                .map_err(|e| DbError::connect_failed(e.to_string(), "Check the network stack"))?;

            Client::connect(config, tcp.compat_write())
                .await
                .map_err(|e| DbError::from(e).into_connect_failed())
        })
        .await
        .map_err(|e| e.redact(secret.expose()))?;

        debug!(host = %profile.host(), port = profile.port(), "Opened SQL Server connection");
        Ok(Box::new(MsSqlEngineConnection {
            client,
            database: profile.database().map(str::to_string),
        }))
    }

    fn list_tables_query(&self) -> String {
        "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_TYPE = 'BASE TABLE'"
            .to_string()
    }

    fn list_columns_query(&self, table: &TableName) -> String {
        format!(
            "SELECT COLUMN_NAME, DATA_TYPE FROM INFORMATION_SCHEMA.COLUMNS \
             WHERE TABLE_SCHEMA = SCHEMA_NAME() AND TABLE_NAME = '{}' \
             ORDER BY ORDINAL_POSITION",
            table
        )
    }

    fn server_info_query(&self) -> String {
        "SELECT @@VERSION, DB_NAME(), SYSTEM_USER".to_string()
    }
}

struct MsSqlEngineConnection {
    client: TdsClient,
    /// The profile's database, restored on reset.
    database: Option<String>,
}

/// First result set of a TDS response, columns included when it has no rows.
async fn first_set(mut stream: QueryStream<'_>) -> DbResult<NativeResult> {
    // Column metadata arrives before the first row and survives empty results
    let columns = stream.columns().await?.map(normalize::mssql::columns);
    let rows = stream.into_first_result().await?;

    match columns {
        Some(columns) => Ok(NativeResult::with_rows(
            columns,
            rows.iter().map(normalize::mssql::decode_row).collect(),
        )),
        // The TDS token stream does not surface DONE counts through tiberius
        None => Ok(NativeResult::empty()),
    }
}

#[async_trait]
impl EngineConnection for MsSqlEngineConnection {
    async fn ping(&mut self) -> DbResult<()> {
        let ping = async {
            self.client.simple_query(PING_SQL).await?.into_row().await?;
            Ok::<_, DbError>(())
        };
        ping.await.map_err(DbError::into_connect_failed)
    }

    async fn run(&mut self, sql: &str) -> DbResult<NativeResult> {
        let stream = self.client.simple_query(sql).await?;
        first_set(stream).await
    }

    async fn run_with_params(&mut self, sql: &str, params: &[BindValue]) -> DbResult<NativeResult> {
        let mut query = Query::new(sql);
        for param in params {
            match param {
                BindValue::Null => query.bind(Option::<String>::None),
                BindValue::Bool(b) => query.bind(*b),
                BindValue::Int(i) => query.bind(*i),
                BindValue::Float(f) => query.bind(*f),
                BindValue::Text(t) => query.bind(t.clone()),
            }
        }
        let stream = query.query(&mut self.client).await?;
        first_set(stream).await
    }

    async fn reset(&mut self) -> DbResult<()> {
        let mut batch = String::from("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION;");
        if let Some(database) = &self.database {
            batch.push_str(&format!(" USE [{}];", database.replace(']', "]]")));
        }
        self.client.simple_query(batch).await?.into_results().await?;
        Ok(())
    }

    async fn close(self: Box<Self>) {
        if let Err(e) = self.client.close().await {
            debug!(error = %e, "Error closing SQL Server connection");
        }
    }
}
