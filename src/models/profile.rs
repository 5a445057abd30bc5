//! Connection profile data models.
//!
//! A [`ConnectionProfile`] names one target database. It is handed to the gateway
//! on every call and is read-only here; the gateway never persists it. Profiles
//! with identical connection parameters reduce to the same [`PoolKey`] and
//! therefore share one pool.

use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::str::FromStr;

/// Supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineType {
    /// Includes MariaDB
    MySql,
    /// Microsoft SQL Server / Azure SQL
    MsSql,
    Oracle,
    PostgreSql,
}

impl EngineType {
    pub const ALL: [EngineType; 4] = [
        EngineType::MySql,
        EngineType::MsSql,
        EngineType::Oracle,
        EngineType::PostgreSql,
    ];

    /// Wire name used in profiles and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::MsSql => "mssql",
            Self::Oracle => "oracle",
            Self::PostgreSql => "postgresql",
        }
    }

    /// Get the display name for this engine.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::MySql => "MySQL",
            Self::MsSql => "SQL Server",
            Self::Oracle => "Oracle",
            Self::PostgreSql => "PostgreSQL",
        }
    }

    /// Get the default listener port for this engine.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::MySql => 3306,
            Self::MsSql => 1433,
            Self::Oracle => 1521,
            Self::PostgreSql => 5432,
        }
    }
}

impl std::fmt::Display for EngineType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EngineType {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Self::MySql),
            "mssql" | "sqlserver" | "sql_server" | "tds" => Ok(Self::MsSql),
            "oracle" => Ok(Self::Oracle),
            "postgresql" | "postgres" | "pg" => Ok(Self::PostgreSql),
            _ => Err(DbError::unsupported_engine(s)),
        }
    }
}

/// Parameters identifying one target database.
///
/// Fields are private so the engine cannot change after construction; pointing
/// the same host at a different engine means building a new profile.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionProfile {
    /// Caller-side identifier (e.g. the stored connection's id). Request metadata
    /// only: not part of the pool key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(rename = "engineType")]
    engine: EngineType,
    host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    username: String,
    secret_ref: String,
    /// Database name; the service name for Oracle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    database: Option<String>,
    #[serde(default, rename = "useTLS")]
    use_tls: bool,
}

impl ConnectionProfile {
    pub fn new(
        engine: EngineType,
        host: impl Into<String>,
        username: impl Into<String>,
        secret_ref: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            engine,
            host: host.into(),
            port: None,
            username: username.into(),
            secret_ref: secret_ref.into(),
            database: None,
            use_tls: false,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        let database = database.into();
        self.database = (!database.is_empty()).then_some(database);
        self
    }

    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn engine(&self) -> EngineType {
        self.engine
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Explicit port, falling back to the engine's default listener port.
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.engine.default_port())
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn secret_ref(&self) -> &str {
        &self.secret_ref
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn use_tls(&self) -> bool {
        self.use_tls
    }

    /// Reject profiles that cannot possibly be opened.
    pub fn validate(&self) -> DbResult<()> {
        if self.host.trim().is_empty() {
            return Err(DbError::invalid_input("Profile host cannot be empty"));
        }
        if self.username.trim().is_empty() {
            return Err(DbError::invalid_input("Profile username cannot be empty"));
        }
        if self.secret_ref.trim().is_empty() {
            return Err(DbError::invalid_input(
                "Profile secretRef cannot be empty; credentials are resolved through it",
            ));
        }
        if self.port == Some(0) {
            return Err(DbError::invalid_input("Profile port must be greater than 0"));
        }
        Ok(())
    }

    /// Compute the pool identity for this profile.
    pub fn pool_key(&self) -> PoolKey {
        PoolKey {
            engine: self.engine,
            host: self.host.trim().to_ascii_lowercase(),
            port: self.port(),
            username: self.username.clone(),
            secret_ref: self.secret_ref.clone(),
            database: self.database.clone(),
            use_tls: self.use_tls,
        }
    }
}

impl std::fmt::Debug for ConnectionProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionProfile")
            .field("id", &self.id)
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port())
            .field("username", &self.username)
            .field("database", &self.database)
            .field("use_tls", &self.use_tls)
            .finish_non_exhaustive()
    }
}

/// Deterministic identity of a set of connection parameters.
///
/// Equal keys share one pool. Hostnames are case-folded and the port is the
/// effective one, so `DB.example.com` and `db.example.com:3306` collapse together.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    engine: EngineType,
    host: String,
    port: u16,
    username: String,
    secret_ref: String,
    database: Option<String>,
    use_tls: bool,
}

impl PoolKey {
    pub fn engine(&self) -> EngineType {
        self.engine
    }

    /// Short stable hash of the key, safe to print in logs and stats.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [
            self.engine.as_str(),
            self.host.as_str(),
            &self.port.to_string(),
            self.username.as_str(),
            self.secret_ref.as_str(),
            self.database.as_deref().unwrap_or(""),
            if self.use_tls { "tls" } else { "plain" },
        ] {
            hasher.update(part.as_bytes());
            // field separator so ("ab","c") and ("a","bc") differ
            hasher.update([0u8]);
        }
        let digest = hex::encode(hasher.finalize());
        digest[..16].to_string()
    }
}

impl std::fmt::Display for PoolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.engine, self.fingerprint())
    }
}
