//! Error types for the database gateway.
//!
//! This module defines the gateway's error taxonomy using `thiserror`. The four
//! kinds callers are expected to branch on are `ConnectFailed`, `PoolExhausted`,
//! `QueryFailed` and `UnsupportedEngine`; `InvalidInput` and `Internal` cover
//! malformed requests and broken invariants.
//!
//! Driver errors are converted per phase: failures while opening a handle become
//! `ConnectFailed`, failures while running a statement become `QueryFailed`
//! (flagged `connection_lost` when the transport itself broke).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    ConnectFailed { message: String, suggestion: String },

    #[error("Pool exhausted: no connection available for pool {pool} within {waited_ms}ms")]
    PoolExhausted { pool: String, waited_ms: u64 },

    #[error("Query failed: {message}")]
    QueryFailed {
        message: String,
        /// SQLSTATE, SQL Server error number or ORA code when the server reported one.
        sql_state: Option<String>,
        /// True when the transport broke mid-statement rather than the server rejecting it.
        connection_lost: bool,
    },

    #[error("Unsupported engine: {engine}")]
    UnsupportedEngine { engine: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Stable, serializable name of an error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConnectFailed,
    PoolExhausted,
    QueryFailed,
    UnsupportedEngine,
    InvalidInput,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectFailed => "connect_failed",
            Self::PoolExhausted => "pool_exhausted",
            Self::QueryFailed => "query_failed",
            Self::UnsupportedEngine => "unsupported_engine",
            Self::InvalidInput => "invalid_input",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DbError {
    /// Create a connect error with a helpful suggestion.
    pub fn connect_failed(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConnectFailed {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a pool exhausted error.
    pub fn pool_exhausted(pool: impl Into<String>, waited_ms: u64) -> Self {
        Self::PoolExhausted {
            pool: pool.into(),
            waited_ms,
        }
    }

    /// Create a query error reported by the server, with optional native code.
    pub fn query_failed(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::QueryFailed {
            message: message.into(),
            sql_state,
            connection_lost: false,
        }
    }

    /// Create a query error caused by the connection dropping mid-statement.
    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self::QueryFailed {
            message: message.into(),
            sql_state: None,
            connection_lost: true,
        }
    }

    /// Create an unsupported engine error.
    pub fn unsupported_engine(engine: impl Into<String>) -> Self {
        Self::UnsupportedEngine {
            engine: engine.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectFailed { .. } => ErrorKind::ConnectFailed,
            Self::PoolExhausted { .. } => ErrorKind::PoolExhausted,
            Self::QueryFailed { .. } => ErrorKind::QueryFailed,
            Self::UnsupportedEngine { .. } => ErrorKind::UnsupportedEngine,
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::ConnectFailed { suggestion, .. } => Some(suggestion),
            Self::PoolExhausted { .. } => {
                Some("Retry later or raise max_connections / acquire_timeout for this pool")
            }
            Self::UnsupportedEngine { .. } => {
                Some("Supported engines are mysql, mssql, oracle and postgresql")
            }
            _ => None,
        }
    }

    /// Native error code reported by the server, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::QueryFailed { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// Whether the handle that produced this error must be evicted from its pool.
    pub fn is_connection_fault(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailed { .. }
                | Self::QueryFailed {
                    connection_lost: true,
                    ..
                }
        )
    }

    /// Re-phase an error raised while opening a handle: anything the driver reported
    /// becomes `ConnectFailed`.
    pub fn into_connect_failed(self) -> Self {
        match self {
            Self::QueryFailed {
                message, sql_state, ..
            } => {
                let message = match sql_state {
                    Some(code) => format!("{} (code: {})", message, code),
                    None => message,
                };
                Self::connect_failed(message, "Check credentials, database name and permissions")
            }
            other => other,
        }
    }

    /// Replace every occurrence of `secret` in this error's text with a mask.
    pub fn redact(self, secret: &str) -> Self {
        if secret.is_empty() {
            return self;
        }
        let scrub = |s: String| s.replace(secret, "****");
        match self {
            Self::ConnectFailed {
                message,
                suggestion,
            } => Self::ConnectFailed {
                message: scrub(message),
                suggestion,
            },
            Self::QueryFailed {
                message,
                sql_state,
                connection_lost,
            } => Self::QueryFailed {
                message: scrub(message),
                sql_state,
                connection_lost,
            },
            Self::InvalidInput { message } => Self::InvalidInput {
                message: scrub(message),
            },
            Self::Internal { message } => Self::Internal {
                message: scrub(message),
            },
            other => other,
        }
    }
}

/// Convert sqlx errors raised while running a statement.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connect_failed(
                msg.to_string(),
                "Check the connection profile fields",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::query_failed(db_err.message(), code)
            }
            sqlx::Error::Io(io_err) => DbError::connection_lost(format!("I/O error: {}", io_err)),
            sqlx::Error::Tls(tls_err) => DbError::connect_failed(
                format!("TLS error: {}", tls_err),
                "Verify the server's TLS configuration or disable useTLS",
            ),
            sqlx::Error::Protocol(msg) => {
                DbError::connection_lost(format!("Protocol error: {}", msg))
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => {
                DbError::connection_lost(err.to_string())
            }
            sqlx::Error::ColumnDecode { index, source } => DbError::query_failed(
                format!("Failed to decode column {}: {}", index, source),
                None,
            ),
            sqlx::Error::Decode(source) => {
                DbError::query_failed(format!("Decode error: {}", source), None)
            }
            _ => DbError::query_failed(err.to_string(), None),
        }
    }
}

/// Convert SQL Server (TDS) errors raised while running a statement.
impl From<tiberius::error::Error> for DbError {
    fn from(err: tiberius::error::Error) -> Self {
        use tiberius::error::Error as TdsError;
        match err {
            TdsError::Server(token) => {
                let code = token.code().to_string();
                DbError::query_failed(token.message().to_string(), Some(code))
            }
            TdsError::Io { .. } | TdsError::Protocol(_) | TdsError::Tls(_) => {
                DbError::connection_lost(err.to_string())
            }
            TdsError::Routing { host, port } => DbError::connect_failed(
                format!("Server requested a redirect to {}:{}", host, port),
                "Point the profile at the routed host (Azure SQL gateway redirect)",
            ),
            other => DbError::query_failed(other.to_string(), None),
        }
    }
}

/// Convert Oracle (ODPI-C) errors raised while running a statement.
impl From<oracle::Error> for DbError {
    fn from(err: oracle::Error) -> Self {
        match err.db_error() {
            Some(db_err) => {
                let code = format!("ORA-{:05}", db_err.code());
                // ORA-03113 / ORA-03114 / ORA-03135: end-of-file or lost contact
                if matches!(db_err.code(), 3113 | 3114 | 3135) {
                    DbError::connection_lost(db_err.message().to_string())
                } else {
                    DbError::query_failed(db_err.message().to_string(), Some(code))
                }
            }
            None => DbError::query_failed(err.to_string(), None),
        }
    }
}

/// Result type alias for gateway operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::connect_failed("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));
        assert_eq!(err.kind(), ErrorKind::ConnectFailed);
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::connect_failed("refused", "Check the port");
        assert_eq!(err.suggestion(), Some("Check the port"));
        assert!(DbError::query_failed("x", None).suggestion().is_none());
    }

    #[test]
    fn test_connection_fault_classification() {
        assert!(DbError::connect_failed("err", "sugg").is_connection_fault());
        assert!(DbError::connection_lost("reset by peer").is_connection_fault());
        assert!(!DbError::query_failed("syntax", Some("42601".into())).is_connection_fault());
        assert!(!DbError::pool_exhausted("abc", 10).is_connection_fault());
    }

    #[test]
    fn test_redact_masks_password_everywhere() {
        let err = DbError::connect_failed("login failed for secret-pw@host", "hint")
            .redact("secret-pw");
        assert!(!err.to_string().contains("secret-pw"));
        assert!(err.to_string().contains("****"));
    }

    #[test]
    fn test_redact_with_empty_secret_is_noop() {
        let err = DbError::query_failed("boom", None).redact("");
        assert_eq!(err.to_string(), "Query failed: boom");
    }

    #[test]
    fn test_into_connect_failed_keeps_code() {
        let err = DbError::query_failed("Access denied", Some("28000".into())).into_connect_failed();
        assert_eq!(err.kind(), ErrorKind::ConnectFailed);
        assert!(err.to_string().contains("28000"));
    }

    #[test]
    fn test_sqlx_protocol_and_row_errors() {
        let err: DbError = sqlx::Error::Protocol("unexpected packet".into()).into();
        assert!(err.is_connection_fault());
        let err: DbError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.kind(), ErrorKind::QueryFailed);
    }

    #[derive(Debug)]
    struct DuplicateKey;

    impl std::fmt::Display for DuplicateKey {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("duplicate key value violates unique constraint \"orders_pkey\"")
        }
    }

    impl std::error::Error for DuplicateKey {}

    impl sqlx::error::DatabaseError for DuplicateKey {
        fn message(&self) -> &str {
            "duplicate key value violates unique constraint \"orders_pkey\""
        }

        fn code(&self) -> Option<std::borrow::Cow<'_, str>> {
            Some("23505".into())
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> sqlx::error::ErrorKind {
            sqlx::error::ErrorKind::UniqueViolation
        }
    }

    #[test]
    fn test_sqlx_database_error_is_query_failed() {
        let err: DbError = sqlx::Error::Database(Box::new(DuplicateKey)).into();
        assert_eq!(err.kind(), ErrorKind::QueryFailed);
        assert_eq!(err.sql_state(), Some("23505"));
        assert!(!err.is_connection_fault());
        assert!(err.to_string().contains("orders_pkey"));
    }

    #[test]
    fn test_kind_names_are_stable() {
        assert_eq!(ErrorKind::PoolExhausted.as_str(), "pool_exhausted");
        assert_eq!(
            DbError::unsupported_engine("db2").kind().to_string(),
            "unsupported_engine"
        );
    }
}
