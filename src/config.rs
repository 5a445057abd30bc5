//! Configuration handling for the database gateway.
//!
//! Library callers build a [`GatewayConfig`] directly; the binary fills one from
//! CLI arguments and environment variables via [`Config`].

use crate::error::{DbError, DbResult};
use crate::models::{ConnectionProfile, EngineType};
use clap::{Args, Parser, Subcommand};
use percent_encoding::percent_decode_str;
use std::time::Duration;
use url::Url;

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_IDLE_SECS: u64 = 600;
pub const DEFAULT_MAX_LIFETIME_SECS: u64 = 1800;

// Whole-pool teardown defaults
pub const DEFAULT_POOL_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 60;

/// Per-pool sizing and eviction options.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct PoolOptions {
    /// Maximum live handles per pool (default: 10)
    pub max_connections: Option<u32>,
    /// How long Acquire waits for a free handle before PoolExhausted (default: 30)
    pub acquire_timeout_secs: Option<u64>,
    /// Idle handles older than this are closed (default: 600)
    pub max_idle_secs: Option<u64>,
    /// Handles older than this are closed when next returned or reaped (default: 1800)
    pub max_lifetime_secs: Option<u64>,
    /// Whether a handle is pinged before going back to the free list (default: true)
    pub test_on_release: Option<bool>,
    /// Pools with no activity for this long are torn down (default: 600)
    pub pool_idle_timeout_secs: Option<u64>,
    /// Reaper interval in seconds (default: 60)
    pub cleanup_interval_secs: Option<u64>,
}

impl PoolOptions {
    /// Get max_connections with default value.
    pub fn max_connections_or_default(&self) -> u32 {
        self.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS)
    }

    /// Get acquire_timeout with default value.
    pub fn acquire_timeout_or_default(&self) -> Duration {
        Duration::from_secs(
            self.acquire_timeout_secs
                .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        )
    }

    /// Get max_idle with default value.
    pub fn max_idle_or_default(&self) -> Duration {
        Duration::from_secs(self.max_idle_secs.unwrap_or(DEFAULT_MAX_IDLE_SECS))
    }

    /// Get max_lifetime with default value.
    pub fn max_lifetime_or_default(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs.unwrap_or(DEFAULT_MAX_LIFETIME_SECS))
    }

    /// Get test_on_release with default value.
    pub fn test_on_release_or_default(&self) -> bool {
        self.test_on_release.unwrap_or(true)
    }

    /// Get pool_idle_timeout with default value.
    pub fn pool_idle_timeout_or_default(&self) -> Duration {
        Duration::from_secs(
            self.pool_idle_timeout_secs
                .unwrap_or(DEFAULT_POOL_IDLE_TIMEOUT_SECS),
        )
    }

    /// Get cleanup_interval with default value.
    pub fn cleanup_interval_or_default(&self) -> Duration {
        Duration::from_secs(
            self.cleanup_interval_secs
                .unwrap_or(DEFAULT_CLEANUP_INTERVAL_SECS),
        )
    }

    /// Validate pool options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_connections == Some(0) {
            return Err("max_connections must be greater than 0".to_string());
        }
        if self.acquire_timeout_secs == Some(0) {
            return Err("acquire_timeout must be greater than 0".to_string());
        }
        if self.cleanup_interval_secs == Some(0) {
            return Err("cleanup_interval must be greater than 0".to_string());
        }
        if let (Some(idle), Some(lifetime)) = (self.max_idle_secs, self.max_lifetime_secs) {
            if idle > lifetime {
                return Err(format!(
                    "max_idle ({}s) cannot exceed max_lifetime ({}s)",
                    idle, lifetime
                ));
            }
        }
        Ok(())
    }
}

/// Runtime configuration of a gateway instance.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GatewayConfig {
    /// Upper bound on opening one handle, TCP connect through login
    pub connect_timeout_secs: u64,
    /// Upper bound on running one statement
    pub query_timeout_secs: u64,
    #[serde(default)]
    pub pool: PoolOptions,
}

impl GatewayConfig {
    /// Get the connect timeout as a Duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get the query timeout as a Duration.
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn validate(&self) -> DbResult<()> {
        if self.connect_timeout_secs == 0 {
            return Err(DbError::invalid_input(
                "connect_timeout must be greater than 0",
            ));
        }
        if self.query_timeout_secs == 0 {
            return Err(DbError::invalid_input("query_timeout must be greater than 0"));
        }
        self.pool.validate().map_err(DbError::invalid_input)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            query_timeout_secs: DEFAULT_QUERY_TIMEOUT_SECS,
            pool: PoolOptions::default(),
        }
    }
}

/// Parse a profile URL of the form
/// `engine://user@host[:port][/database]?secret=REF[&tls=true][&id=NAME]`.
///
/// Passwords embedded in the URL are rejected: credentials always go through
/// the secret reference.
pub fn parse_profile_url(s: &str) -> DbResult<ConnectionProfile> {
    let url = Url::parse(s).map_err(|e| DbError::invalid_input(format!("Invalid profile URL: {e}")))?;
    let engine: EngineType = url.scheme().parse()?;

    if url.password().is_some() {
        return Err(DbError::invalid_input(
            "Passwords must not be embedded in the profile URL; pass ?secret=<reference> instead",
        ));
    }

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| DbError::invalid_input("Profile URL has no host"))?;

    let mut secret_ref = None;
    let mut use_tls = false;
    let mut id = None;
    let mut user_param = None;
    for (key, value) in url.query_pairs() {
        match key.to_ascii_lowercase().as_str() {
            "secret" | "secretref" => secret_ref = Some(value.into_owned()),
            "tls" | "ssl" => use_tls = value.eq_ignore_ascii_case("true") || value == "1",
            "id" => id = Some(value.into_owned()),
            "user" => user_param = Some(value.into_owned()),
            other => {
                return Err(DbError::invalid_input(format!(
                    "Unknown profile URL option '{}'",
                    other
                )));
            }
        }
    }

    let username = match url.username() {
        "" => user_param.ok_or_else(|| DbError::invalid_input("Profile URL has no username"))?,
        name => decode_component(name, "username")?,
    };
    let secret_ref = secret_ref
        .ok_or_else(|| DbError::invalid_input("Profile URL needs a ?secret=<reference> option"))?;

    let mut profile =
        ConnectionProfile::new(engine, host, username, secret_ref).with_tls(use_tls);
    if let Some(port) = url.port() {
        profile = profile.with_port(port);
    }
    let database = decode_component(url.path().trim_start_matches('/'), "database")?;
    if !database.is_empty() {
        profile = profile.with_database(database);
    }
    if let Some(id) = id {
        profile = profile.with_id(id);
    }
    profile.validate()?;
    Ok(profile)
}

/// `url` leaves userinfo and path percent-encoded.
fn decode_component(raw: &str, what: &str) -> DbResult<String> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| DbError::invalid_input(format!("Profile URL {} is not valid UTF-8", what)))
}

/// Parse `--param` values. Each must be one JSON literal.
pub fn parse_params(raw: &[String]) -> DbResult<Vec<serde_json::Value>> {
    raw.iter()
        .enumerate()
        .map(|(idx, text)| {
            serde_json::from_str(text).map_err(|e| {
                DbError::invalid_input(format!("Parameter {} is not valid JSON: {}", idx + 1, e))
            })
        })
        .collect()
}

/// Target profile for one CLI invocation.
#[derive(Debug, Clone, Args)]
pub struct ProfileArgs {
    /// Profile URL: engine://user@host[:port][/database]?secret=ENV_VAR[&tls=true]
    #[arg(short, long = "profile", value_name = "URL", env = "GATEWAY_PROFILE")]
    pub profile: String,
}

impl ProfileArgs {
    pub fn to_profile(&self) -> DbResult<ConnectionProfile> {
        parse_profile_url(&self.profile)
    }
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Check that the target is reachable; prints {"ok": bool}
    Test(ProfileArgs),
    /// Run a statement verbatim and print the normalized result
    Query {
        #[command(flatten)]
        target: ProfileArgs,
        /// SQL to run
        #[arg(short, long)]
        sql: String,
        /// Positional parameter as a JSON literal (`42`, `"text"`, `null`); repeatable
        #[arg(long = "param", value_name = "JSON")]
        params: Vec<String>,
    },
    /// List tables of the target database
    Tables(ProfileArgs),
    /// List columns of one table
    Columns {
        #[command(flatten)]
        target: ProfileArgs,
        /// Table name (plain identifier)
        #[arg(short, long)]
        table: String,
    },
    /// Print server version, current database and user
    Info(ProfileArgs),
}

/// Command-line configuration for the gateway binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "db-gateway",
    about = "Uniform access to MySQL, SQL Server, Oracle and PostgreSQL databases",
    version,
    author
)]
pub struct Config {
    #[command(subcommand)]
    pub command: Command,

    /// Connection timeout in seconds
    #[arg(
        long,
        global = true,
        default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS,
        env = "GATEWAY_CONNECT_TIMEOUT"
    )]
    pub connect_timeout: u64,

    /// Query timeout in seconds
    #[arg(
        long,
        global = true,
        default_value_t = DEFAULT_QUERY_TIMEOUT_SECS,
        env = "GATEWAY_QUERY_TIMEOUT"
    )]
    pub query_timeout: u64,

    /// Maximum live connections per pool
    #[arg(long, global = true, env = "GATEWAY_MAX_CONNECTIONS")]
    pub max_connections: Option<u32>,

    /// Seconds to wait for a free pooled connection
    #[arg(long, global = true, env = "GATEWAY_ACQUIRE_TIMEOUT")]
    pub acquire_timeout: Option<u64>,

    /// Prefix prepended to secret references before the environment lookup
    #[arg(long, global = true, env = "GATEWAY_SECRET_PREFIX")]
    pub secret_prefix: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn", env = "GATEWAY_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, global = true, env = "GATEWAY_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Build the gateway runtime configuration from CLI arguments.
    pub fn gateway_config(&self) -> DbResult<GatewayConfig> {
        let config = GatewayConfig {
            connect_timeout_secs: self.connect_timeout,
            query_timeout_secs: self.query_timeout,
            pool: PoolOptions {
                max_connections: self.max_connections,
                acquire_timeout_secs: self.acquire_timeout,
                ..PoolOptions::default()
            },
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_option_defaults() {
        let opts = PoolOptions::default();
        assert_eq!(opts.max_connections_or_default(), DEFAULT_MAX_CONNECTIONS);
        assert_eq!(opts.acquire_timeout_or_default(), Duration::from_secs(30));
        assert_eq!(opts.max_idle_or_default(), Duration::from_secs(600));
        assert!(opts.test_on_release_or_default());
    }

    #[test]
    fn test_pool_options_validate() {
        let zero = PoolOptions {
            max_connections: Some(0),
            ..Default::default()
        };
        assert!(zero.validate().is_err());

        let inverted = PoolOptions {
            max_idle_secs: Some(100),
            max_lifetime_secs: Some(10),
            ..Default::default()
        };
        assert!(inverted.validate().unwrap_err().contains("max_idle"));
        assert!(PoolOptions::default().validate().is_ok());
    }

    #[test]
    fn test_gateway_config_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.query_timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_gateway_config_rejects_zero_timeouts() {
        let config = GatewayConfig {
            connect_timeout_secs: 0,
            ..GatewayConfig::default()
        };
        assert!(matches!(config.validate(), Err(DbError::InvalidInput { .. })));
    }

    #[test]
    fn test_parse_profile_url_full() {
        let profile =
            parse_profile_url("mysql://app@db.example.com:3307/shop?secret=SHOP_PW&tls=true&id=c1")
                .unwrap();
        assert_eq!(profile.engine(), EngineType::MySql);
        assert_eq!(profile.host(), "db.example.com");
        assert_eq!(profile.port(), 3307);
        assert_eq!(profile.username(), "app");
        assert_eq!(profile.secret_ref(), "SHOP_PW");
        assert_eq!(profile.database(), Some("shop"));
        assert!(profile.use_tls());
        assert_eq!(profile.id(), Some("c1"));
    }

    #[test]
    fn test_parse_profile_url_defaults() {
        let profile = parse_profile_url("oracle://scott@ora.internal/ORCLPDB1?secret=ORA").unwrap();
        assert_eq!(profile.port(), 1521);
        assert!(!profile.use_tls());
        assert_eq!(profile.database(), Some("ORCLPDB1"));

        let profile = parse_profile_url("mssql://sa@sql01?secret=SA_PW").unwrap();
        assert_eq!(profile.port(), 1433);
        assert_eq!(profile.database(), None);
    }

    #[test]
    fn test_parse_profile_url_decodes_escapes() {
        let profile =
            parse_profile_url("postgres://app%40corp@h/sales%20eu?secret=PG_PW").unwrap();
        assert_eq!(profile.username(), "app@corp");
        assert_eq!(profile.database(), Some("sales eu"));

        let err = parse_profile_url("postgres://app%FF@h/db?secret=PG_PW").unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
    }

    #[test]
    fn test_query_params_are_json_literals() {
        let config = Config::parse_from([
            "db-gateway",
            "query",
            "--profile",
            "mysql://app@h/shop?secret=X",
            "--sql",
            "SELECT * FROM orders WHERE id = ? AND note = ?",
            "--param",
            "7",
            "--param",
            "\"rush\"",
        ]);
        let Command::Query { params, .. } = config.command else {
            panic!("expected a query command");
        };
        let params = parse_params(&params).unwrap();
        assert_eq!(params, vec![serde_json::json!(7), serde_json::json!("rush")]);

        let err = parse_params(&["rush".to_string()]).unwrap_err();
        assert!(err.to_string().contains("Parameter 1"));
    }

    #[test]
    fn test_parse_profile_url_rejects_embedded_password() {
        let err = parse_profile_url("postgres://app:hunter2@h/db?secret=X").unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
        assert!(!err.to_string().contains("hunter2"));
    }

    #[test]
    fn test_parse_profile_url_requires_secret() {
        assert!(parse_profile_url("postgres://app@h/db").is_err());
    }

    #[test]
    fn test_parse_profile_url_unknown_engine() {
        let err = parse_profile_url("db2://app@h/db?secret=X").unwrap_err();
        assert!(matches!(err, DbError::UnsupportedEngine { .. }));
    }

    #[test]
    fn test_parse_profile_url_unknown_option() {
        let err = parse_profile_url("mysql://app@h/db?secret=X&writable=true").unwrap_err();
        assert!(err.to_string().contains("writable"));
    }

    #[test]
    fn test_cli_builds_gateway_config() {
        let config = Config::parse_from([
            "db-gateway",
            "--max-connections",
            "4",
            "tables",
            "--profile",
            "mysql://app@h/shop?secret=X",
        ]);
        let gateway = config.gateway_config().unwrap();
        assert_eq!(gateway.pool.max_connections_or_default(), 4);
        assert!(matches!(config.command, Command::Tables(_)));
    }
}
