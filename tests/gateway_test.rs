//! Integration tests for the gateway operations, against the scripted fake engine.

mod common;

use common::{
    CURRENT_DB_SQL, FakeAdapter, FakeEngine, INFO_SQL, TABLES_SQL, columns_sql, fake_gateway,
    fake_gateway_with, pool_options, secrets, settle, shop_profile,
};
use db_gateway::config::{GatewayConfig, PoolOptions};
use db_gateway::db::oracle::OracleAdapter;
use db_gateway::db::{AdapterRegistry, BindValue, EngineAdapter, NativeResult, TableName};
use db_gateway::error::{DbError, ErrorKind};
use db_gateway::gateway::Gateway;
use db_gateway::models::{ColumnInfo, ConnectionProfile, EngineType};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::Ordering;

const PRODUCTS_SQL: &str = "SELECT id, name FROM products LIMIT 2";

fn script_products(state: &FakeEngine) {
    state.script_rows(
        PRODUCTS_SQL,
        &[("id", "INT"), ("name", "VARCHAR")],
        vec![vec![json!(1), json!("Widget")], vec![json!(2), json!("Gadget")]],
    );
}

#[tokio::test(start_paused = true)]
async fn test_execute_returns_rows_in_column_order() {
    let state = FakeEngine::new();
    script_products(&state);
    let gateway = fake_gateway(&state, PoolOptions::default());

    let result = gateway.execute(&shop_profile(), PRODUCTS_SQL).await.unwrap();

    assert_eq!(result.columns, vec!["id", "name"]);
    assert_eq!(
        serde_json::to_value(&result.rows).unwrap(),
        json!([{"id": 1, "name": "Widget"}, {"id": 2, "name": "Gadget"}])
    );
    assert_eq!(result.column_types, vec!["integer", "text"]);
}

#[tokio::test(start_paused = true)]
async fn test_execute_pure_select_is_idempotent() {
    let state = FakeEngine::new();
    script_products(&state);
    let gateway = fake_gateway(&state, PoolOptions::default());
    let profile = shop_profile();

    let first = gateway.execute(&profile, PRODUCTS_SQL).await.unwrap();
    let second = gateway.execute(&profile, PRODUCTS_SQL).await.unwrap();

    assert_eq!(
        serde_json::to_vec(&first.rows).unwrap(),
        serde_json::to_vec(&second.rows).unwrap()
    );
    // Every call reached the database; nothing was served from a cache
    assert_eq!(state.executed().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_execute_ddl_returns_empty_result() {
    let state = FakeEngine::new();
    let gateway = fake_gateway(&state, PoolOptions::default());

    let result = gateway
        .execute(&shop_profile(), "CREATE TABLE audit (id INT)")
        .await
        .unwrap();

    assert!(result.is_empty());
    assert_eq!(result.rows_affected, None);
}

#[tokio::test(start_paused = true)]
async fn test_execute_dml_reports_affected_rows() {
    let state = FakeEngine::new();
    state.script("DELETE FROM orders WHERE id < 10", NativeResult::affected(3));
    let gateway = fake_gateway(&state, PoolOptions::default());

    let result = gateway
        .execute(&shop_profile(), "DELETE FROM orders WHERE id < 10")
        .await
        .unwrap();

    assert!(result.rows.is_empty());
    assert_eq!(result.rows_affected, Some(3));
}

#[tokio::test(start_paused = true)]
async fn test_execute_propagates_query_failed() {
    let state = FakeEngine::new();
    let gateway = fake_gateway(&state, PoolOptions::default());

    let err = gateway.execute(&shop_profile(), "FAIL").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::QueryFailed);
    assert_eq!(err.sql_state(), Some("42000"));
}

#[tokio::test(start_paused = true)]
async fn test_execute_does_not_retry_on_lost_connection() {
    let state = FakeEngine::new();
    let gateway = fake_gateway(&state, PoolOptions::default());

    let err = gateway.execute(&shop_profile(), "DROP").await.unwrap_err();
    assert!(err.is_connection_fault());
    assert_eq!(state.executed(), vec!["DROP"]);

    settle().await;
    assert_eq!(state.closed(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_execute_times_out_and_discards_handle() {
    let state = FakeEngine::new();
    let gateway = fake_gateway_with(&state, PoolOptions::default(), 2);

    let err = gateway.execute(&shop_profile(), "SLEEP 60").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::QueryFailed);
    assert!(err.to_string().contains("timed out"));

    settle().await;
    assert_eq!(state.closed(), 1);
    assert_eq!(gateway.pool_stats().await[0].size, 0);
}

#[tokio::test(start_paused = true)]
async fn test_execute_pool_exhausted() {
    let state = FakeEngine::new();
    let gateway = Arc::new(fake_gateway(&state, pool_options(1, 1)));
    let profile = shop_profile();

    let busy = {
        let gateway = Arc::clone(&gateway);
        let profile = profile.clone();
        tokio::spawn(async move { gateway.execute(&profile, "SLEEP 5").await })
    };
    settle().await;

    let err = gateway.execute(&profile, PRODUCTS_SQL).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PoolExhausted);

    busy.await.unwrap().unwrap();
    assert_eq!(state.max_live.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_list_tables_keeps_engine_order() {
    let state = FakeEngine::new();
    state.script_rows(
        TABLES_SQL,
        &[("Tables_in_shop", "VARCHAR")],
        vec![vec![json!("products")], vec![json!("orders")]],
    );
    let gateway = fake_gateway(&state, PoolOptions::default());

    let tables = gateway.list_tables(&shop_profile()).await.unwrap();
    assert_eq!(tables, vec!["products", "orders"]);
}

#[tokio::test(start_paused = true)]
async fn test_list_tables_skips_null_names() {
    let state = FakeEngine::new();
    state.script_rows(
        TABLES_SQL,
        &[("name", "VARCHAR")],
        vec![vec![json!("products")], vec![json!(null)]],
    );
    let gateway = fake_gateway(&state, PoolOptions::default());

    let tables = gateway.list_tables(&shop_profile()).await.unwrap();
    assert_eq!(tables, vec!["products"]);
}

#[tokio::test(start_paused = true)]
async fn test_list_columns_preserves_physical_order() {
    let state = FakeEngine::new();
    state.script_rows(
        &columns_sql("t"),
        &[("column_name", "VARCHAR"), ("data_type", "VARCHAR")],
        vec![
            vec![json!("b"), json!("int")],
            vec![json!("a"), json!("varchar")],
            vec![json!("c"), json!("datetime")],
        ],
    );
    state.script_rows(
        "SELECT * FROM t",
        &[("b", "INT"), ("a", "VARCHAR"), ("c", "DATETIME")],
        vec![vec![json!(1), json!("x"), json!("2024-01-02T03:04:05")]],
    );
    let gateway = fake_gateway(&state, PoolOptions::default());
    let profile = shop_profile();

    let columns = gateway.list_columns(&profile, "t").await.unwrap();
    assert_eq!(
        columns,
        vec![
            ColumnInfo::new("b", "int"),
            ColumnInfo::new("a", "varchar"),
            ColumnInfo::new("c", "datetime"),
        ]
    );

    let result = gateway.execute(&profile, "SELECT * FROM t").await.unwrap();
    assert_eq!(result.columns, vec!["b", "a", "c"]);
    let keys: Vec<_> = result.rows[0].keys().cloned().collect();
    assert_eq!(keys, vec!["b", "a", "c"]);
}

#[tokio::test(start_paused = true)]
async fn test_list_columns_unknown_table_is_empty() {
    let state = FakeEngine::new();
    state.script_rows(
        &columns_sql("missing"),
        &[("column_name", "VARCHAR"), ("data_type", "VARCHAR")],
        vec![],
    );
    let gateway = fake_gateway(&state, PoolOptions::default());

    let columns = gateway.list_columns(&shop_profile(), "missing").await.unwrap();
    assert!(columns.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_list_columns_rejects_implausible_identifier() {
    let state = FakeEngine::new();
    let gateway = fake_gateway(&state, PoolOptions::default());

    let err = gateway
        .list_columns(&shop_profile(), "x' OR '1'='1")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    // Nothing reached the database
    assert!(state.executed().is_empty());
    assert_eq!(state.opened(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unsupported_engine() {
    let state = FakeEngine::new();
    let gateway = fake_gateway(&state, PoolOptions::default());
    let oracle = ConnectionProfile::new(EngineType::Oracle, "ora.example.com", "scott", "SHOP_DB");

    let err = gateway.execute(&oracle, "SELECT 1 FROM DUAL").await.unwrap_err();
    assert!(matches!(err, DbError::UnsupportedEngine { .. }));
    let err = gateway.list_tables(&oracle).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedEngine);

    assert!(gateway.list_columns(&oracle, "emp").await.unwrap().is_empty());
    assert!(!gateway.test_connection(&oracle).await);
    assert_eq!(state.opened(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_connection_reports_reachability() {
    let state = FakeEngine::new();
    let gateway = fake_gateway(&state, PoolOptions::default());
    let profile = shop_profile();

    assert!(gateway.test_connection(&profile).await);

    state.fail_ping.store(true, Ordering::SeqCst);
    assert!(!gateway.test_connection(&profile).await);
}

#[tokio::test(start_paused = true)]
async fn test_connection_true_while_pool_is_busy() {
    let state = FakeEngine::new();
    let gateway = Arc::new(fake_gateway(&state, pool_options(1, 30)));

    let busy = {
        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move { gateway.execute(&shop_profile(), "SLEEP 20").await })
    };
    settle().await;
    assert_eq!(gateway.pool_stats().await[0].in_use, 1);

    assert!(gateway.test_connection(&shop_profile()).await);
    // A short-lived handle outside the pool, already closed again
    assert_eq!(state.opened(), 2);
    assert_eq!(state.closed(), 1);

    busy.await.unwrap().unwrap();
    settle().await;
    let stats = gateway.pool_stats().await;
    assert_eq!(stats[0].size, 1);
    assert_eq!(stats[0].in_use, 0);
}

#[tokio::test(start_paused = true)]
async fn test_connection_reuses_idle_pooled_handle() {
    let state = FakeEngine::new();
    script_products(&state);
    let gateway = fake_gateway(&state, PoolOptions::default());
    let profile = shop_profile();

    gateway.execute(&profile, PRODUCTS_SQL).await.unwrap();
    settle().await;
    assert!(gateway.test_connection(&profile).await);
    settle().await;

    assert_eq!(state.opened(), 1);
    assert_eq!(state.closed(), 0);
    assert_eq!(gateway.pool_stats().await[0].idle, 1);
}

#[tokio::test(start_paused = true)]
async fn test_session_database_does_not_leak_to_next_borrower() {
    let state = FakeEngine::new();
    let gateway = fake_gateway(&state, pool_options(1, 5));
    let profile = shop_profile();

    gateway.execute(&profile, "USE other").await.unwrap();
    settle().await;
    let result = gateway.execute(&profile, CURRENT_DB_SQL).await.unwrap();

    let current: Vec<_> = result.column_values(0).cloned().collect();
    assert_eq!(current, vec![json!("shop")]);
    assert_eq!(state.opened(), 1);
    assert!(state.resets() >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_execute_with_params_binds_in_order() {
    const SQL: &str = "SELECT id, name FROM products WHERE id > ? AND name <> ? AND note IS ? OR ?";
    let state = FakeEngine::new();
    state.script_rows(
        SQL,
        &[("id", "INT"), ("name", "VARCHAR")],
        vec![vec![json!(2), json!("Gadget")]],
    );
    let gateway = fake_gateway(&state, PoolOptions::default());

    let result = gateway
        .execute_with_params(
            &shop_profile(),
            SQL,
            &[json!(1), json!("Widget"), json!(null), json!(true)],
        )
        .await
        .unwrap();

    assert_eq!(
        state.bound(),
        vec![vec![
            BindValue::Int(1),
            BindValue::Text("Widget".to_string()),
            BindValue::Null,
            BindValue::Bool(true),
        ]]
    );
    assert_eq!(result.columns, vec!["id", "name"]);
    assert_eq!(
        serde_json::to_value(&result.rows).unwrap(),
        json!([{"id": 2, "name": "Gadget"}])
    );
}

#[tokio::test(start_paused = true)]
async fn test_execute_with_no_params_runs_verbatim() {
    let state = FakeEngine::new();
    script_products(&state);
    let gateway = fake_gateway(&state, PoolOptions::default());

    let result = gateway
        .execute_with_params(&shop_profile(), PRODUCTS_SQL, &[])
        .await
        .unwrap();

    assert_eq!(result.row_count(), 2);
    assert!(state.bound().is_empty());
    assert_eq!(state.executed(), vec![PRODUCTS_SQL.to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_connection_false_on_open_failure() {
    let state = FakeEngine::new();
    state.fail_open.store(true, Ordering::SeqCst);
    let gateway = fake_gateway(&state, PoolOptions::default());

    assert!(!gateway.test_connection(&shop_profile()).await);

    let err = gateway.execute(&shop_profile(), PRODUCTS_SQL).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectFailed);
    assert!(!err.to_string().contains(common::PASSWORD));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_profile_is_rejected() {
    let state = FakeEngine::new();
    let gateway = fake_gateway(&state, PoolOptions::default());
    let profile = ConnectionProfile::new(EngineType::MySql, "", "shop_user", "SHOP_DB");

    let err = gateway.execute(&profile, "SELECT 1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert!(!gateway.test_connection(&profile).await);
}

#[tokio::test(start_paused = true)]
async fn test_server_info() {
    let state = FakeEngine::new();
    state.script_rows(
        INFO_SQL,
        &[("version()", "VARCHAR"), ("database()", "VARCHAR"), ("user()", "VARCHAR")],
        vec![vec![json!("8.0.36"), json!("shop"), json!(null)]],
    );
    let gateway = fake_gateway(&state, PoolOptions::default());

    let info = gateway.server_info(&shop_profile()).await.unwrap();
    assert_eq!(info.version.as_deref(), Some("8.0.36"));
    assert_eq!(info.database.as_deref(), Some("shop"));
    assert_eq!(info.user, None);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_pools() {
    let state = FakeEngine::new();
    script_products(&state);
    let gateway = fake_gateway(&state, PoolOptions::default());

    gateway.execute(&shop_profile(), PRODUCTS_SQL).await.unwrap();
    settle().await;
    gateway.shutdown().await;

    assert!(gateway.pool_stats().await.is_empty());
    assert_eq!(state.closed(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_gateway_rejects_invalid_config() {
    let config = GatewayConfig {
        query_timeout_secs: 0,
        ..GatewayConfig::default()
    };
    let mut adapters = AdapterRegistry::new();
    adapters.register(FakeAdapter::new(EngineType::MySql, FakeEngine::new()));

    let err = Gateway::with_adapters(config, secrets(), adapters).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[test]
fn test_oracle_columns_query_upper_cases_lookup_argument() {
    let table = TableName::parse("order_items").unwrap();
    let sql = OracleAdapter.list_columns_query(&table);
    assert!(sql.contains("'ORDER_ITEMS'"));
    assert!(!sql.contains("order_items"));

    // Catalog listing has no user input and returns names as stored
    assert_eq!(OracleAdapter.list_tables_query(), "SELECT TABLE_NAME FROM USER_TABLES");
}
