//! Superset session client against the mock Superset server
//!
//! Covers the shared login state and CSRF cache under concurrent callers,
//! token expiry, login classification and response normalisation.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use toolgate_client::{ClientError, SupersetClient};
use toolgate_tests::{DatabaseShape, LoginMode, MockSuperset, SupersetOptions};

const TIMEOUT: Duration = Duration::from_secs(5);

fn client(mock: &MockSuperset) -> SupersetClient {
    SupersetClient::new(&mock.base_url(), "admin", "admin", TIMEOUT).unwrap()
}

async fn slow_login_page() -> MockSuperset {
    MockSuperset::with_options(SupersetOptions {
        login_page_delay: Duration::from_millis(100),
        ..Default::default()
    })
    .await
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_token_requests_fetch_once() {
    let mock = slow_login_page().await;
    let client = Arc::new(client(&mock));

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move { client.csrf_token().await }));
    }

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), "token-1");
    }
    assert_eq!(mock.stats.login_page_gets(), 1);
}

#[tokio::test]
async fn test_expired_token_is_refetched() {
    let mock = MockSuperset::start().await.unwrap();
    let client = client(&mock).with_csrf_ttl(Duration::from_millis(50));

    assert_eq!(client.csrf_token().await.unwrap(), "token-1");
    assert_eq!(client.csrf_token().await.unwrap(), "token-1");
    assert_eq!(mock.stats.login_page_gets(), 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.csrf_token().await.unwrap(), "token-2");
    assert_eq!(mock.stats.login_page_gets(), 2);
}

#[tokio::test]
async fn test_missing_token_is_an_error() {
    let mock = MockSuperset::with_options(SupersetOptions {
        omit_csrf_token: true,
        ..Default::default()
    })
    .await
    .unwrap();
    let client = client(&mock);

    assert!(matches!(
        client.csrf_token().await,
        Err(ClientError::CsrfTokenMissing)
    ));
    // Nothing cached, so the next call fetches again
    assert!(client.csrf_token().await.is_err());
    assert_eq!(mock.stats.login_page_gets(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_log_in_once() {
    let mock = slow_login_page().await;
    let client = Arc::new(client(&mock));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move { client.ensure_logged_in().await }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(mock.stats.login_posts(), 1);
    assert!(client.is_logged_in().await.unwrap());

    let form = mock.stats.last_login_form.lock().clone().unwrap();
    assert_eq!(form["username"], "admin");
    assert_eq!(form["csrf_token"], "token-1");
}

#[tokio::test]
async fn test_welcome_page_counts_as_login() {
    let mock = MockSuperset::with_options(SupersetOptions {
        login_mode: LoginMode::WelcomePage,
        ..Default::default()
    })
    .await
    .unwrap();
    let client = client(&mock);

    client.ensure_logged_in().await.unwrap();
    client.ensure_logged_in().await.unwrap();
    assert_eq!(mock.stats.login_posts(), 1);
}

#[tokio::test]
async fn test_rejected_login_stays_logged_out() {
    let mock = MockSuperset::with_options(SupersetOptions {
        login_mode: LoginMode::Rejected,
        ..Default::default()
    })
    .await
    .unwrap();
    let client = client(&mock);

    let err = client.ensure_logged_in().await.unwrap_err();
    assert!(matches!(err, ClientError::AuthenticationFailed(_)));
    assert!(err.is_auth());
    assert_eq!(mock.stats.login_posts(), 1);
    assert!(!client.is_logged_in().await.unwrap());

    // No internal retry: each call makes exactly one attempt
    assert!(client.get_databases().await.is_err());
    assert_eq!(mock.stats.login_posts(), 2);
    assert_eq!(mock.stats.database_calls(), 0);
}

#[tokio::test]
async fn test_database_list_envelope() {
    let mock = MockSuperset::start().await.unwrap();
    let databases = client(&mock).get_databases().await.unwrap();

    assert_eq!(databases.len(), 2);
    assert_eq!(databases[0].database_name, "examples");
    assert_eq!(databases[1].backend, "trino");
    assert_eq!(databases[0].changed_on, "");
}

#[tokio::test]
async fn test_database_list_bare_array() {
    let mock = MockSuperset::with_options(SupersetOptions {
        database_shape: DatabaseShape::BareArray,
        ..Default::default()
    })
    .await
    .unwrap();
    let databases = client(&mock).get_databases().await.unwrap();

    assert_eq!(
        databases.iter().map(|d| d.id).collect::<Vec<_>>(),
        vec![1, 2]
    );
}

#[tokio::test]
async fn test_rows_follow_column_order() {
    let mock = MockSuperset::start().await.unwrap();
    let client = client(&mock);

    let result = client.execute_sql("SELECT * FROM t", 1).await.unwrap();
    assert_eq!(result.columns, vec!["zeta", "alpha", "mid"]);
    assert_eq!(
        result.rows,
        vec![
            vec![json!("a"), json!(1), json!(1.5)],
            vec![json!("b"), json!(2), json!(2.5)],
            vec![json!("c"), json!(3), json!(null)],
        ]
    );
    assert_eq!(result.original_query, "SELECT * FROM t");
    assert_eq!(result.status, "success");

    let sent = mock.stats.last_execute.lock().clone().unwrap();
    assert_eq!(sent["database_id"], 1);
    assert!(sent.get("schema").is_none());
}

#[tokio::test]
async fn test_execute_with_schema_sends_schema() {
    let mock = MockSuperset::start().await.unwrap();
    let client = client(&mock);

    client
        .execute_sql_with_schema("SELECT 1", 3, "analytics")
        .await
        .unwrap();

    let sent = mock.stats.last_execute.lock().clone().unwrap();
    assert_eq!(sent["database_id"], 3);
    assert_eq!(sent["schema"], "analytics");
}

#[tokio::test]
async fn test_backend_error_is_surfaced() {
    let mock = MockSuperset::start().await.unwrap();
    let client = client(&mock);

    let err = client
        .execute_sql("SELECT syntax error", 1)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::ServerError { status: 400, .. }));
}

#[tokio::test]
async fn test_session_and_token_are_reused_across_calls() {
    let mock = MockSuperset::start().await.unwrap();
    let client = client(&mock);

    client.get_databases().await.unwrap();
    client.execute_sql("SELECT 1", 1).await.unwrap();
    client.get_databases().await.unwrap();

    assert_eq!(mock.stats.login_posts(), 1);
    // One scrape for login, one for the cached API token
    assert_eq!(mock.stats.login_page_gets(), 2);
    assert_eq!(mock.stats.database_calls(), 2);
    assert_eq!(mock.stats.execute_calls(), 1);
}

#[tokio::test]
async fn test_slow_backend_times_out() {
    let mock = MockSuperset::with_options(SupersetOptions {
        login_page_delay: Duration::from_secs(2),
        ..Default::default()
    })
    .await
    .unwrap();
    let client =
        SupersetClient::new(&mock.base_url(), "admin", "admin", Duration::from_millis(200))
            .unwrap();

    assert!(matches!(
        client.csrf_token().await,
        Err(ClientError::Timeout)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_waiting_for_token_lock_times_out() {
    let mock = MockSuperset::with_options(SupersetOptions {
        login_page_delay: Duration::from_millis(600),
        ..Default::default()
    })
    .await
    .unwrap();
    let client = Arc::new(client(&mock).with_lock_timeout(Duration::from_millis(100)));

    let holder = {
        let client = client.clone();
        tokio::spawn(async move { client.csrf_token().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The fetch in flight keeps the token lock for the whole page delay
    assert!(matches!(
        client.csrf_token().await,
        Err(ClientError::Timeout)
    ));

    assert_eq!(holder.await.unwrap().unwrap(), "token-1");
    assert_eq!(mock.stats.login_page_gets(), 1);
}

#[tokio::test]
async fn test_health_check() {
    let healthy = MockSuperset::start().await.unwrap();
    client(&healthy).test_connection().await.unwrap();

    let unhealthy = MockSuperset::with_options(SupersetOptions {
        healthy: false,
        ..Default::default()
    })
    .await
    .unwrap();
    assert!(matches!(
        client(&unhealthy).test_connection().await,
        Err(ClientError::ServerError { status: 503, .. })
    ));
}
