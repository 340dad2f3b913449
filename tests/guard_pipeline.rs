//! End-to-end tests for the guard middleware over a real listener.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use request_sentinel::{
    guard_middleware, AuthContext, GuardConfig, SecurityMonitorState,
};

const TEST_SECRET: &str = "integration-test-secret-key";

fn test_config() -> GuardConfig {
    let mut config = GuardConfig::default();
    config.csrf.secret = TEST_SECRET.into();
    // Keep decoy stalls short so the suite stays fast.
    config.honeypot.min_delay_ms = 1;
    config.honeypot.max_delay_ms = 2;
    config
}

async fn attach_session(mut request: Request, next: Next) -> Response {
    if let Some(session) = request
        .headers()
        .get("x-session-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
    {
        let session_id = session.to_string();
        request.extensions_mut().insert(AuthContext { session_id });
    }
    next.run(request).await
}

/// Serve a guarded sample app on an ephemeral port. The counter records
/// invocations of the handler registered at a decoy path.
async fn spawn_app(config: GuardConfig) -> (SocketAddr, Arc<SecurityMonitorState>, Arc<AtomicU32>) {
    let state = SecurityMonitorState::new(config).unwrap();
    let decoy_hits = Arc::new(AtomicU32::new(0));
    let counter = decoy_hits.clone();

    let app = Router::new()
        .route("/api/health", get(|| async { Json(json!({ "status": "ok" })) }))
        .route(
            "/api/transfers",
            post(|Json(body): Json<serde_json::Value>| async move {
                (
                    StatusCode::CREATED,
                    Json(json!({ "success": true, "echo": body })),
                )
            }),
        )
        .route(
            "/api/users/{id}",
            get(|axum::extract::Path(id): axum::extract::Path<String>| async move {
                Json(json!({ "id": id }))
            }),
        )
        .route(
            "/api/boom",
            get(|| async {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "thread 'main' panicked at 'boom', src/handlers.rs:7",
                )
            }),
        )
        .route(
            "/api/.env",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    "leaked"
                }
            }),
        )
        .route(
            "/sentinel/report",
            get({
                let report_state = state.clone();
                move || {
                    let report_state = report_state.clone();
                    async move {
                        Json(
                            serde_json::to_value(request_sentinel::pipeline::report::security_report(
                                &report_state,
                            ))
                            .unwrap(),
                        )
                    }
                }
            }),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            guard_middleware,
        ))
        .layer(middleware::from_fn(attach_session));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr, state, decoy_hits)
}

fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Pull the freshly issued token out of the Set-Cookie header.
fn extract_csrf_cookie(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("__Secure-CSRF-Token="))
        .and_then(|v| v.split(';').next())
        .and_then(|pair| pair.split_once('=').map(|(_, token)| token.to_string()))
}

#[tokio::test]
async fn decoy_route_never_reaches_handler_and_blocks_the_source() {
    let (addr, state, decoy_hits) = spawn_app(test_config()).await;
    let client = client();

    let res = client
        .get(format!("http://{addr}/api/.env"))
        .send()
        .await
        .unwrap();
    assert!(
        [401u16, 403, 404, 500].contains(&res.status().as_u16()),
        "decoy must answer with a plausible error, got {}",
        res.status()
    );
    let body: serde_json::Value = res.json().await.unwrap();
    assert!(body.get("error").is_some());
    assert_eq!(decoy_hits.load(Ordering::SeqCst), 0);

    // The honeypot penalty alone crosses the default block threshold.
    assert!(state.reputation.is_blocked(&"127.0.0.1".parse().unwrap()));
    let res = client
        .get(format!("http://{addr}/api/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn filled_decoy_field_gets_fake_success() {
    let (addr, state, _) = spawn_app(test_config()).await;

    let res = client()
        .post(format!("http://{addr}/api/transfers"))
        .json(&json!({ "amount": 10, "bot_check": "filled by a bot" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["success"], json!(true));
    // Fake success, but the handler echo is absent.
    assert!(body.get("echo").is_none());
    assert!(state.reputation.is_blocked(&"127.0.0.1".parse().unwrap()));
}

#[tokio::test]
async fn csrf_missing_token_is_rejected_with_its_code() {
    let (addr, _, _) = spawn_app(test_config()).await;

    let res = client()
        .post(format!("http://{addr}/api/transfers"))
        .header("x-session-id", "session-1")
        .json(&json!({ "amount": 10 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["code"], json!("CSRF_TOKEN_MISSING"));
}

#[tokio::test]
async fn csrf_token_round_trip_authorizes_the_mutation() {
    let (addr, _, _) = spawn_app(test_config()).await;
    let client = client();

    // Any authenticated request yields a token via Set-Cookie.
    let res = client
        .get(format!("http://{addr}/api/health"))
        .header("x-session-id", "session-9")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let token = extract_csrf_cookie(&res).expect("token cookie missing");

    let res = client
        .post(format!("http://{addr}/api/transfers"))
        .header("x-session-id", "session-9")
        .header("x-csrf-token", &token)
        .json(&json!({ "amount": 25 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    // The same token bound to another session is invalid.
    let res = client
        .post(format!("http://{addr}/api/transfers"))
        .header("x-session-id", "someone-else")
        .header("x-csrf-token", &token)
        .json(&json!({ "amount": 25 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["code"], json!("CSRF_TOKEN_INVALID"));
}

#[tokio::test]
async fn csrf_cookie_mismatch_is_rejected() {
    let (addr, _, _) = spawn_app(test_config()).await;
    let client = client();

    let res = client
        .get(format!("http://{addr}/api/health"))
        .header("x-session-id", "session-2")
        .send()
        .await
        .unwrap();
    let token = extract_csrf_cookie(&res).expect("token cookie missing");

    let res = client
        .post(format!("http://{addr}/api/transfers"))
        .header("x-session-id", "session-2")
        .header("x-csrf-token", &token)
        .header("cookie", "__Secure-CSRF-Token=some.other.token")
        .json(&json!({ "amount": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["code"], json!("CSRF_TOKEN_MISMATCH"));
}

#[tokio::test]
async fn sql_injection_in_body_is_blocked_generically() {
    let (addr, state, _) = spawn_app(test_config()).await;

    let res = client()
        .post(format!("http://{addr}/api/transfers"))
        .json(&json!({ "note": "x' OR 1=1 --" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    // Generic denial: no hint of which detector fired.
    assert_eq!(body["error"], json!("Bad request"));
    assert!(state.event_log.len() >= 1);
}

#[tokio::test]
async fn encoded_query_payload_is_still_detected() {
    let (addr, _, _) = spawn_app(test_config()).await;

    let res = client()
        .get(format!(
            "http://{addr}/api/users/1?q=%27%20OR%201%3D1%20--"
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn xss_is_sanitized_and_forwarded() {
    let (addr, state, _) = spawn_app(test_config()).await;

    let res = client()
        .post(format!("http://{addr}/api/transfers"))
        .json(&json!({ "amount": 5, "note": "<script>alert(1)</script>" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: serde_json::Value = res.json().await.unwrap();
    let note = body["echo"]["note"].as_str().unwrap();
    assert!(!note.to_lowercase().contains("<script>"));
    assert!(state.event_log.len() >= 1);
}

#[tokio::test]
async fn oversized_benign_body_skips_inspection_but_reaches_the_handler() {
    let mut config = test_config();
    config.listener.max_inspect_body_bytes = 1024;
    let (addr, state, _) = spawn_app(config).await;

    let blob = "a".repeat(4096);
    let res = client()
        .post(format!("http://{addr}/api/transfers"))
        .json(&json!({ "amount": 7, "blob": blob }))
        .send()
        .await
        .unwrap();

    // The inspection cap bounds analysis, not request size: the payload
    // must arrive at the handler whole.
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["echo"]["blob"].as_str().unwrap().len(), 4096);
    assert!(!state.reputation.is_blocked(&"127.0.0.1".parse().unwrap()));
}

#[tokio::test]
async fn leaky_5xx_body_is_forwarded_and_recorded() {
    use request_sentinel::scanner::builtin::{OBSERVATION_KEY, OBS_STACK_TRACE};

    let (addr, state, _) = spawn_app(test_config()).await;

    let res = client()
        .get(format!("http://{addr}/api/boom"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let text = res.text().await.unwrap();
    assert!(text.contains("panicked at"));

    // Accounting is deferred to a spawned task.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let recorded = state.event_log.window(1).iter().any(|event| {
        event.details.get(OBSERVATION_KEY).map(String::as_str) == Some(OBS_STACK_TRACE)
    });
    assert!(recorded);
}

#[tokio::test]
async fn clean_traffic_passes_and_shows_up_in_the_report() {
    let (addr, _, _) = spawn_app(test_config()).await;
    let client = client();

    for _ in 0..3 {
        let res = client
            .get(format!("http://{addr}/api/health"))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    let res = client
        .get(format!("http://{addr}/sentinel/report"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let report: serde_json::Value = res.json().await.unwrap();
    assert!(report["tracked_addresses"].as_u64().unwrap() >= 1);
    assert!(report["metrics"]["total_events"].is_number());
}
