//! Router tests over in-memory authority, wallet and ledger.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use lendkit_cli::{server::build_router, Services};
use lendkit_core::config::Settings;
use lendkit_core::issuers::MemoryAuthority;
use lendkit_core::ledger::{LedgerGateway, MemoryLedger};
use lendkit_core::Identity;
use lendkit_core::storage::{IdentityStore, MemoryWallet};
use secrecy::SecretString;
use serde_json::{json, Value};
use tower::ServiceExt;

struct Harness {
    app: Router,
    wallet: Arc<MemoryWallet>,
    authority: Arc<MemoryAuthority>,
    ledger: MemoryLedger,
}

fn harness() -> Harness {
    let wallet = Arc::new(MemoryWallet::new());
    let authority = Arc::new(MemoryAuthority::new("admin", "adminpw").unwrap());
    let ledger = MemoryLedger::new();
    let services = Services::new(
        wallet.clone(),
        authority.clone(),
        Arc::new(ledger.clone()),
        "Org1MSP",
        &Settings::default(),
    );
    Harness {
        app: build_router(services),
        wallet,
        authority,
        ledger,
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

async fn post_form(app: &Router, uri: &str, body: &'static str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .unwrap();
    send(app, request).await
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

/// What the contract itself returns for `function(args)`.
async fn ledger_payload(ledger: &MemoryLedger, function: &str, args: &[&str]) -> Value {
    let reader = Identity::new("reader", "cert", SecretString::from("key".to_string()), "Org1MSP");
    let session = ledger.open(&reader).await.unwrap();
    let channel = session.network("mychannel").unwrap();
    let args: Vec<String> = args.iter().map(ToString::to_string).collect();
    let payload = session
        .evaluate(&channel, "solib", function, &args)
        .await
        .unwrap();
    session.close().await.unwrap();
    serde_json::from_slice(&payload).unwrap()
}

async fn with_users(users: &[&str]) -> Harness {
    let h = harness();
    let (status, _) = post_json(&h.app, "/admin", json!({ "id": "admin", "secret": "adminpw" })).await;
    assert_eq!(status, StatusCode::OK);
    for user in users {
        let (status, _) = post_json(&h.app, "/user", json!({ "id": user, "role": "client" })).await;
        assert_eq!(status, StatusCode::OK);
    }
    h
}

#[tokio::test]
async fn test_admin_enrollment_with_legacy_form_fields() {
    let h = harness();

    let (status, body) = post_form(&h.app, "/admin", "id=admin&pw=adminpw").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "result": "success", "msg": "Successfully enrolled admin in the wallet" })
    );
    assert!(h.wallet.exists("admin").unwrap());
}

#[tokio::test]
async fn test_second_admin_enrollment_conflicts() {
    let h = with_users(&[]).await;
    let calls = h.authority.calls();

    let (status, body) = post_json(&h.app, "/admin", json!({ "id": "admin", "secret": "adminpw" })).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["result"], "failed");
    assert_eq!(body["error"], "An identity for admin already exists in the wallet");
    assert_eq!(h.authority.calls(), calls);
}

#[tokio::test]
async fn test_user_before_admin_is_forbidden() {
    let h = harness();

    let (status, body) = post_form(&h.app, "/user", "id=alice&userrole=client").await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["result"], "failed");
    assert_eq!(h.authority.calls(), 0);
}

#[tokio::test]
async fn test_wrong_secret_is_unauthorized() {
    let h = harness();

    let (status, body) = post_json(&h.app, "/admin", json!({ "id": "admin", "secret": "nope" })).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body.get("msg").is_none());
}

#[tokio::test]
async fn test_book_lifecycle_over_http() {
    let h = with_users(&["Alice", "Bob"]).await;
    let book = json!({ "bookName": "BookA", "owner": "Alice" });

    let (status, body) = post_json(&h.app, "/book", book.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["msg"], "Successfully created");

    let (status, body) = post_form(&h.app, "/book/request", "bookName=BookA&owner=Alice&renter=Bob").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["msg"], "Successfully request");

    let (status, body) = post_json(&h.app, "/book/rent", book.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["msg"], "Successfully rent");

    let (status, body) = post_json(&h.app, "/book/return", book).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["msg"], "Successfully return");

    let (status, body) = get(&h.app, "/book?bookName=BookA&owner=Alice").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["msg"], "Successfully retrieved");
    assert_eq!(body["content"]["state"], "Available");
    assert_eq!(body["content"]["owner"], "Alice");

    let (status, body) = get(&h.app, "/book/history?bookName=BookA&owner=Alice").await;
    assert_eq!(status, StatusCode::OK);
    let history = body["msg"].as_array().unwrap();
    assert_eq!(history.len(), 4);
    assert_eq!(history[1]["record"]["state"], "inRequest");
    assert_eq!(history[2]["record"]["state"], "rented");
    assert_eq!(history[3]["record"]["state"], "returned");
    assert_eq!(body["msg"], ledger_payload(&h.ledger, "History", &["BookA_Alice"]).await);

    let (status, body) = get(&h.app, "/book/list?id=Bob").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["msg"][0]["Key"], "BookA_Alice");
    assert_eq!(body["msg"], ledger_payload(&h.ledger, "QueryAllBook", &[]).await);

    assert_eq!(h.ledger.sessions_opened(), h.ledger.sessions_closed());
}

#[tokio::test]
async fn test_missing_book_has_no_content() {
    let h = with_users(&["Alice"]).await;

    let (status, body) = get(&h.app, "/book?bookName=Ghost&owner=Alice").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "result": "success", "msg": "Successfully retrieved" }));
}

#[tokio::test]
async fn test_rejected_transition_is_unprocessable() {
    let h = with_users(&["Alice"]).await;
    post_json(&h.app, "/book", json!({ "bookName": "BookA", "owner": "Alice" })).await;

    let (status, body) = post_json(&h.app, "/book/rent", json!({ "bookName": "BookA", "owner": "Alice" })).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("STATE is not appropriate"));
}

#[tokio::test]
async fn test_unknown_identity_is_not_found_and_ledger_untouched() {
    let h = with_users(&[]).await;

    let (status, body) = get(&h.app, "/book/list?id=Zed").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "An identity for Zed does not exist in the wallet");
    assert_eq!(h.ledger.open_attempts(), 0);
}

#[tokio::test]
async fn test_malformed_input_is_a_bad_request() {
    let h = with_users(&["Alice"]).await;

    let (status, body) = post_json(&h.app, "/book", json!({ "bookName": "Book_A", "owner": "Alice" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["result"], "failed");

    let request = Request::builder()
        .method("POST")
        .uri("/book")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["result"], "failed");
    assert_eq!(body["error"], "Invalid body: malformed request body");

    let request = Request::builder()
        .method("POST")
        .uri("/book")
        .body(Body::from("bookName=BookA&owner=Alice"))
        .unwrap();
    let (status, body) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid body: malformed request body");
}

#[tokio::test]
async fn test_health() {
    let h = harness();
    let (status, body) = get(&h.app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}
