//! API integration tests.
//!
//! These run the full router, auth middleware included, over an in-memory
//! SQLite database.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
    middleware,
};
use haggle_api::{AppState, middleware::auth_middleware, router as api_router};
use haggle_common::{AppResult, config::ChatConfig};
use haggle_core::{AcceptedOffer, ChatEngine, NoOpNotificationSink, TransactionTrigger};
use haggle_db::{entities::user::UserRole, test_utils::TestDatabase};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tower::ServiceExt;

#[derive(Default)]
struct RecordingTrigger {
    accepted: Mutex<Vec<AcceptedOffer>>,
}

#[async_trait]
impl TransactionTrigger for RecordingTrigger {
    async fn on_offer_accepted(&self, offer: &AcceptedOffer) -> AppResult<Option<String>> {
        self.accepted.lock().await.push(offer.clone());
        Ok(Some("txn-1".to_string()))
    }
}

struct TestApp {
    _db: TestDatabase,
    router: Router,
    trigger: Arc<RecordingTrigger>,
}

async fn create_test_app() -> TestApp {
    let db = TestDatabase::new().await.expect("test database");
    db.insert_user("buyer", UserRole::Buyer).await.unwrap();
    db.insert_user("vendor", UserRole::Vendor).await.unwrap();
    db.insert_user("stranger", UserRole::Buyer).await.unwrap();
    db.insert_user("admin", UserRole::Admin).await.unwrap();
    db.insert_listing("bike", "vendor", 20_000).await.unwrap();

    let config = ChatConfig::default();
    let engine = ChatEngine::new(db.connection(), Arc::new(NoOpNotificationSink), &config);
    let trigger = Arc::new(RecordingTrigger::default());
    let state = AppState::new(engine, trigger.clone(), config);

    let router = api_router()
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state);

    TestApp {
        _db: db,
        router,
        trigger,
    }
}

impl TestApp {
    async fn call(
        &self,
        method: &str,
        uri: &str,
        user: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            request = request.header("Authorization", format!("Bearer token-{user}"));
        }
        let request = match body {
            Some(body) => request
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };

        (status, json)
    }

    async fn open_chat(&self) -> String {
        let (status, body) = self
            .call(
                "POST",
                "/chats",
                Some("buyer"),
                Some(json!({ "vendorId": "vendor", "listingId": "bike" })),
            )
            .await;
        assert!(status.is_success(), "open chat failed: {body}");
        body["data"]["chat"]["id"].as_str().unwrap().to_string()
    }

    async fn make_offer(&self, chat_id: &str, user: &str, amount: i64) -> String {
        let (status, body) = self
            .call(
                "POST",
                &format!("/chats/{chat_id}/offers"),
                Some(user),
                Some(json!({ "amount": amount })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "offer failed: {body}");
        body["data"]["id"].as_str().unwrap().to_string()
    }
}

#[tokio::test]
async fn test_requests_without_token_are_unauthorized() {
    let app = create_test_app().await;

    let (status, body) = app.call("GET", "/chats", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_unknown_token_is_unauthorized() {
    let app = create_test_app().await;

    let (status, _) = app.call("GET", "/chats", Some("nobody"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_create_chat_then_get_existing() {
    let app = create_test_app().await;
    let request = json!({
        "vendorId": "vendor",
        "listingId": "bike",
        "initialMessage": "Is this still available?"
    });

    let (status, first) = app
        .call("POST", "/chats", Some("buyer"), Some(request.clone()))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["data"]["isNew"], true);
    assert_eq!(first["data"]["chat"]["status"], "ACTIVE");
    assert_eq!(first["data"]["initialMessage"]["messageType"], "TEXT");

    let (status, second) = app
        .call("POST", "/chats", Some("buyer"), Some(request))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["data"]["isNew"], false);
    assert_eq!(second["data"]["chat"]["id"], first["data"]["chat"]["id"]);
}

#[tokio::test]
async fn test_chat_with_self_is_bad_request() {
    let app = create_test_app().await;

    let (status, body) = app
        .call(
            "POST",
            "/chats",
            Some("vendor"),
            Some(json!({ "vendorId": "vendor" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_outsider_gets_forbidden_and_missing_chat_not_found() {
    let app = create_test_app().await;
    let chat_id = app.open_chat().await;

    let (status, body) = app
        .call("GET", &format!("/chats/{chat_id}"), Some("stranger"), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");

    let (status, _) = app
        .call("GET", "/chats/does-not-exist", Some("buyer"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_message_flow_and_unread_count() {
    let app = create_test_app().await;
    let chat_id = app.open_chat().await;

    let (status, sent) = app
        .call(
            "POST",
            &format!("/chats/{chat_id}/messages"),
            Some("buyer"),
            Some(json!({ "content": "Hello" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(sent["data"]["sender"]["id"], "buyer");

    let (_, unread) = app
        .call("GET", "/chats/unread/count", Some("vendor"), None)
        .await;
    assert_eq!(unread["data"]["count"], 1);

    let (status, history) = app
        .call(
            "GET",
            &format!("/chats/{chat_id}/messages?limit=10"),
            Some("vendor"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["data"]["messages"].as_array().unwrap().len(), 1);
    assert_eq!(history["data"]["hasMore"], false);

    let (status, read) = app
        .call("POST", &format!("/chats/{chat_id}/read"), Some("vendor"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(read["data"]["readCount"], 1);

    let (_, read_again) = app
        .call(
            "POST",
            &format!("/chats/{chat_id}/read"),
            Some("vendor"),
            Some(json!({})),
        )
        .await;
    assert_eq!(read_again["data"]["readCount"], 0);
}

#[tokio::test]
async fn test_send_into_blocked_chat_is_unprocessable() {
    let app = create_test_app().await;
    let chat_id = app.open_chat().await;

    let (status, body) = app
        .call(
            "PATCH",
            &format!("/chats/{chat_id}/status"),
            Some("vendor"),
            Some(json!({ "status": "BLOCKED" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "BLOCKED");

    let (status, body) = app
        .call(
            "POST",
            &format!("/chats/{chat_id}/messages"),
            Some("buyer"),
            Some(json!({ "content": "unblock me" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "BUSINESS_RULE_VIOLATION");
}

#[tokio::test]
async fn test_accepting_offer_triggers_transaction() {
    let app = create_test_app().await;
    let chat_id = app.open_chat().await;
    let offer_id = app.make_offer(&chat_id, "vendor", 15_000).await;

    let (status, body) = app
        .call(
            "POST",
            &format!("/chats/{chat_id}/offers/{offer_id}/respond"),
            Some("buyer"),
            Some(json!({ "decision": "ACCEPT" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["actionRequired"], "create_transaction");
    assert_eq!(body["data"]["transactionId"], "txn-1");
    assert_eq!(body["data"]["responseMessage"]["messageType"], "OFFER_ACCEPTED");
    assert_eq!(body["data"]["originalOffer"]["id"], offer_id.as_str());

    let accepted = app.trigger.accepted.lock().await.clone();
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].amount, 15_000);

    let (status, view) = app
        .call(
            "GET",
            &format!("/chats/{chat_id}/offers/{offer_id}"),
            Some("vendor"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["data"]["state"], "ACCEPTED");
}

#[tokio::test]
async fn test_second_response_conflicts() {
    let app = create_test_app().await;
    let chat_id = app.open_chat().await;
    let offer_id = app.make_offer(&chat_id, "buyer", 10_000).await;
    let uri = format!("/chats/{chat_id}/offers/{offer_id}/respond");

    let (status, body) = app
        .call("POST", &uri, Some("vendor"), Some(json!({ "decision": "REJECT" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["actionRequired"].is_null());
    assert!(body["data"]["transactionId"].is_null());

    let (status, body) = app
        .call("POST", &uri, Some("vendor"), Some(json!({ "decision": "ACCEPT" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "OFFER_ALREADY_RESOLVED");

    assert!(app.trigger.accepted.lock().await.is_empty());
}

#[tokio::test]
async fn test_invalid_offer_amount() {
    let app = create_test_app().await;
    let chat_id = app.open_chat().await;

    let (status, _) = app
        .call(
            "POST",
            &format!("/chats/{chat_id}/offers"),
            Some("buyer"),
            Some(json!({ "amount": 0 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_oversized_offer_expiry_is_rejected() {
    let app = create_test_app().await;
    let chat_id = app.open_chat().await;

    let (status, body) = app
        .call(
            "POST",
            &format!("/chats/{chat_id}/offers"),
            Some("buyer"),
            Some(json!({ "amount": 1, "expiresInSecs": 1_000_000_000_000_000_i64 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, body) = app
        .call(
            "POST",
            &format!("/chats/{chat_id}/offers"),
            Some("buyer"),
            Some(json!({ "amount": 1, "expiresInSecs": 3600 })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["data"]["offerExpiresAt"].is_string());
}

#[tokio::test]
async fn test_edit_and_delete_message() {
    let app = create_test_app().await;
    let chat_id = app.open_chat().await;

    let (_, sent) = app
        .call(
            "POST",
            &format!("/chats/{chat_id}/messages"),
            Some("buyer"),
            Some(json!({ "content": "helo" })),
        )
        .await;
    let message_id = sent["data"]["id"].as_str().unwrap().to_string();

    let (status, edited) = app
        .call(
            "PATCH",
            &format!("/messages/{message_id}"),
            Some("buyer"),
            Some(json!({ "content": "hello" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(edited["data"]["content"], "hello");

    let (status, _) = app
        .call("DELETE", &format!("/messages/{message_id}"), Some("vendor"), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .call("DELETE", &format!("/messages/{message_id}"), Some("buyer"), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, history) = app
        .call("GET", &format!("/chats/{chat_id}/messages"), Some("buyer"), None)
        .await;
    let messages = history["data"]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert!(!messages[0]["deletedAt"].is_null());
}

#[tokio::test]
async fn test_search_messages() {
    let app = create_test_app().await;
    let chat_id = app.open_chat().await;
    app.call(
        "POST",
        &format!("/chats/{chat_id}/messages"),
        Some("buyer"),
        Some(json!({ "content": "Does it come with a helmet?" })),
    )
    .await;

    let (status, found) = app
        .call("GET", "/messages/search?q=helmet", Some("vendor"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(found["data"].as_array().unwrap().len(), 1);

    let (status, _) = app
        .call("GET", "/messages/search?q=%20", Some("vendor"), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_archive_listing_chats_requires_admin() {
    let app = create_test_app().await;
    let chat_id = app.open_chat().await;

    let (status, _) = app
        .call("POST", "/listings/bike/archive-chats", Some("vendor"), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .call("POST", "/listings/bike/archive-chats", Some("admin"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["archived"], 1);

    let (_, chat) = app
        .call("GET", &format!("/chats/{chat_id}"), Some("buyer"), None)
        .await;
    assert_eq!(chat["data"]["status"], "ARCHIVED");
}

#[tokio::test]
async fn test_list_chats_filters_by_status() {
    let app = create_test_app().await;
    app.open_chat().await;

    let (status, active) = app
        .call("GET", "/chats?status=ACTIVE", Some("buyer"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(active["data"]["chats"].as_array().unwrap().len(), 1);
    assert_eq!(active["data"]["page"], 1);

    let (_, blocked) = app
        .call("GET", "/chats?status=BLOCKED", Some("buyer"), None)
        .await;
    assert!(blocked["data"]["chats"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_endpoint_returns_404() {
    let app = create_test_app().await;

    let (status, _) = app.call("GET", "/nonexistent", Some("buyer"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
