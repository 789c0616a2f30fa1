//! End-to-end tests of the subscription endpoints against the mock server.

use std::time::Duration;

use axum::http::{header, Method, StatusCode};
use serde_json::json;

use pubsub_gateway::config::GatewayConfig;

mod common;
use common::{Behavior, MockPubsub, POSTS};

#[tokio::test]
async fn get_returns_role_map() {
    let mock = MockPubsub::new();
    let (app, _server) = common::gateway(&mock);

    let (status, body) =
        common::get_roles(&app, "alice@localhost/http", "alice@localhost", "posts").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"alice@localhost": "owner", "bob@localhost": "subscriber"})
    );
}

#[tokio::test]
async fn get_is_idempotent() {
    let mock = MockPubsub::new();
    let (app, _server) = common::gateway(&mock);

    let first = common::get_roles(&app, "bob@localhost", "alice@localhost", "posts").await;
    let second = common::get_roles(&app, "bob@localhost", "alice@localhost", "posts").await;
    assert_eq!(first, second);
    assert_eq!(mock.connects(), 1);
}

#[tokio::test]
async fn subscribe_then_unsubscribe_round_trip() {
    let mock = MockPubsub::new();
    let (app, _server) = common::gateway(&mock);

    let (status, _) =
        common::post_actions(&app, "eve@localhost/http", "alice@localhost", "posts", "[true]").await;
    assert_eq!(status, StatusCode::OK);
    // Mutation is followed by a re-query.
    assert_eq!(mock.requests("subscribe"), 1);
    assert_eq!(mock.requests("affiliations"), 1);

    let (status, body) =
        common::get_roles(&app, "eve@localhost/http", "alice@localhost", "posts").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "alice@localhost": "owner",
            "bob@localhost": "subscriber",
            "eve@localhost": "subscriber"
        })
    );

    let (status, _) =
        common::post_actions(&app, "eve@localhost/http", "alice@localhost", "posts", "[false]").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) =
        common::get_roles(&app, "eve@localhost/http", "alice@localhost", "posts").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"alice@localhost": "owner", "bob@localhost": "subscriber"})
    );
}

#[tokio::test]
async fn redundant_actions_succeed() {
    let mock = MockPubsub::new();
    let (app, _server) = common::gateway(&mock);

    let (status, _) = common::post_actions(
        &app,
        "eve@localhost",
        "alice@localhost",
        "posts",
        "[false, true, true]",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mock.requests("unsubscribe"), 1);
    assert_eq!(mock.requests("subscribe"), 2);

    let (_, body) = common::get_roles(&app, "eve@localhost", "alice@localhost", "posts").await;
    assert_eq!(body["eve@localhost"], "subscriber");
    assert_eq!(body.as_object().unwrap().len(), 3);
}

#[tokio::test]
async fn first_failure_aborts_without_requery() {
    let mock = MockPubsub::new();
    mock.set_behavior(POSTS, Behavior::ClosedNode);
    let (app, _server) = common::gateway(&mock);

    let (status, body) = common::post_actions(
        &app,
        "eve@localhost",
        "alice@localhost",
        "posts",
        "[true, false]",
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");
    assert_eq!(mock.requests("subscribe"), 1);
    assert_eq!(mock.requests("unsubscribe"), 0);
    assert_eq!(mock.requests("affiliations"), 0);
}

#[tokio::test]
async fn unknown_node_is_not_found() {
    let mock = MockPubsub::new();
    let (app, _server) = common::gateway(&mock);

    let (status, body) =
        common::get_roles(&app, "alice@localhost", "alice@localhost", "drafts").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not-found");
}

#[tokio::test]
async fn forbidden_node_is_forbidden() {
    let mock = MockPubsub::new();
    mock.set_behavior(POSTS, Behavior::Forbidden);
    let (app, _server) = common::gateway(&mock);

    let (status, _) = common::get_roles(&app, "eve@localhost", "alice@localhost", "posts").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn bad_or_missing_credentials_are_unauthorized() {
    let mock = MockPubsub::new();
    let (app, _server) = common::gateway(&mock);
    let uri = common::subscriptions_uri("alice@localhost", "posts");

    let (status, body) = common::call(&app, Method::GET, &uri, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, _) = common::call(
        &app,
        Method::GET,
        &uri,
        Some(common::basic("alice@localhost", "wrong")),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(mock.requests("affiliations"), 0);
}

#[tokio::test]
async fn unauthorized_response_carries_challenge() {
    let mock = MockPubsub::new();
    let (app, _server) = common::gateway(&mock);

    let request = axum::http::Request::builder()
        .uri(common::subscriptions_uri("alice@localhost", "posts"))
        .body(axum::body::Body::empty())
        .unwrap();
    let response = tower::ServiceExt::oneshot(app, request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers()[header::WWW_AUTHENTICATE],
        "Basic realm=\"pubsub-gateway\""
    );
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn malformed_post_body_is_bad_request() {
    let mock = MockPubsub::new();
    let (app, _server) = common::gateway(&mock);

    for body in ["true", "[1, 2]", "{\"subscribe\": true}", ""] {
        let (status, json) =
            common::post_actions(&app, "eve@localhost", "alice@localhost", "posts", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body {body:?}");
        assert_eq!(json["error"], "bad_request");
    }
    assert_eq!(mock.requests("subscribe"), 0);
}

#[tokio::test]
async fn invalid_owner_is_bad_request() {
    let mock = MockPubsub::new();
    let (app, _server) = common::gateway(&mock);

    let (status, _) = common::get_roles(&app, "alice@localhost", "localhost", "posts").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unanswered_request_times_out() {
    let mock = MockPubsub::new();
    mock.set_behavior(POSTS, Behavior::Silent);
    let (app, _server) = common::gateway(&mock);

    let (status, body) = common::get_roles(&app, "alice@localhost", "alice@localhost", "posts").await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["error"], "timeout");
}

#[tokio::test]
async fn http_deadline_answers_gateway_timeout() {
    let mock = MockPubsub::new();
    mock.set_behavior(POSTS, Behavior::Silent);
    let mut config = GatewayConfig::default();
    config.xmpp.request_timeout_secs = 5;
    config.timeouts.http_request_secs = 1;
    let (app, _server) = common::gateway_with(&mock, config);

    let started = std::time::Instant::now();
    let (status, body) = common::post_actions(
        &app,
        "alice@localhost",
        "alice@localhost",
        "posts",
        "[true, false]",
    )
    .await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body, serde_json::Value::Null);
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn concurrent_requests_share_a_connection() {
    let mock = MockPubsub::new();
    mock.add_node("/user/alice@localhost/slow", &[("alice@localhost", "owner")]);
    mock.set_behavior(
        "/user/alice@localhost/slow",
        Behavior::Delay(Duration::from_millis(200)),
    );
    let (app, _server) = common::gateway(&mock);

    // Warm the session so both requests go over the same connection.
    common::get_roles(&app, "alice@localhost", "alice@localhost", "posts").await;

    let (slow, fast) = tokio::join!(
        common::get_roles(&app, "alice@localhost", "alice@localhost", "slow"),
        common::get_roles(&app, "alice@localhost", "alice@localhost", "posts"),
    );
    assert_eq!(slow, (StatusCode::OK, json!({"alice@localhost": "owner"})));
    assert_eq!(fast.0, StatusCode::OK);
    assert_eq!(fast.1["bob@localhost"], "subscriber");
    assert_eq!(mock.connects(), 1);
}

#[tokio::test]
async fn subscriptions_are_merged_when_enabled() {
    let mock = MockPubsub::new();
    let mut config = GatewayConfig::default();
    config.xmpp.include_subscriptions = true;
    let (app, _server) = common::gateway_with(&mock, config);

    let (status, body) = common::get_roles(&app, "alice@localhost", "alice@localhost", "posts").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"alice@localhost": "owner", "bob@localhost": "subscriber"})
    );
    assert_eq!(mock.requests("subscriptions"), 1);
}

#[tokio::test]
async fn health_reports_sessions() {
    let mock = MockPubsub::new();
    let (app, _server) = common::gateway(&mock);

    let (status, body) = common::call(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok", "sessions": 0}));

    common::get_roles(&app, "alice@localhost", "alice@localhost", "posts").await;
    let (_, body) = common::call(&app, Method::GET, "/health", None, None).await;
    assert_eq!(body["sessions"], 1);
}
