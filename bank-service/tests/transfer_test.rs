mod common;

use axum::http::{Method, StatusCode};
use bank_service::ledger::LedgerStore;
use common::TestApp;
use serde_json::json;

struct Parties {
    alice: String,
    bob: String,
    carol: String,
}

/// Alice (user 1, account 1) holds 100; Bob (user 2, account 2) holds 0;
/// Carol (user 3) has no account.
async fn setup(app: &TestApp) -> Parties {
    app.ledger.create_account(1).await.unwrap();
    app.ledger.create_account(2).await.unwrap();
    app.ledger.set_balance(1, 100).await.unwrap();
    Parties {
        alice: app.policy.user(1),
        bob: app.policy.user(2),
        carol: app.policy.user(3),
    }
}

async fn transfer(
    app: &TestApp,
    token: &str,
    sender_id: i64,
    recipient_id: i64,
    amount: i64,
) -> (StatusCode, serde_json::Value) {
    app.request(
        Method::POST,
        "/transactions",
        Some(token),
        Some(json!({
            "sender_id": sender_id,
            "recipient_id": recipient_id,
            "amount": amount
        })),
    )
    .await
}

#[tokio::test]
async fn owner_transfers_funds() {
    let app = TestApp::spawn().await;
    let parties = setup(&app).await;

    let (status, body) = transfer(&app, &parties.alice, 1, 2, 30).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["amount"], 30);
    assert_eq!(app.last_validated_action().as_deref(), Some("CREATE_TRANSFER"));
    assert_eq!(app.ledger.get_account(1).await.unwrap().balance, 70);
    assert_eq!(app.ledger.get_account(2).await.unwrap().balance, 30);
}

#[tokio::test]
async fn transfer_rules_are_enforced() {
    let app = TestApp::spawn().await;
    let parties = setup(&app).await;

    let (status, _) = transfer(&app, &parties.alice, 1, 2, 101).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = transfer(&app, &parties.alice, 1, 1, 10).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = transfer(&app, &parties.alice, 1, 2, 0).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = transfer(&app, &parties.alice, 1, 99, 10).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    assert_eq!(app.ledger.get_account(1).await.unwrap().balance, 100);
    assert!(app.ledger.list_transactions(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn transfer_from_someone_elses_account_is_forbidden() {
    let app = TestApp::spawn().await;
    let parties = setup(&app).await;

    let (status, _) = transfer(&app, &parties.bob, 1, 2, 10).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(app.ledger.get_account(1).await.unwrap().balance, 100);
}

#[tokio::test]
async fn transaction_visibility_follows_participation() {
    let app = TestApp::spawn().await;
    let parties = setup(&app).await;
    let (_, created) = transfer(&app, &parties.alice, 1, 2, 5).await;
    let uri = format!("/transactions/{}", created["id"]);

    let (status, _) = app.request(Method::GET, &uri, Some(&parties.bob), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.last_validated_action().as_deref(), Some("VIEW_PROFILE"));

    let (status, _) = app
        .request(Method::GET, &uri, Some(&parties.carol), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        app.last_validated_action().as_deref(),
        Some("VIEW_ALL_PROFILES")
    );

    let (_, listed) = app
        .request(Method::GET, "/transactions", Some(&parties.carol), None)
        .await;
    assert_eq!(listed, json!([]));

    let (_, listed) = app
        .request(Method::GET, "/transactions", Some(&parties.bob), None)
        .await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
}
