//! Integration test for the per-game HTTP surface (C6), driven in-process via
//! `tower::ServiceExt::oneshot` against the real router (§4.6).

use std::collections::HashMap;
use std::sync::Arc;

use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, U256};
use script_gamemaster::api::{router, GameServerState};
use script_gamemaster::auth;
use script_gamemaster::map::{generate_map, Position, MAX_MINES, MAX_MOVES};
use script_gamemaster::session::{GameSession, PlayerState};
use tower::ServiceExt;

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn wallet() -> LocalWallet {
    "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318"
        .parse()
        .unwrap()
}

fn state_for(addr: Address) -> Arc<GameServerState> {
    let map = generate_map([3u8; 32], 5);
    let mut players = HashMap::new();
    players.insert(
        addr,
        PlayerState {
            position: Position { x: 0, y: 0 },
            score: 0,
            moves_remaining: MAX_MOVES,
            mines_remaining: MAX_MINES,
        },
    );
    Arc::new(GameServerState::new(
        U256::from(42u64),
        Address::from_low_u64_be(0xC0FFEE),
        "integration-secret".to_string(),
        GameSession::new(map, players, auth::now_millis()),
        vec![addr],
    ))
}

#[tokio::test]
async fn full_register_then_play_flow_succeeds() {
    let wallet = wallet();
    let addr = wallet.address();
    let state = state_for(addr);
    let app = router(state);

    // GET /register: no params, just issues a challenge.
    let response = app
        .clone()
        .oneshot(
            axum::http::Request::builder()
                .uri("/register")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let challenge = body_json(response).await;
    let message = challenge["message"].as_str().unwrap().to_string();
    let timestamp = challenge["timestamp"].as_i64().unwrap();

    // Sign the challenge and submit it.
    let signature = wallet.sign_message(&message).await.unwrap();
    let sig_hex = format!("0x{}", hex::encode(signature.to_vec()));
    let submit_body = serde_json::json!({
        "address": format!("{:#x}", addr),
        "signature": sig_hex,
        "timestamp": timestamp,
    });
    let response = app
        .clone()
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/register")
                .header("Content-Type", "application/json")
                .body(axum::body::Body::from(submit_body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let submitted = body_json(response).await;
    assert_eq!(submitted["expiresIn"], auth::TOKEN_VALIDITY_SECS);
    let token = submitted["token"].as_str().unwrap().to_string();

    // Authenticated /map read.
    let response = app
        .clone()
        .oneshot(
            axum::http::Request::builder()
                .uri("/map")
                .header("Authorization", format!("Bearer {token}"))
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);

    // Authenticated /move.
    let move_body = serde_json::json!({ "direction": "east" });
    let response = app
        .clone()
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/move")
                .header("Authorization", format!("Bearer {token}"))
                .header("Content-Type", "application/json")
                .body(axum::body::Body::from(move_body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let view = body_json(response).await;
    assert_eq!(view["movesRemaining"], MAX_MOVES - 1);

    // Authenticated /mine.
    let response = app
        .clone()
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/mine")
                .header("Authorization", format!("Bearer {token}"))
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let mined = body_json(response).await;
    assert_eq!(mined["minesRemaining"], MAX_MINES - 1);
}

#[tokio::test]
async fn unauthenticated_requests_to_protected_routes_are_rejected() {
    let addr = Address::from_low_u64_be(1);
    let state = state_for(addr);
    let app = router(state);

    for (method, path, body) in [
        ("GET", "/map", axum::body::Body::empty()),
        (
            "POST",
            "/move",
            axum::body::Body::from(r#"{"direction":"east"}"#),
        ),
        ("POST", "/mine", axum::body::Body::empty()),
    ] {
        let response = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method(method)
                    .uri(path)
                    .header("Content-Type", "application/json")
                    .body(body)
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.status(),
            axum::http::StatusCode::UNAUTHORIZED,
            "expected {method} {path} without a token to be unauthorized"
        );
    }
}

#[tokio::test]
async fn unregistered_address_is_rejected_at_submit_time() {
    let owner = Address::from_low_u64_be(1);
    let state = state_for(owner);
    let app = router(state);

    let response = app
        .clone()
        .oneshot(
            axum::http::Request::builder()
                .uri("/register")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let challenge = body_json(response).await;

    let stranger = wallet();
    let message = challenge["message"].as_str().unwrap().to_string();
    let signature = stranger.sign_message(&message).await.unwrap();
    let sig_hex = format!("0x{}", hex::encode(signature.to_vec()));
    let submit_body = serde_json::json!({
        "address": format!("{:#x}", stranger.address()),
        "signature": sig_hex,
        "timestamp": challenge["timestamp"].as_i64().unwrap(),
    });
    let response = app
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/register")
                .header("Content-Type", "application/json")
                .body(axum::body::Body::from(submit_body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::FORBIDDEN);
}
