//! Per-game HTTP API server (C6): one axum server per game, bound to `8000 + gameId` (§4.6).
//! Grounded on the teacher's `proof-service::main` — tracing-wrapped router, CORS layer,
//! `tokio::main`-style bind-and-serve — generalised to carry bearer auth and the game's own
//! state in `Arc<AppState>`, the shape borrowed from the `ckb-prediction-market` devnet server.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{HeaderMap, Method};
use axum::routing::{get, post};
use axum::{Json, Router};
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::auth::{self, TokenPayload};
use crate::error::{ApiError, AuthError};
use crate::session::{Direction, GameSession};
use crate::store::LoadedMap;
use crate::types::Phase;

/// State shared by every handler for one game's server.
pub struct GameServerState {
    pub game_id: U256,
    pub contract_address: Address,
    pub token_secret: String,
    pub session: GameSession,
    pub players: Vec<Address>,
    /// Last phase the orchestrator derived for this game (§4.6 `/status`); a listener only
    /// exists from GAME_RUNNING onward, so this starts there and only moves forward.
    phase: Mutex<Phase>,
}

impl GameServerState {
    pub fn new(
        game_id: U256,
        contract_address: Address,
        token_secret: String,
        session: GameSession,
        players: Vec<Address>,
    ) -> Self {
        GameServerState {
            game_id,
            contract_address,
            token_secret,
            session,
            players,
            phase: Mutex::new(Phase::GameRunning),
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock().expect("phase mutex poisoned")
    }

    pub fn set_phase(&self, phase: Phase) {
        *self.phase.lock().expect("phase mutex poisoned") = phase;
    }
}

pub type SharedState = Arc<GameServerState>;

fn auth_header(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Auth(AuthError::MissingToken))
}

/// Validates the bearer token and checks the holder is a registered player of this game
/// (§4.9: token validity alone isn't membership).
async fn authenticate(state: &SharedState, headers: &HeaderMap) -> Result<TokenPayload, ApiError> {
    let token = auth_header(headers)?;
    let payload = auth::verify_token(&state.token_secret, token)
        .map_err(|_| ApiError::Auth(AuthError::InvalidToken))?;
    if !state.players.contains(&payload.address) {
        return Err(ApiError::Auth(AuthError::NotAPlayer));
    }
    Ok(payload)
}

pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/test", get(test_route))
        .route("/status", get(status))
        .route("/players", get(players))
        .route("/register", get(register_challenge).post(register_submit))
        .route("/map", get(map))
        .route("/move", post(make_move))
        .route("/mine", post(mine))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(state: SharedState, port: u16) -> anyhow::Result<()> {
    let app = router(state.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(game_id = %state.game_id, %addr, "game server listening");

    let key_path = std::path::Path::new("certs/key.pem");
    let cert_path = std::path::Path::new("certs/cert.pem");
    if key_path.exists() && cert_path.exists() {
        match axum_server::tls_rustls::RustlsConfig::from_pem_file(cert_path, key_path).await {
            Ok(tls_config) => {
                info!(game_id = %state.game_id, "serving over TLS");
                axum_server::bind_rustls(addr, tls_config)
                    .serve(app.into_make_service())
                    .await?;
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(game_id = %state.game_id, error = %e, "failed to load TLS config, falling back to plain HTTP");
            }
        }
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Serialize)]
struct RootResponse {
    #[serde(rename = "gameId")]
    game_id: String,
    name: &'static str,
    #[serde(rename = "timeRemaining")]
    time_remaining_secs: u64,
}

/// `GET /`: server metadata + timer (§4.6).
async fn root(State(state): State<SharedState>) -> Json<RootResponse> {
    Json(RootResponse {
        game_id: state.game_id.to_string(),
        name: "script-gamemaster game server",
        time_remaining_secs: state.session.time_remaining_secs(auth::now_millis()),
    })
}

async fn test_route() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

#[derive(Serialize)]
struct StatusResponse {
    #[serde(rename = "gameId")]
    game_id: String,
    phase: crate::types::Phase,
    #[serde(rename = "playerCount")]
    player_count: usize,
    #[serde(rename = "timeRemaining")]
    time_remaining_secs: u64,
    #[serde(rename = "startedAt")]
    started_at_millis: i64,
}

/// `GET /status`: full game-state snapshot — phase, player count, timer, start time (§4.6).
async fn status(State(state): State<SharedState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        game_id: state.game_id.to_string(),
        phase: state.phase(),
        player_count: state.players.len(),
        time_remaining_secs: state.session.time_remaining_secs(auth::now_millis()),
        started_at_millis: state.session.started_at_millis(),
    })
}

/// `GET /players`: sanitised per-player stats, no positions or current tile (§4.6).
async fn players(
    State(state): State<SharedState>,
) -> Json<Vec<crate::session::SanitisedPlayerStats>> {
    Json(state.session.sanitised_stats().await)
}

#[derive(Serialize)]
struct RegisterChallengeResponse {
    message: String,
    timestamp: i64,
    #[serde(rename = "gameId")]
    game_id: String,
}

/// `GET /register`: issues the EIP-191 challenge message the player signs client-side
/// (§4.9 step 1). Takes no parameters; membership is only checked at `POST /register`.
async fn register_challenge(State(state): State<SharedState>) -> Json<RegisterChallengeResponse> {
    let timestamp = auth::now_millis();
    let message = auth::build_challenge_message(state.contract_address, state.game_id, timestamp);
    Json(RegisterChallengeResponse {
        message,
        timestamp,
        game_id: state.game_id.to_string(),
    })
}

#[derive(Deserialize)]
struct RegisterSubmitRequest {
    address: String,
    signature: String,
    timestamp: i64,
}

#[derive(Serialize)]
struct RegisterSubmitResponse {
    token: String,
    #[serde(rename = "expiresIn")]
    expires_in: i64,
}

/// `POST /register`: verifies the signed challenge and mints a bearer token (§4.9 step 2).
async fn register_submit(
    State(state): State<SharedState>,
    Json(body): Json<RegisterSubmitRequest>,
) -> Result<Json<RegisterSubmitResponse>, ApiError> {
    let address = body
        .address
        .parse::<Address>()
        .map_err(|_| ApiError::Validation("invalid address".to_string()))?;
    if !state.players.contains(&address) {
        return Err(ApiError::Auth(AuthError::NotAPlayer));
    }

    let now = auth::now_millis();
    if !auth::challenge_is_fresh(body.timestamp, now) {
        return Err(ApiError::Validation("challenge has expired".to_string()));
    }
    let message = auth::build_challenge_message(state.contract_address, state.game_id, body.timestamp);
    auth::recover_and_verify(&message, &body.signature, address)
        .map_err(|e| ApiError::Auth(AuthError::SignatureVerification(e.to_string())))?;

    let token = auth::mint_token(&state.token_secret, address, now)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(RegisterSubmitResponse {
        token,
        expires_in: auth::TOKEN_VALIDITY_SECS,
    }))
}

/// `GET /map`: the player's local 3x3 view plus remaining budgets and the session clock
/// (§4.5, §4.6).
async fn map(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<crate::session::PlayerView>, ApiError> {
    let payload = authenticate(&state, &headers).await?;
    if !state.session.player_exists(payload.address).await {
        return Err(ApiError::PlayerNotFound);
    }
    let view = state.session.view(payload.address, auth::now_millis()).await;
    Ok(Json(view))
}

#[derive(Deserialize)]
struct MoveRequest {
    direction: String,
}

async fn make_move(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(body): Json<MoveRequest>,
) -> Result<Json<crate::session::PlayerView>, ApiError> {
    let payload = authenticate(&state, &headers).await?;
    if !state.session.player_exists(payload.address).await {
        return Err(ApiError::PlayerNotFound);
    }
    let direction = Direction::parse(&body.direction)?;
    let view = state
        .session
        .mv(payload.address, direction, auth::now_millis())
        .await?;
    Ok(Json(view))
}

#[derive(Serialize)]
struct MineResponse {
    #[serde(rename = "pointsAwarded")]
    points_awarded: u64,
    #[serde(flatten)]
    view: crate::session::PlayerView,
}

async fn mine(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<MineResponse>, ApiError> {
    let payload = authenticate(&state, &headers).await?;
    if !state.session.player_exists(payload.address).await {
        return Err(ApiError::PlayerNotFound);
    }
    let (points, view) = state.session.mine(payload.address, auth::now_millis()).await?;
    Ok(Json(MineResponse {
        points_awarded: points,
        view,
    }))
}

#[allow(dead_code)]
fn rebuild_map_from_artifact(loaded: LoadedMap) -> crate::map::GameMap {
    crate::map::GameMap {
        size: loaded.size,
        land: loaded.land,
        starting_position: loaded.starting_position,
        starting_original_land_type: loaded.starting_original_land_type,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use crate::map::generate_map;
    use crate::session::PlayerState;
    use std::collections::HashMap;
    use tower::ServiceExt;

    fn test_state() -> SharedState {
        let map = generate_map([7u8; 32], 5);
        let addr = Address::from_low_u64_be(1);
        let mut players = HashMap::new();
        players.insert(
            addr,
            PlayerState {
                position: crate::map::Position { x: 0, y: 0 },
                score: 0,
                moves_remaining: crate::map::MAX_MOVES,
                mines_remaining: crate::map::MAX_MINES,
            },
        );
        Arc::new(GameServerState::new(
            U256::from(1u64),
            Address::zero(),
            "test-secret".to_string(),
            GameSession::new(map, players, auth::now_millis()),
            vec![addr],
        ))
    }

    #[tokio::test]
    async fn status_reports_player_count() {
        let state = test_state();
        let app = router(state);
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/status")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn map_without_a_token_is_unauthorized() {
        let state = test_state();
        let app = router(state);
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/map")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn map_with_a_valid_token_succeeds() {
        let state = test_state();
        let addr = state.players[0];
        let token = auth::mint_token(&state.token_secret, addr, auth::now_millis()).unwrap();
        let app = router(state);
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/map")
                    .header("Authorization", format!("Bearer {token}"))
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn register_challenge_takes_no_params_and_echoes_the_game_id() {
        let state = test_state();
        let game_id = state.game_id;
        let app = router(state);
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/register")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["gameId"], game_id.to_string());
        assert!(json["message"].as_str().unwrap().contains("GameId"));
    }

    #[tokio::test]
    async fn register_submit_rejects_unknown_addresses() {
        let state = test_state();
        let app = router(state);
        let body = serde_json::json!({
            "address": format!("{:#x}", Address::from_low_u64_be(99)),
            "signature": format!("0x{}", "00".repeat(65)),
            "timestamp": auth::now_millis(),
        });
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/register")
                    .header("Content-Type", "application/json")
                    .body(axum::body::Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn status_reports_the_derived_phase() {
        let state = test_state();
        state.set_phase(crate::types::Phase::GameFinished);
        let app = router(state);
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/status")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["phase"], "GAME_FINISHED");
    }
}
