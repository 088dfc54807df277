//! Orchestrator (C8): discovers games (historical scan + polling), fans a worker out per
//! game, and ticks every running game on a fixed cadence, prioritising GAME_RUNNING games
//! first so a slow CREATED game never starves an in-progress one (§4.8).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use ethers::types::{Address, U256};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::api::{self, GameServerState};
use crate::chain::{ChainClient, ChainEvent};
use crate::config::Config;
use crate::session::GameSession;
use crate::state_machine::{snapshot_record, ChainSnapshot, GameCallbacks, GameWorker};
use crate::store::ArtifactStore;
use crate::types::GameRecord;

/// How often the tick loop re-derives every known game's phase (§4.8 step 4).
pub const TICK_INTERVAL: Duration = Duration::from_millis(250);
/// How often the orchestrator polls for new chain events between ticks.
pub const EVENT_POLL_EVERY: u32 = 4;

struct RunningServer {
    state: Arc<GameServerState>,
    shutdown: tokio::sync::oneshot::Sender<()>,
    map_size: usize,
}

/// Bridges the state machine's narrow callback trait to the live per-game server registry
/// and artifact store, breaking the state_machine <-> api cyclic dependency (§9).
struct Callbacks {
    servers: Arc<DashMap<U256, RunningServer>>,
    store: Arc<ArtifactStore>,
    config: Arc<Config>,
    chain: Arc<dyn ChainClient>,
    base_port: u16,
}

#[async_trait]
impl GameCallbacks for Callbacks {
    async fn start_server(
        &self,
        game_id: U256,
        map_size: usize,
        random_hash: [u8; 32],
    ) -> anyhow::Result<()> {
        if self.servers.contains_key(&game_id) {
            return Ok(());
        }
        let players = self.chain.get_players(game_id).await?;
        let player_states =
            GameSession::initial_players(&players, &random_hash, game_id, map_size);

        let loaded = self.store.load_map(game_id)?;
        let map = crate::map::GameMap {
            size: loaded.size,
            land: loaded.land,
            starting_position: loaded.starting_position,
            starting_original_land_type: loaded.starting_original_land_type,
        };
        let session = GameSession::new(map, player_states, crate::auth::now_millis());

        let state = Arc::new(GameServerState::new(
            game_id,
            self.config.contract_address,
            self.config.token_secret(),
            session,
            players,
        ));

        let port = self.base_port + game_id.as_u32() as u16;
        let (tx, rx) = tokio::sync::oneshot::channel();
        let serve_state = state.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = api::serve(serve_state, port) => {
                    if let Err(e) = result {
                        error!(game_id = %game_id, error = %e, "game server exited with error");
                    }
                }
                _ = rx => {
                    info!(game_id = %game_id, "game server shutting down");
                }
            }
        });

        let timer_state = state.clone();
        tokio::spawn(async move {
            tokio::time::sleep(crate::session::SESSION_DURATION).await;
            timer_state.session.expire_timer().await;
        });

        self.servers.insert(
            game_id,
            RunningServer {
                state,
                shutdown: tx,
                map_size,
            },
        );
        Ok(())
    }

    async fn stop_server(&self, game_id: U256) {
        if let Some((_, server)) = self.servers.remove(&game_id) {
            let _ = server.shutdown.send(());
        }
    }

    async fn is_server_active(&self, game_id: U256) -> bool {
        self.servers.contains_key(&game_id)
    }

    async fn all_players_finished(&self, game_id: U256) -> Option<bool> {
        let server = self.servers.get(&game_id)?;
        Some(server.state.session.all_players_finished().await)
    }

    async fn persist_scores(&self, game_id: U256) -> anyhow::Result<()> {
        let server = self
            .servers
            .get(&game_id)
            .ok_or_else(|| anyhow::anyhow!("no active server for game {game_id}"))?;
        let records = server.state.session.snapshot().await;
        self.store.save_scores(game_id, records)?;
        Ok(())
    }

    async fn set_phase(&self, game_id: U256, phase: crate::types::Phase) {
        if let Some(server) = self.servers.get(&game_id) {
            server.state.set_phase(phase);
        }
    }
}

pub struct Orchestrator {
    chain: Arc<dyn ChainClient>,
    store: Arc<ArtifactStore>,
    config: Arc<Config>,
    workers: Mutex<HashMap<U256, GameWorker<Arc<Callbacks>>>>,
    servers: Arc<DashMap<U256, RunningServer>>,
    from_block: Mutex<u64>,
}

impl Orchestrator {
    pub fn new(chain: Arc<dyn ChainClient>, store: Arc<ArtifactStore>, config: Arc<Config>) -> Self {
        Orchestrator {
            chain,
            store,
            config,
            workers: Mutex::new(HashMap::new()),
            servers: Arc::new(DashMap::new()),
            from_block: Mutex::new(0),
        }
    }

    fn callbacks(&self) -> Arc<Callbacks> {
        Arc::new(Callbacks {
            servers: self.servers.clone(),
            store: self.store.clone(),
            config: self.config.clone(),
            chain: self.chain.clone(),
            base_port: 8000,
        })
    }

    fn port_for(&self, game_id: U256) -> u16 {
        8000 + game_id.as_u32() as u16
    }

    /// Historical scan for games created by this gamemaster's wallet, run once at startup
    /// before the live tick loop begins (§4.8 step 2).
    pub async fn discover_existing_games(&self, gamemaster: Address) -> anyhow::Result<()> {
        let game_ids = self.chain.scan_games_created_by(gamemaster).await?;
        let mut workers = self.workers.lock().await;
        for game_id in game_ids {
            workers
                .entry(game_id)
                .or_insert_with(|| GameWorker::new(game_id, self.port_for(game_id), self.callbacks()));
        }
        let current = self.chain.get_block_number().await?;
        *self.from_block.lock().await = current;
        Ok(())
    }

    async fn ingest_events(&self) -> anyhow::Result<()> {
        let mut from_block = self.from_block.lock().await;
        let (events, next_from) = self.chain.poll_events(*from_block).await?;
        *from_block = next_from;
        drop(from_block);

        if events.is_empty() {
            return Ok(());
        }
        let mut workers = self.workers.lock().await;
        for event in events {
            let game_id = match event {
                ChainEvent::GameCreated { game_id, .. }
                | ChainEvent::GameOpened { game_id }
                | ChainEvent::GameClosed { game_id }
                | ChainEvent::HashCommitted { game_id } => game_id,
            };
            workers
                .entry(game_id)
                .or_insert_with(|| GameWorker::new(game_id, self.port_for(game_id), self.callbacks()));
            info!(?event, "chain event ingested");
        }
        Ok(())
    }

    /// One pass over every known game, GAME_RUNNING first so an in-progress game's 250ms
    /// tick cadence is never starved by slower CREATED/COMMITTED games (§4.8 step 4).
    async fn tick_all(&self) {
        let config = self.config.clone();
        let server_url = move |port: u16| config.server_url(port);

        let mut workers = self.workers.lock().await;
        let mut game_ids: Vec<U256> = workers.keys().copied().collect();
        let servers = self.servers.clone();
        game_ids.sort_by_key(|id| if servers.contains_key(id) { 0 } else { 1 });

        let mut completed = Vec::new();
        for game_id in game_ids {
            let Some(worker) = workers.get_mut(&game_id) else {
                continue;
            };
            match worker.tick(self.chain.as_ref(), &self.store, &server_url).await {
                Ok(true) => completed.push(game_id),
                Ok(false) => {}
                Err(e) => warn!(game_id = %game_id, error = %e, "tick failed"),
            }
        }
        for game_id in completed {
            workers.remove(&game_id);
        }
    }

    /// Builds the `GameRecord` snapshot exposed by the admin-facing status views (§3).
    pub async fn record_for(&self, game_id: U256) -> Option<GameRecord> {
        let info = self.chain.get_game_info(game_id).await.ok()?;
        let crs = self.chain.get_commit_reveal_state(game_id).await.ok()?;
        let payout = self.chain.get_payout_info(game_id).await.ok()?;
        let snapshot = ChainSnapshot {
            has_opened: info.has_opened,
            has_closed: info.has_closed,
            has_committed: crs.has_committed,
            has_stored_block_hash: crs.has_stored_block_hash,
            has_revealed: crs.has_revealed,
            has_paid_out: payout.has_paid_out,
        };
        let workers = self.workers.lock().await;
        let flags = workers
            .get(&game_id)
            .map(|w| w.flags.clone())
            .unwrap_or_default();
        let phase = crate::state_machine::derive_phase(
            snapshot,
            self.servers.contains_key(&game_id),
            self.store.has_scores(game_id),
            false,
        );
        Some(snapshot_record(
            game_id,
            info.gamemaster,
            info.creator,
            info.stake_amount,
            phase,
            snapshot,
            info.player_count.as_usize(),
            self.servers.get(&game_id).map(|s| s.map_size).unwrap_or(0),
            &flags,
        ))
    }

    /// Runs the tick loop until `shutdown` resolves, then snapshots every running game's
    /// scores and tears servers down gracefully (§4.8 step 5, §6 SIGINT handling).
    pub async fn run(&self, mut shutdown: tokio::sync::mpsc::Receiver<()>) {
        let mut tick_count: u32 = 0;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(Instant::now() + TICK_INTERVAL) => {
                    tick_count = tick_count.wrapping_add(1);
                    if tick_count.is_multiple_of(EVENT_POLL_EVERY) {
                        if let Err(e) = self.ingest_events().await {
                            warn!(error = %e, "event polling failed");
                        }
                    }
                    self.tick_all().await;
                }
                _ = shutdown.recv() => {
                    info!("shutdown signal received, persisting running games and stopping servers");
                    self.shutdown_gracefully().await;
                    break;
                }
            }
        }
    }

    async fn shutdown_gracefully(&self) {
        let game_ids: Vec<U256> = self.servers.iter().map(|e| *e.key()).collect();
        for game_id in game_ids {
            if let Some((_, server)) = self.servers.remove(&game_id) {
                let records = server.state.session.snapshot().await;
                if let Err(e) = self.store.save_scores(game_id, records) {
                    warn!(game_id = %game_id, error = %e, "failed to persist scores on shutdown");
                }
                let _ = server.shutdown.send(());
            }
        }
    }
}
