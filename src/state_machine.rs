//! Per-game state machine (C7): drives one game through CREATED → COMMITTED → CLOSED →
//! GAME_RUNNING → GAME_FINISHED → PAYOUT_COMPLETE → COMPLETE, with retry/backoff,
//! skip-on-exhaustion, and expiration on a stale block hash (§4.7).
//!
//! Every tick re-reads chain truth before acting — no step is guarded by "have I already
//! tried" alone (§4.7 Idempotency) — and cyclic C5/C6 dependencies are broken by a narrow
//! `GameCallbacks` trait the orchestrator supplies at construction (§9).

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use ethers::types::U256;
use tracing::{info, warn};

use crate::chain::ChainClient;
use crate::commit_reveal;
use crate::error::ChainError;
use crate::map::map_size_for;
use crate::store::ArtifactStore;
use crate::types::{GameRecord, LocalGameFlags, Phase};

/// Maximum payout retries before the game is advanced anyway with `payoutSkipped=true` (§4.7).
pub const MAX_PAYOUT_RETRIES: u32 = 10;
/// Maximum reveal retries on `BlockHashUnavailable` before `revealSkipped=true` (§4.4 step 4).
pub const MAX_REVEAL_RETRIES: u32 = 1;
/// Delay before the per-game server is torn down after a successful reveal (§4.7 COMPLETE).
pub const POST_REVEAL_SHUTDOWN_DELAY: Duration = Duration::from_secs(15);

/// Narrow callback surface the state machine uses to reach into C5/C6 without either module
/// importing the other (§9 "cyclic module dependency... becomes a callback interface").
#[async_trait]
pub trait GameCallbacks: Send + Sync {
    async fn start_server(&self, game_id: U256, map_size: usize, random_hash: [u8; 32]) -> anyhow::Result<()>;
    async fn stop_server(&self, game_id: U256);
    async fn is_server_active(&self, game_id: U256) -> bool;
    /// `None` while the server hasn't been told to start yet; `Some(true)` once every
    /// player satisfies the end-of-game condition (§4.5).
    async fn all_players_finished(&self, game_id: U256) -> Option<bool>;
    async fn persist_scores(&self, game_id: U256) -> anyhow::Result<()>;
    /// Publishes the freshly-derived phase to the running server's `/status` view, if any
    /// (§4.6 "full game-state snapshot"). A no-op while no server is running for this game.
    async fn set_phase(&self, game_id: U256, phase: Phase);
}

#[async_trait]
impl<T: GameCallbacks + ?Sized> GameCallbacks for std::sync::Arc<T> {
    async fn start_server(&self, game_id: U256, map_size: usize, random_hash: [u8; 32]) -> anyhow::Result<()> {
        (**self).start_server(game_id, map_size, random_hash).await
    }
    async fn stop_server(&self, game_id: U256) {
        (**self).stop_server(game_id).await
    }
    async fn is_server_active(&self, game_id: U256) -> bool {
        (**self).is_server_active(game_id).await
    }
    async fn all_players_finished(&self, game_id: U256) -> Option<bool> {
        (**self).all_players_finished(game_id).await
    }
    async fn persist_scores(&self, game_id: U256) -> anyhow::Result<()> {
        (**self).persist_scores(game_id).await
    }
    async fn set_phase(&self, game_id: U256, phase: Phase) {
        (**self).set_phase(game_id, phase).await
    }
}

/// Raw chain-observable facts the transition table (§4.7) combines with a local peek.
#[derive(Debug, Clone, Copy)]
pub struct ChainSnapshot {
    pub has_opened: bool,
    pub has_closed: bool,
    pub has_committed: bool,
    pub has_stored_block_hash: bool,
    pub has_revealed: bool,
    pub has_paid_out: bool,
}

/// Pure function: derives the phase from chain-observable facts plus a local peek at the
/// active-server registry and whether a scores artifact exists (§4.7 transition table).
pub fn derive_phase(
    snapshot: ChainSnapshot,
    this_server_active: bool,
    scores_exist: bool,
    all_players_finished: bool,
) -> Phase {
    if snapshot.has_revealed {
        return Phase::Complete;
    }
    if snapshot.has_paid_out {
        return Phase::PayoutComplete;
    }
    if snapshot.has_closed && snapshot.has_committed && snapshot.has_stored_block_hash {
        if scores_exist && all_players_finished {
            return Phase::GameFinished;
        }
        if this_server_active {
            return Phase::GameRunning;
        }
        return Phase::Closed;
    }
    if snapshot.has_committed {
        return Phase::Committed;
    }
    Phase::Created
}

/// Applies the locally-pinned skip flags on top of the chain-derived phase: once a retry
/// door has been taken, re-deriving from chain truth alone must not walk the phase backwards.
fn pin_local_skips(mut phase: Phase, flags: &LocalGameFlags) -> Phase {
    if flags.payout_skipped && phase == Phase::GameFinished {
        phase = Phase::PayoutComplete;
    }
    if flags.reveal_skipped && phase == Phase::PayoutComplete {
        phase = Phase::Complete;
    }
    phase
}

pub struct GameWorker<C: GameCallbacks> {
    pub game_id: U256,
    pub server_url_port: u16,
    pub flags: LocalGameFlags,
    pub payout_retry_count: u32,
    pub reveal_retry_count: u32,
    pub next_payout_attempt_after: Option<std::time::Instant>,
    pub next_reveal_attempt_after: Option<std::time::Instant>,
    pub scheduled_shutdown_after: Option<std::time::Instant>,
    callbacks: C,
}

impl<C: GameCallbacks> GameWorker<C> {
    pub fn new(game_id: U256, server_url_port: u16, callbacks: C) -> Self {
        GameWorker {
            game_id,
            server_url_port,
            flags: LocalGameFlags::default(),
            payout_retry_count: 0,
            reveal_retry_count: 0,
            next_payout_attempt_after: None,
            next_reveal_attempt_after: None,
            scheduled_shutdown_after: None,
            callbacks,
        }
    }

    /// One tick: re-read chain truth, compute the phase, and run that phase's action.
    /// Returns `true` once the game reaches COMPLETE and should be dropped from the registry.
    pub async fn tick(
        &mut self,
        chain: &dyn ChainClient,
        store: &ArtifactStore,
        server_base_url: impl Fn(u16) -> String,
    ) -> anyhow::Result<bool> {
        if self.flags.expired {
            self.complete(chain, store).await;
            return Ok(true);
        }

        let current_block = chain.get_block_number().await?;
        let crs = chain.get_commit_reveal_state(self.game_id).await?;
        let info = chain.get_game_info(self.game_id).await?;

        let snapshot = ChainSnapshot {
            has_opened: info.has_opened,
            has_closed: info.has_closed,
            has_committed: crs.has_committed,
            has_stored_block_hash: crs.has_stored_block_hash,
            has_revealed: crs.has_revealed,
            has_paid_out: chain.get_payout_info(self.game_id).await?.has_paid_out,
        };

        let this_server_active = self.callbacks.is_server_active(self.game_id).await;
        let scores_exist = store.has_scores(self.game_id);
        let all_finished = self
            .callbacks
            .all_players_finished(self.game_id)
            .await
            .unwrap_or(false);

        let phase = pin_local_skips(
            derive_phase(snapshot, this_server_active, scores_exist, all_finished),
            &self.flags,
        );
        self.callbacks.set_phase(self.game_id, phase).await;

        match phase {
            Phase::Created => self.act_created(chain, store).await?,
            Phase::Committed => {
                self.act_committed(chain, store, current_block, &server_base_url)
                    .await?
            }
            Phase::Closed => {
                self.act_closed(chain, store, current_block).await?
            }
            Phase::GameRunning => self.act_game_running(chain, store, all_finished).await?,
            Phase::GameFinished => self.act_game_finished(chain, store).await?,
            Phase::PayoutComplete => self.act_payout_complete(chain, store).await?,
            Phase::Complete => {
                self.complete(chain, store).await;
                return Ok(true);
            }
        }

        Ok(false)
    }

    async fn act_created(
        &mut self,
        chain: &dyn ChainClient,
        store: &ArtifactStore,
    ) -> anyhow::Result<()> {
        match commit_reveal::generate_and_commit(chain, store, self.game_id).await {
            Ok(()) => info!(game_id = %self.game_id, "committed randomness hash"),
            Err(e) if e.is_retryable() => {
                warn!(game_id = %self.game_id, error = %e, "commit failed, will retry next tick")
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn act_committed(
        &mut self,
        chain: &dyn ChainClient,
        _store: &ArtifactStore,
        current_block: u64,
        server_base_url: &impl Fn(u16) -> String,
    ) -> anyhow::Result<()> {
        let crs = chain.get_commit_reveal_state(self.game_id).await?;
        if crs.has_stored_block_hash {
            return Ok(());
        }
        if commit_reveal::is_game_too_old_to_start(current_block, crs.commit_block_number.as_u64())
        {
            self.mark_expired("commit block too old before block hash could be stored");
            return Ok(());
        }

        let url = server_base_url(self.server_url_port);
        match commit_reveal::try_store_block_hash(chain, self.game_id, &url).await {
            Ok(()) => info!(game_id = %self.game_id, "stored commit block hash reference"),
            Err(ChainError::BlockNotReady) => {
                info!(game_id = %self.game_id, "commit block not yet mined, waiting")
            }
            Err(ChainError::BlockHashUnavailable) => {
                self.mark_expired("commit block hash unavailable when storing reference")
            }
            Err(e) if e.is_retryable() => {
                warn!(game_id = %self.game_id, error = %e, "store block hash failed, retrying")
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn act_closed(
        &mut self,
        chain: &dyn ChainClient,
        store: &ArtifactStore,
        current_block: u64,
    ) -> anyhow::Result<()> {
        if self.callbacks.is_server_active(self.game_id).await {
            return Ok(());
        }

        let crs = chain.get_commit_reveal_state(self.game_id).await?;
        if commit_reveal::is_game_too_old_to_start(current_block, crs.commit_block_number.as_u64())
        {
            self.mark_expired("game too old to start: commit block past freshness window");
            return Ok(());
        }
        if !chain.is_block_hash_available(self.game_id).await? {
            self.mark_expired("commit block hash unavailable at closure");
            return Ok(());
        }

        let commit_block_hash = chain.get_commit_block_hash(self.game_id).await?;
        let reveal = store
            .load_reveal(self.game_id)
            .map_err(|e| anyhow::anyhow!("missing reveal artifact for game {}: {e}", self.game_id))?;
        let random_hash = commit_reveal::compute_random_hash(&commit_block_hash, &reveal);

        let info = chain.get_game_info(self.game_id).await?;
        let map_size = if crs.map_size.is_zero() {
            map_size_for(info.player_count.as_usize())
        } else {
            crs.map_size.as_usize()
        };

        let generated = crate::map::generate_map(random_hash, map_size);
        store
            .save_map(self.game_id, &generated, &reveal, &random_hash)
            .map_err(|e| anyhow::anyhow!("failed to persist map for game {}: {e}", self.game_id))?;

        self.callbacks
            .start_server(self.game_id, map_size, random_hash)
            .await?;
        info!(game_id = %self.game_id, map_size, "game server started");
        Ok(())
    }

    async fn act_game_running(
        &mut self,
        _chain: &dyn ChainClient,
        store: &ArtifactStore,
        all_finished: bool,
    ) -> anyhow::Result<()> {
        if !all_finished {
            return Ok(());
        }
        if !store.has_scores(self.game_id) {
            self.callbacks.persist_scores(self.game_id).await?;
            info!(game_id = %self.game_id, "all players finished, scores persisted");
        }
        Ok(())
    }

    async fn act_game_finished(
        &mut self,
        chain: &dyn ChainClient,
        store: &ArtifactStore,
    ) -> anyhow::Result<()> {
        if let Some(after) = self.next_payout_attempt_after {
            if std::time::Instant::now() < after {
                return Ok(());
            }
        }

        let records = store
            .load_scores(self.game_id)
            .map_err(|e| anyhow::anyhow!("failed to load scores for game {}: {e}", self.game_id))?;
        let winners = crate::session::compute_winners(&records);

        match chain.payout(self.game_id, &winners).await {
            Ok(()) => {
                info!(game_id = %self.game_id, winners = winners.len(), "payout submitted");
                self.payout_retry_count = 0;
                self.next_payout_attempt_after = None;
            }
            Err(ChainError::InsufficientFunds) => {
                self.payout_retry_count += 1;
                let backoff = Duration::from_secs(
                    (10u64.saturating_mul(1u64 << self.payout_retry_count.min(32))).min(600),
                );
                warn!(game_id = %self.game_id, attempt = self.payout_retry_count, deficit_backoff_secs = backoff.as_secs(), "payout failed: insufficient funds");
                self.schedule_or_skip_payout(backoff);
            }
            Err(e) if e.is_retryable() => {
                self.payout_retry_count += 1;
                let backoff = Duration::from_secs(
                    (5u64.saturating_mul(1u64 << self.payout_retry_count.saturating_sub(1).min(32)))
                        .min(300),
                );
                warn!(game_id = %self.game_id, attempt = self.payout_retry_count, error = %e, backoff_secs = backoff.as_secs(), "payout failed, retrying");
                self.schedule_or_skip_payout(backoff);
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    fn schedule_or_skip_payout(&mut self, backoff: Duration) {
        if self.payout_retry_count >= MAX_PAYOUT_RETRIES {
            warn!(game_id = %self.game_id, "payout retries exhausted, skipping");
            self.flags.payout_skipped = true;
        } else {
            self.next_payout_attempt_after = Some(std::time::Instant::now() + backoff);
        }
    }

    async fn act_payout_complete(
        &mut self,
        chain: &dyn ChainClient,
        store: &ArtifactStore,
    ) -> anyhow::Result<()> {
        if let Some(after) = self.next_reveal_attempt_after {
            if std::time::Instant::now() < after {
                return Ok(());
            }
        }

        match commit_reveal::reveal(chain, store, self.game_id).await {
            Ok(()) => {
                info!(game_id = %self.game_id, "reveal submitted");
                self.scheduled_shutdown_after =
                    Some(std::time::Instant::now() + POST_REVEAL_SHUTDOWN_DELAY);
            }
            Err(ChainError::BlockHashUnavailable) => {
                self.reveal_retry_count += 1;
                if self.reveal_retry_count > MAX_REVEAL_RETRIES {
                    warn!(game_id = %self.game_id, "reveal retries exhausted, skipping");
                    self.flags.reveal_skipped = true;
                } else {
                    self.next_reveal_attempt_after = Some(
                        std::time::Instant::now()
                            + Duration::from_secs(commit_reveal::REVEAL_RETRY_DELAY_SECS),
                    );
                }
            }
            Err(e) if e.is_retryable() => {
                warn!(game_id = %self.game_id, error = %e, "reveal failed, retrying");
                self.next_reveal_attempt_after = Some(
                    std::time::Instant::now()
                        + Duration::from_secs(commit_reveal::REVEAL_RETRY_DELAY_SECS),
                );
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn complete(&mut self, _chain: &dyn ChainClient, store: &ArtifactStore) {
        let should_stop = match self.scheduled_shutdown_after {
            // Re-check at fire time that this process is still the active server for the
            // game before tearing it down (§5, §4.7 COMPLETE).
            Some(after) => std::time::Instant::now() >= after,
            None => true,
        };
        if should_stop && self.callbacks.is_server_active(self.game_id).await {
            self.callbacks.stop_server(self.game_id).await;
        }
        store.delete(self.game_id);
    }

    fn mark_expired(&mut self, reason: &str) {
        warn!(game_id = %self.game_id, reason, "game expired");
        self.flags.expired = true;
        self.flags.expired_reason = Some(reason.to_string());
    }
}

pub fn snapshot_record(
    game_id: U256,
    gamemaster: ethers::types::Address,
    creator: ethers::types::Address,
    stake_amount: U256,
    phase: Phase,
    snapshot: ChainSnapshot,
    player_count: usize,
    map_size: usize,
    flags: &LocalGameFlags,
) -> GameRecord {
    GameRecord {
        game_id,
        gamemaster,
        creator,
        stake_amount,
        phase,
        has_opened: snapshot.has_opened,
        has_closed: snapshot.has_closed,
        has_committed: snapshot.has_committed,
        has_stored_block_hash: snapshot.has_stored_block_hash,
        has_revealed: snapshot.has_revealed,
        has_paid_out: snapshot.has_paid_out,
        player_count,
        map_size,
        last_updated: Utc::now(),
        payout_skipped: flags.payout_skipped,
        reveal_skipped: flags.reveal_skipped,
        expired: flags.expired,
        expired_reason: flags.expired_reason.clone(),
    }
}
