//! Shared domain types for the game record and its lifecycle phases (§3, §4.7).

use chrono::{DateTime, Utc};
use ethers::types::{Address, U256};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Created,
    Committed,
    Closed,
    GameRunning,
    GameFinished,
    PayoutComplete,
    Complete,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Created => "CREATED",
            Phase::Committed => "COMMITTED",
            Phase::Closed => "CLOSED",
            Phase::GameRunning => "GAME_RUNNING",
            Phase::GameFinished => "GAME_FINISHED",
            Phase::PayoutComplete => "PAYOUT_COMPLETE",
            Phase::Complete => "COMPLETE",
        }
    }
}

/// Local bookkeeping the orchestrator layers on top of chain truth — flags that pin a
/// retry-exhaustion side door and the one piece of state that really is local (whether this
/// process currently runs that game's server).
#[derive(Debug, Clone, Default)]
pub struct LocalGameFlags {
    pub payout_skipped: bool,
    pub reveal_skipped: bool,
    pub expired: bool,
    pub expired_reason: Option<String>,
    pub this_server_active: bool,
    pub scores_persisted: bool,
}

/// A snapshot of one game's state as tracked by the orchestrator (§3 Game). Recomputed (not
/// mutated in place) on each read of chain truth, with `LocalGameFlags` carried across ticks.
#[derive(Debug, Clone, Serialize)]
pub struct GameRecord {
    pub game_id: U256,
    pub gamemaster: Address,
    pub creator: Address,
    pub stake_amount: U256,
    pub phase: Phase,
    pub has_opened: bool,
    pub has_closed: bool,
    pub has_committed: bool,
    pub has_stored_block_hash: bool,
    pub has_revealed: bool,
    pub has_paid_out: bool,
    pub player_count: usize,
    pub map_size: usize,
    #[serde(skip)]
    pub last_updated: DateTime<Utc>,
    pub payout_skipped: bool,
    pub reveal_skipped: bool,
    pub expired: bool,
    pub expired_reason: Option<String>,
}
