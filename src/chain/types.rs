//! Plain request/response shapes for the chain client adapter (C3). These decouple the
//! `ChainClient` trait from the concrete `ethers` contract binding so the state machine and
//! orchestrator never see an ABI-generated tuple.

use ethers::types::{Address, U256};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GameInfo {
    pub gamemaster: Address,
    pub creator: Address,
    pub stake_amount: U256,
    pub open: bool,
    pub player_count: U256,
    pub has_opened: bool,
    pub has_closed: bool,
}

/// The "newer 8-tuple state accessor" the design notes require (§9) — older variants that
/// omit `has_stored_block_hash` must not be reproduced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitRevealState {
    pub committed_hash: [u8; 32],
    pub commit_block_number: U256,
    pub reveal_value: [u8; 32],
    pub random_hash: [u8; 32],
    pub has_committed: bool,
    pub has_revealed: bool,
    pub has_stored_block_hash: bool,
    pub map_size: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayoutInfo {
    pub winners: Vec<Address>,
    pub payout_amount: U256,
    pub has_paid_out: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainEvent {
    GameCreated { game_id: U256, gamemaster: Address },
    GameOpened { game_id: U256 },
    GameClosed { game_id: U256 },
    HashCommitted { game_id: U256 },
}
