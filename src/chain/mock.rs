//! An in-memory `ChainClient` used by the state-machine and orchestrator tests. It lets a
//! test script chain state transitions (open a game, close it, mine blocks) without a live
//! RPC endpoint.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use ethers::types::{Address, U256};

use crate::error::ChainError;

use super::client::ChainClient;
use super::types::{ChainEvent, CommitRevealState, GameInfo, PayoutInfo};

#[derive(Debug, Clone)]
pub struct MockGame {
    pub gamemaster: Address,
    pub creator: Address,
    pub stake_amount: U256,
    pub open: bool,
    pub players: Vec<Address>,
    pub has_opened: bool,
    pub has_closed: bool,
    pub committed_hash: [u8; 32],
    pub commit_block_number: U256,
    pub reveal_value: [u8; 32],
    pub random_hash: [u8; 32],
    pub has_committed: bool,
    pub has_revealed: bool,
    pub has_stored_block_hash: bool,
    pub map_size: U256,
    pub winners: Vec<Address>,
    pub payout_amount: U256,
    pub has_paid_out: bool,
    pub block_hash_available: bool,
    pub fail_commit_with: Option<ChainError>,
    pub fail_payout_with: Option<ChainError>,
    pub fail_reveal_with: Option<ChainError>,
}

impl Default for MockGame {
    fn default() -> Self {
        MockGame {
            gamemaster: Address::zero(),
            creator: Address::zero(),
            stake_amount: U256::zero(),
            open: true,
            players: Vec::new(),
            has_opened: true,
            has_closed: false,
            committed_hash: [0u8; 32],
            commit_block_number: U256::zero(),
            reveal_value: [0u8; 32],
            random_hash: [0u8; 32],
            has_committed: false,
            has_revealed: false,
            has_stored_block_hash: false,
            map_size: U256::zero(),
            winners: Vec::new(),
            payout_amount: U256::zero(),
            has_paid_out: false,
            block_hash_available: true,
            fail_commit_with: None,
            fail_payout_with: None,
            fail_reveal_with: None,
        }
    }
}

pub struct MockChainClient {
    pub games: Mutex<HashMap<U256, MockGame>>,
    pub block_number: Mutex<u64>,
    pub commit_calls: Mutex<u32>,
    pub payout_calls: Mutex<u32>,
    pub reveal_calls: Mutex<u32>,
}

impl MockChainClient {
    pub fn new() -> Self {
        MockChainClient {
            games: Mutex::new(HashMap::new()),
            block_number: Mutex::new(1000),
            commit_calls: Mutex::new(0),
            payout_calls: Mutex::new(0),
            reveal_calls: Mutex::new(0),
        }
    }

    pub fn insert(&self, game_id: U256, game: MockGame) {
        self.games.lock().unwrap().insert(game_id, game);
    }

    pub fn set_block_number(&self, n: u64) {
        *self.block_number.lock().unwrap() = n;
    }

    fn get(&self, game_id: U256) -> Result<MockGame, ChainError> {
        self.games
            .lock()
            .unwrap()
            .get(&game_id)
            .cloned()
            .ok_or_else(|| ChainError::Reverted(format!("unknown game {game_id}")))
    }
}

impl Default for MockChainClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn get_game_info(&self, game_id: U256) -> Result<GameInfo, ChainError> {
        let g = self.get(game_id)?;
        Ok(GameInfo {
            gamemaster: g.gamemaster,
            creator: g.creator,
            stake_amount: g.stake_amount,
            open: g.open,
            player_count: U256::from(g.players.len() as u64),
            has_opened: g.has_opened,
            has_closed: g.has_closed,
        })
    }

    async fn get_commit_reveal_state(
        &self,
        game_id: U256,
    ) -> Result<CommitRevealState, ChainError> {
        let g = self.get(game_id)?;
        Ok(CommitRevealState {
            committed_hash: g.committed_hash,
            commit_block_number: g.commit_block_number,
            reveal_value: g.reveal_value,
            random_hash: g.random_hash,
            has_committed: g.has_committed,
            has_revealed: g.has_revealed,
            has_stored_block_hash: g.has_stored_block_hash,
            map_size: g.map_size,
        })
    }

    async fn get_payout_info(&self, game_id: U256) -> Result<PayoutInfo, ChainError> {
        let g = self.get(game_id)?;
        Ok(PayoutInfo {
            winners: g.winners,
            payout_amount: g.payout_amount,
            has_paid_out: g.has_paid_out,
        })
    }

    async fn get_players(&self, game_id: U256) -> Result<Vec<Address>, ChainError> {
        Ok(self.get(game_id)?.players)
    }

    async fn get_commit_block_hash(&self, game_id: U256) -> Result<[u8; 32], ChainError> {
        let g = self.get(game_id)?;
        if g.block_hash_available {
            let mut h = [0u8; 32];
            h[31] = 0xAB;
            Ok(h)
        } else {
            Err(ChainError::BlockHashUnavailable)
        }
    }

    async fn is_block_hash_available(&self, game_id: U256) -> Result<bool, ChainError> {
        Ok(self.get(game_id)?.block_hash_available)
    }

    async fn get_block_number(&self) -> Result<u64, ChainError> {
        Ok(*self.block_number.lock().unwrap())
    }

    async fn commit_hash(&self, game_id: U256, hash: [u8; 32]) -> Result<(), ChainError> {
        *self.commit_calls.lock().unwrap() += 1;
        let mut games = self.games.lock().unwrap();
        let g = games
            .get_mut(&game_id)
            .ok_or_else(|| ChainError::Reverted("unknown game".into()))?;
        if let Some(err) = g.fail_commit_with.clone() {
            return Err(err);
        }
        g.has_committed = true;
        g.committed_hash = hash;
        g.commit_block_number = U256::from(*self.block_number.lock().unwrap());
        Ok(())
    }

    async fn store_commit_block_hash(
        &self,
        game_id: U256,
        _server_url: &str,
    ) -> Result<(), ChainError> {
        let mut games = self.games.lock().unwrap();
        let g = games
            .get_mut(&game_id)
            .ok_or_else(|| ChainError::Reverted("unknown game".into()))?;
        if !g.block_hash_available {
            return Err(ChainError::BlockHashUnavailable);
        }
        g.has_stored_block_hash = true;
        Ok(())
    }

    async fn reveal_hash(&self, game_id: U256, reveal: [u8; 32]) -> Result<(), ChainError> {
        *self.reveal_calls.lock().unwrap() += 1;
        let mut games = self.games.lock().unwrap();
        let g = games
            .get_mut(&game_id)
            .ok_or_else(|| ChainError::Reverted("unknown game".into()))?;
        if let Some(err) = g.fail_reveal_with.clone() {
            return Err(err);
        }
        g.has_revealed = true;
        g.reveal_value = reveal;
        Ok(())
    }

    async fn payout(&self, game_id: U256, winners: &[Address]) -> Result<(), ChainError> {
        *self.payout_calls.lock().unwrap() += 1;
        let mut games = self.games.lock().unwrap();
        let g = games
            .get_mut(&game_id)
            .ok_or_else(|| ChainError::Reverted("unknown game".into()))?;
        if let Some(err) = g.fail_payout_with.clone() {
            return Err(err);
        }
        g.has_paid_out = true;
        g.winners = winners.to_vec();
        Ok(())
    }

    async fn scan_games_created_by(&self, gamemaster: Address) -> Result<Vec<U256>, ChainError> {
        Ok(self
            .games
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, g)| g.gamemaster == gamemaster)
            .map(|(id, _)| *id)
            .collect())
    }

    async fn poll_events(&self, from_block: u64) -> Result<(Vec<ChainEvent>, u64), ChainError> {
        Ok((Vec::new(), from_block))
    }
}
