//! The chain client adapter (C3): a typed wrapper over the opaque RPC client for exactly
//! the contract operations this system needs (§4.3). The "opaque client" the spec treats as
//! an external collaborator — exposing `readContract`/`writeContract`/`waitForReceipt`/
//! `getBlockNumber`/`watchEvent`/`getContractEvents` — is realised here as
//! `ethers::providers::Provider` plus an `abigen!`-generated typed binding; `ChainClient` is
//! the trait the rest of the system actually depends on, so tests can swap in a mock.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::contract::{abigen, EthEvent};
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Filter, U256};

use crate::error::ChainError;

use super::types::{ChainEvent, CommitRevealState, GameInfo, PayoutInfo};

/// The block-hash retention window on the target execution layer (commonly 256 blocks);
/// anything older is irrecoverable (§4.4, GLOSSARY "Retention window").
pub const RETENTION_WINDOW_BLOCKS: u64 = 256;
/// The system treats anything older than 240 blocks as irrecoverable, ahead of the hard
/// 256-block wall, to leave margin for the transaction that reads it (§4.4).
pub const TOO_OLD_THRESHOLD_BLOCKS: u64 = 240;

abigen!(
    GameContractAbi,
    r#"[
        function getGameInfo(uint256 gameId) external view returns (address gamemaster, address creator, uint256 stakeAmount, bool open, uint256 playerCount, bool hasOpened, bool hasClosed)
        function getCommitRevealState(uint256 gameId) external view returns (bytes32 committedHash, uint256 commitBlockNumber, bytes32 revealValue, bytes32 randomHash, bool hasCommitted, bool hasRevealed, bool hasStoredBlockHash, uint256 mapSize)
        function getPayoutInfo(uint256 gameId) external view returns (address[] winners, uint256 payoutAmount, bool hasPaidOut)
        function getPlayers(uint256 gameId) external view returns (address[] players)
        function commitHash(uint256 gameId, bytes32 hash) external
        function storeCommitBlockHash(uint256 gameId, string serverURL) external
        function revealHash(uint256 gameId, bytes32 reveal) external
        function payout(uint256 gameId, address[] winners) external
        event GameCreated(uint256 indexed gameId, address indexed gamemaster)
        event GameOpened(uint256 indexed gameId)
        event GameClosed(uint256 indexed gameId)
        event HashCommitted(uint256 indexed gameId)
    ]"#
);

/// Narrow, typed surface the state machine and orchestrator depend on. An `EthersChainClient`
/// is the production implementation; tests substitute a `MockChainClient` (see `chain::mock`).
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn get_game_info(&self, game_id: U256) -> Result<GameInfo, ChainError>;
    async fn get_commit_reveal_state(&self, game_id: U256) -> Result<CommitRevealState, ChainError>;
    async fn get_payout_info(&self, game_id: U256) -> Result<PayoutInfo, ChainError>;
    async fn get_players(&self, game_id: U256) -> Result<Vec<Address>, ChainError>;
    async fn get_commit_block_hash(&self, game_id: U256) -> Result<[u8; 32], ChainError>;
    /// Explicit availability predicate (§9 design note) replacing a try/probe-and-catch idiom.
    async fn is_block_hash_available(&self, game_id: U256) -> Result<bool, ChainError>;
    async fn get_block_number(&self) -> Result<u64, ChainError>;

    async fn commit_hash(&self, game_id: U256, hash: [u8; 32]) -> Result<(), ChainError>;
    async fn store_commit_block_hash(
        &self,
        game_id: U256,
        server_url: &str,
    ) -> Result<(), ChainError>;
    async fn reveal_hash(&self, game_id: U256, reveal: [u8; 32]) -> Result<(), ChainError>;
    async fn payout(&self, game_id: U256, winners: &[Address]) -> Result<(), ChainError>;

    /// Bounded historical scan from genesis, used only at startup (§4.8 step 2).
    async fn scan_games_created_by(&self, gamemaster: Address) -> Result<Vec<U256>, ChainError>;
    /// One poll of live events since `from_block`; the orchestrator calls this every tick
    /// rather than holding an open subscription, which works uniformly over HTTP or WS
    /// transports (§4.3 "event subscription").
    async fn poll_events(&self, from_block: u64) -> Result<(Vec<ChainEvent>, u64), ChainError>;
}

pub struct EthersChainClient {
    contract: GameContractAbi<SignerMiddleware<Provider<Http>, LocalWallet>>,
    provider: Arc<Provider<Http>>,
    receipt_timeout: Duration,
}

impl EthersChainClient {
    pub fn new(
        rpc_url: &str,
        contract_address: Address,
        privkey: &str,
        chain_id: u64,
    ) -> anyhow::Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)?;
        let wallet: LocalWallet = privkey.parse::<LocalWallet>()?.with_chain_id(chain_id);
        let provider = Arc::new(provider);
        let signer = SignerMiddleware::new((*provider).clone(), wallet);
        let contract = GameContractAbi::new(contract_address, Arc::new(signer));
        Ok(EthersChainClient {
            contract,
            provider,
            receipt_timeout: Duration::from_secs(120),
        })
    }

    fn map_contract_error<E: std::fmt::Display>(err: E) -> ChainError {
        let msg = err.to_string();
        let lower = msg.to_lowercase();
        if lower.contains("insufficient funds") {
            ChainError::InsufficientFunds
        } else if lower.contains("not authorized") || lower.contains("unauthorized") {
            ChainError::NotAuthorized
        } else if lower.contains("timed out") || lower.contains("timeout") {
            ChainError::Reverted("receipt wait timed out".to_string())
        } else {
            ChainError::Reverted(msg)
        }
    }

    async fn send_and_wait(
        &self,
        call: ethers::contract::builders::ContractCall<
            SignerMiddleware<Provider<Http>, LocalWallet>,
            (),
        >,
    ) -> Result<(), ChainError> {
        let pending = call
            .send()
            .await
            .map_err(Self::map_contract_error)?;
        let receipt = tokio::time::timeout(self.receipt_timeout, pending)
            .await
            .map_err(|_| ChainError::Reverted("receipt wait timed out".to_string()))?
            .map_err(Self::map_contract_error)?;
        match receipt {
            Some(r) if r.status.map(|s| s.as_u64()) == Some(0) => {
                Err(ChainError::Reverted("transaction reverted".to_string()))
            }
            Some(_) => Ok(()),
            None => Err(ChainError::Reverted(
                "transaction dropped from mempool".to_string(),
            )),
        }
    }
}

#[async_trait]
impl ChainClient for EthersChainClient {
    async fn get_game_info(&self, game_id: U256) -> Result<GameInfo, ChainError> {
        let (gamemaster, creator, stake_amount, open, player_count, has_opened, has_closed) = self
            .contract
            .get_game_info(game_id)
            .call()
            .await
            .map_err(Self::map_contract_error)?;
        Ok(GameInfo {
            gamemaster,
            creator,
            stake_amount,
            open,
            player_count,
            has_opened,
            has_closed,
        })
    }

    async fn get_commit_reveal_state(
        &self,
        game_id: U256,
    ) -> Result<CommitRevealState, ChainError> {
        let (
            committed_hash,
            commit_block_number,
            reveal_value,
            random_hash,
            has_committed,
            has_revealed,
            has_stored_block_hash,
            map_size,
        ) = self
            .contract
            .get_commit_reveal_state(game_id)
            .call()
            .await
            .map_err(Self::map_contract_error)?;
        Ok(CommitRevealState {
            committed_hash,
            commit_block_number,
            reveal_value,
            random_hash,
            has_committed,
            has_revealed,
            has_stored_block_hash,
            map_size,
        })
    }

    async fn get_payout_info(&self, game_id: U256) -> Result<PayoutInfo, ChainError> {
        let (winners, payout_amount, has_paid_out) = self
            .contract
            .get_payout_info(game_id)
            .call()
            .await
            .map_err(Self::map_contract_error)?;
        Ok(PayoutInfo {
            winners,
            payout_amount,
            has_paid_out,
        })
    }

    async fn get_players(&self, game_id: U256) -> Result<Vec<Address>, ChainError> {
        self.contract
            .get_players(game_id)
            .call()
            .await
            .map_err(Self::map_contract_error)
    }

    async fn get_commit_block_hash(&self, game_id: U256) -> Result<[u8; 32], ChainError> {
        let state = self.get_commit_reveal_state(game_id).await?;
        let block = self
            .provider
            .get_block(state.commit_block_number.as_u64())
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        match block.and_then(|b| b.hash) {
            Some(hash) => Ok(hash.0),
            None => Err(ChainError::BlockHashUnavailable),
        }
    }

    async fn is_block_hash_available(&self, game_id: U256) -> Result<bool, ChainError> {
        match self.get_commit_block_hash(game_id).await {
            Ok(_) => Ok(true),
            Err(ChainError::BlockHashUnavailable) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn get_block_number(&self) -> Result<u64, ChainError> {
        self.provider
            .get_block_number()
            .await
            .map(|n| n.as_u64())
            .map_err(|e| ChainError::Transport(e.to_string()))
    }

    async fn commit_hash(&self, game_id: U256, hash: [u8; 32]) -> Result<(), ChainError> {
        let call = self.contract.commit_hash(game_id, hash);
        self.send_and_wait(call).await
    }

    async fn store_commit_block_hash(
        &self,
        game_id: U256,
        server_url: &str,
    ) -> Result<(), ChainError> {
        let call = self
            .contract
            .store_commit_block_hash(game_id, server_url.to_string());
        self.send_and_wait(call).await
    }

    async fn reveal_hash(&self, game_id: U256, reveal: [u8; 32]) -> Result<(), ChainError> {
        let call = self.contract.reveal_hash(game_id, reveal);
        self.send_and_wait(call).await
    }

    async fn payout(&self, game_id: U256, winners: &[Address]) -> Result<(), ChainError> {
        let call = self.contract.payout(game_id, winners.to_vec());
        self.send_and_wait(call).await
    }

    async fn scan_games_created_by(&self, gamemaster: Address) -> Result<Vec<U256>, ChainError> {
        let filter = self
            .contract
            .game_created_filter()
            .filter
            .clone()
            .topic2(gamemaster)
            .from_block(0u64);
        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        Ok(logs
            .into_iter()
            .filter_map(|log| {
                log.topics
                    .get(1)
                    .map(|t| U256::from_big_endian(t.as_bytes()))
            })
            .collect())
    }

    async fn poll_events(&self, from_block: u64) -> Result<(Vec<ChainEvent>, u64), ChainError> {
        let latest = self.get_block_number().await?;
        if from_block > latest {
            return Ok((Vec::new(), latest));
        }

        let filter = Filter::new()
            .address(self.contract.address())
            .from_block(from_block)
            .to_block(latest);
        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        let mut events = Vec::new();
        for log in logs {
            let Some(topic0) = log.topics.first().copied() else {
                continue;
            };
            let game_id = log
                .topics
                .get(1)
                .map(|t| U256::from_big_endian(t.as_bytes()))
                .unwrap_or_default();

            if topic0 == GameCreatedFilter::signature() {
                let gamemaster = log
                    .topics
                    .get(2)
                    .map(|t| Address::from_slice(&t.as_bytes()[12..]))
                    .unwrap_or_default();
                events.push(ChainEvent::GameCreated { game_id, gamemaster });
            } else if topic0 == GameOpenedFilter::signature() {
                events.push(ChainEvent::GameOpened { game_id });
            } else if topic0 == GameClosedFilter::signature() {
                events.push(ChainEvent::GameClosed { game_id });
            } else if topic0 == HashCommittedFilter::signature() {
                events.push(ChainEvent::HashCommitted { game_id });
            }
        }

        Ok((events, latest + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const _: () = assert!(TOO_OLD_THRESHOLD_BLOCKS < RETENTION_WINDOW_BLOCKS);
}
