pub mod client;
pub mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod mock;

pub use client::{ChainClient, EthersChainClient, RETENTION_WINDOW_BLOCKS, TOO_OLD_THRESHOLD_BLOCKS};
pub use types::{ChainEvent, CommitRevealState, GameInfo, PayoutInfo};
