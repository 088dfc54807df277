//! `script-gamemaster`: an off-chain game-master daemon that drives a commit-reveal
//! on-chain exploration game through its full per-game lifecycle — committing randomness,
//! generating the map, running a timed session API, and paying out winners.

pub mod api;
pub mod auth;
pub mod chain;
pub mod commit_reveal;
pub mod config;
pub mod error;
pub mod map;
pub mod orchestrator;
pub mod rng;
pub mod session;
pub mod state_machine;
pub mod store;
pub mod types;
