//! Map generation (C1). The map is derived from the random hash — `keccak256(commit_block_hash
//! ++ reveal)` — so anyone holding the commit block hash and the revealed secret can
//! reproduce the grid byte-for-byte after reveal (§4.1).

use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::rng::Dice;

pub const MAX_MOVES: u32 = 12;
pub const MAX_MINES: u32 = 3;

/// A tile's resource value. `Depleted` is also what a mined tile becomes and what the
/// starting-position cell reads as once its original resource has been noted separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TileKind {
    Depleted = 0,
    Common = 1,
    Uncommon = 2,
    Rare = 3,
}

impl TileKind {
    fn from_roll(nibble: u64) -> TileKind {
        match nibble {
            0..=10 => TileKind::Common,
            11..=14 => TileKind::Uncommon,
            15 => TileKind::Rare,
            _ => unreachable!("a single hex nibble is always in 0..=15"),
        }
    }

    pub fn points(self) -> u64 {
        match self {
            TileKind::Depleted => 0,
            TileKind::Common => 1,
            TileKind::Uncommon => 5,
            TileKind::Rare => 10,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// The marker placed on one cell at generation time, worth a flat 25 points when mined.
pub const STARTING_POSITION_POINTS: u64 = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: usize,
    pub y: usize,
}

/// Torus wrap: `((c mod size) + size) mod size`, always in `[0, size)`.
pub fn wrap(c: i64, size: usize) -> usize {
    let size = size as i64;
    (((c % size) + size) % size) as usize
}

#[derive(Debug, Clone)]
pub struct GameMap {
    pub size: usize,
    pub land: Vec<Vec<TileKind>>,
    pub starting_position: Position,
    pub starting_original_land_type: TileKind,
}

impl GameMap {
    pub fn tile_at(&self, pos: Position) -> TileKind {
        self.land[pos.y][pos.x]
    }

    pub fn is_starting_position(&self, pos: Position) -> bool {
        pos == self.starting_position
    }

    /// Marks a tile depleted, matching invariant 3 in the spec's testable properties.
    pub fn deplete(&mut self, pos: Position) {
        self.land[pos.y][pos.x] = TileKind::Depleted;
    }
}

/// `mapSize = 1 + 4 * playerCount`, the sole authoritative size rule (open question in §9
/// resolved in favour of the newer formula over the bare `4*n` prototype or `max(5, ·)` fallback).
pub fn map_size_for(player_count: usize) -> usize {
    1 + 4 * player_count
}

/// Generates the grid row-major: one nibble per cell selects the tile kind, then two
/// 2-nibble rolls pick the starting-position cell (mod `size`), whose original resource
/// is remembered before being overwritten by the marker.
pub fn generate_map(seed: [u8; 32], size: usize) -> GameMap {
    let mut dice = Dice::new(seed);
    let mut land = vec![vec![TileKind::Depleted; size]; size];
    for row in land.iter_mut() {
        for cell in row.iter_mut() {
            *cell = TileKind::from_roll(dice.roll(1));
        }
    }

    let raw_x = dice.roll(2) as usize;
    let raw_y = dice.roll(2) as usize;
    let start = Position {
        x: raw_x % size,
        y: raw_y % size,
    };
    let original = land[start.y][start.x];

    GameMap {
        size,
        land,
        starting_position: start,
        starting_original_land_type: original,
    }
}

/// The random hash is the seed handed to `generate_map`: `keccak256(commit_block_hash ++ reveal)`.
pub fn random_hash(commit_block_hash: &[u8; 32], reveal: &[u8; 32]) -> [u8; 32] {
    use sha3::{Digest as Sha3Digest, Keccak256};
    let mut hasher = Keccak256::new();
    hasher.update(commit_block_hash);
    hasher.update(reveal);
    hasher.finalize().into()
}

pub fn commit_hash(reveal: &[u8; 32]) -> [u8; 32] {
    use sha3::{Digest as Sha3Digest, Keccak256};
    let mut hasher = Keccak256::new();
    hasher.update(reveal);
    hasher.finalize().into()
}

/// A total function computing each player's deterministic starting cell from the random
/// hash, their address, and the game id — it must agree with the cell the map generator
/// itself would land a fresh dice roll on, so it reuses the same `Dice` machinery seeded
/// per-player off the shared random hash.
pub fn starting_cell_for_player(
    random_hash: &[u8; 32],
    address: Address,
    game_id: U256,
    map_size: usize,
) -> Position {
    let mut hasher = Sha256::new();
    hasher.update(random_hash);
    hasher.update(address.as_bytes());
    let mut game_id_bytes = [0u8; 32];
    game_id.to_big_endian(&mut game_id_bytes);
    hasher.update(game_id_bytes);
    let seed: [u8; 32] = hasher.finalize().into();

    let mut dice = Dice::new(seed);
    let raw_x = dice.roll(2) as usize;
    let raw_y = dice.roll(2) as usize;
    Position {
        x: raw_x % map_size,
        y: raw_y % map_size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_is_always_in_range() {
        for size in 1..10usize {
            for c in -50i64..50 {
                let w = wrap(c, size);
                assert!(w < size, "wrap({c}, {size}) = {w} out of range");
            }
        }
    }

    #[test]
    fn map_size_formula_matches_authoritative_rule() {
        assert_eq!(map_size_for(0), 1);
        assert_eq!(map_size_for(1), 5);
        assert_eq!(map_size_for(2), 9);
    }

    #[test]
    fn generation_is_deterministic_for_the_same_seed() {
        let seed = [3u8; 32];
        let a = generate_map(seed, 9);
        let b = generate_map(seed, 9);
        assert_eq!(a.starting_position, b.starting_position);
        for (row_a, row_b) in a.land.iter().zip(b.land.iter()) {
            assert_eq!(row_a, row_b);
        }
    }

    #[test]
    fn random_hash_is_deterministic_for_same_inputs() {
        let commit_block_hash = [5u8; 32];
        let reveal = [6u8; 32];
        assert_eq!(
            random_hash(&commit_block_hash, &reveal),
            random_hash(&commit_block_hash, &reveal)
        );
    }

    #[test]
    fn starting_cell_is_total_and_in_bounds() {
        let rh = [1u8; 32];
        let addr = Address::from_low_u64_be(42);
        let pos = starting_cell_for_player(&rh, addr, U256::from(7u64), 9);
        assert!(pos.x < 9 && pos.y < 9);
    }

    #[test]
    fn starting_cell_matches_for_repeated_calls() {
        let rh = [9u8; 32];
        let addr = Address::from_low_u64_be(7);
        let gid = U256::from(3u64);
        let a = starting_cell_for_player(&rh, addr, gid, 13);
        let b = starting_cell_for_player(&rh, addr, gid, 13);
        assert_eq!(a, b);
    }
}
