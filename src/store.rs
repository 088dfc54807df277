//! Artifact store (C2): a flat key-value layer over the filesystem persisting the three
//! per-game artifacts — reveal secret, generated map, final scores. Writes go through a
//! temp-file-then-rename so an orderly shutdown never leaves a half-written artifact; the
//! system does not promise more than that (no crash-safety beyond best effort, §4.2).

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::map::{GameMap, Position, TileKind};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("artifact not found: {0}")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("malformed artifact: {0}")]
    Malformed(String),
}

/// `land[y][x]` cells serialize as a plain tile number, except the starting-position cell
/// which serializes as the literal string `"X"` (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LandCell {
    Tile(u8),
    StartingMarker,
}

impl Serialize for LandCell {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            LandCell::Tile(v) => serializer.serialize_u8(*v),
            LandCell::StartingMarker => serializer.serialize_str("X"),
        }
    }
}

impl<'de> Deserialize<'de> for LandCell {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::String(s) if s == "X" => Ok(LandCell::StartingMarker),
            serde_json::Value::Number(n) => {
                let v = n.as_u64().ok_or_else(|| {
                    serde::de::Error::custom("land cell number out of range")
                })?;
                Ok(LandCell::Tile(v as u8))
            }
            other => Err(serde::de::Error::custom(format!(
                "unexpected land cell value: {other}"
            ))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StartingPositionJson {
    x: usize,
    y: usize,
    #[serde(rename = "originalLandType")]
    original_land_type: u8,
}

#[derive(Debug, Serialize, Deserialize)]
struct MapMetadataJson {
    generated: DateTime<Utc>,
    #[serde(rename = "gameId")]
    game_id: String,
    #[serde(rename = "revealValue")]
    reveal_value: String,
    #[serde(rename = "randomHash")]
    random_hash: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct MapArtifactJson {
    size: usize,
    land: Vec<Vec<LandCell>>,
    #[serde(rename = "startingPosition")]
    starting_position: StartingPositionJson,
    metadata: MapMetadataJson,
}

/// What `load_map` hands back: enough to rebuild a `GameMap` in memory.
#[derive(Debug, Clone)]
pub struct LoadedMap {
    pub size: usize,
    pub land: Vec<Vec<TileKind>>,
    pub starting_position: Position,
    pub starting_original_land_type: TileKind,
}

fn tile_from_u8(v: u8) -> Result<TileKind, StoreError> {
    match v {
        0 => Ok(TileKind::Depleted),
        1 => Ok(TileKind::Common),
        2 => Ok(TileKind::Uncommon),
        3 => Ok(TileKind::Rare),
        other => Err(StoreError::Malformed(format!("unknown tile kind {other}"))),
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PlayerScoreRecord {
    pub address: Address,
    pub position: Position,
    pub tile: u8,
    pub score: u64,
    #[serde(rename = "movesRemaining")]
    pub moves_remaining: u32,
    #[serde(rename = "minesRemaining")]
    pub mines_remaining: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ScoresArtifactJson {
    #[serde(rename = "gameId")]
    game_id: String,
    players: Vec<PlayerScoreRecord>,
    count: usize,
    #[serde(rename = "savedAt")]
    saved_at: DateTime<Utc>,
}

pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(ArtifactStore { root })
    }

    fn reveal_path(&self, game_id: U256) -> PathBuf {
        self.root.join(format!("reveal_{game_id}"))
    }

    fn map_path(&self, game_id: U256) -> PathBuf {
        self.root.join(format!("map_{game_id}"))
    }

    fn scores_path(&self, game_id: U256) -> PathBuf {
        self.root.join(format!("scores_{game_id}"))
    }

    fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
        let tmp = path.with_extension("tmp");
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(contents)?;
            f.sync_all()?;
        }
        fs::rename(&tmp, path)
    }

    pub fn save_reveal(&self, game_id: U256, reveal: &[u8; 32]) -> Result<(), StoreError> {
        let hex = format!("0x{}", hex::encode(reveal));
        Self::write_atomic(&self.reveal_path(game_id), hex.as_bytes())?;
        Ok(())
    }

    pub fn has_reveal(&self, game_id: U256) -> bool {
        self.reveal_path(game_id).exists()
    }

    pub fn load_reveal(&self, game_id: U256) -> Result<[u8; 32], StoreError> {
        let path = self.reveal_path(game_id);
        let contents = fs::read_to_string(&path)
            .map_err(|_| StoreError::NotFound(format!("reveal for game {game_id}")))?;
        let trimmed = contents.trim().trim_start_matches("0x");
        let bytes = hex::decode(trimmed)
            .map_err(|e| StoreError::Malformed(format!("reveal hex: {e}")))?;
        bytes
            .try_into()
            .map_err(|_| StoreError::Malformed("reveal is not 32 bytes".to_string()))
    }

    pub fn save_map(
        &self,
        game_id: U256,
        map: &GameMap,
        reveal: &[u8; 32],
        random_hash: &[u8; 32],
    ) -> Result<(), StoreError> {
        let land = map
            .land
            .iter()
            .enumerate()
            .map(|(y, row)| {
                row.iter()
                    .enumerate()
                    .map(|(x, tile)| {
                        if map.starting_position == (Position { x, y }) {
                            LandCell::StartingMarker
                        } else {
                            LandCell::Tile(tile.as_u8())
                        }
                    })
                    .collect()
            })
            .collect();

        let artifact = MapArtifactJson {
            size: map.size,
            land,
            starting_position: StartingPositionJson {
                x: map.starting_position.x,
                y: map.starting_position.y,
                original_land_type: map.starting_original_land_type.as_u8(),
            },
            metadata: MapMetadataJson {
                generated: Utc::now(),
                game_id: game_id.to_string(),
                reveal_value: format!("0x{}", hex::encode(reveal)),
                random_hash: format!("0x{}", hex::encode(random_hash)),
            },
        };

        let json = serde_json::to_vec_pretty(&artifact)?;
        Self::write_atomic(&self.map_path(game_id), &json)?;
        Ok(())
    }

    pub fn has_map(&self, game_id: U256) -> bool {
        self.map_path(game_id).exists()
    }

    pub fn load_map(&self, game_id: U256) -> Result<LoadedMap, StoreError> {
        let path = self.map_path(game_id);
        let contents = fs::read_to_string(&path)
            .map_err(|_| StoreError::NotFound(format!("map for game {game_id}")))?;
        let artifact: MapArtifactJson = serde_json::from_str(&contents)?;

        let mut land = Vec::with_capacity(artifact.size);
        for row in artifact.land {
            let mut out_row = Vec::with_capacity(artifact.size);
            for cell in row {
                let tile = match cell {
                    LandCell::StartingMarker => tile_from_u8(artifact.starting_position.original_land_type)?,
                    LandCell::Tile(v) => tile_from_u8(v)?,
                };
                out_row.push(tile);
            }
            land.push(out_row);
        }

        Ok(LoadedMap {
            size: artifact.size,
            land,
            starting_position: Position {
                x: artifact.starting_position.x,
                y: artifact.starting_position.y,
            },
            starting_original_land_type: tile_from_u8(artifact.starting_position.original_land_type)?,
        })
    }

    pub fn save_scores(
        &self,
        game_id: U256,
        players: Vec<PlayerScoreRecord>,
    ) -> Result<(), StoreError> {
        let artifact = ScoresArtifactJson {
            game_id: game_id.to_string(),
            count: players.len(),
            players,
            saved_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&artifact)?;
        Self::write_atomic(&self.scores_path(game_id), &json)?;
        Ok(())
    }

    pub fn has_scores(&self, game_id: U256) -> bool {
        self.scores_path(game_id).exists()
    }

    pub fn load_scores(&self, game_id: U256) -> Result<Vec<PlayerScoreRecord>, StoreError> {
        let path = self.scores_path(game_id);
        let contents = fs::read_to_string(&path)
            .map_err(|_| StoreError::NotFound(format!("scores for game {game_id}")))?;
        let artifact: ScoresArtifactJson = serde_json::from_str(&contents)?;
        Ok(artifact.players)
    }

    /// Per-game bookkeeping cleanup invoked at COMPLETE (§4.7, §4.2 supplement).
    pub fn delete(&self, game_id: U256) {
        let _ = fs::remove_file(self.reveal_path(game_id));
        let _ = fs::remove_file(self.map_path(game_id));
        let _ = fs::remove_file(self.scores_path(game_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::generate_map;

    fn temp_store() -> (ArtifactStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        (store, dir)
    }

    #[test]
    fn reveal_round_trips_through_hex() {
        let (store, _dir) = temp_store();
        let reveal = [42u8; 32];
        store.save_reveal(U256::from(1u64), &reveal).unwrap();
        assert!(store.has_reveal(U256::from(1u64)));
        let loaded = store.load_reveal(U256::from(1u64)).unwrap();
        assert_eq!(loaded, reveal);
    }

    #[test]
    fn missing_reveal_is_not_found() {
        let (store, _dir) = temp_store();
        assert!(store.load_reveal(U256::from(99u64)).is_err());
    }

    #[test]
    fn map_round_trips_preserving_starting_position() {
        let (store, _dir) = temp_store();
        let map = generate_map([5u8; 32], 9);
        let reveal = [1u8; 32];
        let rh = [2u8; 32];
        store.save_map(U256::from(1u64), &map, &reveal, &rh).unwrap();

        let loaded = store.load_map(U256::from(1u64)).unwrap();
        assert_eq!(loaded.size, map.size);
        assert_eq!(loaded.starting_position, map.starting_position);
        assert_eq!(
            loaded.starting_original_land_type,
            map.starting_original_land_type
        );
    }

    #[test]
    fn scores_round_trip() {
        let (store, _dir) = temp_store();
        let records = vec![PlayerScoreRecord {
            address: Address::zero(),
            position: Position { x: 1, y: 2 },
            tile: 1,
            score: 15,
            moves_remaining: 0,
            mines_remaining: 0,
        }];
        store.save_scores(U256::from(1u64), records.clone()).unwrap();
        assert!(store.has_scores(U256::from(1u64)));
        let loaded = store.load_scores(U256::from(1u64)).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].score, 15);
    }

    #[test]
    fn delete_removes_all_three_artifacts() {
        let (store, _dir) = temp_store();
        let gid = U256::from(4u64);
        store.save_reveal(gid, &[1u8; 32]).unwrap();
        store
            .save_map(gid, &generate_map([1u8; 32], 5), &[1u8; 32], &[1u8; 32])
            .unwrap();
        store.save_scores(gid, vec![]).unwrap();

        store.delete(gid);

        assert!(!store.has_reveal(gid));
        assert!(!store.has_map(gid));
        assert!(!store.has_scores(gid));
    }
}
