//! Game session runtime (C5): in-memory per-game state — players, positions, scores,
//! remaining moves/mines, and the wall-clock timer (§4.5).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use ethers::types::{Address, U256};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::error::GameRuleError;
use crate::map::{wrap, GameMap, Position, TileKind, MAX_MINES, MAX_MOVES, STARTING_POSITION_POINTS};
use crate::store::PlayerScoreRecord;

/// The wall-clock session length, armed at server start (§4.5).
pub const SESSION_DURATION: Duration = Duration::from_secs(90);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    North,
    South,
    East,
    West,
    Northeast,
    Northwest,
    Southeast,
    Southwest,
}

impl Direction {
    pub fn parse(input: &str) -> Result<Direction, GameRuleError> {
        match input.trim().to_lowercase().as_str() {
            "north" => Ok(Direction::North),
            "south" => Ok(Direction::South),
            "east" => Ok(Direction::East),
            "west" => Ok(Direction::West),
            "northeast" => Ok(Direction::Northeast),
            "northwest" => Ok(Direction::Northwest),
            "southeast" => Ok(Direction::Southeast),
            "southwest" => Ok(Direction::Southwest),
            _ => Err(GameRuleError::InvalidDirection),
        }
    }

    /// `(dx, dy)` delta; torus wrap is applied by the caller.
    fn delta(self) -> (i64, i64) {
        match self {
            Direction::North => (0, -1),
            Direction::South => (0, 1),
            Direction::East => (1, 0),
            Direction::West => (-1, 0),
            Direction::Northeast => (1, -1),
            Direction::Northwest => (-1, -1),
            Direction::Southeast => (1, 1),
            Direction::Southwest => (-1, 1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlayerState {
    pub position: Position,
    pub score: u64,
    pub moves_remaining: u32,
    pub mines_remaining: u32,
}

impl PlayerState {
    fn is_finished(&self) -> bool {
        self.mines_remaining == 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ViewCell {
    pub tile: u8,
    pub player: Option<Address>,
    pub coordinates: Position,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlayerView {
    pub cells: Vec<ViewCell>,
    pub position: Position,
    pub score: u64,
    #[serde(rename = "movesRemaining")]
    pub moves_remaining: u32,
    #[serde(rename = "minesRemaining")]
    pub mines_remaining: u32,
    #[serde(rename = "timeRemaining")]
    pub time_remaining_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitisedPlayerStats {
    pub address: Address,
    pub score: u64,
    #[serde(rename = "movesRemaining")]
    pub moves_remaining: u32,
    #[serde(rename = "minesRemaining")]
    pub mines_remaining: u32,
    pub finished: bool,
}

struct Inner {
    map: GameMap,
    players: HashMap<Address, PlayerState>,
}

/// Owns the full in-memory state of one running game. Mutations to players are serialised
/// through a single mutex guarding the whole session — the spec explicitly allows either a
/// per-session or per-player lock (§5); a single lock keeps `view`/`move`/`mine` trivially
/// race-free at the scale this system runs at.
pub struct GameSession {
    inner: Mutex<Inner>,
    timer_expired: AtomicBool,
    started_at_millis: AtomicI64,
}

impl GameSession {
    pub fn new(map: GameMap, players: HashMap<Address, PlayerState>, started_at_millis: i64) -> Self {
        GameSession {
            inner: Mutex::new(Inner { map, players }),
            timer_expired: AtomicBool::new(false),
            started_at_millis: AtomicI64::new(started_at_millis),
        }
    }

    /// Builds initial per-player state from the chain's player list, assigning each a
    /// deterministic starting cell (§4.5).
    pub fn initial_players(
        addresses: &[Address],
        random_hash: &[u8; 32],
        game_id: U256,
        map_size: usize,
    ) -> HashMap<Address, PlayerState> {
        addresses
            .iter()
            .map(|&addr| {
                let position =
                    crate::map::starting_cell_for_player(random_hash, addr, game_id, map_size);
                (
                    addr,
                    PlayerState {
                        position,
                        score: 0,
                        moves_remaining: MAX_MOVES,
                        mines_remaining: MAX_MINES,
                    },
                )
            })
            .collect()
    }

    pub fn is_timer_expired(&self) -> bool {
        self.timer_expired.load(Ordering::SeqCst)
    }

    pub fn started_at_millis(&self) -> i64 {
        self.started_at_millis.load(Ordering::SeqCst)
    }

    pub fn time_remaining_secs(&self, now_millis: i64) -> u64 {
        if self.timer_expired.load(Ordering::SeqCst) {
            return 0;
        }
        let started = self.started_at_millis.load(Ordering::SeqCst);
        let elapsed_ms = (now_millis - started).max(0) as u64;
        let total_ms = SESSION_DURATION.as_millis() as u64;
        total_ms.saturating_sub(elapsed_ms) / 1000
    }

    /// Zeroes every player's remaining budgets, per the timer's fire action (§4.5).
    pub async fn expire_timer(&self) {
        self.timer_expired.store(true, Ordering::SeqCst);
        let mut inner = self.inner.lock().await;
        for p in inner.players.values_mut() {
            p.moves_remaining = 0;
            p.mines_remaining = 0;
        }
    }

    fn window_around(inner: &Inner, centre: Position) -> Vec<ViewCell> {
        let size = inner.map.size;
        let mut cells = Vec::with_capacity(9);
        for dy in -1i64..=1 {
            for dx in -1i64..=1 {
                let x = wrap(centre.x as i64 + dx, size);
                let y = wrap(centre.y as i64 + dy, size);
                let pos = Position { x, y };
                let tile = inner.map.tile_at(pos);
                let occupant = inner
                    .players
                    .iter()
                    .find(|(_, p)| p.position == pos)
                    .map(|(addr, _)| *addr);
                cells.push(ViewCell {
                    tile: tile.as_u8(),
                    player: occupant,
                    coordinates: pos,
                });
            }
        }
        cells
    }

    pub async fn view(&self, address: Address, now_millis: i64) -> PlayerView {
        let inner = self.inner.lock().await;
        let player = inner
            .players
            .get(&address)
            .cloned()
            .expect("caller must check player_exists before calling view");
        let cells = Self::window_around(&inner, player.position);
        PlayerView {
            cells,
            position: player.position,
            score: player.score,
            moves_remaining: player.moves_remaining,
            mines_remaining: player.mines_remaining,
            time_remaining_secs: self.time_remaining_secs(now_millis),
        }
    }

    pub async fn player_exists(&self, address: Address) -> bool {
        self.inner.lock().await.players.contains_key(&address)
    }

    pub async fn mv(
        &self,
        address: Address,
        direction: Direction,
        now_millis: i64,
    ) -> Result<PlayerView, GameRuleError> {
        if self.timer_expired.load(Ordering::SeqCst) {
            return Err(GameRuleError::TimerExpired);
        }
        let mut inner = self.inner.lock().await;
        let size = inner.map.size;
        let player = inner
            .players
            .get_mut(&address)
            .expect("authenticated player must exist in session");

        if player.moves_remaining == 0 {
            return Err(GameRuleError::NoMovesRemaining);
        }

        let (dx, dy) = direction.delta();
        player.position = Position {
            x: wrap(player.position.x as i64 + dx, size),
            y: wrap(player.position.y as i64 + dy, size),
        };
        player.moves_remaining -= 1;

        let position = player.position;
        let score = player.score;
        let moves_remaining = player.moves_remaining;
        let mines_remaining = player.mines_remaining;
        let cells = Self::window_around(&inner, position);
        Ok(PlayerView {
            cells,
            position,
            score,
            moves_remaining,
            mines_remaining,
            time_remaining_secs: self.time_remaining_secs(now_millis),
        })
    }

    pub async fn mine(
        &self,
        address: Address,
        now_millis: i64,
    ) -> Result<(u64, PlayerView), GameRuleError> {
        if self.timer_expired.load(Ordering::SeqCst) {
            return Err(GameRuleError::TimerExpired);
        }
        let mut inner = self.inner.lock().await;
        let position = inner
            .players
            .get(&address)
            .expect("authenticated player must exist in session")
            .position;

        let is_starting = inner.map.is_starting_position(position);
        let tile = inner.map.tile_at(position);

        {
            let player = inner.players.get(&address).unwrap();
            if player.mines_remaining == 0 {
                return Err(GameRuleError::NoMinesRemaining);
            }
            if tile == TileKind::Depleted {
                return Err(GameRuleError::TileDepleted);
            }
        }

        let points = if is_starting {
            STARTING_POSITION_POINTS
        } else {
            tile.points()
        };

        inner.map.deplete(position);
        let player = inner.players.get_mut(&address).unwrap();
        player.score += points;
        player.mines_remaining -= 1;

        let score = player.score;
        let moves_remaining = player.moves_remaining;
        let mines_remaining = player.mines_remaining;
        let cells = Self::window_around(&inner, position);
        Ok((
            points,
            PlayerView {
                cells,
                position,
                score,
                moves_remaining,
                mines_remaining,
                time_remaining_secs: self.time_remaining_secs(now_millis),
            },
        ))
    }

    /// True once every player satisfies the end-of-game condition (§4.5); vacuously true
    /// for a zero-player game.
    pub async fn all_players_finished(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.players.values().all(|p| {
            p.is_finished() || (p.moves_remaining == 0 && inner.map.tile_at(p.position) == TileKind::Depleted)
        })
    }

    pub async fn sanitised_stats(&self) -> Vec<SanitisedPlayerStats> {
        let inner = self.inner.lock().await;
        inner
            .players
            .iter()
            .map(|(addr, p)| SanitisedPlayerStats {
                address: *addr,
                score: p.score,
                moves_remaining: p.moves_remaining,
                mines_remaining: p.mines_remaining,
                finished: p.is_finished() || (p.moves_remaining == 0 && inner.map.tile_at(p.position) == TileKind::Depleted),
            })
            .collect()
    }

    pub async fn player_count(&self) -> usize {
        self.inner.lock().await.players.len()
    }

    /// Snapshots every player's full record for persistence (C2) or winner computation.
    pub async fn snapshot(&self) -> Vec<PlayerScoreRecord> {
        let inner = self.inner.lock().await;
        inner
            .players
            .iter()
            .map(|(addr, p)| PlayerScoreRecord {
                address: *addr,
                position: p.position,
                tile: inner.map.tile_at(p.position).as_u8(),
                score: p.score,
                moves_remaining: p.moves_remaining,
                mines_remaining: p.mines_remaining,
            })
            .collect()
    }
}

/// Winners are exactly the players sharing the maximum score (§8 invariant 7).
pub fn compute_winners(records: &[PlayerScoreRecord]) -> Vec<Address> {
    let Some(max_score) = records.iter().map(|r| r.score).max() else {
        return Vec::new();
    };
    records
        .iter()
        .filter(|r| r.score == max_score)
        .map(|r| r.address)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::generate_map;

    fn single_player_session() -> (GameSession, Address) {
        let map = generate_map([11u8; 32], 5);
        let addr = Address::from_low_u64_be(1);
        let mut players = HashMap::new();
        players.insert(
            addr,
            PlayerState {
                position: Position { x: 0, y: 0 },
                score: 0,
                moves_remaining: MAX_MOVES,
                mines_remaining: MAX_MINES,
            },
        );
        (GameSession::new(map, players, 0), addr)
    }

    #[tokio::test]
    async fn moves_wrap_around_the_torus_after_twelve_steps() {
        let (session, addr) = single_player_session();
        for _ in 0..MAX_MOVES {
            session.mv(addr, Direction::East, 0).await.unwrap();
        }
        let view = session.view(addr, 0).await;
        assert_eq!(view.position, Position { x: 12 % 5, y: 0 });
        assert_eq!(view.moves_remaining, 0);
        assert_eq!(
            session.mv(addr, Direction::East, 0).await.err(),
            Some(GameRuleError::NoMovesRemaining)
        );
    }

    #[tokio::test]
    async fn mining_a_depleted_tile_fails() {
        let (session, addr) = single_player_session();
        let first = session.mine(addr, 0).await;
        assert!(first.is_ok());
        let second = session.mine(addr, 0).await;
        assert_eq!(second.err(), Some(GameRuleError::TileDepleted));
    }

    #[tokio::test]
    async fn running_out_of_mines_blocks_further_mining() {
        let map = generate_map([3u8; 32], 9);
        let addr = Address::from_low_u64_be(2);
        let mut players = HashMap::new();
        players.insert(
            addr,
            PlayerState {
                position: Position { x: 0, y: 0 },
                score: 0,
                moves_remaining: MAX_MOVES,
                mines_remaining: 1,
            },
        );
        let session = GameSession::new(map, players, 0);
        session.mine(addr, 0).await.unwrap();
        assert_eq!(
            session.mine(addr, 0).await.err(),
            Some(GameRuleError::NoMinesRemaining)
        );
    }

    #[tokio::test]
    async fn timer_expiry_zeroes_budgets_and_blocks_actions() {
        let (session, addr) = single_player_session();
        session.expire_timer().await;
        assert_eq!(session.view(addr, 0).await.moves_remaining, 0);
        assert_eq!(
            session.mv(addr, Direction::North, 0).await.err(),
            Some(GameRuleError::TimerExpired)
        );
        assert_eq!(
            session.mine(addr, 0).await.err(),
            Some(GameRuleError::TimerExpired)
        );
    }

    #[tokio::test]
    async fn zero_player_game_is_vacuously_finished() {
        let map = generate_map([1u8; 32], 1);
        let session = GameSession::new(map, HashMap::new(), 0);
        assert!(session.all_players_finished().await);
    }

    #[test]
    fn winners_are_every_player_sharing_the_max_score() {
        let a = Address::from_low_u64_be(1);
        let b = Address::from_low_u64_be(2);
        let c = Address::from_low_u64_be(3);
        let records = vec![
            PlayerScoreRecord {
                address: a,
                position: Position { x: 0, y: 0 },
                tile: 0,
                score: 10,
                moves_remaining: 0,
                mines_remaining: 0,
            },
            PlayerScoreRecord {
                address: b,
                position: Position { x: 0, y: 0 },
                tile: 0,
                score: 10,
                moves_remaining: 0,
                mines_remaining: 0,
            },
            PlayerScoreRecord {
                address: c,
                position: Position { x: 0, y: 0 },
                tile: 0,
                score: 3,
                moves_remaining: 0,
                mines_remaining: 0,
            },
        ];
        let mut winners = compute_winners(&records);
        winners.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(winners, expected);
    }

    #[test]
    fn direction_parsing_is_case_insensitive_and_trims_whitespace() {
        assert_eq!(Direction::parse(" NoRtH "), Ok(Direction::North));
        assert_eq!(Direction::parse("diagonal"), Err(GameRuleError::InvalidDirection));
    }
}
