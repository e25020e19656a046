use std::cmp::Reverse;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::dao::models::{GameEntity, GameTypeEntity};

/// Lifecycle of a game; only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Staging,
    Ongoing,
    Completed,
}

/// Per-player state inside a game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Score {
    pub is_alive: bool,
    pub points: i64,
    /// 1 for the first player eliminated, 2 for the next one, and so on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eliminated_order: Option<u32>,
}

impl Score {
    fn fresh() -> Self {
        Self {
            is_alive: true,
            points: 0,
            eliminated_order: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    #[error("game is full")]
    Full,
    #[error("game is {0:?}, expected staging")]
    NotStaging(GameStatus),
    #[error("player {0} already joined")]
    AlreadyJoined(Uuid),
    #[error("player {0} is not part of the game")]
    UnknownPlayer(Uuid),
    #[error("game cannot start with {count}/{max} players")]
    NotFull { count: u32, max: u32 },
}

/// Outcome of the terminal transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameResult {
    pub game_id: Uuid,
    pub winner_id: Uuid,
    pub losers: Vec<Uuid>,
    pub entry_fee: i64,
    pub prize: i64,
}

impl GameResult {
    /// Net gain announced to the winner.
    pub fn winner_amount(&self) -> i64 {
        self.prize - self.entry_fee
    }
}

/// What an elimination did to the game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Elimination {
    /// Unknown player, player already out, or game not running.
    Ignored,
    Eliminated,
    Completed(GameResult),
}

/// A game with its roster and scoreboard.
///
/// `current_player_count` always equals the roster size and the scoreboard has
/// exactly one entry per roster member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Game {
    pub id: Uuid,
    pub game_type_id: Uuid,
    pub status: GameStatus,
    pub max_players: u32,
    pub current_player_count: u32,
    pub entry_fee: i64,
    pub prize: i64,
    pub roster: IndexSet<Uuid>,
    pub scoreboard: IndexMap<Uuid, Score>,
    #[serde(default)]
    pub eliminations: u32,
}

impl Game {
    /// Open an empty staging game of the given type.
    pub fn new(id: Uuid, game_type: &GameTypeEntity) -> Self {
        Self {
            id,
            game_type_id: game_type.id,
            status: GameStatus::Staging,
            max_players: game_type.max_players,
            current_player_count: 0,
            entry_fee: game_type.entry_fee,
            prize: game_type.prize,
            roster: IndexSet::new(),
            scoreboard: IndexMap::new(),
            eliminations: 0,
        }
    }

    pub fn is_full(&self) -> bool {
        self.current_player_count >= self.max_players
    }

    pub fn has_player(&self, player_id: Uuid) -> bool {
        self.roster.contains(&player_id)
    }

    /// Roster in join order.
    pub fn players(&self) -> Vec<Uuid> {
        self.roster.iter().copied().collect()
    }

    /// Row persisted when the game is created.
    pub fn entity(&self) -> GameEntity {
        GameEntity {
            id: self.id,
            game_type_id: self.game_type_id,
            max_players: self.max_players,
            entry_fee: self.entry_fee,
            prize: self.prize,
        }
    }

    /// Add a player to a staging game. Returns `true` when the game just became full.
    pub fn add_player(&mut self, player_id: Uuid) -> Result<bool, GameError> {
        if self.status != GameStatus::Staging {
            return Err(GameError::NotStaging(self.status));
        }
        if self.has_player(player_id) {
            return Err(GameError::AlreadyJoined(player_id));
        }
        if self.is_full() {
            return Err(GameError::Full);
        }
        self.roster.insert(player_id);
        self.scoreboard.insert(player_id, Score::fresh());
        self.current_player_count += 1;
        Ok(self.is_full())
    }

    /// Take a player out of a staging game.
    pub fn remove_player(&mut self, player_id: Uuid) -> Result<(), GameError> {
        if self.status != GameStatus::Staging {
            return Err(GameError::NotStaging(self.status));
        }
        if !self.roster.shift_remove(&player_id) {
            return Err(GameError::UnknownPlayer(player_id));
        }
        self.scoreboard.shift_remove(&player_id);
        self.current_player_count -= 1;
        Ok(())
    }

    /// Move a full staging game to ongoing.
    pub fn start(&mut self) -> Result<(), GameError> {
        if self.status != GameStatus::Staging {
            return Err(GameError::NotStaging(self.status));
        }
        if !self.is_full() {
            return Err(GameError::NotFull {
                count: self.current_player_count,
                max: self.max_players,
            });
        }
        self.status = GameStatus::Ongoing;
        Ok(())
    }

    /// Give one point to an alive player of a running game; `false` when nothing changed.
    pub fn record_point(&mut self, player_id: Uuid) -> bool {
        if self.status != GameStatus::Ongoing {
            return false;
        }
        match self.scoreboard.get_mut(&player_id) {
            Some(score) if score.is_alive => {
                score.points += 1;
                true
            }
            _ => false,
        }
    }

    /// Mark a player as out. The last elimination completes the game.
    pub fn eliminate(&mut self, player_id: Uuid) -> Elimination {
        if self.status != GameStatus::Ongoing {
            return Elimination::Ignored;
        }
        let Some(score) = self.scoreboard.get_mut(&player_id) else {
            return Elimination::Ignored;
        };
        if !score.is_alive {
            return Elimination::Ignored;
        }
        self.eliminations += 1;
        score.is_alive = false;
        score.eliminated_order = Some(self.eliminations);

        if self.alive_count() > 0 {
            return Elimination::Eliminated;
        }
        self.status = GameStatus::Completed;
        match self.winner() {
            Some(winner_id) => Elimination::Completed(GameResult {
                game_id: self.id,
                winner_id,
                losers: self
                    .roster
                    .iter()
                    .copied()
                    .filter(|player| *player != winner_id)
                    .collect(),
                entry_fee: self.entry_fee,
                prize: self.prize,
            }),
            None => Elimination::Eliminated,
        }
    }

    pub fn alive_count(&self) -> usize {
        self.scoreboard.values().filter(|score| score.is_alive).count()
    }

    /// Highest points over the whole roster.
    ///
    /// Ties go to the player eliminated last (a player still alive counts as
    /// later than anyone), then to the lowest player id.
    pub fn winner(&self) -> Option<Uuid> {
        self.scoreboard
            .iter()
            .max_by_key(|(player_id, score)| {
                (
                    score.points,
                    score.eliminated_order.unwrap_or(u32::MAX),
                    Reverse(**player_id),
                )
            })
            .map(|(player_id, _)| *player_id)
    }
}
