//! Envelopes published on broker channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    dto::ws::PlayerScore,
    state::game::{Game, GameResult},
};

/// Event fanned out to every process through the broker.
///
/// Lobby events travel on the global channel; in-game events travel on the
/// channel named after the game id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum FanOutEvent {
    /// `user_id` joined `game`; carries the roster right after the join.
    UserJoinGame { user_id: Uuid, game: Game },
    UserError { user_id: Uuid, message: String },
    UserLeftGame { user_id: Uuid, game_id: Uuid },
    /// The game filled up but its start could not be recorded.
    ErrorStartingGame {
        game_id: Uuid,
        user_ids: Vec<Uuid>,
        message: String,
    },
    StartGame { game_id: Uuid },
    /// `user_id` scored; `scores` is the board right after the point.
    UpdateBoard {
        game_id: Uuid,
        user_id: Uuid,
        scores: Vec<PlayerScore>,
    },
    /// `user_id` is out and the game goes on.
    GameOver {
        game_id: Uuid,
        user_id: Uuid,
        scores: Vec<PlayerScore>,
    },
    /// The single decided outcome of a completed game.
    GameResult(GameResult),
}

impl FanOutEvent {
    /// Game channel carrying this event, `None` for lobby events.
    pub fn game_channel(&self) -> Option<Uuid> {
        match self {
            FanOutEvent::StartGame { game_id }
            | FanOutEvent::UpdateBoard { game_id, .. }
            | FanOutEvent::GameOver { game_id, .. } => Some(*game_id),
            FanOutEvent::GameResult(result) => Some(result.game_id),
            _ => None,
        }
    }
}
