use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Game configuration row: capacity and the money moved by a game of this type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameTypeEntity {
    /// Stable identifier for the game type.
    pub id: Uuid,
    /// Human readable title shown in the lobby.
    pub title: String,
    /// Currency the entry fee and prize are expressed in.
    pub currency: String,
    /// Number of players required to start a game.
    pub max_players: u32,
    /// Amount debited from every participant when the game starts.
    pub entry_fee: i64,
    /// Amount credited to the winner when the game completes.
    pub prize: i64,
}

/// Game row inserted when the matchmaker opens a new staging game.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GameEntity {
    pub id: Uuid,
    pub game_type_id: Uuid,
    pub max_players: u32,
    pub entry_fee: i64,
    pub prize: i64,
}

/// Lifecycle status persisted alongside the game row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GameStatusEntity {
    Staging,
    Ongoing,
    Completed,
}

impl GameStatusEntity {
    /// Value stored in the database status column.
    pub fn as_str(&self) -> &'static str {
        match self {
            GameStatusEntity::Staging => "staging",
            GameStatusEntity::Ongoing => "ongoing",
            GameStatusEntity::Completed => "completed",
        }
    }
}

/// Result of a ledger mutation guarded by a per-game flag so replays stay harmless.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerOutcome<T> {
    /// The mutation ran now.
    Applied(T),
    /// A previous delivery of the same task already applied it.
    AlreadyApplied,
}
