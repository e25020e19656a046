//! Broker key names shared by every process.

use uuid::Uuid;

/// Staging game currently open for a game type.
pub fn staging_game(game_type_id: Uuid) -> String {
    format!("staging-game:{game_type_id}")
}

/// Lock serializing changes to [`staging_game`].
pub fn staging_lock(game_type_id: Uuid) -> String {
    format!("staging-lock:{game_type_id}")
}

/// Authoritative snapshot of a started game, scores included.
pub fn started_game(game_id: Uuid) -> String {
    format!("game:{game_id}")
}

/// Lock serializing changes to [`started_game`].
pub fn game_lock(game_id: Uuid) -> String {
    format!("game-lock:{game_id}")
}

/// Claim taken by the single process that decides a completed game.
///
/// Its value is the published result, so late subscribers can still read it.
pub fn game_completed(game_id: Uuid) -> String {
    format!("game-completed:{game_id}")
}

pub fn balance(user_id: Uuid) -> String {
    format!("balance:{user_id}")
}

/// Marker held while a join request of the player is in flight.
pub fn joining(user_id: Uuid) -> String {
    format!("joining:{user_id}")
}
