//! Handling of player messages independent of the socket transport.

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;
use validator::Validate;

use super::{
    game_play,
    matchmaker::{self, JoinError},
    tasks::Task,
};
use crate::{
    dto::ws::{AddUserPayload, ClientMessage, GameActionPayload, ServerMessage},
    error::ServiceError,
    state::SharedState,
};

/// Failures reported back to the player as an `error` message.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("Invalid user details: {0}")]
    InvalidUser(String),
    #[error("Connection already registered as another user")]
    AlreadyRegistered,
    #[error("You are already in a game")]
    AlreadyInGame,
    #[error("You are not part of this game")]
    NotInGame,
    #[error(transparent)]
    Join(#[from] JoinError),
    #[error("Something went wrong, please try again")]
    Service(#[from] ServiceError),
}

/// Bind the connection to a player.
pub fn add_user(
    state: &SharedState,
    payload: AddUserPayload,
    connection_id: Uuid,
    tx: mpsc::Sender<ServerMessage>,
) -> Result<Uuid, PlayerError> {
    payload
        .validate()
        .map_err(|err| PlayerError::InvalidUser(err.to_string()))?;

    let user_id = payload.user_id;
    if let Some(previous) = state
        .sessions()
        .register(user_id, payload.public_key, connection_id, tx)
    {
        info!(%user_id, old_connection = %previous.connection_id, "player reconnected; replacing session");
    } else {
        info!(%user_id, "player connected");
    }
    Ok(user_id)
}

/// Dispatch a message from the registered player `user_id`.
pub async fn handle_message(
    state: &SharedState,
    user_id: Uuid,
    message: ClientMessage,
) -> Result<(), PlayerError> {
    match message {
        ClientMessage::AddUser(payload) => {
            if payload.user_id == user_id {
                Ok(())
            } else {
                Err(PlayerError::AlreadyRegistered)
            }
        }
        ClientMessage::JoinRandomGame(payload) => {
            let in_game = state
                .sessions()
                .lookup(user_id)
                .and_then(|session| session.current_game_id)
                .is_some();
            if in_game {
                return Err(PlayerError::AlreadyInGame);
            }
            matchmaker::request_join(state, user_id, payload.game_type_id).await?;
            Ok(())
        }
        ClientMessage::UpdateBoard(action) => {
            let GameActionPayload { game_id, .. } = ensure_own_game(state, user_id, &action)?;
            game_play::score_point(state, game_id, user_id).await?;
            Ok(())
        }
        ClientMessage::GameOver(action) => {
            let GameActionPayload { game_id, .. } = ensure_own_game(state, user_id, &action)?;
            game_play::eliminate(state, game_id, user_id).await?;
            Ok(())
        }
    }
}

fn ensure_own_game(
    state: &SharedState,
    user_id: Uuid,
    action: &GameActionPayload,
) -> Result<GameActionPayload, PlayerError> {
    let current = state
        .sessions()
        .lookup(user_id)
        .and_then(|session| session.current_game_id);
    if action.user_id != user_id || current != Some(action.game_id) {
        return Err(PlayerError::NotInGame);
    }
    Ok(action.clone())
}

/// Clean up after the socket of `user_id` closed.
///
/// A player still in a game leaves it before the session is dropped; when
/// that fails inline the cleanup is queued as a `delete-user` task.
pub async fn disconnect(state: &SharedState, user_id: Uuid, connection_id: Uuid) {
    let Some(session) = state.sessions().lookup(user_id) else {
        return;
    };
    if session.connection_id != connection_id {
        return;
    }

    if let Some(game_id) = session.current_game_id {
        match state.games().get(game_id).await {
            Some(game) => {
                let game_type_id = game.game_type_id;
                if let Err(err) = matchmaker::depart(state, user_id, game_id, game_type_id).await {
                    warn!(%user_id, %game_id, error = %err, "inline departure failed; queueing cleanup");
                    let task = Task::DeleteUser {
                        user_id,
                        game_id,
                        game_type_id,
                    };
                    if let Err(err) = state.game_queue().enqueue(task).await {
                        error!(%user_id, %game_id, error = %err, "failed to queue departure cleanup");
                    }
                }
            }
            None => warn!(%user_id, %game_id, "disconnecting player's game is unknown here"),
        }
    }

    state.sessions().unregister_connection(user_id, connection_id);
    info!(%user_id, "player disconnected");
}
