//! Assigns players to staging games and starts them once full.
//!
//! The staging game of a game type lives in the broker and is only touched
//! while holding its staging lock, so joins coming from different processes
//! are applied one at a time.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    balance, fanout, game_events, game_play, keys, lock::BrokerLock,
    reconciliation::ReconciliationRecord, tasks::Task,
};
use crate::{
    dao::models::GameTypeEntity,
    dto::{events::FanOutEvent, ws::ServerMessage},
    error::ServiceError,
    state::{SharedState, game::Game},
};

/// How long a join request blocks further requests of the same player.
const JOINING_TTL: Duration = Duration::from_secs(30);

/// Reasons a join fails; the message is what the player sees.
#[derive(Debug, Error)]
pub enum JoinError {
    #[error("Invalid game type")]
    UnknownGameType,
    #[error("Insufficient balance")]
    InsufficientBalance,
    #[error("Game is full")]
    GameFull,
    #[error("We are under maintenance please try after some time")]
    Maintenance,
    #[error("Game is busy, please try again")]
    LockTimeout,
    #[error("You are already joining a game")]
    AlreadyJoining,
    #[error("Could not join the game, please try again")]
    Unavailable(#[from] ServiceError),
}

/// Successful join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined { game_id: Uuid, started: bool },
    /// The player was already on the roster; nothing changed.
    AlreadyJoined { game_id: Uuid },
}

/// Entry point for `join-random-game`.
///
/// With queued joins the request is deferred to the game queue and the worker
/// runs [`join_and_report`]; otherwise the join runs inline. A second request
/// is refused while the first one has not seated the player yet.
pub async fn request_join(
    state: &SharedState,
    user_id: Uuid,
    game_type_id: Uuid,
) -> Result<(), JoinError> {
    if state.is_maintenance() {
        return Err(JoinError::Maintenance);
    }
    let marked = state
        .broker()
        .set_if_absent(&keys::joining(user_id), game_type_id.to_string(), JOINING_TTL)
        .await
        .map_err(ServiceError::from)?;
    if !marked {
        return Err(JoinError::AlreadyJoining);
    }

    if state.config().queue_joins {
        let queued = state
            .game_queue()
            .enqueue(Task::JoinGame {
                user_id,
                game_type_id,
            })
            .await;
        if let Err(err) = queued {
            game_events::clear_joining(state, user_id).await;
            return Err(ServiceError::from(err).into());
        }
        return Ok(());
    }
    join_and_report(state, user_id, game_type_id).await;
    Ok(())
}

/// Run a join and publish a `user-error` when it fails.
pub async fn join_and_report(
    state: &SharedState,
    user_id: Uuid,
    game_type_id: Uuid,
) -> Option<JoinOutcome> {
    match join_game(state, user_id, game_type_id).await {
        // A seated player's marker goes once `user-join-game` reaches their process.
        Ok(outcome @ JoinOutcome::Joined { .. }) => Some(outcome),
        Ok(outcome @ JoinOutcome::AlreadyJoined { .. }) => {
            game_events::clear_joining(state, user_id).await;
            Some(outcome)
        }
        Err(err) => {
            warn!(%user_id, %game_type_id, error = %err, "join failed");
            game_events::clear_joining(state, user_id).await;
            let event = FanOutEvent::UserError {
                user_id,
                message: err.to_string(),
            };
            if let Err(publish_err) = fanout::publish(state, &event).await {
                warn!(%user_id, error = %publish_err, "failed to publish user error");
                state
                    .sessions()
                    .send(user_id, ServerMessage::error(err.to_string()));
            }
            None
        }
    }
}

/// Put `user_id` in the open staging game of `game_type_id`, creating it if needed.
pub async fn join_game(
    state: &SharedState,
    user_id: Uuid,
    game_type_id: Uuid,
) -> Result<JoinOutcome, JoinError> {
    let game_type = state
        .game_types()
        .resolve(game_type_id, state.store().as_ref())
        .await
        .map_err(ServiceError::from)?
        .ok_or(JoinError::UnknownGameType)?;

    let lock = BrokerLock::acquire(state, keys::staging_lock(game_type_id))
        .await
        .map_err(|err| match err {
            ServiceError::Timeout => JoinError::LockTimeout,
            other => JoinError::Unavailable(other),
        })?;
    let outcome = join_locked(state, user_id, &game_type).await;
    lock.release().await;
    outcome
}

async fn join_locked(
    state: &SharedState,
    user_id: Uuid,
    game_type: &GameTypeEntity,
) -> Result<JoinOutcome, JoinError> {
    let mut game = match load_staging(state, game_type.id).await? {
        Some(game) => game,
        None => open_staging(state, game_type).await?,
    };

    if game.has_player(user_id) {
        return Ok(JoinOutcome::AlreadyJoined { game_id: game.id });
    }
    if game.is_full() {
        return Err(JoinError::GameFull);
    }

    let balance = balance::current_balance(state, user_id).await?;
    if balance.is_none_or(|balance| balance < game.entry_fee) {
        return Err(JoinError::InsufficientBalance);
    }

    state
        .db_queue()
        .enqueue(Task::AddParticipant {
            game_id: game.id,
            user_id,
        })
        .await
        .map_err(ServiceError::from)?;

    let full = game.add_player(user_id).map_err(|err| {
        warn!(game_id = %game.id, %user_id, error = %err, "roster rejected a checked join");
        JoinError::GameFull
    })?;
    info!(game_id = %game.id, %user_id, count = game.current_player_count, "player joined");

    if full {
        let (game_id, started) = start_game(state, game, user_id).await;
        return Ok(JoinOutcome::Joined { game_id, started });
    }

    let game_id = game.id;
    if let Err(err) = save_staging(state, &game).await {
        // The participant row is already queued; take it back.
        if let Err(undo) = state
            .db_queue()
            .enqueue(Task::RemoveParticipant { game_id, user_id })
            .await
        {
            warn!(%game_id, %user_id, error = %undo, "failed to queue participant removal");
        }
        return Err(err.into());
    }
    publish_join(state, user_id, game).await;
    Ok(JoinOutcome::Joined {
        game_id,
        started: false,
    })
}

/// Move a full game to ongoing. Returns the game id and whether the start was recorded.
async fn start_game(state: &SharedState, staging: Game, user_id: Uuid) -> (Uuid, bool) {
    let game_id = staging.id;
    let players = staging.players();
    let mut started = staging.clone();
    if let Err(err) = started.start() {
        warn!(%game_id, error = %err, "full game refused to start");
        return (game_id, false);
    }

    let queued = async {
        state.db_queue().enqueue(Task::StartGame { game_id }).await?;
        state
            .db_queue()
            .enqueue(Task::CollectEntry {
                game_id,
                user_ids: players.clone(),
                entry_fee: started.entry_fee,
            })
            .await
    }
    .await;

    if let Err(err) = queued {
        // The full staging game stays in place for manual recovery.
        if let Err(save_err) = save_staging(state, &staging).await {
            warn!(%game_id, error = %save_err, "failed to keep the full staging game");
        }
        state
            .reconciliation()
            .record(ReconciliationRecord::new("start-game", game_id, err.to_string()))
            .await;
        publish_join(state, user_id, staging).await;
        let event = FanOutEvent::ErrorStartingGame {
            game_id,
            user_ids: players,
            message: "Error starting the game".into(),
        };
        if let Err(err) = fanout::publish(state, &event).await {
            warn!(%game_id, error = %err, "failed to publish error-starting-game");
        }
        return (game_id, false);
    }

    if let Err(err) = game_play::save_started(state, &started).await {
        warn!(%game_id, error = %err, "failed to store started game snapshot");
    }
    if let Err(err) = state
        .broker()
        .delete(&keys::staging_game(started.game_type_id))
        .await
    {
        warn!(%game_id, error = %err, "failed to clear the staging game");
    }
    for player in &players {
        balance::adjust_cached(state, *player, -started.entry_fee).await;
    }

    publish_join(state, user_id, staging).await;
    if let Err(err) = fanout::publish(state, &FanOutEvent::StartGame { game_id }).await {
        warn!(%game_id, error = %err, "failed to publish start-game");
    }
    info!(%game_id, players = players.len(), "game is full; starting");
    (game_id, true)
}

async fn publish_join(state: &SharedState, user_id: Uuid, game: Game) {
    let game_id = game.id;
    if let Err(err) = fanout::publish(state, &FanOutEvent::UserJoinGame { user_id, game }).await {
        warn!(%game_id, %user_id, error = %err, "failed to publish user-join-game");
    }
}

async fn load_staging(state: &SharedState, game_type_id: Uuid) -> Result<Option<Game>, ServiceError> {
    let Some(raw) = state.broker().get(&keys::staging_game(game_type_id)).await? else {
        return Ok(None);
    };
    match serde_json::from_str::<Game>(&raw) {
        Ok(game) => Ok(Some(game)),
        Err(err) => {
            warn!(%game_type_id, error = %err, "discarding malformed staging game");
            Ok(None)
        }
    }
}

async fn open_staging(state: &SharedState, game_type: &GameTypeEntity) -> Result<Game, ServiceError> {
    let game = Game::new(Uuid::new_v4(), game_type);
    let entity = game.entity();
    state
        .db_queue()
        .enqueue(Task::CreateGame {
            game_id: entity.id,
            game_type_id: entity.game_type_id,
            max_players: entity.max_players,
            entry_fee: entity.entry_fee,
            prize: entity.prize,
        })
        .await?;
    save_staging(state, &game).await?;
    info!(game_id = %game.id, game_type_id = %game_type.id, "opened staging game");
    Ok(game)
}

async fn save_staging(state: &SharedState, game: &Game) -> Result<(), ServiceError> {
    let raw = serde_json::to_string(game)
        .map_err(|err| ServiceError::InvalidState(format!("unencodable game: {err}")))?;
    let ttl = Some(state.config().started_game_ttl);
    state
        .broker()
        .set(&keys::staging_game(game.game_type_id), raw, ttl)
        .await?;
    Ok(())
}

/// Take a disconnecting player out of `game_id`.
///
/// Before the start the player leaves the staging roster (durable removal is
/// queued first); once started the departure counts as the player's game-over.
pub async fn depart(
    state: &SharedState,
    user_id: Uuid,
    game_id: Uuid,
    game_type_id: Uuid,
) -> Result<(), ServiceError> {
    if game_play::load_started(state, game_id).await?.is_some() {
        return eliminate_departed(state, game_id, user_id).await;
    }

    let lock = BrokerLock::acquire(state, keys::staging_lock(game_type_id)).await?;
    let left = leave_staging(state, user_id, game_id, game_type_id).await;
    lock.release().await;

    match left? {
        true => {
            let event = FanOutEvent::UserLeftGame { user_id, game_id };
            fanout::publish(state, &event).await?;
            info!(%game_id, %user_id, "player left staging game");
            Ok(())
        }
        // The game is no longer the open staging game: it started meanwhile.
        false => eliminate_departed(state, game_id, user_id).await,
    }
}

async fn leave_staging(
    state: &SharedState,
    user_id: Uuid,
    game_id: Uuid,
    game_type_id: Uuid,
) -> Result<bool, ServiceError> {
    let Some(mut game) = load_staging(state, game_type_id).await? else {
        return Ok(false);
    };
    if game.id != game_id {
        return Ok(false);
    }
    if !game.has_player(user_id) {
        return Ok(true);
    }
    state
        .db_queue()
        .enqueue(Task::RemoveParticipant { game_id, user_id })
        .await?;
    game.remove_player(user_id)
        .map_err(|err| ServiceError::InvalidState(err.to_string()))?;
    save_staging(state, &game).await?;
    Ok(true)
}

async fn eliminate_departed(state: &SharedState, game_id: Uuid, user_id: Uuid) -> Result<(), ServiceError> {
    game_play::eliminate(state, game_id, user_id).await?;
    debug!(%game_id, %user_id, "disconnect counted as game over");
    Ok(())
}
