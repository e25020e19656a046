//! In-game actions applied to the shared snapshot of a started game.
//!
//! The snapshot under `game:<id>` is the only scoreboard that counts. Every
//! action takes the game lock, applies itself to the snapshot, stores it and
//! publishes the resulting board before releasing the lock, so the game
//! channel carries boards in the order they were computed.

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    balance, fanout, game_events, keys, lock::BrokerLock,
    reconciliation::ReconciliationRecord, tasks::Task,
};
use crate::{
    dto::{events::FanOutEvent, ws::PlayerScore},
    error::ServiceError,
    state::{
        SharedState,
        game::{Elimination, Game, GameResult},
    },
};

/// Give `user_id` one point and publish the new board.
pub async fn score_point(state: &SharedState, game_id: Uuid, user_id: Uuid) -> Result<(), ServiceError> {
    let lock = BrokerLock::acquire(state, keys::game_lock(game_id)).await?;
    let outcome = score_point_locked(state, game_id, user_id).await;
    lock.release().await;
    outcome
}

async fn score_point_locked(state: &SharedState, game_id: Uuid, user_id: Uuid) -> Result<(), ServiceError> {
    let Some(mut game) = load_started(state, game_id).await? else {
        debug!(%game_id, "point for a game that is not running");
        return Ok(());
    };
    if !game.record_point(user_id) {
        return Ok(());
    }
    save_started(state, &game).await?;
    let event = FanOutEvent::UpdateBoard {
        game_id,
        user_id,
        scores: PlayerScore::board(&game),
    };
    fanout::publish(state, &event).await?;
    Ok(())
}

/// Take `user_id` out of the game; the last elimination decides it.
pub async fn eliminate(state: &SharedState, game_id: Uuid, user_id: Uuid) -> Result<(), ServiceError> {
    let lock = BrokerLock::acquire(state, keys::game_lock(game_id)).await?;
    let outcome = eliminate_locked(state, game_id, user_id).await;
    lock.release().await;
    outcome
}

async fn eliminate_locked(state: &SharedState, game_id: Uuid, user_id: Uuid) -> Result<(), ServiceError> {
    let Some(mut game) = load_started(state, game_id).await? else {
        debug!(%game_id, "game-over for a game that is not running");
        return Ok(());
    };
    match game.eliminate(user_id) {
        Elimination::Ignored => Ok(()),
        Elimination::Eliminated => {
            save_started(state, &game).await?;
            let event = FanOutEvent::GameOver {
                game_id,
                user_id,
                scores: PlayerScore::board(&game),
            };
            fanout::publish(state, &event).await?;
            Ok(())
        }
        Elimination::Completed(result) => decide(state, &game, result).await,
    }
}

/// Claim the completed game, announce its single result and settle it.
async fn decide(state: &SharedState, game: &Game, result: GameResult) -> Result<(), ServiceError> {
    let game_id = result.game_id;
    let encoded = serde_json::to_string(&result)
        .map_err(|err| ServiceError::InvalidState(format!("unencodable result: {err}")))?;
    let claimed = state
        .broker()
        .set_if_absent(
            &keys::game_completed(game_id),
            encoded,
            state.config().started_game_ttl,
        )
        .await?;
    if !claimed {
        debug!(%game_id, "result already decided elsewhere");
        return Ok(());
    }
    info!(%game_id, winner_id = %result.winner_id, "game decided");

    if let Err(err) = save_started(state, game).await {
        warn!(%game_id, error = %err, "failed to store the completed snapshot");
    }
    if let Err(err) = fanout::publish(state, &FanOutEvent::GameResult(result.clone())).await {
        // Subscribers catch up from the completion key; local players are served now.
        warn!(%game_id, error = %err, "failed to publish game-result");
        game_events::deliver_result(state, &result).await;
        state.drop_subscription(game_id);
    }
    settle(state, &result).await;
    Ok(())
}

/// Queue `end-game`, then `update-balance` only once the first is recorded.
async fn settle(state: &SharedState, result: &GameResult) {
    let game_id = result.game_id;
    let end_game = Task::EndGame {
        game_id,
        winner_id: result.winner_id,
    };
    if let Err(err) = state.db_queue().enqueue(end_game).await {
        state
            .reconciliation()
            .record(
                ReconciliationRecord::new("end-game", game_id, err.to_string())
                    .user(result.winner_id)
                    .amount(result.prize),
            )
            .await;
        return;
    }

    let payout = Task::UpdateBalance {
        game_id,
        user_id: result.winner_id,
        amount: result.prize,
    };
    if let Err(err) = state.db_queue().enqueue(payout).await {
        state
            .reconciliation()
            .record(
                ReconciliationRecord::new("update-balance", game_id, err.to_string())
                    .user(result.winner_id)
                    .amount(result.prize),
            )
            .await;
        return;
    }
    balance::adjust_cached(state, result.winner_id, result.prize).await;
}

/// Read the shared snapshot of a started game.
pub async fn load_started(state: &SharedState, game_id: Uuid) -> Result<Option<Game>, ServiceError> {
    let Some(raw) = state.broker().get(&keys::started_game(game_id)).await? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(game) => Ok(Some(game)),
        Err(err) => {
            warn!(%game_id, error = %err, "malformed started game snapshot");
            Ok(None)
        }
    }
}

pub async fn save_started(state: &SharedState, game: &Game) -> Result<(), ServiceError> {
    let raw = serde_json::to_string(game)
        .map_err(|err| ServiceError::InvalidState(format!("unencodable game: {err}")))?;
    state
        .broker()
        .set(
            &keys::started_game(game.id),
            raw,
            Some(state.config().started_game_ttl),
        )
        .await?;
    Ok(())
}

/// Result decided for `game_id`, if any.
pub async fn decided_result(state: &SharedState, game_id: Uuid) -> Result<Option<GameResult>, ServiceError> {
    let Some(raw) = state.broker().get(&keys::game_completed(game_id)).await? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(result) => Ok(Some(result)),
        Err(err) => {
            warn!(%game_id, error = %err, "malformed game result");
            Ok(None)
        }
    }
}
