//! Applies fanned-out events to the local replicas and delivers them to local players.
//!
//! Boards and results are computed once, by the process that applied the
//! action to the shared snapshot; here they are only forwarded.

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{fanout, game_play, keys};
use crate::{
    dto::{
        events::FanOutEvent,
        ws::{PlayerScore, ServerMessage},
    },
    state::{
        SharedState,
        game::{Game, GameResult, GameStatus},
        games::Upsert,
    },
};

/// Whether a game listener keeps running after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Handle an event received on the global channel.
pub async fn handle_global(state: &SharedState, event: FanOutEvent) {
    match event {
        FanOutEvent::UserJoinGame { user_id, game } => on_user_joined(state, user_id, game).await,
        FanOutEvent::UserError { user_id, message } => {
            state.sessions().send(user_id, ServerMessage::error(message));
        }
        FanOutEvent::UserLeftGame { user_id, game_id } => {
            on_user_left(state, user_id, game_id).await;
        }
        FanOutEvent::ErrorStartingGame {
            game_id,
            user_ids,
            message,
        } => {
            for user_id in state.sessions().local_members(&user_ids) {
                state.sessions().leave_game(user_id, game_id);
                state.sessions().send(user_id, ServerMessage::error(message.clone()));
            }
            state.games().remove(game_id).await;
            state.drop_subscription(game_id);
        }
        other => debug!(event = ?other, "in-game event on the global channel; ignoring"),
    }
}

/// Handle an event received on a game channel.
pub async fn handle_game(state: &SharedState, event: FanOutEvent) -> Flow {
    match event {
        FanOutEvent::StartGame { game_id } => {
            on_start(state, game_id).await;
            Flow::Continue
        }
        FanOutEvent::UpdateBoard {
            game_id,
            user_id,
            scores,
        }
        | FanOutEvent::GameOver {
            game_id,
            user_id,
            scores,
        } => {
            deliver_board(state, game_id, user_id, scores);
            Flow::Continue
        }
        FanOutEvent::GameResult(result) => {
            deliver_result(state, &result).await;
            Flow::Stop
        }
        other => {
            debug!(event = ?other, "lobby event on a game channel; ignoring");
            Flow::Continue
        }
    }
}

async fn on_user_joined(state: &SharedState, user_id: Uuid, game: Game) {
    let players = game.players();
    let local = state.sessions().local_members(&players);
    if local.is_empty() {
        return;
    }
    let game_id = game.id;
    let already_started = state.games().upsert(game).await == Upsert::Ignored;

    for member in &local {
        if *member == user_id {
            state.sessions().set_current_game(user_id, Some(game_id));
            clear_joining(state, user_id).await;
            state.sessions().send(
                user_id,
                ServerMessage::JoinGame {
                    users: players.clone(),
                    game_id,
                },
            );
            if already_started {
                state.sessions().send(user_id, ServerMessage::StartGame {});
            }
        } else {
            state
                .sessions()
                .send(*member, ServerMessage::NewUser { user_id, game_id });
        }
    }

    if !local.contains(&user_id) {
        return;
    }
    if let Err(err) = fanout::ensure_game_subscription(state, game_id).await {
        warn!(%game_id, error = %err, "failed to subscribe to game channel");
        return;
    }
    // The start, or even the result, may have been published before the subscription existed.
    if catch_up(state, game_id).await == Flow::Stop {
        state.drop_subscription(game_id);
    }
}

/// Drop the in-flight join marker of a player who got a seat.
pub async fn clear_joining(state: &SharedState, user_id: Uuid) {
    if let Err(err) = state.broker().delete(&keys::joining(user_id)).await {
        debug!(%user_id, error = %err, "failed to clear the joining marker");
    }
}

/// Bring the replica of `game_id` up to date with what the broker holds.
///
/// A decided result is delivered and ends the game here; otherwise the
/// started snapshot, if any, is applied and the start announced once.
pub async fn catch_up(state: &SharedState, game_id: Uuid) -> Flow {
    match game_play::decided_result(state, game_id).await {
        Ok(Some(result)) => {
            deliver_result(state, &result).await;
            return Flow::Stop;
        }
        Ok(None) => {}
        Err(err) => warn!(%game_id, error = %err, "failed to read the game result"),
    }
    catch_up_start(state, game_id).await;
    Flow::Continue
}

/// Apply the started snapshot, if any, and announce the start once.
async fn catch_up_start(state: &SharedState, game_id: Uuid) -> bool {
    let snapshot = match game_play::load_started(state, game_id).await {
        Ok(Some(game)) => game,
        Ok(None) => return false,
        Err(err) => {
            warn!(%game_id, error = %err, "failed to read started game snapshot");
            return false;
        }
    };

    let players = snapshot.players();
    let upsert = state.games().upsert(snapshot).await;
    if upsert == (Upsert::Applied { previous: Some(GameStatus::Staging) }) {
        announce_start(state, game_id, &players);
    }
    true
}

async fn on_start(state: &SharedState, game_id: Uuid) {
    if catch_up_start(state, game_id).await {
        return;
    }
    // No snapshot: start the local replica if it holds the whole roster.
    let started = state
        .games()
        .with_game_mut(game_id, |game| game.start().ok().map(|()| game.players()))
        .await
        .flatten();
    match started {
        Some(players) => announce_start(state, game_id, &players),
        None => debug!(%game_id, "start-game for a game that is not startable here"),
    }
}

/// Players who already received `join-game` get `start-game`; later joiners get it with their `join-game`.
fn announce_start(state: &SharedState, game_id: Uuid, players: &[Uuid]) {
    info!(%game_id, "game started");
    for member in state.sessions().members_in_game(players, game_id) {
        state.sessions().send(member, ServerMessage::StartGame {});
    }
}

/// Forward a published board to the local players of the game, the actor excepted.
fn deliver_board(state: &SharedState, game_id: Uuid, actor: Uuid, scores: Vec<PlayerScore>) {
    let players: Vec<Uuid> = scores.iter().map(|score| score.user_id).collect();
    for member in state.sessions().members_in_game(&players, game_id) {
        if member != actor {
            state.sessions().send(
                member,
                ServerMessage::UpdateBoard {
                    scores: scores.clone(),
                },
            );
        }
    }
}

/// Tell local players who won. Only the first delivery for a game does anything.
pub async fn deliver_result(state: &SharedState, result: &GameResult) {
    let game_id = result.game_id;
    if state.games().remove(game_id).await.is_none() {
        debug!(%game_id, "result for a game without a local replica");
        return;
    }
    info!(%game_id, winner_id = %result.winner_id, "game completed");

    if state.sessions().is_local(result.winner_id) {
        state.sessions().leave_game(result.winner_id, game_id);
        state.sessions().send(
            result.winner_id,
            ServerMessage::Winner {
                amount: result.winner_amount(),
            },
        );
    }
    for loser in state.sessions().local_members(&result.losers) {
        state.sessions().leave_game(loser, game_id);
        state.sessions().send(
            loser,
            ServerMessage::Loser {
                amount: result.entry_fee,
            },
        );
    }
}

async fn on_user_left(state: &SharedState, user_id: Uuid, game_id: Uuid) {
    let remaining = state
        .games()
        .with_game_mut(game_id, |game| {
            game.remove_player(user_id).ok().map(|()| game.players())
        })
        .await
        .flatten();
    let Some(remaining) = remaining else {
        return;
    };

    state.sessions().leave_game(user_id, game_id);
    let local = state.sessions().local_members(&remaining);
    for member in &local {
        state
            .sessions()
            .send(*member, ServerMessage::UserLeft { user_id, game_id });
    }
    if local.is_empty() {
        state.games().remove(game_id).await;
        state.drop_subscription(game_id);
    }
}
