//! Several processes sharing one broker and one store.

mod common;

use std::time::Duration;

use arena_back::dto::ws::{ClientMessage, ServerMessage};
use common::Harness;
use uuid::Uuid;

fn is_result(message: &ServerMessage) -> bool {
    matches!(
        message,
        ServerMessage::Winner { .. } | ServerMessage::Loser { .. }
    )
}

#[tokio::test]
async fn processes_agree_on_a_single_winner() {
    let first = Harness::start().await;
    let second = first.peer().await;
    let game_type_id = first.game_type(2, 10, 18).await;
    let mut alice = first.player(10).await;
    let mut bob = second.player(10).await;

    first.join(&alice, game_type_id).await;
    let (game_id, _) = alice.expect_join().await;
    second.join(&bob, game_type_id).await;
    let (bob_game, users) = bob.expect_join().await;
    assert_eq!(bob_game, game_id);
    assert_eq!(users, vec![alice.user_id, bob.user_id]);
    alice.expect_start().await;
    bob.expect_start().await;

    first.act(&alice, ClientMessage::UpdateBoard).await;
    let board = bob
        .expect("update-board", |m| matches!(m, ServerMessage::UpdateBoard { .. }))
        .await;
    let ServerMessage::UpdateBoard { scores } = board else {
        unreachable!()
    };
    let alice_score = scores.iter().find(|s| s.user_id == alice.user_id).unwrap();
    assert_eq!(alice_score.points, 1);

    first.act(&alice, ClientMessage::GameOver).await;
    second.act(&bob, ClientMessage::GameOver).await;

    let alice_result = alice.expect("result", is_result).await;
    assert_eq!(alice_result, ServerMessage::Winner { amount: 8 });
    let bob_result = bob.expect("result", is_result).await;
    assert_eq!(bob_result, ServerMessage::Loser { amount: 10 });

    first.await_db_tasks(2).await;
    let pending = first.state.db_queue().pending().await.unwrap();
    let payouts: Vec<_> = pending
        .iter()
        .filter(|queued| queued.task.kind() == "update-balance")
        .collect();
    assert_eq!(payouts.len(), 1);

    for harness in [&first, &second] {
        assert!(harness.state.games().get(game_id).await.is_none());
    }
}

#[tokio::test]
async fn lobby_events_survive_a_dropped_subscription() {
    let harness = Harness::start().await;
    let mut carol = harness.player(50).await;

    harness.broker.sever_subscriptions();
    tokio::time::sleep(Duration::from_millis(300)).await;

    harness.join(&carol, Uuid::new_v4()).await;
    assert_eq!(carol.expect_error().await, "Invalid game type");
}

#[tokio::test]
async fn game_listener_resubscribes_and_keeps_forwarding_boards() {
    let harness = Harness::start().await;
    let game_type_id = harness.game_type(2, 10, 18).await;
    let mut alice = harness.player(10).await;
    let mut bob = harness.player(10).await;
    harness.join(&alice, game_type_id).await;
    harness.join(&bob, game_type_id).await;
    alice.expect_start().await;
    bob.expect_start().await;

    harness.broker.sever_subscriptions();
    tokio::time::sleep(Duration::from_millis(300)).await;

    harness.act(&alice, ClientMessage::UpdateBoard).await;
    bob.expect("update-board", |m| matches!(m, ServerMessage::UpdateBoard { .. }))
        .await;
}

#[tokio::test]
async fn result_published_while_unsubscribed_is_caught_up() {
    let harness = Harness::start().await;
    let game_type_id = harness.game_type(2, 10, 18).await;
    let mut alice = harness.player(10).await;
    let mut bob = harness.player(10).await;
    harness.join(&alice, game_type_id).await;
    harness.join(&bob, game_type_id).await;
    alice.expect_start().await;
    bob.expect_start().await;

    harness.act(&alice, ClientMessage::UpdateBoard).await;
    harness.broker.sever_subscriptions();
    harness.act(&bob, ClientMessage::GameOver).await;
    harness.act(&alice, ClientMessage::GameOver).await;

    alice
        .expect("winner", |m| *m == ServerMessage::Winner { amount: 8 })
        .await;
    bob.expect("loser", |m| *m == ServerMessage::Loser { amount: 10 })
        .await;
}
