//! Joins that do not go through the happy path.

mod common;

use arena_back::{
    dto::ws::{ClientMessage, JoinRandomGamePayload},
    services::{
        keys,
        matchmaker::JoinError,
        player_service::{self, PlayerError},
    },
};
use common::Harness;

#[tokio::test]
async fn failed_start_reports_every_player_and_frees_them() {
    let harness = Harness::start().await;
    let game_type_id = harness.game_type(2, 10, 18).await;
    let mut alice = harness.player(10).await;
    let mut bob = harness.player(10).await;

    harness.join(&alice, game_type_id).await;
    let (game_id, _) = alice.expect_join().await;

    // Bob's participant row is queued, the start is not.
    let db_queue = harness.state.db_queue().name().to_owned();
    harness.broker.fail_pushes_after(&db_queue, 1).await;
    harness.join(&bob, game_type_id).await;

    assert_eq!(alice.expect_error().await, "Error starting the game");
    assert_eq!(bob.expect_error().await, "Error starting the game");
    harness.broker.clear_push_failures().await;

    for player in [&alice, &bob] {
        let session = harness.state.sessions().lookup(player.user_id).unwrap();
        assert_eq!(session.current_game_id, None);
    }
    assert!(harness.state.games().get(game_id).await.is_none());

    let log = tokio::fs::read_to_string(harness.state.reconciliation().path())
        .await
        .unwrap();
    assert!(log.contains("\"kind\":\"start-game\""));
    assert!(log.contains(&game_id.to_string()));

    let kinds: Vec<_> = harness
        .state
        .db_queue()
        .pending()
        .await
        .unwrap()
        .iter()
        .map(|queued| queued.task.kind())
        .collect();
    assert!(!kinds.contains(&"start-game"));
    assert!(!kinds.contains(&"collect-entry"));
}

#[tokio::test]
async fn queued_join_is_matched_by_the_worker() {
    let harness = Harness::start_queued().await;
    let game_type_id = harness.game_type(2, 10, 18).await;
    let mut alice = harness.player(10).await;

    harness.join(&alice, game_type_id).await;
    assert!(harness.staging(game_type_id).await.is_none());
    let queued = harness.state.game_queue().pending().await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].task.kind(), "join-game");

    harness.drain_game_queue().await;

    let (game_id, users) = alice.expect_join().await;
    assert_eq!(users, vec![alice.user_id]);
    assert_eq!(harness.staging(game_type_id).await.unwrap().id, game_id);
}

#[tokio::test]
async fn second_join_while_the_first_is_queued_is_refused() {
    let harness = Harness::start_queued().await;
    let duel = harness.game_type(2, 10, 18).await;
    let trio = harness.game_type(3, 10, 27).await;
    let mut alice = harness.player(50).await;

    harness.join(&alice, duel).await;
    let again = player_service::handle_message(
        &harness.state,
        alice.user_id,
        ClientMessage::JoinRandomGame(JoinRandomGamePayload { game_type_id: trio }),
    )
    .await;
    assert!(matches!(
        again,
        Err(PlayerError::Join(JoinError::AlreadyJoining))
    ));
    assert_eq!(harness.state.game_queue().pending().await.unwrap().len(), 1);

    harness.drain_game_queue().await;
    alice.expect_join().await;

    let seated = player_service::handle_message(
        &harness.state,
        alice.user_id,
        ClientMessage::JoinRandomGame(JoinRandomGamePayload { game_type_id: trio }),
    )
    .await;
    assert!(matches!(seated, Err(PlayerError::AlreadyInGame)));
}

#[tokio::test]
async fn failed_join_lets_the_player_try_again() {
    let harness = Harness::start().await;
    let game_type_id = harness.game_type(2, 10, 18).await;
    let mut carol = harness.player(5).await;

    harness.join(&carol, game_type_id).await;
    assert_eq!(carol.expect_error().await, "Insufficient balance");

    harness.store.set_balance(carol.user_id, 50).await;
    harness
        .state
        .broker()
        .delete(&keys::balance(carol.user_id))
        .await
        .unwrap();
    harness.join(&carol, game_type_id).await;
    let (_, users) = carol.expect_join().await;
    assert_eq!(users, vec![carol.user_id]);
}
