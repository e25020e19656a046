//! Queue consumers and the stalled-task sweep.

use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{debug, info, warn};

use super::{
    matchmaker,
    queue::{ClaimedTask, TaskQueue, now_millis},
    reconciliation::ReconciliationRecord,
    tasks::Task,
};
use crate::{
    dao::{
        models::{GameEntity, LedgerOutcome},
        storage::StorageError,
    },
    state::SharedState,
};

/// What to do with a claimed task once its handler ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Acknowledge.
    Done,
    /// Leave the claim in place for the retry sweep.
    Retry(String),
    /// Write the record to the reconciliation log, then acknowledge.
    Reconcile(ReconciliationRecord),
}

/// Consume `queue` until shutdown.
pub async fn run_worker(state: SharedState, queue: TaskQueue) {
    let mut shutdown = state.shutdown_watcher();
    let poll = state.config().poll_interval;
    info!(queue = queue.name(), "queue worker started");

    loop {
        match queue.dequeue(poll, &mut shutdown).await {
            Ok(Some(claimed)) => process_claimed(&state, &queue, claimed).await,
            Ok(None) => break,
            Err(err) => {
                warn!(queue = queue.name(), error = %err, "failed to claim a task");
                tokio::select! {
                    _ = sleep(poll) => {}
                    _ = shutdown.changed() => break,
                }
            }
        }
    }
    info!(queue = queue.name(), "queue worker stopped");
}

/// Run one claimed task and settle its claim.
pub async fn process_claimed(state: &SharedState, queue: &TaskQueue, claimed: ClaimedTask) {
    let task = &claimed.queued.task;
    let outcome = execute(state, task).await;
    match outcome {
        TaskOutcome::Done => {}
        TaskOutcome::Retry(reason) => {
            warn!(
                queue = queue.name(),
                task_id = %claimed.queued.id,
                kind = task.kind(),
                attempts = claimed.queued.attempts,
                reason = %reason,
                "task failed; leaving it for the retry sweep"
            );
            return;
        }
        TaskOutcome::Reconcile(record) => state.reconciliation().record(record).await,
    }

    match queue.acknowledge(&claimed).await {
        Ok(true) => debug!(queue = queue.name(), task_id = %claimed.queued.id, kind = task.kind(), "task acknowledged"),
        Ok(false) => warn!(queue = queue.name(), task_id = %claimed.queued.id, "claim vanished before acknowledgement"),
        Err(err) => warn!(queue = queue.name(), task_id = %claimed.queued.id, error = %err, "failed to acknowledge task"),
    }
}

/// Perform the side effect of `task`.
pub async fn execute(state: &SharedState, task: &Task) -> TaskOutcome {
    let store = state.store();
    let retry_on_error = |result: Result<(), StorageError>| match result {
        Ok(()) => TaskOutcome::Done,
        Err(err) => TaskOutcome::Retry(err.to_string()),
    };

    match task {
        Task::CreateGame {
            game_id,
            game_type_id,
            max_players,
            entry_fee,
            prize,
        } => {
            let entity = GameEntity {
                id: *game_id,
                game_type_id: *game_type_id,
                max_players: *max_players,
                entry_fee: *entry_fee,
                prize: *prize,
            };
            retry_on_error(store.insert_game(entity).await)
        }
        Task::AddParticipant { game_id, user_id } => {
            retry_on_error(store.insert_participant(*game_id, *user_id).await)
        }
        Task::RemoveParticipant { game_id, user_id } => {
            retry_on_error(store.delete_participant(*game_id, *user_id).await)
        }
        Task::StartGame { game_id } => retry_on_error(store.mark_game_ongoing(*game_id).await),
        Task::CollectEntry {
            game_id,
            user_ids,
            entry_fee,
        } => match store
            .collect_entries(*game_id, user_ids.clone(), *entry_fee)
            .await
        {
            Ok(LedgerOutcome::Applied(debited)) if debited.len() == user_ids.len() => {
                TaskOutcome::Done
            }
            Ok(LedgerOutcome::Applied(debited)) => {
                let unpaid: Vec<String> = user_ids
                    .iter()
                    .filter(|user| !debited.contains(user))
                    .map(ToString::to_string)
                    .collect();
                TaskOutcome::Reconcile(
                    ReconciliationRecord::new(
                        "collect-entry",
                        *game_id,
                        format!("entry fee not collected from {}", unpaid.join(", ")),
                    )
                    .amount(*entry_fee),
                )
            }
            Ok(LedgerOutcome::AlreadyApplied) => TaskOutcome::Done,
            Err(err) => TaskOutcome::Retry(err.to_string()),
        },
        Task::EndGame { game_id, winner_id } => {
            match store.complete_game(*game_id, Some(*winner_id)).await {
                Ok(()) => TaskOutcome::Done,
                Err(err) => TaskOutcome::Reconcile(
                    ReconciliationRecord::new("end-game", *game_id, err.to_string())
                        .user(*winner_id),
                ),
            }
        }
        Task::UpdateBalance {
            game_id,
            user_id,
            amount,
        } => match store.credit_balance(*game_id, *user_id, *amount).await {
            Ok(_) => TaskOutcome::Done,
            Err(err) => TaskOutcome::Reconcile(
                ReconciliationRecord::new("update-balance", *game_id, err.to_string())
                    .user(*user_id)
                    .amount(*amount),
            ),
        },
        Task::JoinGame {
            user_id,
            game_type_id,
        } => {
            // Failures are reported to the player, never replayed.
            matchmaker::join_and_report(state, *user_id, *game_type_id).await;
            TaskOutcome::Done
        }
        Task::DeleteUser {
            user_id,
            game_id,
            game_type_id,
        } => match matchmaker::depart(state, *user_id, *game_id, *game_type_id).await {
            Ok(()) => TaskOutcome::Done,
            Err(err) => TaskOutcome::Retry(err.to_string()),
        },
    }
}

/// Periodically move stalled claims of `queues` back to pending until shutdown.
pub async fn run_retry_sweep(state: SharedState, queues: Vec<TaskQueue>) {
    let mut shutdown = state.shutdown_watcher();
    let mut ticker = interval(state.config().retry_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        for queue in &queues {
            sweep_once(&state, queue).await;
        }
    }
}

/// One retry pass over `queue`.
pub async fn sweep_once(state: &SharedState, queue: &TaskQueue) {
    let config = state.config();
    match queue
        .retry_stalled(now_millis(), config.claim_timeout, config.max_task_attempts)
        .await
    {
        Ok(report) if report.requeued > 0 || report.dead_lettered > 0 => info!(
            queue = queue.name(),
            requeued = report.requeued,
            dead_lettered = report.dead_lettered,
            "retry sweep moved stalled tasks"
        ),
        Ok(_) => debug!(queue = queue.name(), "retry sweep found nothing stalled"),
        Err(err) => warn!(queue = queue.name(), error = %err, "retry sweep failed"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{
            broker::{Broker, MemoryBroker},
            durable_store::{DurableStore, MemoryDurableStore},
            models::GameTypeEntity,
        },
        services::keys,
        state::{AppState, game::Game},
    };

    struct Fixture {
        state: SharedState,
        store: MemoryDurableStore,
        broker: MemoryBroker,
    }

    fn fixture() -> Fixture {
        let store = MemoryDurableStore::new();
        let broker = MemoryBroker::new();
        let config = AppConfig {
            reconciliation_log: std::env::temp_dir()
                .join(format!("arena-worker-{}.jsonl", Uuid::new_v4())),
            ..AppConfig::default()
        };
        let state = AppState::new(config, Arc::new(store.clone()), Arc::new(broker.clone()));
        Fixture {
            state,
            store,
            broker,
        }
    }

    fn game_type() -> GameTypeEntity {
        GameTypeEntity {
            id: Uuid::new_v4(),
            title: "duel".into(),
            currency: "SOL".into(),
            max_players: 2,
            entry_fee: 10,
            prize: 18,
        }
    }

    fn game_row(game_id: Uuid) -> GameEntity {
        GameEntity {
            id: game_id,
            game_type_id: Uuid::new_v4(),
            max_players: 2,
            entry_fee: 10,
            prize: 18,
        }
    }

    async fn pending_kinds(state: &SharedState) -> Vec<&'static str> {
        state
            .db_queue()
            .pending()
            .await
            .unwrap()
            .iter()
            .map(|queued| queued.task.kind())
            .collect()
    }

    async fn reconciliation_lines(state: &SharedState) -> String {
        tokio::fs::read_to_string(state.reconciliation().path())
            .await
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn store_outage_leaves_the_claim_for_the_sweep() {
        let fx = fixture();
        fx.store.set_offline(true);
        let queue = fx.state.db_queue().clone();
        let entity = game_row(Uuid::new_v4());
        queue
            .enqueue(Task::CreateGame {
                game_id: entity.id,
                game_type_id: entity.game_type_id,
                max_players: entity.max_players,
                entry_fee: entity.entry_fee,
                prize: entity.prize,
            })
            .await
            .unwrap();

        let claimed = queue.try_dequeue().await.unwrap().unwrap();
        assert!(matches!(
            execute(&fx.state, &claimed.queued.task).await,
            TaskOutcome::Retry(_)
        ));
        process_claimed(&fx.state, &queue, claimed).await;

        assert_eq!(queue.in_flight().await.unwrap().len(), 1);
        assert!(fx.store.game(entity.id).await.is_none());
    }

    #[tokio::test]
    async fn failed_end_game_is_logged_and_acknowledged() {
        let fx = fixture();
        fx.store.set_offline(true);
        let queue = fx.state.db_queue().clone();
        let (game_id, winner_id) = (Uuid::new_v4(), Uuid::new_v4());
        queue
            .enqueue(Task::EndGame { game_id, winner_id })
            .await
            .unwrap();

        let claimed = queue.try_dequeue().await.unwrap().unwrap();
        process_claimed(&fx.state, &queue, claimed).await;

        assert!(queue.in_flight().await.unwrap().is_empty());
        assert!(queue.pending().await.unwrap().is_empty());
        let log = reconciliation_lines(&fx.state).await;
        assert!(log.contains("\"kind\":\"end-game\""));
        assert!(log.contains(&winner_id.to_string()));
    }

    #[tokio::test]
    async fn failed_payout_is_logged_and_acknowledged() {
        let fx = fixture();
        let queue = fx.state.db_queue().clone();
        let (game_id, user_id) = (Uuid::new_v4(), Uuid::new_v4());
        queue
            .enqueue(Task::UpdateBalance {
                game_id,
                user_id,
                amount: 18,
            })
            .await
            .unwrap();

        let claimed = queue.try_dequeue().await.unwrap().unwrap();
        process_claimed(&fx.state, &queue, claimed).await;

        assert!(queue.in_flight().await.unwrap().is_empty());
        let log = reconciliation_lines(&fx.state).await;
        assert!(log.contains("\"kind\":\"update-balance\""));
        assert!(log.contains("\"amount\":18"));
    }

    #[tokio::test]
    async fn partial_entry_collection_names_the_unpaid_players() {
        let fx = fixture();
        let game_id = Uuid::new_v4();
        let (rich, poor) = (Uuid::new_v4(), Uuid::new_v4());
        fx.store.insert_game(game_row(game_id)).await.unwrap();
        fx.store.set_balance(rich, 100).await;
        fx.store.set_balance(poor, 3).await;

        let outcome = execute(
            &fx.state,
            &Task::CollectEntry {
                game_id,
                user_ids: vec![rich, poor],
                entry_fee: 10,
            },
        )
        .await;

        let TaskOutcome::Reconcile(record) = outcome else {
            panic!("a partial collection needs reconciliation, got {outcome:?}");
        };
        assert_eq!(record.kind, "collect-entry");
        assert_eq!(record.amount, Some(10));
        assert!(record.reason.contains(&poor.to_string()));
        assert!(!record.reason.contains(&rich.to_string()));
        assert_eq!(fx.store.balance(rich).await, Some(90));
        assert_eq!(fx.store.balance(poor).await, Some(3));
    }

    #[tokio::test]
    async fn queued_join_opens_a_staging_game() {
        let fx = fixture();
        let game_type = game_type();
        fx.store.insert_game_type(game_type.clone()).await;
        let user_id = Uuid::new_v4();
        fx.store.set_balance(user_id, 50).await;

        let outcome = execute(
            &fx.state,
            &Task::JoinGame {
                user_id,
                game_type_id: game_type.id,
            },
        )
        .await;

        assert_eq!(outcome, TaskOutcome::Done);
        let raw = fx
            .broker
            .get(&keys::staging_game(game_type.id))
            .await
            .unwrap()
            .unwrap();
        let staging: Game = serde_json::from_str(&raw).unwrap();
        assert_eq!(staging.players(), vec![user_id]);
        assert_eq!(pending_kinds(&fx.state).await, vec!["add-participant", "create-game"]);
    }

    #[tokio::test]
    async fn queued_join_for_an_unknown_type_is_not_replayed() {
        let fx = fixture();
        let outcome = execute(
            &fx.state,
            &Task::JoinGame {
                user_id: Uuid::new_v4(),
                game_type_id: Uuid::new_v4(),
            },
        )
        .await;

        assert_eq!(outcome, TaskOutcome::Done);
        assert!(pending_kinds(&fx.state).await.is_empty());
    }

    #[tokio::test]
    async fn delete_user_takes_the_player_out_of_staging() {
        let fx = fixture();
        let game_type = game_type();
        let (leaver, stayer) = (Uuid::new_v4(), Uuid::new_v4());
        let mut game = Game::new(Uuid::new_v4(), &game_type);
        game.add_player(leaver).unwrap();
        game.add_player(stayer).unwrap();
        let game_id = game.id;
        fx.broker
            .set(
                &keys::staging_game(game_type.id),
                serde_json::to_string(&game).unwrap(),
                None,
            )
            .await
            .unwrap();

        let outcome = execute(
            &fx.state,
            &Task::DeleteUser {
                user_id: leaver,
                game_id,
                game_type_id: game_type.id,
            },
        )
        .await;

        assert_eq!(outcome, TaskOutcome::Done);
        let raw = fx
            .broker
            .get(&keys::staging_game(game_type.id))
            .await
            .unwrap()
            .unwrap();
        let staging: Game = serde_json::from_str(&raw).unwrap();
        assert_eq!(staging.players(), vec![stayer]);
        assert_eq!(pending_kinds(&fx.state).await, vec!["remove-participant"]);
    }

    #[tokio::test]
    async fn delete_user_retries_while_the_broker_is_down() {
        let fx = fixture();
        fx.broker.set_offline(true);

        let outcome = execute(
            &fx.state,
            &Task::DeleteUser {
                user_id: Uuid::new_v4(),
                game_id: Uuid::new_v4(),
                game_type_id: Uuid::new_v4(),
            },
        )
        .await;

        assert!(matches!(outcome, TaskOutcome::Retry(_)));
    }
}
