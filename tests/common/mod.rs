#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use arena_back::{
    config::AppConfig,
    dao::{broker::MemoryBroker, durable_store::MemoryDurableStore, models::GameTypeEntity},
    dto::ws::{
        AddUserPayload, ClientMessage, GameActionPayload, JoinRandomGamePayload, ServerMessage,
    },
    services::{fanout, keys, player_service, worker},
    state::{AppState, SharedState, game::Game},
};
use tokio::sync::mpsc;
use uuid::Uuid;

pub const PUBLIC_KEY: &str = "4Nd1mBQtrMJVYVfKf2PJy9NZUZdTAsp7D4xWLs4gDB4T";
const WAIT: Duration = Duration::from_secs(2);

/// One process wired to in-memory backends.
///
/// Several harnesses built with [`Harness::peer`] share one broker and store,
/// the way separate server processes share Redis and MongoDB.
pub struct Harness {
    pub state: SharedState,
    pub store: MemoryDurableStore,
    pub broker: MemoryBroker,
}

impl Harness {
    /// A process matching joins inline.
    pub async fn start() -> Self {
        Self::boot(MemoryDurableStore::new(), MemoryBroker::new(), false).await
    }

    /// A process deferring joins to the game queue.
    pub async fn start_queued() -> Self {
        Self::boot(MemoryDurableStore::new(), MemoryBroker::new(), true).await
    }

    /// Another process on the same broker and store.
    pub async fn peer(&self) -> Self {
        Self::boot(
            self.store.clone(),
            self.broker.clone(),
            self.state.config().queue_joins,
        )
        .await
    }

    async fn boot(store: MemoryDurableStore, broker: MemoryBroker, queue_joins: bool) -> Self {
        let config = AppConfig {
            queue_joins,
            reconciliation_log: std::env::temp_dir()
                .join(format!("arena-reconciliation-{}.jsonl", Uuid::new_v4())),
            ..AppConfig::default()
        };
        let state = AppState::new(config, Arc::new(store.clone()), Arc::new(broker.clone()));

        tokio::spawn(fanout::run_global_listener(state.clone()));
        // Let the listener subscribe before anything is published.
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            state,
            store,
            broker,
        }
    }

    pub async fn game_type(&self, max_players: u32, entry_fee: i64, prize: i64) -> Uuid {
        let id = Uuid::new_v4();
        self.store
            .insert_game_type(GameTypeEntity {
                id,
                title: "Duel".into(),
                currency: "SOL".into(),
                max_players,
                entry_fee,
                prize,
            })
            .await;
        id
    }

    /// Register a connected player holding `balance`.
    pub async fn player(&self, balance: i64) -> Player {
        let user_id = Uuid::new_v4();
        self.store.set_balance(user_id, balance).await;
        let (tx, rx) = mpsc::channel(64);
        let connection_id = Uuid::new_v4();
        player_service::add_user(
            &self.state,
            AddUserPayload {
                user_id,
                public_key: PUBLIC_KEY.into(),
            },
            connection_id,
            tx,
        )
        .unwrap();
        Player {
            user_id,
            connection_id,
            rx,
        }
    }

    pub async fn join(&self, player: &Player, game_type_id: Uuid) {
        player_service::handle_message(
            &self.state,
            player.user_id,
            ClientMessage::JoinRandomGame(JoinRandomGamePayload { game_type_id }),
        )
        .await
        .unwrap();
    }

    /// Run every pending durable-store task.
    pub async fn drain_db_queue(&self) {
        let queue = self.state.db_queue().clone();
        while let Some(claimed) = queue.try_dequeue().await.unwrap() {
            worker::process_claimed(&self.state, &queue, claimed).await;
        }
    }

    /// Run every pending queued join.
    pub async fn drain_game_queue(&self) {
        let queue = self.state.game_queue().clone();
        while let Some(claimed) = queue.try_dequeue().await.unwrap() {
            worker::process_claimed(&self.state, &queue, claimed).await;
        }
    }

    /// Send a game action for `player` in their current game.
    pub async fn act(&self, player: &Player, message: fn(GameActionPayload) -> ClientMessage) {
        let game_id = self
            .state
            .sessions()
            .lookup(player.user_id)
            .and_then(|session| session.current_game_id)
            .expect("player is not in a game");
        let action = GameActionPayload {
            game_id,
            user_id: player.user_id,
        };
        player_service::handle_message(&self.state, player.user_id, message(action))
            .await
            .unwrap();
    }

    /// Current staging game of `game_type_id`, read straight from the broker.
    pub async fn staging(&self, game_type_id: Uuid) -> Option<Game> {
        let raw = self
            .state
            .broker()
            .get(&keys::staging_game(game_type_id))
            .await
            .unwrap()?;
        Some(serde_json::from_str(&raw).unwrap())
    }

    /// Wait until the db queue holds at least `count` pending tasks.
    pub async fn await_db_tasks(&self, count: usize) {
        tokio::time::timeout(WAIT, async {
            while self.state.db_queue().pending().await.unwrap().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("db tasks were not queued in time");
    }
}

pub struct Player {
    pub user_id: Uuid,
    pub connection_id: Uuid,
    pub rx: mpsc::Receiver<ServerMessage>,
}

impl Player {
    /// Skip messages until one matches `pred`.
    pub async fn expect<F>(&mut self, what: &str, pred: F) -> ServerMessage
    where
        F: Fn(&ServerMessage) -> bool,
    {
        tokio::time::timeout(WAIT, async {
            loop {
                let message = self.rx.recv().await.expect("session channel closed");
                if pred(&message) {
                    return message;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
    }

    pub async fn expect_join(&mut self) -> (Uuid, Vec<Uuid>) {
        match self
            .expect("join-game", |m| matches!(m, ServerMessage::JoinGame { .. }))
            .await
        {
            ServerMessage::JoinGame { users, game_id } => (game_id, users),
            _ => unreachable!(),
        }
    }

    /// Wait for `start-game`.
    pub async fn expect_start(&mut self) {
        self.expect("start-game", |m| *m == ServerMessage::StartGame {})
            .await;
    }

    pub async fn expect_error(&mut self) -> String {
        match self
            .expect("error", |m| matches!(m, ServerMessage::Error { .. }))
            .await
        {
            ServerMessage::Error { message } => message,
            _ => unreachable!(),
        }
    }
}
