//! In-process durable store used by tests and single-node development setups.

use std::{
    collections::{HashMap, HashSet},
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::DurableStore;
use crate::dao::{
    models::{GameEntity, GameStatusEntity, GameTypeEntity, LedgerOutcome},
    storage::{StorageError, StorageResult},
};

/// Snapshot of a game row as stored by [`MemoryDurableStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredGame {
    pub entity: GameEntity,
    pub status: GameStatusEntity,
    pub winner_id: Option<Uuid>,
    pub entries_collected: bool,
    pub paid_out: bool,
}

#[derive(Default)]
struct Tables {
    game_types: HashMap<Uuid, GameTypeEntity>,
    balances: HashMap<Uuid, i64>,
    games: HashMap<Uuid, StoredGame>,
    participants: HashSet<(Uuid, Uuid)>,
}

#[derive(Clone, Default)]
pub struct MemoryDurableStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    tables: Mutex<Tables>,
    offline: AtomicBool,
}

impl MemoryInner {
    fn ensure_online(&self) -> StorageResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable(
                "memory store offline".into(),
                io::Error::new(io::ErrorKind::NotConnected, "store switched offline"),
            ));
        }
        Ok(())
    }
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a game type so the matchmaker can resolve it.
    pub async fn insert_game_type(&self, game_type: GameTypeEntity) {
        let mut tables = self.inner.tables.lock().await;
        tables.game_types.insert(game_type.id, game_type);
    }

    /// Overwrite the stored balance of a user.
    pub async fn set_balance(&self, user_id: Uuid, balance: i64) {
        let mut tables = self.inner.tables.lock().await;
        tables.balances.insert(user_id, balance);
    }

    pub async fn balance(&self, user_id: Uuid) -> Option<i64> {
        self.inner.tables.lock().await.balances.get(&user_id).copied()
    }

    pub async fn game(&self, game_id: Uuid) -> Option<StoredGame> {
        self.inner.tables.lock().await.games.get(&game_id).cloned()
    }

    /// Participants recorded for `game_id`, in no particular order.
    pub async fn participants(&self, game_id: Uuid) -> Vec<Uuid> {
        let tables = self.inner.tables.lock().await;
        tables
            .participants
            .iter()
            .filter(|(game, _)| *game == game_id)
            .map(|(_, user)| *user)
            .collect()
    }

    /// Simulate an outage: every operation fails until switched back online.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }
}

impl DurableStore for MemoryDurableStore {
    fn find_game_type(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameTypeEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.ensure_online()?;
            Ok(inner.tables.lock().await.game_types.get(&id).cloned())
        })
    }

    fn find_balance(&self, user_id: Uuid) -> BoxFuture<'static, StorageResult<Option<i64>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.ensure_online()?;
            Ok(inner.tables.lock().await.balances.get(&user_id).copied())
        })
    }

    fn insert_game(&self, game: GameEntity) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.ensure_online()?;
            let mut tables = inner.tables.lock().await;
            // Replays of the same create task keep the first row untouched.
            tables.games.entry(game.id).or_insert_with(|| StoredGame {
                entity: game,
                status: GameStatusEntity::Staging,
                winner_id: None,
                entries_collected: false,
                paid_out: false,
            });
            Ok(())
        })
    }

    fn insert_participant(
        &self,
        game_id: Uuid,
        user_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.ensure_online()?;
            let mut tables = inner.tables.lock().await;
            if !tables.games.contains_key(&game_id) {
                return Err(StorageError::Rejected(format!(
                    "participant references unknown game `{game_id}`"
                )));
            }
            tables.participants.insert((game_id, user_id));
            Ok(())
        })
    }

    fn delete_participant(
        &self,
        game_id: Uuid,
        user_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.ensure_online()?;
            inner
                .tables
                .lock()
                .await
                .participants
                .remove(&(game_id, user_id));
            Ok(())
        })
    }

    fn mark_game_ongoing(&self, game_id: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.ensure_online()?;
            let mut tables = inner.tables.lock().await;
            let game = tables
                .games
                .get_mut(&game_id)
                .ok_or_else(|| StorageError::Rejected(format!("game `{game_id}` not found")))?;
            game.status = GameStatusEntity::Ongoing;
            Ok(())
        })
    }

    fn collect_entries(
        &self,
        game_id: Uuid,
        user_ids: Vec<Uuid>,
        entry_fee: i64,
    ) -> BoxFuture<'static, StorageResult<LedgerOutcome<Vec<Uuid>>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.ensure_online()?;
            let mut tables = inner.tables.lock().await;
            let game = tables
                .games
                .get_mut(&game_id)
                .ok_or_else(|| StorageError::Rejected(format!("game `{game_id}` not found")))?;
            if game.entries_collected {
                return Ok(LedgerOutcome::AlreadyApplied);
            }
            game.entries_collected = true;

            let mut debited = Vec::with_capacity(user_ids.len());
            for user_id in user_ids {
                if let Some(balance) = tables.balances.get_mut(&user_id) {
                    if *balance >= entry_fee {
                        *balance -= entry_fee;
                        debited.push(user_id);
                    }
                }
            }
            Ok(LedgerOutcome::Applied(debited))
        })
    }

    fn complete_game(
        &self,
        game_id: Uuid,
        winner_id: Option<Uuid>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.ensure_online()?;
            let mut tables = inner.tables.lock().await;
            let game = tables
                .games
                .get_mut(&game_id)
                .ok_or_else(|| StorageError::Rejected(format!("game `{game_id}` not found")))?;
            game.status = GameStatusEntity::Completed;
            game.winner_id = winner_id;
            Ok(())
        })
    }

    fn credit_balance(
        &self,
        game_id: Uuid,
        user_id: Uuid,
        amount: i64,
    ) -> BoxFuture<'static, StorageResult<LedgerOutcome<()>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.ensure_online()?;
            let mut tables = inner.tables.lock().await;
            if !tables.balances.contains_key(&user_id) {
                return Err(StorageError::Rejected(format!("user `{user_id}` not found")));
            }
            let game = tables
                .games
                .get_mut(&game_id)
                .ok_or_else(|| StorageError::Rejected(format!("game `{game_id}` not found")))?;
            if game.paid_out {
                return Ok(LedgerOutcome::AlreadyApplied);
            }
            game.paid_out = true;
            if let Some(balance) = tables.balances.get_mut(&user_id) {
                *balance += amount;
            }
            Ok(LedgerOutcome::Applied(()))
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move { inner.ensure_online() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn game(id: Uuid) -> GameEntity {
        GameEntity {
            id,
            game_type_id: Uuid::new_v4(),
            max_players: 2,
            entry_fee: 10,
            prize: 18,
        }
    }

    #[tokio::test]
    async fn collect_entries_skips_users_who_cannot_pay() {
        let store = MemoryDurableStore::new();
        let game_id = Uuid::new_v4();
        let rich = Uuid::new_v4();
        let poor = Uuid::new_v4();
        store.insert_game(game(game_id)).await.unwrap();
        store.set_balance(rich, 25).await;
        store.set_balance(poor, 5).await;

        let outcome = store
            .collect_entries(game_id, vec![rich, poor], 10)
            .await
            .unwrap();

        assert_eq!(outcome, LedgerOutcome::Applied(vec![rich]));
        assert_eq!(store.balance(rich).await, Some(15));
        assert_eq!(store.balance(poor).await, Some(5));
    }

    #[tokio::test]
    async fn ledger_mutations_apply_once_per_game() {
        let store = MemoryDurableStore::new();
        let game_id = Uuid::new_v4();
        let user = Uuid::new_v4();
        store.insert_game(game(game_id)).await.unwrap();
        store.set_balance(user, 30).await;

        store.collect_entries(game_id, vec![user], 10).await.unwrap();
        let replay = store.collect_entries(game_id, vec![user], 10).await.unwrap();
        assert_eq!(replay, LedgerOutcome::AlreadyApplied);
        assert_eq!(store.balance(user).await, Some(20));

        store.credit_balance(game_id, user, 18).await.unwrap();
        let replay = store.credit_balance(game_id, user, 18).await.unwrap();
        assert_eq!(replay, LedgerOutcome::AlreadyApplied);
        assert_eq!(store.balance(user).await, Some(38));
    }

    #[tokio::test]
    async fn offline_store_rejects_everything() {
        let store = MemoryDurableStore::new();
        store.set_offline(true);
        assert!(store.health_check().await.is_err());
        assert!(store.find_balance(Uuid::new_v4()).await.is_err());

        store.set_offline(false);
        assert!(store.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn participants_require_an_existing_game() {
        let store = MemoryDurableStore::new();
        let game_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();

        assert!(store.insert_participant(game_id, user_id).await.is_err());

        store.insert_game(game(game_id)).await.unwrap();
        store.insert_participant(game_id, user_id).await.unwrap();
        assert_eq!(store.participants(game_id).await, vec![user_id]);
    }
}
