pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use crate::dao::models::{GameEntity, GameTypeEntity, LedgerOutcome};
use crate::dao::storage::StorageResult;
use futures::future::BoxFuture;
use uuid::Uuid;

pub use self::memory::MemoryDurableStore;

/// Abstraction over the persistence layer holding games, participants and balances.
///
/// Every mutation issued by the task workers goes through this trait, so a
/// backend only needs to provide row-level inserts and (conditional) updates.
pub trait DurableStore: Send + Sync {
    fn find_game_type(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameTypeEntity>>>;
    fn find_balance(&self, user_id: Uuid) -> BoxFuture<'static, StorageResult<Option<i64>>>;
    fn insert_game(&self, game: GameEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn insert_participant(&self, game_id: Uuid, user_id: Uuid)
    -> BoxFuture<'static, StorageResult<()>>;
    fn delete_participant(&self, game_id: Uuid, user_id: Uuid)
    -> BoxFuture<'static, StorageResult<()>>;
    fn mark_game_ongoing(&self, game_id: Uuid) -> BoxFuture<'static, StorageResult<()>>;
    /// Debit `entry_fee` from every user whose balance covers it, returning the debited ids.
    ///
    /// Guarded per game: a second call for the same game reports
    /// [`LedgerOutcome::AlreadyApplied`] without touching any balance.
    fn collect_entries(
        &self,
        game_id: Uuid,
        user_ids: Vec<Uuid>,
        entry_fee: i64,
    ) -> BoxFuture<'static, StorageResult<LedgerOutcome<Vec<Uuid>>>>;
    fn complete_game(
        &self,
        game_id: Uuid,
        winner_id: Option<Uuid>,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Credit the prize of `game_id` to `user_id`, at most once per game.
    fn credit_balance(
        &self,
        game_id: Uuid,
        user_id: Uuid,
        amount: i64,
    ) -> BoxFuture<'static, StorageResult<LedgerOutcome<()>>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}
