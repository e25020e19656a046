use std::{collections::HashMap, time::Duration};

use tokio::{sync::RwLock, time::Instant};
use uuid::Uuid;

use crate::dao::{durable_store::DurableStore, models::GameTypeEntity, storage::StorageResult};

/// Short-lived cache of game types read from the durable store.
pub struct GameTypeCache {
    ttl: Duration,
    entries: RwLock<HashMap<Uuid, (Instant, GameTypeEntity)>>,
}

impl GameTypeCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Cached value if still fresh.
    pub async fn get(&self, id: Uuid) -> Option<GameTypeEntity> {
        let entries = self.entries.read().await;
        entries
            .get(&id)
            .filter(|(fetched_at, _)| fetched_at.elapsed() < self.ttl)
            .map(|(_, game_type)| game_type.clone())
    }

    pub async fn insert(&self, game_type: GameTypeEntity) {
        let mut entries = self.entries.write().await;
        entries.insert(game_type.id, (Instant::now(), game_type));
    }

    /// Cached value, or a store read that refreshes the cache.
    pub async fn resolve(
        &self,
        id: Uuid,
        store: &dyn DurableStore,
    ) -> StorageResult<Option<GameTypeEntity>> {
        if let Some(game_type) = self.get(id).await {
            return Ok(Some(game_type));
        }
        let fetched = store.find_game_type(id).await?;
        if let Some(game_type) = &fetched {
            self.insert(game_type.clone()).await;
        }
        Ok(fetched)
    }
}
