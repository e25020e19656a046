use std::collections::HashMap;

use tokio::sync::Mutex;
use uuid::Uuid;

use super::game::{Game, GameStatus};

/// Result of merging a game snapshot into the local table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// The snapshot replaced the local copy; `previous` is the replaced status.
    Applied { previous: Option<GameStatus> },
    /// The local copy is further along than the snapshot.
    Ignored,
}

/// Active games this process holds players for.
///
/// Every read-modify-write goes through the single mutex; closures passed to
/// [`GameTable::with_game_mut`] must not await.
#[derive(Default)]
pub struct GameTable {
    games: Mutex<HashMap<Uuid, Game>>,
}

impl GameTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `game` into the table; status never moves backwards.
    ///
    /// Staging snapshots replace a staging copy since the roster may have changed.
    pub async fn upsert(&self, game: Game) -> Upsert {
        let mut games = self.games.lock().await;
        let previous = games.get(&game.id).map(|current| current.status);
        let accept = match previous {
            None => true,
            Some(current) => {
                game.status > current
                    || (current == GameStatus::Staging && game.status == GameStatus::Staging)
            }
        };
        if !accept {
            return Upsert::Ignored;
        }
        games.insert(game.id, game);
        Upsert::Applied { previous }
    }

    pub async fn get(&self, id: Uuid) -> Option<Game> {
        self.games.lock().await.get(&id).cloned()
    }

    pub async fn with_game_mut<R>(&self, id: Uuid, f: impl FnOnce(&mut Game) -> R) -> Option<R> {
        let mut games = self.games.lock().await;
        games.get_mut(&id).map(f)
    }

    pub async fn remove(&self, id: Uuid) -> Option<Game> {
        self.games.lock().await.remove(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::GameTypeEntity;

    fn staging_game(max_players: u32) -> Game {
        let game_type = GameTypeEntity {
            id: Uuid::new_v4(),
            title: "duel".into(),
            currency: "SOL".into(),
            max_players,
            entry_fee: 10,
            prize: 18,
        };
        Game::new(Uuid::new_v4(), &game_type)
    }

    #[tokio::test]
    async fn status_never_regresses() {
        let table = GameTable::new();
        let mut game = staging_game(1);
        let stale = game.clone();
        game.add_player(Uuid::new_v4()).unwrap();
        game.start().unwrap();

        assert_eq!(table.upsert(game.clone()).await, Upsert::Applied { previous: None });
        assert_eq!(table.upsert(stale).await, Upsert::Ignored);
        assert_eq!(table.get(game.id).await, Some(game));
    }

    #[tokio::test]
    async fn staging_snapshots_refresh_the_roster() {
        let table = GameTable::new();
        let mut game = staging_game(3);
        table.upsert(game.clone()).await;
        game.add_player(Uuid::new_v4()).unwrap();

        assert_eq!(
            table.upsert(game.clone()).await,
            Upsert::Applied {
                previous: Some(GameStatus::Staging)
            }
        );
        let stored = table.get(game.id).await.unwrap();
        assert_eq!(stored.current_player_count, 1);
    }

    #[tokio::test]
    async fn mutation_closure_sees_the_stored_game() {
        let table = GameTable::new();
        let game = staging_game(2);
        let id = game.id;
        table.upsert(game).await;

        let added = table
            .with_game_mut(id, |game| game.add_player(Uuid::new_v4()))
            .await;
        assert_eq!(added, Some(Ok(false)));
        assert!(table.with_game_mut(Uuid::new_v4(), |_| ()).await.is_none());
        assert!(table.remove(id).await.is_some());
        assert!(table.get(id).await.is_none());
    }
}
