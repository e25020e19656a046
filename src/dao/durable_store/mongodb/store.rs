use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use mongodb::{
    Client, Collection, Database, IndexModel,
    bson::{Document, doc},
    options::IndexOptions,
};
use tokio::{sync::RwLock, time::sleep};
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    config::MongoConfig,
    error::{MongoDaoError, MongoResult},
    models::{
        GAME_COLLECTION_NAME, GAME_TYPE_COLLECTION_NAME, MongoGameDocument,
        MongoGameTypeDocument, MongoUserBalanceDocument, PARTICIPANT_COLLECTION_NAME,
        USER_COLLECTION_NAME,
    },
};
use crate::dao::{
    durable_store::DurableStore,
    models::{GameEntity, GameStatusEntity, GameTypeEntity, LedgerOutcome},
    storage::StorageResult,
};

const CONNECT_ATTEMPTS: u32 = 10;
const CONNECT_DELAY: Duration = Duration::from_millis(250);
const MAX_CONNECT_DELAY: Duration = Duration::from_secs(5);

/// Array on a user document listing the games whose entry fee was debited.
const ENTRY_DEBITS: &str = "entryDebits";
/// Array on a user document listing the games whose prize was credited.
const PRIZE_CREDITS: &str = "prizeCredits";

/// Build a client for `config` and wait until the server answers a ping.
async fn open_database(config: &MongoConfig) -> MongoResult<(Client, Database)> {
    let client = Client::with_options(config.options.clone())
        .map_err(|source| MongoDaoError::ClientConstruction { source })?;
    let database = client.database(&config.database_name);

    let mut attempts = 0;
    let mut delay = CONNECT_DELAY;
    loop {
        match database.run_command(doc! { "ping": 1 }).await {
            Ok(_) => {
                info!(database = %config.database_name, "MongoDB answered");
                return Ok((client, database));
            }
            Err(source) => {
                attempts += 1;
                if attempts >= CONNECT_ATTEMPTS {
                    return Err(MongoDaoError::InitialPing { attempts, source });
                }
                warn!(attempt = attempts, error = %source, "MongoDB ping failed; retrying");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_CONNECT_DELAY);
            }
        }
    }
}

/// Debit `entry_fee` from `user_id` unless the balance is short or `game_id` was already debited.
fn debit_filter(user_id: Uuid, game_id: Uuid, entry_fee: i64) -> Document {
    doc! {
        "_id": user_id.to_string(),
        "balance": { "$gte": entry_fee },
        ENTRY_DEBITS: { "$ne": game_id.to_string() },
    }
}

fn debit_update(game_id: Uuid, entry_fee: i64) -> Document {
    doc! {
        "$inc": { "balance": -entry_fee },
        "$addToSet": { ENTRY_DEBITS: game_id.to_string() },
    }
}

fn credit_filter(user_id: Uuid, game_id: Uuid) -> Document {
    doc! {
        "_id": user_id.to_string(),
        PRIZE_CREDITS: { "$ne": game_id.to_string() },
    }
}

fn credit_update(game_id: Uuid, amount: i64) -> Document {
    doc! {
        "$inc": { "balance": amount },
        "$addToSet": { PRIZE_CREDITS: game_id.to_string() },
    }
}

/// MongoDB-backed [`DurableStore`].
///
/// Balance changes carry a per-user marker of the game they belong to, and the
/// game-level guard flag is only set once every user was handled. A task that
/// died half way is therefore safe to run again.
#[derive(Clone)]
pub struct MongoDurableStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    #[allow(dead_code)]
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn database(&self) -> Database {
        self.state.read().await.database.clone()
    }

    async fn games(&self) -> Collection<Document> {
        self.database().await.collection(GAME_COLLECTION_NAME)
    }

    async fn users(&self) -> Collection<Document> {
        self.database().await.collection(USER_COLLECTION_NAME)
    }

    async fn participants(&self) -> Collection<Document> {
        self.database().await.collection(PARTICIPANT_COLLECTION_NAME)
    }

    async fn ping(&self) -> MongoResult<()> {
        self.database()
            .await
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) = open_database(&self.config).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }

    async fn game_exists(&self, game_id: Uuid) -> MongoResult<bool> {
        let found = self
            .games()
            .await
            .find_one(doc! { "_id": game_id.to_string() })
            .await
            .map_err(|source| MongoDaoError::WriteGame {
                id: game_id,
                source,
            })?;
        Ok(found.is_some())
    }

    /// Whether the guard `flag` of the game is already set.
    async fn game_flag(&self, game_id: Uuid, flag: &str) -> MongoResult<bool> {
        let game = self
            .games()
            .await
            .find_one(doc! { "_id": game_id.to_string() })
            .await
            .map_err(|source| MongoDaoError::WriteGame {
                id: game_id,
                source,
            })?
            .ok_or(MongoDaoError::MissingGame(game_id))?;
        Ok(game.get_bool(flag).unwrap_or(false))
    }

    async fn set_game_flag(&self, game_id: Uuid, flag: &str) -> MongoResult<()> {
        self.games()
            .await
            .update_one(
                doc! { "_id": game_id.to_string() },
                doc! { "$set": { flag: true } },
            )
            .await
            .map_err(|source| MongoDaoError::WriteGame {
                id: game_id,
                source,
            })?;
        Ok(())
    }

    /// Whether `user_id` exists, and if so whether `marker` already lists `game_id`.
    async fn user_marker(&self, user_id: Uuid, marker: &str, game_id: Uuid) -> MongoResult<Option<bool>> {
        let user = self
            .users()
            .await
            .find_one(doc! { "_id": user_id.to_string() })
            .await
            .map_err(|source| MongoDaoError::LoadBalance {
                id: user_id,
                source,
            })?;
        let Some(user) = user else {
            return Ok(None);
        };
        let game = game_id.to_string();
        let marked = user.get_array(marker).is_ok_and(|games| {
            games
                .iter()
                .any(|entry| entry.as_str() == Some(game.as_str()))
        });
        Ok(Some(marked))
    }

    async fn set_status(
        &self,
        game_id: Uuid,
        status: GameStatusEntity,
        winner_id: Option<Uuid>,
    ) -> MongoResult<()> {
        let mut update = doc! { "status": status.as_str() };
        if let Some(winner) = winner_id {
            update.insert("winnerId", winner.to_string());
        }
        let result = self
            .games()
            .await
            .update_one(doc! { "_id": game_id.to_string() }, doc! { "$set": update })
            .await
            .map_err(|source| MongoDaoError::WriteGame {
                id: game_id,
                source,
            })?;
        if result.matched_count == 0 {
            return Err(MongoDaoError::MissingGame(game_id));
        }
        Ok(())
    }
}

impl MongoDurableStore {
    /// Connect to MongoDB and make sure the participant index exists.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) = open_database(&config).await?;
        let store = Self {
            inner: Arc::new(MongoInner {
                state: RwLock::new(MongoState { client, database }),
                config,
            }),
        };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let index = IndexModel::builder()
            .keys(doc! { "gameId": 1, "userId": 1 })
            .options(
                IndexOptions::builder()
                    .name(Some("participant_game_user_idx".to_owned()))
                    .unique(Some(true))
                    .build(),
            )
            .build();

        self.inner
            .participants()
            .await
            .create_index(index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: PARTICIPANT_COLLECTION_NAME,
                index: "gameId,userId",
                source,
            })?;
        Ok(())
    }
}

impl DurableStore for MongoDurableStore {
    fn find_game_type(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameTypeEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let collection = inner
                .database()
                .await
                .collection::<MongoGameTypeDocument>(GAME_TYPE_COLLECTION_NAME);
            let document = collection
                .find_one(doc! { "_id": id.to_string() })
                .await
                .map_err(|source| MongoDaoError::LoadGameType { id, source })?;
            let entity = document.map(GameTypeEntity::try_from).transpose()?;
            Ok(entity)
        })
    }

    fn find_balance(&self, user_id: Uuid) -> BoxFuture<'static, StorageResult<Option<i64>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let collection = inner
                .database()
                .await
                .collection::<MongoUserBalanceDocument>(USER_COLLECTION_NAME);
            let document = collection
                .find_one(doc! { "_id": user_id.to_string() })
                .await
                .map_err(|source| MongoDaoError::LoadBalance {
                    id: user_id,
                    source,
                })?;
            Ok(document.map(|user| user.balance))
        })
    }

    fn insert_game(&self, game: GameEntity) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let id = game.id;
            let document = MongoGameDocument::from(game);
            let on_insert = doc! {
                "gameTypeId": document.game_type_id,
                "maxPlayers": document.max_players,
                "entryFee": document.entry_fee,
                "prize": document.prize,
                "status": document.status,
                "entriesCollected": document.entries_collected,
                "paidOut": document.paid_out,
            };
            inner
                .games()
                .await
                .update_one(
                    doc! { "_id": document.id },
                    doc! { "$setOnInsert": on_insert },
                )
                .upsert(true)
                .await
                .map_err(|source| MongoDaoError::WriteGame { id, source })?;
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
            if !inner.game_exists(game_id).await? {
                return Err(MongoDaoError::MissingGame(game_id).into());
            }
            let key = doc! { "gameId": game_id.to_string(), "userId": user_id.to_string() };
            inner
                .participants()
                .await
                .update_one(key.clone(), doc! { "$setOnInsert": key })
                .upsert(true)
                .await
                .map_err(|source| MongoDaoError::WriteParticipant {
                    game_id,
                    user_id,
                    source,
                })?;
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
            inner
                .participants()
                .await
                .delete_one(doc! { "gameId": game_id.to_string(), "userId": user_id.to_string() })
                .await
                .map_err(|source| MongoDaoError::WriteParticipant {
                    game_id,
                    user_id,
                    source,
                })?;
            Ok(())
        })
    }

    fn mark_game_ongoing(&self, game_id: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner
                .set_status(game_id, GameStatusEntity::Ongoing, None)
                .await?;
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
            if inner.game_flag(game_id, "entriesCollected").await? {
                return Ok(LedgerOutcome::AlreadyApplied);
            }

            let users = inner.users().await;
            let mut debited = Vec::with_capacity(user_ids.len());
            for user_id in user_ids {
                let result = users
                    .update_one(
                        debit_filter(user_id, game_id, entry_fee),
                        debit_update(game_id, entry_fee),
                    )
                    .await
                    .map_err(|source| MongoDaoError::WriteBalance {
                        id: user_id,
                        source,
                    })?;
                if result.matched_count == 1 {
                    debited.push(user_id);
                    continue;
                }
                match inner.user_marker(user_id, ENTRY_DEBITS, game_id).await? {
                    // Debited by an earlier delivery of this task.
                    Some(true) => debited.push(user_id),
                    Some(false) => {
                        warn!(%game_id, %user_id, entry_fee, "balance does not cover the entry fee");
                    }
                    None => warn!(%game_id, %user_id, "entry fee owed by an unknown user"),
                }
            }

            inner.set_game_flag(game_id, "entriesCollected").await?;
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
            inner
                .set_status(game_id, GameStatusEntity::Completed, winner_id)
                .await?;
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
            if inner.game_flag(game_id, "paidOut").await? {
                return Ok(LedgerOutcome::AlreadyApplied);
            }

            let result = inner
                .users()
                .await
                .update_one(credit_filter(user_id, game_id), credit_update(game_id, amount))
                .await
                .map_err(|source| MongoDaoError::WriteBalance {
                    id: user_id,
                    source,
                })?;
            if result.matched_count == 0
                && inner
                    .user_marker(user_id, PRIZE_CREDITS, game_id)
                    .await?
                    .is_none()
            {
                return Err(MongoDaoError::MissingUser(user_id).into());
            }

            inner.set_game_flag(game_id, "paidOut").await?;
            Ok(LedgerOutcome::Applied(()))
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            if let Err(err) = inner.ping().await {
                warn!(error = %err, "MongoDB health check failed; reconnecting");
                inner.reconnect().await?;
                inner.ping().await?;
            }
            Ok(())
        })
    }
}
