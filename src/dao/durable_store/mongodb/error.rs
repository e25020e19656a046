use mongodb::error::Error as MongoError;
use thiserror::Error;
use uuid::Uuid;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to load game type `{id}`")]
    LoadGameType {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to load balance of user `{id}`")]
    LoadBalance {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to write game `{id}`")]
    WriteGame {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to write participant `{user_id}` of game `{game_id}`")]
    WriteParticipant {
        game_id: Uuid,
        user_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to update balance of user `{id}`")]
    WriteBalance {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("game `{0}` does not exist")]
    MissingGame(Uuid),
    #[error("user `{0}` does not exist")]
    MissingUser(Uuid),
    #[error("invalid document `{id}` in `{collection}`: {reason}")]
    InvalidDocument {
        collection: &'static str,
        id: String,
        reason: String,
    },
}
