mod config;
mod error;
mod models;
pub mod store;

pub use config::MongoConfig;
pub use error::MongoDaoError;
pub use store::MongoDurableStore;

use crate::dao::storage::StorageError;

impl From<MongoDaoError> for StorageError {
    fn from(err: MongoDaoError) -> Self {
        match err {
            MongoDaoError::MissingGame(_)
            | MongoDaoError::MissingUser(_)
            | MongoDaoError::InvalidDocument { .. } => StorageError::Rejected(err.to_string()),
            other => StorageError::unavailable(other.to_string(), other),
        }
    }
}
