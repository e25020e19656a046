use std::env;

use mongodb::options::{ClientOptions, WriteConcern};

use super::error::{MongoDaoError, MongoResult};

const DEFAULT_URI: &str = "mongodb://localhost:27017";
const DEFAULT_DATABASE: &str = "arena";
const APP_NAME: &str = "arena-back";

/// Connection settings for the ledger database.
///
/// Every write waits for a majority of the replica set and is retried once by
/// the driver after a transient network error or failover.
#[derive(Clone)]
pub struct MongoConfig {
    pub options: ClientOptions,
    pub database_name: String,
}

impl MongoConfig {
    /// Read `MONGO_URI` and `MONGO_DB`, defaulting to a local server.
    pub async fn from_env() -> MongoResult<Self> {
        let uri = env::var("MONGO_URI").unwrap_or_else(|_| DEFAULT_URI.to_owned());
        let database = env::var("MONGO_DB")
            .ok()
            .filter(|name| !name.trim().is_empty());
        Self::from_uri(&uri, database.as_deref()).await
    }

    /// Parse `uri`. The database is `db_name`, else the one named in the URI, else `arena`.
    pub async fn from_uri(uri: &str, db_name: Option<&str>) -> MongoResult<Self> {
        let mut options =
            ClientOptions::parse(uri)
                .await
                .map_err(|source| MongoDaoError::InvalidUri {
                    uri: uri.to_owned(),
                    source,
                })?;
        options.write_concern = Some(WriteConcern::majority());
        options.retry_writes = Some(true);
        if options.app_name.is_none() {
            options.app_name = Some(APP_NAME.to_owned());
        }

        let database_name = db_name
            .map(str::to_owned)
            .or_else(|| options.default_database.clone())
            .unwrap_or_else(|| DEFAULT_DATABASE.to_owned());

        Ok(Self {
            options,
            database_name,
        })
    }
}
