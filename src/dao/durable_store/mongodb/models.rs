use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{MongoDaoError, MongoResult};
use crate::dao::models::{GameEntity, GameStatusEntity, GameTypeEntity};

pub const GAME_TYPE_COLLECTION_NAME: &str = "gametypes";
pub const GAME_COLLECTION_NAME: &str = "games";
pub const PARTICIPANT_COLLECTION_NAME: &str = "participants";
pub const USER_COLLECTION_NAME: &str = "users";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MongoGameTypeDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub currency: String,
    pub max_players: i64,
    pub entry_fee: i64,
    pub prize: i64,
}

impl TryFrom<MongoGameTypeDocument> for GameTypeEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoGameTypeDocument) -> MongoResult<Self> {
        let invalid = |reason: String| MongoDaoError::InvalidDocument {
            collection: GAME_TYPE_COLLECTION_NAME,
            id: value.id.clone(),
            reason,
        };
        let id = Uuid::parse_str(&value.id).map_err(|err| invalid(err.to_string()))?;
        let max_players = u32::try_from(value.max_players)
            .ok()
            .filter(|players| *players > 0)
            .ok_or_else(|| invalid(format!("maxPlayers {} out of range", value.max_players)))?;

        Ok(Self {
            id,
            title: value.title,
            currency: value.currency,
            max_players,
            entry_fee: value.entry_fee,
            prize: value.prize,
        })
    }
}

/// Only the balance is read from user documents; every other field is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct MongoUserBalanceDocument {
    pub balance: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MongoGameDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub game_type_id: String,
    pub max_players: i64,
    pub entry_fee: i64,
    pub prize: i64,
    pub status: String,
    pub entries_collected: bool,
    pub paid_out: bool,
}

impl From<GameEntity> for MongoGameDocument {
    fn from(value: GameEntity) -> Self {
        Self {
            id: value.id.to_string(),
            game_type_id: value.game_type_id.to_string(),
            max_players: i64::from(value.max_players),
            entry_fee: value.entry_fee,
            prize: value.prize,
            status: GameStatusEntity::Staging.as_str().to_owned(),
            entries_collected: false,
            paid_out: false,
        }
    }
}
