use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::validation::validate_public_key;
use crate::state::game::Game;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
/// Payload of `add-user`: binds the connection to a player.
pub struct AddUserPayload {
    pub user_id: Uuid,
    #[validate(custom(function = "validate_public_key"))]
    pub public_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JoinRandomGamePayload {
    pub game_type_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Payload shared by `update-board` and `game-over`.
pub struct GameActionPayload {
    pub game_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
/// Messages accepted from player WebSocket clients.
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    AddUser(AddUserPayload),
    JoinRandomGame(JoinRandomGamePayload),
    UpdateBoard(GameActionPayload),
    GameOver(GameActionPayload),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// One line of the scoreboard sent to players.
pub struct PlayerScore {
    pub user_id: Uuid,
    pub is_alive: bool,
    pub points: i64,
}

impl PlayerScore {
    /// Scoreboard of `game` in roster order.
    pub fn board(game: &Game) -> Vec<Self> {
        game.scoreboard
            .iter()
            .map(|(user_id, score)| Self {
                user_id: *user_id,
                is_alive: score.is_alive,
                points: score.points,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
/// Messages pushed to player WebSocket clients.
#[serde(
    tag = "type",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    /// Another player joined the game the recipient is in.
    NewUser { user_id: Uuid, game_id: Uuid },
    /// The recipient joined a game; `users` is the full roster.
    JoinGame { users: Vec<Uuid>, game_id: Uuid },
    StartGame {},
    UpdateBoard { scores: Vec<PlayerScore> },
    Winner { amount: i64 },
    Loser { amount: i64 },
    /// A staging game lost one of its players.
    UserLeft { user_id: Uuid, game_id: Uuid },
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_messages_use_type_and_data() {
        let user_id = Uuid::new_v4();
        let raw = json!({
            "type": "add-user",
            "data": { "userId": user_id, "publicKey": "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin" }
        });

        let message: ClientMessage = serde_json::from_value(raw).unwrap();
        let ClientMessage::AddUser(payload) = message else {
            panic!("expected add-user");
        };
        assert_eq!(payload.user_id, user_id);
        assert!(payload.validate().is_ok());
    }

    #[test]
    fn unknown_client_type_is_rejected() {
        let raw = json!({ "type": "dance", "data": {} });
        assert!(serde_json::from_value::<ClientMessage>(raw).is_err());
    }

    #[test]
    fn server_messages_match_the_wire_shape() {
        let game_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();

        let value = serde_json::to_value(ServerMessage::NewUser { user_id, game_id }).unwrap();
        assert_eq!(
            value,
            json!({ "type": "new-user", "data": { "userId": user_id, "gameId": game_id } })
        );

        let value = serde_json::to_value(ServerMessage::StartGame {}).unwrap();
        assert_eq!(value, json!({ "type": "start-game", "data": {} }));

        let value = serde_json::to_value(ServerMessage::Winner { amount: 8 }).unwrap();
        assert_eq!(value, json!({ "type": "winner", "data": { "amount": 8 } }));
    }

    #[test]
    fn invalid_public_key_fails_validation() {
        let payload = AddUserPayload {
            user_id: Uuid::new_v4(),
            public_key: "not a key".into(),
        };
        assert!(payload.validate().is_err());
    }
}
