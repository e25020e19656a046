//! Durable work items carried by the task queues.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Side effect that must durably follow a game event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum Task {
    CreateGame {
        game_id: Uuid,
        game_type_id: Uuid,
        max_players: u32,
        entry_fee: i64,
        prize: i64,
    },
    AddParticipant { game_id: Uuid, user_id: Uuid },
    RemoveParticipant { game_id: Uuid, user_id: Uuid },
    StartGame { game_id: Uuid },
    /// Debit `entry_fee` from every listed user whose balance covers it.
    CollectEntry {
        game_id: Uuid,
        user_ids: Vec<Uuid>,
        entry_fee: i64,
    },
    EndGame { game_id: Uuid, winner_id: Uuid },
    UpdateBalance {
        game_id: Uuid,
        user_id: Uuid,
        amount: i64,
    },
    /// Deferred `join-random-game` request.
    JoinGame { user_id: Uuid, game_type_id: Uuid },
    /// Cleanup of a player who disconnected while in a game.
    DeleteUser {
        user_id: Uuid,
        game_id: Uuid,
        game_type_id: Uuid,
    },
}

impl Task {
    /// Wire name of the task, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Task::CreateGame { .. } => "create-game",
            Task::AddParticipant { .. } => "add-participant",
            Task::RemoveParticipant { .. } => "remove-participant",
            Task::StartGame { .. } => "start-game",
            Task::CollectEntry { .. } => "collect-entry",
            Task::EndGame { .. } => "end-game",
            Task::UpdateBalance { .. } => "update-balance",
            Task::JoinGame { .. } => "join-game",
            Task::DeleteUser { .. } => "delete-user",
        }
    }
}

/// Task as stored in a queue list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedTask {
    pub id: Uuid,
    /// Deliveries that already timed out.
    #[serde(default)]
    pub attempts: u32,
    pub task: Task,
}

impl QueuedTask {
    pub fn new(task: Task) -> Self {
        Self {
            id: Uuid::new_v4(),
            attempts: 0,
            task,
        }
    }

    /// Copy scheduled for another delivery.
    pub fn retried(&self) -> Self {
        Self {
            attempts: self.attempts + 1,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn task_envelope_uses_kebab_type_and_camel_fields() {
        let game_id = Uuid::new_v4();
        let value = serde_json::to_value(Task::CollectEntry {
            game_id,
            user_ids: vec![],
            entry_fee: 10,
        })
        .unwrap();

        assert_eq!(
            value,
            json!({
                "type": "collect-entry",
                "data": { "gameId": game_id, "userIds": [], "entryFee": 10 }
            })
        );
    }

    #[test]
    fn retried_copy_keeps_identity_and_counts_attempts() {
        let queued = QueuedTask::new(Task::StartGame {
            game_id: Uuid::new_v4(),
        });
        let retried = queued.retried().retried();

        assert_eq!(retried.id, queued.id);
        assert_eq!(retried.attempts, 2);
        assert_eq!(retried.task.kind(), "start-game");
    }

    #[test]
    fn missing_attempts_default_to_zero() {
        let raw = json!({
            "id": Uuid::nil(),
            "task": { "type": "start-game", "data": { "gameId": Uuid::nil() } }
        });
        let queued: QueuedTask = serde_json::from_value(raw).unwrap();
        assert_eq!(queued.attempts, 0);
    }
}
