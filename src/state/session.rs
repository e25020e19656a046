use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;
use uuid::Uuid;

use crate::dto::ws::ServerMessage;

/// Live connection of a player on this process.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub public_key: String,
    pub current_game_id: Option<Uuid>,
    /// Identifies the socket that registered the session.
    pub connection_id: Uuid,
    pub tx: mpsc::Sender<ServerMessage>,
}

/// Per-process registry of connected players keyed by player id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<Uuid, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `id` to a connection, replacing (and returning) any previous binding.
    pub fn register(
        &self,
        id: Uuid,
        public_key: String,
        connection_id: Uuid,
        tx: mpsc::Sender<ServerMessage>,
    ) -> Option<Session> {
        self.sessions.insert(
            id,
            Session {
                id,
                public_key,
                current_game_id: None,
                connection_id,
                tx,
            },
        )
    }

    pub fn lookup(&self, id: Uuid) -> Option<Session> {
        self.sessions.get(&id).map(|entry| entry.value().clone())
    }

    pub fn is_local(&self, id: Uuid) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Remove the session only if it still belongs to `connection_id`.
    ///
    /// A player reconnecting on a new socket replaces the session, and the old
    /// socket closing afterwards must not drop the new one.
    pub fn unregister_connection(&self, id: Uuid, connection_id: Uuid) -> Option<Session> {
        self.sessions
            .remove_if(&id, |_, session| session.connection_id == connection_id)
            .map(|(_, session)| session)
    }

    /// Returns `false` when the player is not connected here.
    pub fn set_current_game(&self, id: Uuid, game_id: Option<Uuid>) -> bool {
        match self.sessions.get_mut(&id) {
            Some(mut session) => {
                session.current_game_id = game_id;
                true
            }
            None => false,
        }
    }

    /// Clear the current game of `id` if it is still `game_id`.
    pub fn leave_game(&self, id: Uuid, game_id: Uuid) {
        if let Some(mut session) = self.sessions.get_mut(&id) {
            if session.current_game_id == Some(game_id) {
                session.current_game_id = None;
            }
        }
    }

    /// Players of `players` that are connected to this process.
    pub fn local_members(&self, players: &[Uuid]) -> Vec<Uuid> {
        players
            .iter()
            .copied()
            .filter(|player| self.sessions.contains_key(player))
            .collect()
    }

    /// Players of `players` connected here whose current game is `game_id`.
    pub fn members_in_game(&self, players: &[Uuid], game_id: Uuid) -> Vec<Uuid> {
        players
            .iter()
            .copied()
            .filter(|player| {
                self.sessions
                    .get(player)
                    .is_some_and(|session| session.current_game_id == Some(game_id))
            })
            .collect()
    }

    /// Queue `message` on the player's outbound channel without waiting.
    ///
    /// A full channel drops the message so a slow socket never stalls the caller.
    pub fn send(&self, id: Uuid, message: ServerMessage) -> bool {
        let Some(tx) = self.sessions.get(&id).map(|session| session.tx.clone()) else {
            return false;
        };

        match tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                warn!(user_id = %id, ?message, "outbound buffer full; dropping message");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(id: Uuid, buffer: usize) -> (SessionRegistry, Uuid, mpsc::Receiver<ServerMessage>) {
        let registry = SessionRegistry::new();
        let (tx, rx) = mpsc::channel(buffer);
        let connection_id = Uuid::new_v4();
        registry.register(id, "key".into(), connection_id, tx);
        (registry, connection_id, rx)
    }

    #[tokio::test]
    async fn send_reaches_the_registered_channel() {
        let id = Uuid::new_v4();
        let (registry, _, mut rx) = registry_with(id, 4);

        assert!(registry.send(id, ServerMessage::StartGame {}));
        assert_eq!(rx.recv().await, Some(ServerMessage::StartGame {}));
        assert!(!registry.send(Uuid::new_v4(), ServerMessage::StartGame {}));
    }

    #[test]
    fn full_outbound_buffer_drops_instead_of_blocking() {
        let id = Uuid::new_v4();
        let (registry, _, _rx) = registry_with(id, 1);

        assert!(registry.send(id, ServerMessage::StartGame {}));
        assert!(!registry.send(id, ServerMessage::Winner { amount: 1 }));
    }

    #[test]
    fn stale_connection_cannot_unregister_a_newer_one() {
        let id = Uuid::new_v4();
        let (registry, old_connection, _rx) = registry_with(id, 1);
        let (tx, _rx2) = mpsc::channel(1);
        let new_connection = Uuid::new_v4();
        registry.register(id, "key".into(), new_connection, tx);

        assert!(registry.unregister_connection(id, old_connection).is_none());
        assert!(registry.is_local(id));
        assert!(registry.unregister_connection(id, new_connection).is_some());
        assert!(!registry.is_local(id));
    }

    #[test]
    fn leave_game_only_clears_the_matching_game() {
        let id = Uuid::new_v4();
        let (registry, _, _rx) = registry_with(id, 1);
        let game = Uuid::new_v4();
        registry.set_current_game(id, Some(game));

        registry.leave_game(id, Uuid::new_v4());
        assert_eq!(registry.lookup(id).unwrap().current_game_id, Some(game));

        registry.leave_game(id, game);
        assert_eq!(registry.lookup(id).unwrap().current_game_id, None);
    }
}
