//! Cross-process delivery of [`FanOutEvent`]s over broker channels.

use std::time::Duration;

use dashmap::mapref::entry::Entry;
use futures::{StreamExt, stream::BoxStream};
use tokio::{sync::watch, time::sleep};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::game_events::{self, Flow};
use crate::{dao::broker::BrokerError, dto::events::FanOutEvent, state::SharedState};

const RESUBSCRIBE_DELAY: Duration = Duration::from_millis(100);
const MAX_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

/// Publish `event` on the channel it belongs to: its game channel, or the global one.
pub async fn publish(state: &SharedState, event: &FanOutEvent) -> Result<(), BrokerError> {
    let channel = match event.game_channel() {
        Some(game_id) => game_id.to_string(),
        None => state.config().global_channel.clone(),
    };
    let payload = serde_json::to_string(event)
        .map_err(|err| BrokerError::command("PUBLISH", err))?;
    debug!(channel = %channel, payload = %payload, "publishing event");
    state.broker().publish(&channel, payload).await
}

fn decode(channel: &str, payload: &str) -> Option<FanOutEvent> {
    match serde_json::from_str(payload) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(channel, error = %err, "ignoring undecodable event");
            None
        }
    }
}

/// Wait `delay` unless shutdown comes first. Returns `false` on shutdown.
async fn back_off(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = sleep(delay) => !*shutdown.borrow(),
        _ = shutdown.changed() => false,
    }
}

/// Subscribe to `channel`, retrying with backoff. `None` once shutdown is signalled.
async fn subscribe_until_shutdown(
    state: &SharedState,
    channel: &str,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<BoxStream<'static, String>> {
    let mut delay = RESUBSCRIBE_DELAY;
    loop {
        if *shutdown.borrow() {
            return None;
        }
        match state.broker().subscribe(channel).await {
            Ok(stream) => return Some(stream),
            Err(err) => warn!(channel, error = %err, "subscribe failed; retrying"),
        }
        if !back_off(delay, shutdown).await {
            return None;
        }
        delay = (delay * 2).min(MAX_RESUBSCRIBE_DELAY);
    }
}

/// Receive lobby events until shutdown, resubscribing whenever the subscription drops.
pub async fn run_global_listener(state: SharedState) {
    let channel = state.config().global_channel.clone();
    let mut shutdown = state.shutdown_watcher();
    let mut delay = RESUBSCRIBE_DELAY;

    while let Some(mut stream) = subscribe_until_shutdown(&state, &channel, &mut shutdown).await {
        info!(channel = %channel, "listening on global channel");
        loop {
            tokio::select! {
                message = stream.next() => {
                    let Some(payload) = message else {
                        break;
                    };
                    delay = RESUBSCRIBE_DELAY;
                    if let Some(event) = decode(&channel, &payload) {
                        game_events::handle_global(&state, event).await;
                    }
                }
                _ = shutdown.changed() => return,
            }
        }
        warn!(channel = %channel, "global subscription closed; resubscribing");
        if !back_off(delay, &mut shutdown).await {
            return;
        }
        delay = (delay * 2).min(MAX_RESUBSCRIBE_DELAY);
    }
}

/// Subscribe to the channel of `game_id` unless already subscribed.
///
/// Returns once the subscription is live, so events published afterwards are
/// guaranteed to reach the listener.
pub async fn ensure_game_subscription(state: &SharedState, game_id: Uuid) -> Result<(), BrokerError> {
    if state.subscriptions().contains_key(&game_id) {
        return Ok(());
    }
    let stream = state.broker().subscribe(&game_id.to_string()).await?;

    match state.subscriptions().entry(game_id) {
        Entry::Occupied(_) => {}
        Entry::Vacant(slot) => {
            let handle = tokio::spawn(run_game_listener(state.clone(), game_id, stream));
            slot.insert(handle);
        }
    }
    Ok(())
}

async fn run_game_listener(state: SharedState, game_id: Uuid, mut stream: BoxStream<'static, String>) {
    let channel = game_id.to_string();
    let mut shutdown = state.shutdown_watcher();
    let mut delay = RESUBSCRIBE_DELAY;
    debug!(%game_id, "listening on game channel");

    loop {
        tokio::select! {
            message = stream.next() => {
                let Some(payload) = message else {
                    warn!(%game_id, "game subscription closed; resubscribing");
                    if !back_off(delay, &mut shutdown).await {
                        break;
                    }
                    delay = (delay * 2).min(MAX_RESUBSCRIBE_DELAY);
                    let Some(fresh) = subscribe_until_shutdown(&state, &channel, &mut shutdown).await else {
                        break;
                    };
                    stream = fresh;
                    // Whatever was published while unsubscribed is read back from the broker.
                    if game_events::catch_up(&state, game_id).await == Flow::Stop {
                        break;
                    }
                    continue;
                };
                delay = RESUBSCRIBE_DELAY;
                let Some(event) = decode(&channel, &payload) else {
                    continue;
                };
                if game_events::handle_game(&state, event).await == Flow::Stop {
                    break;
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    state.subscriptions().remove(&game_id);
    debug!(%game_id, "left game channel");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{broker::MemoryBroker, durable_store::MemoryDurableStore},
        state::AppState,
    };

    #[tokio::test]
    async fn events_are_published_on_their_own_channel() {
        let state = AppState::new(
            AppConfig::default(),
            Arc::new(MemoryDurableStore::new()),
            Arc::new(MemoryBroker::new()),
        );
        let (game_id, user_id) = (Uuid::new_v4(), Uuid::new_v4());
        let mut global = state
            .broker()
            .subscribe(&state.config().global_channel)
            .await
            .unwrap();
        let mut game = state.broker().subscribe(&game_id.to_string()).await.unwrap();

        let lobby = FanOutEvent::UserLeftGame { user_id, game_id };
        let in_game = FanOutEvent::StartGame { game_id };
        publish(&state, &lobby).await.unwrap();
        publish(&state, &in_game).await.unwrap();

        let received = global.next().await.unwrap();
        assert_eq!(serde_json::from_str::<FanOutEvent>(&received).unwrap(), lobby);
        let received = game.next().await.unwrap();
        assert_eq!(serde_json::from_str::<FanOutEvent>(&received).unwrap(), in_game);
    }

    #[tokio::test]
    async fn global_listener_returns_on_shutdown() {
        let state = AppState::new(
            AppConfig::default(),
            Arc::new(MemoryDurableStore::new()),
            Arc::new(MemoryBroker::new()),
        );
        let listener = tokio::spawn(run_global_listener(state.clone()));

        state.trigger_shutdown();
        tokio::time::timeout(Duration::from_secs(1), listener)
            .await
            .unwrap()
            .unwrap();
    }
}
