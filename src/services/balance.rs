//! Broker-side balance cache in front of the durable store.

use tracing::warn;
use uuid::Uuid;

use super::keys;
use crate::{error::ServiceError, state::SharedState};

/// Balance of `user_id`; a cache miss reads the store and refills the cache.
///
/// A broker failure falls back to the store. `None` means the user is unknown.
pub async fn current_balance(state: &SharedState, user_id: Uuid) -> Result<Option<i64>, ServiceError> {
    let key = keys::balance(user_id);
    match state.broker().get(&key).await {
        Ok(Some(raw)) => match raw.parse::<i64>() {
            Ok(balance) => return Ok(Some(balance)),
            Err(err) => warn!(%user_id, error = %err, "ignoring malformed cached balance"),
        },
        Ok(None) => {}
        Err(err) => warn!(%user_id, error = %err, "balance cache unavailable; reading store"),
    }

    let balance = state.store().find_balance(user_id).await?;
    if let Some(balance) = balance {
        let ttl = Some(state.config().balance_ttl);
        if let Err(err) = state.broker().set(&key, balance.to_string(), ttl).await {
            warn!(%user_id, error = %err, "failed to cache balance");
        }
    }
    Ok(balance)
}

/// Shift the cached balance of `user_id` by `delta`, if it is cached.
///
/// The durable store stays authoritative; a miss leaves the next read to refill it.
pub async fn adjust_cached(state: &SharedState, user_id: Uuid, delta: i64) {
    let key = keys::balance(user_id);
    let cached = match state.broker().get(&key).await {
        Ok(Some(raw)) => raw.parse::<i64>().ok(),
        Ok(None) => None,
        Err(err) => {
            warn!(%user_id, error = %err, "balance cache unavailable; skipping adjustment");
            None
        }
    };
    let Some(balance) = cached else {
        return;
    };

    let ttl = Some(state.config().balance_ttl);
    if let Err(err) = state
        .broker()
        .set(&key, (balance + delta).to_string(), ttl)
        .await
    {
        warn!(%user_id, error = %err, "failed to update cached balance");
    }
}
