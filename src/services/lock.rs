//! Cross-process mutual exclusion on top of broker keys.

use std::{sync::Arc, time::Duration};

use tracing::warn;
use uuid::Uuid;

use crate::{dao::broker::Broker, error::ServiceError, state::SharedState};

const RETRY_DELAY: Duration = Duration::from_millis(20);

/// Lock held through a `SET NX` key carrying a random token.
///
/// The key expires after `stagingLockTtlMs`, so a crashed holder never blocks
/// the resource for longer than that.
pub struct BrokerLock {
    broker: Arc<dyn Broker>,
    key: String,
    token: String,
}

impl BrokerLock {
    /// Wait for `key`, giving up with [`ServiceError::Timeout`] after the configured attempts.
    pub async fn acquire(state: &SharedState, key: String) -> Result<Self, ServiceError> {
        let token = Uuid::new_v4().to_string();
        let ttl = state.config().staging_lock_ttl;

        for _ in 0..state.config().staging_lock_attempts {
            if state
                .broker()
                .set_if_absent(&key, token.clone(), ttl)
                .await?
            {
                return Ok(Self {
                    broker: state.broker().clone(),
                    key,
                    token,
                });
            }
            tokio::time::sleep(RETRY_DELAY).await;
        }
        warn!(%key, "timed out waiting for lock");
        Err(ServiceError::Timeout)
    }

    /// Delete the key if this holder still owns it.
    pub async fn release(self) {
        match self.broker.delete_if_eq(&self.key, self.token).await {
            Ok(true) => {}
            Ok(false) => warn!(key = %self.key, "lock expired before release"),
            Err(err) => warn!(key = %self.key, error = %err, "failed to release lock"),
        }
    }
}
