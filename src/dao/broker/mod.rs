pub mod memory;
#[cfg(feature = "redis-broker")]
pub mod redis;

use std::{error::Error, time::Duration};

use futures::{future::BoxFuture, stream::BoxStream};
use thiserror::Error;

pub use self::memory::MemoryBroker;

/// Result alias for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Failure talking to the shared broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker command `{command}` failed")]
    Command {
        command: &'static str,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

impl BrokerError {
    /// Wrap a backend failure raised while running `command`.
    pub fn command(command: &'static str, source: impl Error + Send + Sync + 'static) -> Self {
        BrokerError::Command {
            command,
            source: Box::new(source),
        }
    }
}

/// Lists, expiring keys and publish/subscribe channels shared by every process.
///
/// Lists are used as queues: producers push at the head and consumers claim from
/// the tail. A claimed entry is moved to a processing list as
/// `<claimedAtMillis>|<item>` in the same atomic step, so a crash between the
/// pop and the bookkeeping can never lose the item.
pub trait Broker: Send + Sync {
    /// Push `value` at the head of `list`.
    fn push(&self, list: &str, value: String) -> BoxFuture<'static, BrokerResult<()>>;
    /// Atomically pop the tail of `pending` and push `<claimed_at_ms>|<item>` onto `processing`.
    ///
    /// Returns the processing entry, or `None` when `pending` is empty.
    fn claim(
        &self,
        pending: &str,
        processing: &str,
        claimed_at_ms: u64,
    ) -> BoxFuture<'static, BrokerResult<Option<String>>>;
    /// Remove one occurrence of `entry` from `list`; `false` when it was not there.
    fn release(&self, list: &str, entry: String) -> BoxFuture<'static, BrokerResult<bool>>;
    /// Atomically remove `entry` from `processing` and push `item` onto `target`.
    ///
    /// Nothing is pushed when `entry` was already gone.
    fn requeue(
        &self,
        processing: &str,
        entry: String,
        target: &str,
        item: String,
    ) -> BoxFuture<'static, BrokerResult<bool>>;
    /// Every entry of `list`, head first.
    fn entries(&self, list: &str) -> BoxFuture<'static, BrokerResult<Vec<String>>>;

    fn get(&self, key: &str) -> BoxFuture<'static, BrokerResult<Option<String>>>;
    fn set(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> BoxFuture<'static, BrokerResult<()>>;
    /// Set `key` only if it does not exist yet; `true` when this call created it.
    fn set_if_absent(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> BoxFuture<'static, BrokerResult<bool>>;
    fn delete(&self, key: &str) -> BoxFuture<'static, BrokerResult<()>>;
    /// Delete `key` only while it still holds `value`.
    fn delete_if_eq(&self, key: &str, value: String) -> BoxFuture<'static, BrokerResult<bool>>;

    fn publish(&self, channel: &str, payload: String) -> BoxFuture<'static, BrokerResult<()>>;
    /// Subscribe to `channel`. The subscription is active once the future resolves.
    fn subscribe(
        &self,
        channel: &str,
    ) -> BoxFuture<'static, BrokerResult<BoxStream<'static, String>>>;

    fn ping(&self) -> BoxFuture<'static, BrokerResult<()>>;
}
