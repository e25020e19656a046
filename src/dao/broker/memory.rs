//! In-process broker for tests and single-node runs.

use std::{
    collections::{HashMap, VecDeque},
    future::ready,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use futures::{
    StreamExt,
    future::BoxFuture,
    stream::BoxStream,
};
use tokio::{
    sync::{Mutex, broadcast},
    time::Instant,
};
use tokio_stream::wrappers::BroadcastStream;

use super::{Broker, BrokerError, BrokerResult};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
struct Keyspace {
    lists: HashMap<String, VecDeque<String>>,
    values: HashMap<String, (String, Option<Instant>)>,
    /// Pushes still accepted per list; lists absent here are unlimited.
    push_budget: HashMap<String, usize>,
}

impl Keyspace {
    fn live_value(&mut self, key: &str) -> Option<&String> {
        let expired = matches!(
            self.values.get(key),
            Some((_, Some(deadline))) if *deadline <= Instant::now()
        );
        if expired {
            self.values.remove(key);
        }
        self.values.get(key).map(|(value, _)| value)
    }

    fn remove_entry(&mut self, list: &str, entry: &str) -> bool {
        let Some(items) = self.lists.get_mut(list) else {
            return false;
        };
        match items.iter().position(|item| item == entry) {
            Some(index) => {
                items.remove(index);
                true
            }
            None => false,
        }
    }
}

#[derive(Default)]
struct MemoryInner {
    keyspace: Mutex<Keyspace>,
    channels: DashMap<String, broadcast::Sender<String>>,
    offline: AtomicBool,
}

impl MemoryInner {
    fn ensure_online(&self) -> BrokerResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("memory broker offline".into()));
        }
        Ok(())
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .entry(channel.to_owned())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

/// [`Broker`] keeping lists, keys and channels in process memory.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<MemoryInner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every operation fails until switched back online.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Accept `allowed` more pushes to `list`, then fail every further push.
    pub async fn fail_pushes_after(&self, list: &str, allowed: usize) {
        let mut keyspace = self.inner.keyspace.lock().await;
        keyspace.push_budget.insert(list.to_owned(), allowed);
    }

    pub async fn clear_push_failures(&self) {
        self.inner.keyspace.lock().await.push_budget.clear();
    }

    /// Close every open subscription, as a dropped pub/sub connection would.
    pub fn sever_subscriptions(&self) {
        self.inner.channels.clear();
    }
}

impl Broker for MemoryBroker {
    fn push(&self, list: &str, value: String) -> BoxFuture<'static, BrokerResult<()>> {
        let inner = self.inner.clone();
        let list = list.to_owned();
        Box::pin(async move {
            inner.ensure_online()?;
            let mut keyspace = inner.keyspace.lock().await;
            if let Some(budget) = keyspace.push_budget.get_mut(&list) {
                if *budget == 0 {
                    return Err(BrokerError::Unavailable(format!("push to `{list}` refused")));
                }
                *budget -= 1;
            }
            keyspace.lists.entry(list).or_default().push_front(value);
            Ok(())
        })
    }

    fn claim(
        &self,
        pending: &str,
        processing: &str,
        claimed_at_ms: u64,
    ) -> BoxFuture<'static, BrokerResult<Option<String>>> {
        let inner = self.inner.clone();
        let pending = pending.to_owned();
        let processing = processing.to_owned();
        Box::pin(async move {
            inner.ensure_online()?;
            let mut keyspace = inner.keyspace.lock().await;
            let Some(item) = keyspace.lists.get_mut(&pending).and_then(VecDeque::pop_back) else {
                return Ok(None);
            };
            let entry = format!("{claimed_at_ms}|{item}");
            keyspace
                .lists
                .entry(processing)
                .or_default()
                .push_front(entry.clone());
            Ok(Some(entry))
        })
    }

    fn release(&self, list: &str, entry: String) -> BoxFuture<'static, BrokerResult<bool>> {
        let inner = self.inner.clone();
        let list = list.to_owned();
        Box::pin(async move {
            inner.ensure_online()?;
            Ok(inner.keyspace.lock().await.remove_entry(&list, &entry))
        })
    }

    fn requeue(
        &self,
        processing: &str,
        entry: String,
        target: &str,
        item: String,
    ) -> BoxFuture<'static, BrokerResult<bool>> {
        let inner = self.inner.clone();
        let processing = processing.to_owned();
        let target = target.to_owned();
        Box::pin(async move {
            inner.ensure_online()?;
            let mut keyspace = inner.keyspace.lock().await;
            if !keyspace.remove_entry(&processing, &entry) {
                return Ok(false);
            }
            keyspace.lists.entry(target).or_default().push_front(item);
            Ok(true)
        })
    }

    fn entries(&self, list: &str) -> BoxFuture<'static, BrokerResult<Vec<String>>> {
        let inner = self.inner.clone();
        let list = list.to_owned();
        Box::pin(async move {
            inner.ensure_online()?;
            let keyspace = inner.keyspace.lock().await;
            Ok(keyspace
                .lists
                .get(&list)
                .map(|items| items.iter().cloned().collect())
                .unwrap_or_default())
        })
    }

    fn get(&self, key: &str) -> BoxFuture<'static, BrokerResult<Option<String>>> {
        let inner = self.inner.clone();
        let key = key.to_owned();
        Box::pin(async move {
            inner.ensure_online()?;
            Ok(inner.keyspace.lock().await.live_value(&key).cloned())
        })
    }

    fn set(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> BoxFuture<'static, BrokerResult<()>> {
        let inner = self.inner.clone();
        let key = key.to_owned();
        Box::pin(async move {
            inner.ensure_online()?;
            let deadline = ttl.map(|ttl| Instant::now() + ttl);
            inner
                .keyspace
                .lock()
                .await
                .values
                .insert(key, (value, deadline));
            Ok(())
        })
    }

    fn set_if_absent(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> BoxFuture<'static, BrokerResult<bool>> {
        let inner = self.inner.clone();
        let key = key.to_owned();
        Box::pin(async move {
            inner.ensure_online()?;
            let mut keyspace = inner.keyspace.lock().await;
            if keyspace.live_value(&key).is_some() {
                return Ok(false);
            }
            keyspace
                .values
                .insert(key, (value, Some(Instant::now() + ttl)));
            Ok(true)
        })
    }

    fn delete(&self, key: &str) -> BoxFuture<'static, BrokerResult<()>> {
        let inner = self.inner.clone();
        let key = key.to_owned();
        Box::pin(async move {
            inner.ensure_online()?;
            inner.keyspace.lock().await.values.remove(&key);
            Ok(())
        })
    }

    fn delete_if_eq(&self, key: &str, value: String) -> BoxFuture<'static, BrokerResult<bool>> {
        let inner = self.inner.clone();
        let key = key.to_owned();
        Box::pin(async move {
            inner.ensure_online()?;
            let mut keyspace = inner.keyspace.lock().await;
            if keyspace.live_value(&key) != Some(&value) {
                return Ok(false);
            }
            keyspace.values.remove(&key);
            Ok(true)
        })
    }

    fn publish(&self, channel: &str, payload: String) -> BoxFuture<'static, BrokerResult<()>> {
        let inner = self.inner.clone();
        let channel = channel.to_owned();
        Box::pin(async move {
            inner.ensure_online()?;
            // No subscriber is not an error, same as a real broker.
            let _ = inner.sender(&channel).send(payload);
            Ok(())
        })
    }

    fn subscribe(
        &self,
        channel: &str,
    ) -> BoxFuture<'static, BrokerResult<BoxStream<'static, String>>> {
        let inner = self.inner.clone();
        let channel = channel.to_owned();
        Box::pin(async move {
            inner.ensure_online()?;
            let receiver = inner.sender(&channel).subscribe();
            let stream = BroadcastStream::new(receiver)
                .filter_map(|message| ready(message.ok()))
                .boxed();
            Ok(stream)
        })
    }

    fn ping(&self) -> BoxFuture<'static, BrokerResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move { inner.ensure_online() })
    }
}
