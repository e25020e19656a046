//! Redis-backed broker.

use std::time::Duration;

use futures::{StreamExt, future::BoxFuture, stream::BoxStream};
use redis::{AsyncCommands, Client, RedisError, Script, aio::ConnectionManager};
use tracing::warn;

use super::{Broker, BrokerError, BrokerResult};

const CLAIM_SCRIPT: &str = r"
local item = redis.call('RPOP', KEYS[1])
if not item then
    return false
end
local entry = ARGV[1] .. '|' .. item
redis.call('LPUSH', KEYS[2], entry)
return entry
";

const REQUEUE_SCRIPT: &str = r"
if redis.call('LREM', KEYS[1], 1, ARGV[1]) == 0 then
    return 0
end
redis.call('LPUSH', KEYS[2], ARGV[2])
return 1
";

const DELETE_IF_EQ_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

fn failed(command: &'static str) -> impl FnOnce(RedisError) -> BrokerError {
    move |source| BrokerError::command(command, source)
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// [`Broker`] backed by a Redis server.
///
/// Commands share one multiplexed [`ConnectionManager`], which reconnects on its
/// own; each subscription opens a dedicated pub/sub connection.
#[derive(Clone)]
pub struct RedisBroker {
    client: Client,
    connection: ConnectionManager,
    claim: Script,
    requeue: Script,
    delete_if_eq: Script,
}

impl RedisBroker {
    /// Open the command connection to `url`.
    pub async fn connect(url: &str) -> BrokerResult<Self> {
        let client = Client::open(url).map_err(failed("OPEN"))?;
        let connection = ConnectionManager::new(client.clone())
            .await
            .map_err(failed("CONNECT"))?;
        Ok(Self {
            client,
            connection,
            claim: Script::new(CLAIM_SCRIPT),
            requeue: Script::new(REQUEUE_SCRIPT),
            delete_if_eq: Script::new(DELETE_IF_EQ_SCRIPT),
        })
    }
}

impl Broker for RedisBroker {
    fn push(&self, list: &str, value: String) -> BoxFuture<'static, BrokerResult<()>> {
        let mut conn = self.connection.clone();
        let list = list.to_owned();
        Box::pin(async move {
            let _: i64 = conn.lpush(list, value).await.map_err(failed("LPUSH"))?;
            Ok(())
        })
    }

    fn claim(
        &self,
        pending: &str,
        processing: &str,
        claimed_at_ms: u64,
    ) -> BoxFuture<'static, BrokerResult<Option<String>>> {
        let mut conn = self.connection.clone();
        let script = self.claim.clone();
        let pending = pending.to_owned();
        let processing = processing.to_owned();
        Box::pin(async move {
            let entry: Option<String> = script
                .key(pending)
                .key(processing)
                .arg(claimed_at_ms)
                .invoke_async(&mut conn)
                .await
                .map_err(failed("EVALSHA claim"))?;
            Ok(entry)
        })
    }

    fn release(&self, list: &str, entry: String) -> BoxFuture<'static, BrokerResult<bool>> {
        let mut conn = self.connection.clone();
        let list = list.to_owned();
        Box::pin(async move {
            let removed: i64 = conn.lrem(list, 1, entry).await.map_err(failed("LREM"))?;
            Ok(removed > 0)
        })
    }

    fn requeue(
        &self,
        processing: &str,
        entry: String,
        target: &str,
        item: String,
    ) -> BoxFuture<'static, BrokerResult<bool>> {
        let mut conn = self.connection.clone();
        let script = self.requeue.clone();
        let processing = processing.to_owned();
        let target = target.to_owned();
        Box::pin(async move {
            let moved: i64 = script
                .key(processing)
                .key(target)
                .arg(entry)
                .arg(item)
                .invoke_async(&mut conn)
                .await
                .map_err(failed("EVALSHA requeue"))?;
            Ok(moved == 1)
        })
    }

    fn entries(&self, list: &str) -> BoxFuture<'static, BrokerResult<Vec<String>>> {
        let mut conn = self.connection.clone();
        let list = list.to_owned();
        Box::pin(async move {
            let items: Vec<String> = conn.lrange(list, 0, -1).await.map_err(failed("LRANGE"))?;
            Ok(items)
        })
    }

    fn get(&self, key: &str) -> BoxFuture<'static, BrokerResult<Option<String>>> {
        let mut conn = self.connection.clone();
        let key = key.to_owned();
        Box::pin(async move {
            let value: Option<String> = conn.get(key).await.map_err(failed("GET"))?;
            Ok(value)
        })
    }

    fn set(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> BoxFuture<'static, BrokerResult<()>> {
        let mut conn = self.connection.clone();
        let key = key.to_owned();
        Box::pin(async move {
            match ttl {
                Some(ttl) => {
                    let _: () = conn
                        .pset_ex(key, value, ttl_millis(ttl))
                        .await
                        .map_err(failed("PSETEX"))?;
                }
                None => {
                    let _: () = conn.set(key, value).await.map_err(failed("SET"))?;
                }
            }
            Ok(())
        })
    }

    fn set_if_absent(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> BoxFuture<'static, BrokerResult<bool>> {
        let mut conn = self.connection.clone();
        let key = key.to_owned();
        Box::pin(async move {
            let reply: Option<String> = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("NX")
                .arg("PX")
                .arg(ttl_millis(ttl))
                .query_async(&mut conn)
                .await
                .map_err(failed("SET NX"))?;
            Ok(reply.is_some())
        })
    }

    fn delete(&self, key: &str) -> BoxFuture<'static, BrokerResult<()>> {
        let mut conn = self.connection.clone();
        let key = key.to_owned();
        Box::pin(async move {
            let _: i64 = conn.del(key).await.map_err(failed("DEL"))?;
            Ok(())
        })
    }

    fn delete_if_eq(&self, key: &str, value: String) -> BoxFuture<'static, BrokerResult<bool>> {
        let mut conn = self.connection.clone();
        let script = self.delete_if_eq.clone();
        let key = key.to_owned();
        Box::pin(async move {
            let deleted: i64 = script
                .key(key)
                .arg(value)
                .invoke_async(&mut conn)
                .await
                .map_err(failed("EVALSHA delete_if_eq"))?;
            Ok(deleted == 1)
        })
    }

    fn publish(&self, channel: &str, payload: String) -> BoxFuture<'static, BrokerResult<()>> {
        let mut conn = self.connection.clone();
        let channel = channel.to_owned();
        Box::pin(async move {
            let _: i64 = conn
                .publish(channel, payload)
                .await
                .map_err(failed("PUBLISH"))?;
            Ok(())
        })
    }

    fn subscribe(
        &self,
        channel: &str,
    ) -> BoxFuture<'static, BrokerResult<BoxStream<'static, String>>> {
        let client = self.client.clone();
        let channel = channel.to_owned();
        Box::pin(async move {
            let mut pubsub = client
                .get_async_pubsub()
                .await
                .map_err(failed("SUBSCRIBE"))?;
            pubsub
                .subscribe(&channel)
                .await
                .map_err(failed("SUBSCRIBE"))?;
            let stream = pubsub
                .into_on_message()
                .filter_map(move |message| {
                    let payload = match message.get_payload::<String>() {
                        Ok(payload) => Some(payload),
                        Err(err) => {
                            warn!(channel = %channel, error = %err, "dropping non-text pub/sub payload");
                            None
                        }
                    };
                    futures::future::ready(payload)
                })
                .boxed();
            Ok(stream)
        })
    }

    fn ping(&self) -> BoxFuture<'static, BrokerResult<()>> {
        let mut conn = self.connection.clone();
        Box::pin(async move {
            let _: String = redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(failed("PING"))?;
            Ok(())
        })
    }
}
