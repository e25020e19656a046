//! At-least-once task queue on top of broker lists.
//!
//! Each queue owns three lists: `<name>` (pending, pushed at the head and
//! claimed from the tail), `<name>:processing` (claimed entries stored as
//! `<claimedAtMillis>|<task json>`) and `<name>:dead`.

use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, warn};
use uuid::Uuid;

use super::tasks::{QueuedTask, Task};
use crate::{
    config::AppConfig,
    dao::broker::{Broker, BrokerError},
};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("broker failure on queue `{queue}`")]
    Broker {
        queue: String,
        #[source]
        source: BrokerError,
    },
    #[error("failed to encode task")]
    Encode(#[from] serde_json::Error),
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

/// A task taken from the pending list and not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedTask {
    /// Raw processing-list entry, needed to acknowledge it.
    pub entry: String,
    pub claimed_at_ms: u64,
    pub queued: QueuedTask,
}

/// Counters reported by [`TaskQueue::retry_stalled`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub requeued: usize,
    pub dead_lettered: usize,
}

fn split_entry(entry: &str) -> Option<(u64, &str)> {
    let (claimed_at, raw) = entry.split_once('|')?;
    Some((claimed_at.parse().ok()?, raw))
}

#[derive(Clone)]
pub struct TaskQueue {
    broker: Arc<dyn Broker>,
    name: String,
    processing: String,
    dead: String,
}

impl TaskQueue {
    pub fn new(broker: Arc<dyn Broker>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            processing: AppConfig::processing_list(&name),
            dead: AppConfig::dead_list(&name),
            broker,
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn broker_error(&self, source: BrokerError) -> QueueError {
        QueueError::Broker {
            queue: self.name.clone(),
            source,
        }
    }

    /// Record `task` as pending. An error means nothing was recorded.
    pub async fn enqueue(&self, task: Task) -> Result<Uuid, QueueError> {
        let queued = QueuedTask::new(task);
        let payload = serde_json::to_string(&queued)?;
        self.broker
            .push(&self.name, payload)
            .await
            .map_err(|err| self.broker_error(err))?;
        Ok(queued.id)
    }

    /// Claim the oldest pending task without waiting.
    ///
    /// Entries that cannot be decoded are moved to the dead list and skipped.
    pub async fn try_dequeue(&self) -> Result<Option<ClaimedTask>, QueueError> {
        loop {
            let claimed_at_ms = now_millis();
            let Some(entry) = self
                .broker
                .claim(&self.name, &self.processing, claimed_at_ms)
                .await
                .map_err(|err| self.broker_error(err))?
            else {
                return Ok(None);
            };

            let decoded = split_entry(&entry)
                .map(|(_, raw)| serde_json::from_str::<QueuedTask>(raw));
            match decoded {
                Some(Ok(queued)) => {
                    return Ok(Some(ClaimedTask {
                        entry,
                        claimed_at_ms,
                        queued,
                    }));
                }
                _ => {
                    error!(queue = %self.name, entry = %entry, "undecodable task; dead-lettering");
                    self.dead_letter(entry).await?;
                }
            }
        }
    }

    /// Claim the oldest pending task, polling every `poll` until one shows up.
    ///
    /// Returns `None` once `shutdown` flips to `true`.
    pub async fn dequeue(
        &self,
        poll: Duration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<ClaimedTask>, QueueError> {
        loop {
            if *shutdown.borrow() {
                return Ok(None);
            }
            if let Some(claimed) = self.try_dequeue().await? {
                return Ok(Some(claimed));
            }
            tokio::select! {
                _ = tokio::time::sleep(poll) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Drop a claimed task for good. `false` when the entry was already gone.
    pub async fn acknowledge(&self, claimed: &ClaimedTask) -> Result<bool, QueueError> {
        self.broker
            .release(&self.processing, claimed.entry.clone())
            .await
            .map_err(|err| self.broker_error(err))
    }

    async fn dead_letter(&self, entry: String) -> Result<bool, QueueError> {
        let item = split_entry(&entry)
            .map(|(_, raw)| raw.to_owned())
            .unwrap_or_else(|| entry.clone());
        self.broker
            .requeue(&self.processing, entry, &self.dead, item)
            .await
            .map_err(|err| self.broker_error(err))
    }

    /// Move processing entries claimed more than `timeout` before `now_ms` back to pending.
    ///
    /// Every move bumps `attempts`; a task past `max_attempts` goes to the dead list.
    pub async fn retry_stalled(
        &self,
        now_ms: u64,
        timeout: Duration,
        max_attempts: u32,
    ) -> Result<SweepReport, QueueError> {
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let entries = self
            .broker
            .entries(&self.processing)
            .await
            .map_err(|err| self.broker_error(err))?;

        let mut report = SweepReport::default();
        for entry in entries {
            let Some((claimed_at, raw)) = split_entry(&entry) else {
                warn!(queue = %self.name, entry = %entry, "processing entry without claim time");
                if self.dead_letter(entry).await? {
                    report.dead_lettered += 1;
                }
                continue;
            };
            if now_ms.saturating_sub(claimed_at) <= timeout_ms {
                continue;
            }

            let retried = match serde_json::from_str::<QueuedTask>(raw) {
                Ok(queued) => queued.retried(),
                Err(err) => {
                    warn!(queue = %self.name, error = %err, "stalled entry is not a task");
                    if self.dead_letter(entry).await? {
                        report.dead_lettered += 1;
                    }
                    continue;
                }
            };
            if retried.attempts > max_attempts {
                error!(
                    queue = %self.name,
                    task_id = %retried.id,
                    kind = retried.task.kind(),
                    attempts = retried.attempts,
                    "task exceeded its delivery attempts; dead-lettering"
                );
                if self.dead_letter(entry).await? {
                    report.dead_lettered += 1;
                }
                continue;
            }

            let payload = serde_json::to_string(&retried)?;
            let moved = self
                .broker
                .requeue(&self.processing, entry, &self.name, payload)
                .await
                .map_err(|err| self.broker_error(err))?;
            if moved {
                report.requeued += 1;
            }
        }
        Ok(report)
    }

    pub async fn pending(&self) -> Result<Vec<QueuedTask>, QueueError> {
        self.decode_list(&self.name).await
    }

    pub async fn in_flight(&self) -> Result<Vec<String>, QueueError> {
        self.broker
            .entries(&self.processing)
            .await
            .map_err(|err| self.broker_error(err))
    }

    pub async fn dead_letters(&self) -> Result<Vec<String>, QueueError> {
        self.broker
            .entries(&self.dead)
            .await
            .map_err(|err| self.broker_error(err))
    }

    async fn decode_list(&self, list: &str) -> Result<Vec<QueuedTask>, QueueError> {
        let entries = self
            .broker
            .entries(list)
            .await
            .map_err(|err| self.broker_error(err))?;
        Ok(entries
            .iter()
            .rev()
            .filter_map(|entry| serde_json::from_str(entry).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::broker::MemoryBroker;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn queue() -> (MemoryBroker, TaskQueue) {
        let broker = MemoryBroker::new();
        let queue = TaskQueue::new(Arc::new(broker.clone()), "test-queue");
        (broker, queue)
    }

    fn start(game_id: Uuid) -> Task {
        Task::StartGame { game_id }
    }

    #[tokio::test]
    async fn tasks_come_out_in_enqueue_order() {
        let (_, queue) = queue();
        let (first, second) = (Uuid::new_v4(), Uuid::new_v4());
        queue.enqueue(start(first)).await.unwrap();
        queue.enqueue(start(second)).await.unwrap();

        let claimed = queue.try_dequeue().await.unwrap().unwrap();
        assert_eq!(claimed.queued.task, start(first));
        let claimed = queue.try_dequeue().await.unwrap().unwrap();
        assert_eq!(claimed.queued.task, start(second));
        assert!(queue.try_dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn acknowledged_tasks_are_never_redelivered() {
        let (_, queue) = queue();
        queue.enqueue(start(Uuid::new_v4())).await.unwrap();
        let claimed = queue.try_dequeue().await.unwrap().unwrap();

        assert!(queue.acknowledge(&claimed).await.unwrap());
        let far_future = claimed.claimed_at_ms + 3_600_000;
        let report = queue.retry_stalled(far_future, TIMEOUT, 5).await.unwrap();

        assert_eq!(report, SweepReport::default());
        assert!(queue.try_dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stalled_claims_are_redelivered_with_an_attempt_bump() {
        let (_, queue) = queue();
        let game_id = Uuid::new_v4();
        queue.enqueue(start(game_id)).await.unwrap();
        let claimed = queue.try_dequeue().await.unwrap().unwrap();

        let fresh = queue
            .retry_stalled(claimed.claimed_at_ms + 1_000, TIMEOUT, 5)
            .await
            .unwrap();
        assert_eq!(fresh.requeued, 0);

        let stale = queue
            .retry_stalled(claimed.claimed_at_ms + 11_000, TIMEOUT, 5)
            .await
            .unwrap();
        assert_eq!(stale.requeued, 1);
        assert!(queue.in_flight().await.unwrap().is_empty());

        let again = queue.try_dequeue().await.unwrap().unwrap();
        assert_eq!(again.queued.id, claimed.queued.id);
        assert_eq!(again.queued.attempts, 1);
        assert_eq!(again.queued.task, start(game_id));
    }

    #[tokio::test]
    async fn tasks_past_their_attempts_are_dead_lettered() {
        let (_, queue) = queue();
        queue.enqueue(start(Uuid::new_v4())).await.unwrap();
        let claimed = queue.try_dequeue().await.unwrap().unwrap();

        let report = queue
            .retry_stalled(claimed.claimed_at_ms + 11_000, TIMEOUT, 0)
            .await
            .unwrap();

        assert_eq!(report.dead_lettered, 1);
        assert!(queue.pending().await.unwrap().is_empty());
        assert_eq!(queue.dead_letters().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn garbage_entries_never_reach_a_worker() {
        let (broker, queue) = queue();
        broker.push("test-queue", "not json".into()).await.unwrap();
        queue.enqueue(start(Uuid::new_v4())).await.unwrap();

        let claimed = queue.try_dequeue().await.unwrap().unwrap();

        assert_eq!(claimed.queued.task.kind(), "start-game");
        assert_eq!(queue.dead_letters().await.unwrap(), vec!["not json"]);
    }

    #[tokio::test]
    async fn failed_enqueue_reports_the_queue() {
        let (broker, queue) = queue();
        broker.set_offline(true);

        let err = queue.enqueue(start(Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err, QueueError::Broker { ref queue, .. } if queue == "test-queue"));
    }

    #[tokio::test]
    async fn dequeue_returns_none_on_shutdown() {
        let (_, queue) = queue();
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move {
            queue.dequeue(Duration::from_millis(5), &mut rx).await
        });
        tx.send(true).unwrap();

        assert!(waiter.await.unwrap().unwrap().is_none());
    }
}
