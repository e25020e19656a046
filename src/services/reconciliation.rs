//! Append-only log of ledger failures that need a human decision.

use std::{io, path::PathBuf};

use serde::Serialize;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::Mutex};
use tracing::error;
use uuid::Uuid;

/// One failure that was not retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationRecord {
    pub kind: String,
    pub game_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    pub reason: String,
}

impl ReconciliationRecord {
    pub fn new(kind: &str, game_id: Uuid, reason: impl Into<String>) -> Self {
        Self {
            kind: kind.to_owned(),
            game_id,
            user_id: None,
            amount: None,
            reason: reason.into(),
        }
    }

    pub fn user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn amount(mut self, amount: i64) -> Self {
        self.amount = Some(amount);
        self
    }
}

#[derive(Serialize)]
struct Line<'a> {
    timestamp: String,
    #[serde(flatten)]
    record: &'a ReconciliationRecord,
}

/// JSON-lines file receiving [`ReconciliationRecord`]s.
pub struct ReconciliationLog {
    path: PathBuf,
    write_gate: Mutex<()>,
}

impl ReconciliationLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_gate: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Log the record and append it to the file. Never fails the caller.
    pub async fn record(&self, record: ReconciliationRecord) {
        error!(
            kind = %record.kind,
            game_id = %record.game_id,
            user_id = ?record.user_id,
            amount = ?record.amount,
            reason = %record.reason,
            "ledger operation needs reconciliation"
        );
        if let Err(err) = self.append(&record).await {
            error!(path = %self.path.display(), error = %err, "failed to write reconciliation log");
        }
    }

    async fn append(&self, record: &ReconciliationRecord) -> io::Result<()> {
        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "invalid-timestamp".into());
        let mut line = serde_json::to_string(&Line { timestamp, record })?;
        line.push('\n');

        let _gate = self.write_gate.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}
