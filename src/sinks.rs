use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Fire-and-forget revenue recording. Adjustments are not transactional
/// with invoice state changes; the state flip always commits first.
#[async_trait]
pub trait RevenueLedger: Send + Sync {
    async fn credit(&self, amount: i64);
    async fn debit(&self, amount: i64);
    async fn total(&self) -> i64;
}

/// Process-local revenue counter backing the derived analytics queries.
#[derive(Default)]
pub struct InMemoryRevenueLedger {
    total: AtomicI64,
}

impl InMemoryRevenueLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RevenueLedger for InMemoryRevenueLedger {
    async fn credit(&self, amount: i64) {
        let total = self.total.fetch_add(amount, Ordering::SeqCst) + amount;
        info!(amount, total, "revenue credited");
    }

    async fn debit(&self, amount: i64) {
        let total = self.total.fetch_sub(amount, Ordering::SeqCst) - amount;
        info!(amount, total, "revenue debited");
    }

    async fn total(&self) -> i64 {
        self.total.load(Ordering::SeqCst)
    }
}

/// Grants the customer their purchased access. Invoked exactly once per
/// completed payment; the actual role-grant execution lives in the bot
/// layer behind this port.
#[async_trait]
pub trait AccessGrantor: Send + Sync {
    async fn grant_access(&self, customer_id: &str);
}

/// Default grantor that only records the grant; deployments wire the real
/// role executor here.
#[derive(Clone, Default)]
pub struct LogAccessGrantor;

#[async_trait]
impl AccessGrantor for LogAccessGrantor {
    async fn grant_access(&self, customer_id: &str) {
        info!(customer_id = %customer_id, "access granted");
    }
}

/// Append-only history sink. Terminal invoice and refund transitions are
/// recorded here because the live registries no longer retain them.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, kind: &str, payload: Value) -> Result<(), SinkError>;
}

/// Writes one JSON line per event to a local append-only file.
pub struct JsonlAuditSink {
    file: Mutex<File>,
}

impl JsonlAuditSink {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn record(&self, kind: &str, payload: Value) -> Result<(), SinkError> {
        let line = serde_json::to_string(&json!({
            "id": Uuid::new_v4(),
            "kind": kind,
            "at": Utc::now(),
            "payload": payload,
        }))?;

        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }
}

/// Discards records; used in tests and when history is disabled.
#[derive(Clone, Default)]
pub struct NullAuditSink;

#[async_trait]
impl AuditSink for NullAuditSink {
    async fn record(&self, _kind: &str, _payload: Value) -> Result<(), SinkError> {
        Ok(())
    }
}
