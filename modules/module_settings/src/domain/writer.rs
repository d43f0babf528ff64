//! Write-through worker
//!
//! Each initialized module owns one worker task that applies backend writes
//! in submission order. Callers enqueue and return immediately; the
//! in-memory map is authoritative and a failed write is retried with
//! exponential backoff before it is counted as lost.

use crate::contract::SettingValue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::repository::{PlainStore, SecretStore};
use super::router::StorageRouter;

/// A queued backend operation
#[derive(Debug)]
pub enum WriteOp {
    Put { key: String, value: SettingValue },
    Remove { key: String },
    Clear,
    Flush(oneshot::Sender<()>),
    Shutdown,
}

impl WriteOp {
    /// Log-safe description (never includes the value)
    fn describe(&self) -> String {
        match self {
            WriteOp::Put { key, .. } => format!("put '{}'", key),
            WriteOp::Remove { key } => format!("remove '{}'", key),
            WriteOp::Clear => "clear".to_string(),
            WriteOp::Flush(_) => "flush".to_string(),
            WriteOp::Shutdown => "shutdown".to_string(),
        }
    }
}

/// Retry policy for failed backend writes
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

/// Cloneable submission handle
#[derive(Debug, Clone)]
pub struct WriteHandle {
    tx: mpsc::UnboundedSender<WriteOp>,
}

impl WriteHandle {
    /// Enqueue an operation. Returns `false` if the worker has stopped.
    pub fn submit(&self, op: WriteOp) -> bool {
        self.tx.send(op).is_ok()
    }

    /// Wait until every operation submitted before this call was applied
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(WriteOp::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

/// Owner of the worker task
pub struct WriteQueue {
    handle: WriteHandle,
    join: JoinHandle<()>,
}

impl WriteQueue {
    /// Spawn the worker on the current tokio runtime.
    /// The backends move into the task and are dropped when it stops.
    pub fn spawn(
        module_id: String,
        router: StorageRouter,
        plain: Box<dyn PlainStore>,
        secret: Box<dyn SecretStore>,
        retry: RetryPolicy,
        lost_writes: Arc<AtomicU64>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            module_id,
            router,
            plain,
            secret,
            retry,
            lost_writes,
        };
        let join = tokio::spawn(worker.run(rx));
        Self {
            handle: WriteHandle { tx },
            join,
        }
    }

    pub fn handle(&self) -> &WriteHandle {
        &self.handle
    }

    /// Drain pending writes, then stop the worker and release the backends.
    /// Handles still held elsewhere see `submit` return `false` afterwards.
    pub async fn shutdown(self) {
        let WriteQueue { handle, join } = self;
        handle.submit(WriteOp::Shutdown);
        if let Err(e) = join.await {
            tracing::error!(error = %e, "Write-through worker terminated abnormally");
        }
    }
}

struct Worker {
    module_id: String,
    router: StorageRouter,
    plain: Box<dyn PlainStore>,
    secret: Box<dyn SecretStore>,
    retry: RetryPolicy,
    lost_writes: Arc<AtomicU64>,
}

impl Worker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<WriteOp>) {
        while let Some(op) = rx.recv().await {
            match op {
                WriteOp::Flush(done) => {
                    let _ = done.send(());
                }
                WriteOp::Shutdown => break,
                op => self.apply_with_retry(op).await,
            }
        }
        tracing::debug!(module_id = %self.module_id, "Write-through worker stopped");
    }

    async fn apply_with_retry(&self, op: WriteOp) {
        let mut attempt = 0;
        let mut delay = self.retry.backoff;
        loop {
            match self.apply(&op).await {
                Ok(()) => return,
                Err(e) if attempt < self.retry.attempts => {
                    attempt += 1;
                    tracing::warn!(
                        module_id = %self.module_id,
                        op = %op.describe(),
                        attempt,
                        error = %e,
                        "Backend write failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                Err(e) => {
                    self.lost_writes.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        module_id = %self.module_id,
                        op = %op.describe(),
                        error = %e,
                        "Backend write failed; in-memory value kept"
                    );
                    return;
                }
            }
        }
    }

    async fn apply(&self, op: &WriteOp) -> anyhow::Result<()> {
        let plain = self.plain.as_ref();
        let secret = self.secret.as_ref();
        match op {
            WriteOp::Put { key, value } => self.router.put(plain, secret, key, value).await,
            WriteOp::Remove { key } => self.router.remove(plain, secret, key).await,
            WriteOp::Clear => {
                plain.clear().await?;
                secret.clear().await
            }
            WriteOp::Flush(_) | WriteOp::Shutdown => Ok(()),
        }
    }
}
