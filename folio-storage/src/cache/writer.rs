//! Supervised background writes to the distributed tier.
//!
//! The request path hands L2 writes to a bounded queue and returns at once.
//! A single worker task drains the queue, and every failure it sees is
//! logged and counted instead of being dropped on the floor.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::stats::CacheCounters;
use crate::kv::KvStore;

#[derive(Debug)]
enum WriteJob {
    Put {
        key: String,
        value: String,
        ttl: Duration,
    },
    Delete {
        key: String,
    },
    Flush(oneshot::Sender<()>),
}

/// Handle to the L2 write worker.
///
/// Cloning the handle shares the same queue. The worker exits once every
/// handle has been dropped and the queue is drained.
#[derive(Debug, Clone)]
pub struct BackgroundWriter {
    tx: mpsc::Sender<WriteJob>,
    counters: Arc<CacheCounters>,
}

impl BackgroundWriter {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn(store: Arc<dyn KvStore>, capacity: usize, counters: Arc<CacheCounters>) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(run_worker(store, rx, Arc::clone(&counters)));
        Self { tx, counters }
    }

    /// Queue a put. Never blocks; a full queue drops the write.
    pub fn put(&self, key: String, value: String, ttl: Duration) {
        self.submit(WriteJob::Put { key, value, ttl });
    }

    /// Queue a delete. Never blocks; a full queue drops the delete.
    pub fn delete(&self, key: String) {
        self.submit(WriteJob::Delete { key });
    }

    /// Wait until every job queued before this call has been processed.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(WriteJob::Flush(done_tx)).await.is_err() {
            return;
        }
        let _ = done_rx.await;
    }

    fn submit(&self, job: WriteJob) {
        match self.tx.try_send(job) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(job)) => {
                self.counters.record_l2_write_dropped();
                warn!(job = job_label(&job), "L2 write queue full, dropping job");
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                self.counters.record_l2_write_dropped();
                warn!(job = job_label(&job), "L2 write worker stopped, dropping job");
            }
        }
    }
}

fn job_label(job: &WriteJob) -> &'static str {
    match job {
        WriteJob::Put { .. } => "put",
        WriteJob::Delete { .. } => "delete",
        WriteJob::Flush(_) => "flush",
    }
}

async fn run_worker(
    store: Arc<dyn KvStore>,
    mut rx: mpsc::Receiver<WriteJob>,
    counters: Arc<CacheCounters>,
) {
    while let Some(job) = rx.recv().await {
        match job {
            WriteJob::Put { key, value, ttl } => {
                if let Err(e) = store.put(&key, value, ttl).await {
                    counters.record_l2_write_failure();
                    warn!(key = %key, error = %e, "L2 cache put failed");
                }
            }
            WriteJob::Delete { key } => {
                if let Err(e) = store.delete(&key).await {
                    counters.record_l2_write_failure();
                    warn!(key = %key, error = %e, "L2 cache delete failed");
                }
            }
            WriteJob::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("L2 write worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{InMemoryKvStore, UnreachableKvStore};
    use folio_core::CacheError;

    #[tokio::test]
    async fn test_flush_waits_for_queued_writes() -> Result<(), CacheError> {
        let kv = Arc::new(InMemoryKvStore::new());
        let counters = Arc::new(CacheCounters::default());
        let writer = BackgroundWriter::spawn(kv.clone(), 16, counters);

        writer.put("a".to_string(), "1".to_string(), Duration::from_secs(60));
        writer.put("b".to_string(), "2".to_string(), Duration::from_secs(60));
        writer.delete("a".to_string());
        writer.flush().await;

        assert_eq!(kv.get("a").await?, None);
        assert_eq!(kv.get("b").await?, Some("2".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn test_failures_are_counted_not_raised() {
        let counters = Arc::new(CacheCounters::default());
        let writer = BackgroundWriter::spawn(Arc::new(UnreachableKvStore), 16, Arc::clone(&counters));

        writer.put("a".to_string(), "1".to_string(), Duration::from_secs(60));
        writer.delete("b".to_string());
        writer.flush().await;

        assert_eq!(counters.snapshot().l2_write_failures, 2);
    }
}
