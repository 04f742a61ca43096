//! Queue-backed storage writer
//!
//! Writes are pushed onto an unbounded channel so `write` never blocks the
//! producer thread. A background task drains the queue in order into a
//! [`StorageBackend`] and resolves each pending write.

use super::{Annotations, PendingWrite, StorageWriter, WriteCompletion};
use crate::error::{StorageError, StorageResult};
use crate::record::MonitoringRecord;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Engine that durably persists records
#[async_trait]
pub trait StorageBackend: Send {
    /// Persist a single record
    async fn persist(
        &mut self,
        record: &MonitoringRecord,
        annotations: &Annotations,
    ) -> StorageResult<()>;

    /// Make everything persisted so far durable; called once the queue closes
    async fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    /// Backend type for logging
    fn backend_type(&self) -> &'static str;
}

#[derive(Debug)]
struct WriteRequest {
    record: MonitoringRecord,
    annotations: Annotations,
    completion: WriteCompletion,
}

/// [`StorageWriter`] feeding a backend through a background task
#[derive(Debug, Clone)]
pub struct QueuedStorageWriter {
    sender: mpsc::UnboundedSender<WriteRequest>,
}

impl QueuedStorageWriter {
    /// Spawn the drain task on the current tokio runtime
    ///
    /// The task ends once every clone of the writer is dropped and the queue
    /// is empty; its result is the backend's final sync.
    pub fn spawn<B>(backend: B) -> (Self, JoinHandle<StorageResult<u64>>)
    where
        B: StorageBackend + 'static,
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(drain_queue(backend, receiver));
        (Self { sender }, handle)
    }

    fn enqueue(&self, record: MonitoringRecord, annotations: Annotations) -> PendingWrite {
        let (completion, pending) = PendingWrite::channel();
        let request = WriteRequest {
            record,
            annotations,
            completion,
        };

        if let Err(mpsc::error::SendError(rejected)) = self.sender.send(request) {
            warn!(
                kind = %rejected.record.kind(),
                "Storage queue closed, rejecting write"
            );
            rejected.completion.complete(Err(StorageError::WriterClosed));
        }

        pending
    }
}

impl StorageWriter for QueuedStorageWriter {
    fn write(&self, record: MonitoringRecord) -> PendingWrite {
        self.enqueue(record, Annotations::new())
    }

    fn write_with_annotations(
        &self,
        record: MonitoringRecord,
        annotations: Annotations,
    ) -> PendingWrite {
        self.enqueue(record, annotations)
    }
}

async fn drain_queue<B: StorageBackend>(
    mut backend: B,
    mut receiver: mpsc::UnboundedReceiver<WriteRequest>,
) -> StorageResult<u64> {
    info!(backend = backend.backend_type(), "Storage writer started");
    let mut persisted = 0u64;

    while let Some(request) = receiver.recv().await {
        let result = backend
            .persist(&request.record, &request.annotations)
            .await;

        match &result {
            Ok(()) => persisted += 1,
            Err(e) => warn!(
                error = %e,
                kind = %request.record.kind(),
                record_id = request.record.identity().id,
                "Failed to persist record"
            ),
        }
        request.completion.complete(result);
    }

    debug!(persisted, "Storage queue closed, syncing backend");
    backend.sync().await?;
    info!(
        backend = backend.backend_type(),
        persisted, "Storage writer stopped"
    );
    Ok(persisted)
}
