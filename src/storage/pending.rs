//! Pending-write handles

use crate::error::{StorageError, StorageResult};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::warn;

/// Handle to an in-flight persistence operation
///
/// Carries only completion or failure. Dropping it does not cancel the write.
#[derive(Debug)]
pub struct PendingWrite {
    receiver: oneshot::Receiver<StorageResult<()>>,
}

/// Writer side of a [`PendingWrite`]
#[derive(Debug)]
pub struct WriteCompletion {
    sender: oneshot::Sender<StorageResult<()>>,
}

impl PendingWrite {
    /// Create a connected completion/handle pair
    pub fn channel() -> (WriteCompletion, PendingWrite) {
        let (sender, receiver) = oneshot::channel();
        (WriteCompletion { sender }, PendingWrite { receiver })
    }

    /// Handle that is already resolved, for writers that persist synchronously
    pub fn ready(result: StorageResult<()>) -> Self {
        let (completion, pending) = Self::channel();
        completion.complete(result);
        pending
    }

    /// Outcome if the write already finished, without waiting
    pub fn try_outcome(&mut self) -> Option<StorageResult<()>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(StorageError::Abandoned)),
        }
    }
}

impl Future for PendingWrite {
    type Output = StorageResult<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(StorageError::Abandoned)))
    }
}

impl WriteCompletion {
    /// Resolve the paired handle; a dropped handle is ignored
    pub fn complete(self, result: StorageResult<()>) {
        let _ = self.sender.send(result);
    }
}

/// Outcome of waiting for a batch of writes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub succeeded: usize,
    pub failed: usize,
}

impl WriteSummary {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }

    /// Count an already-received outcome
    pub fn record(&mut self, result: &StorageResult<()>) {
        match result {
            Ok(()) => self.succeeded += 1,
            Err(e) => {
                warn!(error = %e, "Pending write failed");
                self.failed += 1;
            }
        }
    }
}

impl std::ops::AddAssign for WriteSummary {
    fn add_assign(&mut self, other: Self) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
    }
}

/// Wait for every handle and count outcomes; failures are logged, not returned
pub async fn wait_all(handles: Vec<PendingWrite>) -> WriteSummary {
    let mut summary = WriteSummary::default();
    for handle in handles {
        summary.record(&handle.await);
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ready_handle_resolves_immediately() {
        assert!(PendingWrite::ready(Ok(())).await.is_ok());
    }

    #[tokio::test]
    async fn test_completion_resolves_handle() {
        let (completion, pending) = PendingWrite::channel();
        tokio::spawn(async move {
            completion.complete(Err(StorageError::backend("rejected")));
        });

        let result = pending.await;
        assert!(matches!(result, Err(StorageError::Backend { .. })));
    }

    #[tokio::test]
    async fn test_dropped_completion_reports_abandoned() {
        let (completion, pending) = PendingWrite::channel();
        drop(completion);
        assert!(matches!(pending.await, Err(StorageError::Abandoned)));
    }

    #[test]
    fn test_try_outcome() {
        let (completion, mut pending) = PendingWrite::channel();
        assert!(pending.try_outcome().is_none());

        completion.complete(Ok(()));
        assert!(matches!(pending.try_outcome(), Some(Ok(()))));
    }

    #[tokio::test]
    async fn test_wait_all_counts_outcomes() {
        let handles = vec![
            PendingWrite::ready(Ok(())),
            PendingWrite::ready(Err(StorageError::WriterClosed)),
            PendingWrite::ready(Ok(())),
        ];

        let summary = wait_all(handles).await;
        assert_eq!(
            summary,
            WriteSummary {
                succeeded: 2,
                failed: 1
            }
        );
        assert_eq!(summary.total(), 3);
    }

    #[test]
    fn test_summaries_add_up() {
        let mut total = WriteSummary {
            succeeded: 1,
            failed: 0,
        };
        total += WriteSummary {
            succeeded: 2,
            failed: 3,
        };
        assert_eq!(
            total,
            WriteSummary {
                succeeded: 3,
                failed: 3
            }
        );
    }
}
