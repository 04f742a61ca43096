//! Mock implementations for testing
//!
//! Provides a recording StorageWriter, a call-counting Aggregator and an
//! in-memory StorageBackend so stages can be tested without touching disk.

use crate::aggregation::{AggregationKey, Aggregator, TimerAggregator};
use crate::error::{StorageError, StorageResult};
use crate::record::{AggregatedRecord, MonitoringRecord};
use crate::storage::{Annotations, PendingWrite, StorageBackend, StorageWriter};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub type AnnotatedWrite = (MonitoringRecord, Annotations);

/// Storage writer that records every call and resolves handles immediately
#[derive(Debug, Default)]
pub struct MockStorageWriter {
    writes: Mutex<Vec<MonitoringRecord>>,
    annotated_writes: Mutex<Vec<AnnotatedWrite>>,
    should_fail: bool,
}

impl MockStorageWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writer whose handles all resolve with a backend error
    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    /// Records passed to `write`
    pub fn writes(&self) -> Vec<MonitoringRecord> {
        self.writes.lock().unwrap().clone()
    }

    /// Records and annotations passed to `write_with_annotations`
    pub fn annotated_writes(&self) -> Vec<AnnotatedWrite> {
        self.annotated_writes.lock().unwrap().clone()
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }

    /// Plain and annotated writes together
    pub fn total_calls(&self) -> usize {
        self.write_count() + self.annotated_writes.lock().unwrap().len()
    }

    pub fn clear_history(&self) {
        self.writes.lock().unwrap().clear();
        self.annotated_writes.lock().unwrap().clear();
    }

    fn outcome(&self) -> PendingWrite {
        if self.should_fail {
            PendingWrite::ready(Err(StorageError::backend("mock writer failure")))
        } else {
            PendingWrite::ready(Ok(()))
        }
    }
}

impl StorageWriter for MockStorageWriter {
    fn write(&self, record: MonitoringRecord) -> PendingWrite {
        self.writes.lock().unwrap().push(record);
        self.outcome()
    }

    fn write_with_annotations(
        &self,
        record: MonitoringRecord,
        annotations: Annotations,
    ) -> PendingWrite {
        self.annotated_writes
            .lock()
            .unwrap()
            .push((record, annotations));
        self.outcome()
    }
}

/// Call counters shared between a [`CountingAggregator`] and the test
#[derive(Debug, Default)]
pub struct AggregatorCalls {
    empty_clones: AtomicUsize,
    aggregations: AtomicUsize,
}

impl AggregatorCalls {
    pub fn empty_clones(&self) -> usize {
        self.empty_clones.load(Ordering::SeqCst)
    }

    pub fn aggregations(&self) -> usize {
        self.aggregations.load(Ordering::SeqCst)
    }
}

/// Timer aggregation that counts strategy calls
///
/// With a fixed key every record lands in the same accumulator regardless
/// of its identity.
#[derive(Debug, Default)]
pub struct CountingAggregator {
    inner: TimerAggregator,
    fixed_key: Option<AggregationKey>,
    calls: Arc<AggregatorCalls>,
}

impl CountingAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fixed_key(key: AggregationKey) -> Self {
        Self {
            fixed_key: Some(key),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Arc<AggregatorCalls> {
        Arc::clone(&self.calls)
    }
}

impl Aggregator for CountingAggregator {
    fn name(&self) -> &str {
        "counting"
    }

    fn aggregation_key(&self, record: &MonitoringRecord) -> AggregationKey {
        match &self.fixed_key {
            Some(key) => key.clone(),
            None => self.inner.aggregation_key(record),
        }
    }

    fn empty_clone(&self, record: &MonitoringRecord) -> AggregatedRecord {
        self.calls.empty_clones.fetch_add(1, Ordering::SeqCst);
        let mut aggregate = self.inner.empty_clone(record);
        aggregate.key = self.aggregation_key(record);
        aggregate
    }

    fn aggregate(&self, aggregate: &mut AggregatedRecord, record: &MonitoringRecord) {
        self.calls.aggregations.fetch_add(1, Ordering::SeqCst);
        self.inner.aggregate(aggregate, record);
    }
}

/// Backend keeping persisted records in memory
#[derive(Debug, Default)]
pub struct MemoryBackend {
    stored: Arc<Mutex<Vec<AnnotatedWrite>>>,
    should_fail: bool,
    syncs: Arc<AtomicUsize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend rejecting every record
    pub fn failing() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    /// Shared view of everything persisted so far
    pub fn stored(&self) -> Arc<Mutex<Vec<AnnotatedWrite>>> {
        Arc::clone(&self.stored)
    }

    /// Number of completed syncs
    pub fn sync_count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.syncs)
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn persist(
        &mut self,
        record: &MonitoringRecord,
        annotations: &Annotations,
    ) -> StorageResult<()> {
        if self.should_fail {
            return Err(StorageError::backend("memory backend rejected record"));
        }
        self.stored
            .lock()
            .unwrap()
            .push((record.clone(), annotations.clone()));
        Ok(())
    }

    async fn sync(&mut self) -> StorageResult<()> {
        self.syncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
