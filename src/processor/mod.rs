//! Pipeline stages
//!
//! Every stage implements [`RecordProcessor`]. A stage first decides whether
//! it wants a record at all (`can_process`), then performs its effect
//! (`process_data`). Stages that forward records own their sub-chain as a
//! `Vec<DataProcessor>`; stages that persist hold a shared [`StorageWriter`].
//!
//! Processing never blocks on storage: every write hands back a
//! [`PendingWrite`] that the caller may await or drop.

pub mod agent_filter;
pub mod data_aggregator;
pub mod data_saver;
pub mod invocation_cloner;
pub mod invocation_extractor;
pub mod time_frame;

pub use agent_filter::AgentFilterProcessor;
pub use data_aggregator::DataAggregatorProcessor;
pub use data_saver::DataSaverProcessor;
pub use invocation_cloner::InvocationClonerProcessor;
pub use invocation_extractor::InvocationExtractorProcessor;
pub use time_frame::TimeFrameProcessor;

use crate::observability::metrics;
use crate::record::MonitoringRecord;
use crate::storage::{Annotations, PendingWrite, StorageWriter};
use std::sync::Arc;
use tracing::trace;

/// Writer shared by every persisting stage of a pipeline
pub type SharedWriter = Arc<dyn StorageWriter>;

/// Contract shared by every pipeline stage
pub trait RecordProcessor: Send + Sync {
    /// Stage name for logs
    fn name(&self) -> &'static str;

    /// Whether this stage handles the record; has no side effects
    fn can_process(&self, record: &MonitoringRecord) -> bool;

    /// Perform the stage's effect on a record it accepted
    fn process_data(&self, record: &MonitoringRecord) -> Vec<PendingWrite>;

    /// Process a record, or do nothing if the stage rejects it
    fn process(&self, record: &MonitoringRecord) -> Vec<PendingWrite> {
        if !self.can_process(record) {
            trace!(
                processor = self.name(),
                kind = %record.kind(),
                "Record not handled by processor"
            );
            return Vec::new();
        }
        self.process_data(record)
    }

    /// Process records in order, collecting every write handle
    fn process_batch(&self, records: &[MonitoringRecord]) -> Vec<PendingWrite> {
        records.iter().flat_map(|record| self.process(record)).collect()
    }

    /// Push buffered state out to storage; stateless stages return nothing
    fn flush(&self) -> Vec<PendingWrite> {
        Vec::new()
    }
}

/// Closed set of pipeline stages
pub enum DataProcessor {
    DataSaver(DataSaverProcessor),
    AgentFilter(AgentFilterProcessor),
    InvocationCloner(InvocationClonerProcessor),
    InvocationExtractor(InvocationExtractorProcessor),
    TimeFrame(TimeFrameProcessor),
    DataAggregator(DataAggregatorProcessor),
}

impl DataProcessor {
    fn stage(&self) -> &dyn RecordProcessor {
        match self {
            DataProcessor::DataSaver(p) => p,
            DataProcessor::AgentFilter(p) => p,
            DataProcessor::InvocationCloner(p) => p,
            DataProcessor::InvocationExtractor(p) => p,
            DataProcessor::TimeFrame(p) => p,
            DataProcessor::DataAggregator(p) => p,
        }
    }
}

impl RecordProcessor for DataProcessor {
    fn name(&self) -> &'static str {
        self.stage().name()
    }

    fn can_process(&self, record: &MonitoringRecord) -> bool {
        self.stage().can_process(record)
    }

    fn process_data(&self, record: &MonitoringRecord) -> Vec<PendingWrite> {
        self.stage().process_data(record)
    }

    fn flush(&self) -> Vec<PendingWrite> {
        self.stage().flush()
    }
}

impl std::fmt::Debug for DataProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DataProcessor").field(&self.name()).finish()
    }
}

macro_rules! impl_from_stage {
    ($($variant:ident => $stage:ty),* $(,)?) => {
        $(
            impl From<$stage> for DataProcessor {
                fn from(stage: $stage) -> Self {
                    DataProcessor::$variant(stage)
                }
            }
        )*
    };
}

impl_from_stage! {
    DataSaver => DataSaverProcessor,
    AgentFilter => AgentFilterProcessor,
    InvocationCloner => InvocationClonerProcessor,
    InvocationExtractor => InvocationExtractorProcessor,
    TimeFrame => TimeFrameProcessor,
    DataAggregator => DataAggregatorProcessor,
}

/// Hand a record to every stage of a chain that accepts it
pub(crate) fn forward_to_chain(
    chain: &[DataProcessor],
    record: &MonitoringRecord,
) -> Vec<PendingWrite> {
    chain.iter().flat_map(|stage| stage.process(record)).collect()
}

/// Flush every stage of a chain
pub(crate) fn flush_chain(chain: &[DataProcessor]) -> Vec<PendingWrite> {
    chain.iter().flat_map(|stage| stage.flush()).collect()
}

/// Issue a plain write and count it
pub(crate) fn write_record(writer: &dyn StorageWriter, record: MonitoringRecord) -> PendingWrite {
    metrics().write_issued(false);
    writer.write(record)
}

/// Issue an annotated write and count it
pub(crate) fn write_annotated(
    writer: &dyn StorageWriter,
    record: MonitoringRecord,
    annotations: Annotations,
) -> PendingWrite {
    metrics().write_issued(true);
    writer.write_with_annotations(record, annotations)
}
