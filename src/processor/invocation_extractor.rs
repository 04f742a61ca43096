//! Flatten invocation trees into their leaf measurements

use super::{flush_chain, forward_to_chain, DataProcessor, RecordProcessor};
use crate::observability::metrics;
use crate::record::{InvocationRecord, MonitoringRecord, RecordKind};
use crate::storage::PendingWrite;
use tracing::trace;

/// Forwards every timer and SQL statement attached to a descendant
/// invocation to the sub-chain
///
/// The invocation nodes themselves, and the measurements attached to the
/// root, are not forwarded.
pub struct InvocationExtractorProcessor {
    chain: Vec<DataProcessor>,
}

impl InvocationExtractorProcessor {
    pub fn new(chain: Vec<DataProcessor>) -> Self {
        Self { chain }
    }

    fn leaves(invocation: &InvocationRecord) -> impl Iterator<Item = MonitoringRecord> + '_ {
        invocation.descendants().flat_map(|node| {
            let timer = node.timer.clone().map(MonitoringRecord::from);
            let statement = node.sql_statement.clone().map(MonitoringRecord::from);
            timer.into_iter().chain(statement)
        })
    }
}

impl RecordProcessor for InvocationExtractorProcessor {
    fn name(&self) -> &'static str {
        "invocation_extractor"
    }

    fn can_process(&self, record: &MonitoringRecord) -> bool {
        record.kind() == RecordKind::Invocation
    }

    fn process_data(&self, record: &MonitoringRecord) -> Vec<PendingWrite> {
        let Some(invocation) = record.as_invocation() else {
            return Vec::new();
        };

        let mut handles = Vec::new();
        let mut extracted = 0usize;
        for leaf in Self::leaves(invocation) {
            metrics().leaf_extracted();
            extracted += 1;
            handles.extend(forward_to_chain(&self.chain, &leaf));
        }

        trace!(id = invocation.identity.id, extracted, "Extracted invocation leaves");
        handles
    }

    fn flush(&self) -> Vec<PendingWrite> {
        flush_chain(&self.chain)
    }
}
