//! Persist records of selected kinds

use super::{write_record, RecordProcessor, SharedWriter};
use crate::record::{MonitoringRecord, RecordKind};
use crate::storage::PendingWrite;
use std::collections::HashSet;
use tracing::trace;

/// Writes every accepted record as-is
///
/// With `inclusive` set, only the listed kinds are accepted; otherwise every
/// kind except the listed ones is.
pub struct DataSaverProcessor {
    kinds: HashSet<RecordKind>,
    inclusive: bool,
    writer: SharedWriter,
}

impl DataSaverProcessor {
    pub fn new(kinds: HashSet<RecordKind>, inclusive: bool, writer: SharedWriter) -> Self {
        Self {
            kinds,
            inclusive,
            writer,
        }
    }

    pub fn kinds(&self) -> &HashSet<RecordKind> {
        &self.kinds
    }

    pub fn is_inclusive(&self) -> bool {
        self.inclusive
    }
}

impl RecordProcessor for DataSaverProcessor {
    fn name(&self) -> &'static str {
        "data_saver"
    }

    fn can_process(&self, record: &MonitoringRecord) -> bool {
        self.kinds.contains(&record.kind()) == self.inclusive
    }

    fn process_data(&self, record: &MonitoringRecord) -> Vec<PendingWrite> {
        trace!(kind = %record.kind(), id = record.identity().id, "Saving record");
        vec![write_record(self.writer.as_ref(), record.clone())]
    }
}
