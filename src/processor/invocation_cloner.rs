//! Persist independent copies of invocation trees

use super::{write_record, RecordProcessor, SharedWriter};
use crate::record::{MonitoringRecord, RecordKind};
use crate::storage::PendingWrite;
use tracing::trace;

/// Writes a deep copy of every invocation tree, never the original
pub struct InvocationClonerProcessor {
    writer: SharedWriter,
}

impl InvocationClonerProcessor {
    pub fn new(writer: SharedWriter) -> Self {
        Self { writer }
    }
}

impl RecordProcessor for InvocationClonerProcessor {
    fn name(&self) -> &'static str {
        "invocation_cloner"
    }

    fn can_process(&self, record: &MonitoringRecord) -> bool {
        record.kind() == RecordKind::Invocation
    }

    fn process_data(&self, record: &MonitoringRecord) -> Vec<PendingWrite> {
        let Some(invocation) = record.as_invocation() else {
            return Vec::new();
        };
        let copy = invocation.cloned_invocation();
        trace!(
            id = copy.identity.id,
            nodes = copy.node_count(),
            "Writing invocation copy"
        );
        vec![write_record(self.writer.as_ref(), copy.into())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{InvocationRecord, RecordIdentity, TimerRecord, TimerStats};
    use crate::testing::mocks::MockStorageWriter;
    use chrono::Utc;
    use std::sync::Arc;

    fn identity(id: i64) -> RecordIdentity {
        RecordIdentity::new(Utc::now(), 1, 2, 3).with_id(id)
    }

    #[test]
    fn test_rejects_non_invocations() {
        let writer = Arc::new(MockStorageWriter::new());
        let cloner = InvocationClonerProcessor::new(writer.clone());
        let timer: MonitoringRecord =
            TimerRecord::new(identity(1), TimerStats::single(1.0, 0.0)).into();

        assert!(!cloner.can_process(&timer));
        assert!(cloner.process(&timer).is_empty());
        assert_eq!(writer.total_calls(), 0);
    }

    #[test]
    fn test_writes_equal_but_independent_copy() {
        let writer = Arc::new(MockStorageWriter::new());
        let cloner = InvocationClonerProcessor::new(writer.clone());
        let tree = InvocationRecord::new(identity(1)).with_nested(vec![
            InvocationRecord::new(identity(2))
                .with_nested(vec![InvocationRecord::new(identity(3))]),
            InvocationRecord::new(identity(4))
                .with_timer(TimerRecord::new(identity(5), TimerStats::single(2.0, 1.0))),
        ]);
        let record: MonitoringRecord = tree.into();

        assert_eq!(cloner.process(&record).len(), 1);

        let written = writer.writes();
        assert_eq!(written, vec![record.clone()]);

        let original = record.as_invocation().unwrap();
        let copy = written[0].as_invocation().unwrap();
        assert!(!std::ptr::eq(original, copy));
        assert!(!std::ptr::eq(&original.nested[0], &copy.nested[0]));
        assert_eq!(copy.node_count(), 4);
    }
}
