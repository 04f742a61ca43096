//! Per-agent filtering

use super::{flush_chain, forward_to_chain, DataProcessor, RecordProcessor};
use crate::observability::metrics;
use crate::record::MonitoringRecord;
use crate::storage::PendingWrite;
use std::collections::HashSet;
use tracing::trace;

/// Forwards records from allowed agents to a sub-chain, drops the rest
pub struct AgentFilterProcessor {
    agents: HashSet<i64>,
    chain: Vec<DataProcessor>,
}

impl AgentFilterProcessor {
    pub fn new(agents: HashSet<i64>, chain: Vec<DataProcessor>) -> Self {
        Self { agents, chain }
    }

    pub fn agents(&self) -> &HashSet<i64> {
        &self.agents
    }
}

impl RecordProcessor for AgentFilterProcessor {
    fn name(&self) -> &'static str {
        "agent_filter"
    }

    fn can_process(&self, _record: &MonitoringRecord) -> bool {
        true
    }

    fn process_data(&self, record: &MonitoringRecord) -> Vec<PendingWrite> {
        let agent = record.platform_ident();
        if !self.agents.contains(&agent) {
            trace!(agent, "Dropping record from filtered agent");
            metrics().record_dropped_by_agent();
            return Vec::new();
        }
        forward_to_chain(&self.chain, record)
    }

    fn flush(&self) -> Vec<PendingWrite> {
        flush_chain(&self.chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::TimerAggregator;
    use crate::processor::{DataAggregatorProcessor, DataSaverProcessor};
    use crate::record::{RecordIdentity, RecordKind, TimerRecord, TimerStats};
    use crate::testing::mocks::MockStorageWriter;
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::Duration;

    fn timer_from(agent: i64) -> MonitoringRecord {
        TimerRecord::new(
            RecordIdentity::new(Utc::now(), agent, 1, 1),
            TimerStats::single(1.0, 0.0),
        )
        .into()
    }

    fn filter(writer: Arc<MockStorageWriter>) -> AgentFilterProcessor {
        let saver = DataSaverProcessor::new(HashSet::from([RecordKind::Timer]), true, writer);
        AgentFilterProcessor::new(HashSet::from([10]), vec![saver.into()])
    }

    #[test]
    fn test_allowed_agent_is_forwarded_once() {
        let writer = Arc::new(MockStorageWriter::new());
        let filter = filter(writer.clone());
        let record = timer_from(10);

        assert!(filter.can_process(&record));
        assert_eq!(filter.process(&record).len(), 1);
        assert_eq!(writer.writes(), vec![record]);
    }

    #[test]
    fn test_other_agent_is_dropped() {
        let writer = Arc::new(MockStorageWriter::new());
        let filter = filter(writer.clone());
        let record = timer_from(20);

        assert!(filter.can_process(&record));
        assert!(filter.process(&record).is_empty());
        assert_eq!(writer.total_calls(), 0);
    }

    #[test]
    fn test_flush_reaches_sub_chain() {
        let writer = Arc::new(MockStorageWriter::new());
        let aggregator = DataAggregatorProcessor::new(
            RecordKind::Timer,
            100,
            Duration::from_secs(60),
            Box::new(TimerAggregator),
            true,
            writer.clone(),
        )
        .unwrap();
        let filter = AgentFilterProcessor::new(HashSet::from([10]), vec![aggregator.into()]);

        filter.process(&timer_from(10));
        assert_eq!(writer.total_calls(), 0);

        assert_eq!(filter.flush().len(), 1);
        assert_eq!(writer.write_count(), 1);
    }
}
