//! Time-window gating

use super::{flush_chain, forward_to_chain, DataProcessor, RecordProcessor};
use crate::error::{PipelineError, PipelineResult};
use crate::observability::metrics;
use crate::record::MonitoringRecord;
use crate::storage::PendingWrite;
use chrono::{DateTime, Utc};
use tracing::trace;

/// Forwards records captured inside `[start, end]` to a sub-chain
pub struct TimeFrameProcessor {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    chain: Vec<DataProcessor>,
}

impl TimeFrameProcessor {
    /// Both bounds are inclusive; an inverted window is rejected
    pub fn new(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        chain: Vec<DataProcessor>,
    ) -> PipelineResult<Self> {
        if start > end {
            return Err(PipelineError::invalid_configuration(format!(
                "time frame start {start} is after end {end}"
            )));
        }
        Ok(Self { start, end, chain })
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        self.start <= timestamp && timestamp <= self.end
    }
}

impl RecordProcessor for TimeFrameProcessor {
    fn name(&self) -> &'static str {
        "time_frame"
    }

    fn can_process(&self, _record: &MonitoringRecord) -> bool {
        true
    }

    fn process_data(&self, record: &MonitoringRecord) -> Vec<PendingWrite> {
        let timestamp = record.timestamp();
        if !self.contains(timestamp) {
            trace!(%timestamp, "Dropping record outside time frame");
            metrics().record_dropped_by_time_frame();
            return Vec::new();
        }
        forward_to_chain(&self.chain, record)
    }

    fn flush(&self) -> Vec<PendingWrite> {
        flush_chain(&self.chain)
    }
}
