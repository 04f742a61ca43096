//! Keyed aggregation with size and time-bucket flushing
//!
//! Records of the configured kind are merged into one accumulator per
//! aggregation key and time bucket. An accumulator is written when a record
//! for its key arrives in a different bucket, when the buffer grows past its
//! element limit (everything is written), or on an explicit `flush`.
//! Buffered state is written after the buffer lock is released.

use super::{write_annotated, write_record, RecordProcessor, SharedWriter};
use crate::aggregation::{AggregationBuffer, Aggregator, FlushTrigger, FlushedAggregate};
use crate::error::PipelineResult;
use crate::observability::metrics;
use crate::record::{MonitoringRecord, RecordKind};
use crate::storage::{without_invocation_affiliation, PendingWrite};
use std::time::Duration;
use tracing::{debug, instrument};

/// Default number of accumulators held before a size flush
pub const DEFAULT_MAX_ELEMENTS: usize = 1000;

/// Default width of an aggregation bucket
pub const DEFAULT_AGGREGATION_PERIOD: Duration = Duration::from_millis(5000);

pub struct DataAggregatorProcessor {
    kind: RecordKind,
    buffer: AggregationBuffer,
    aggregator: Box<dyn Aggregator>,
    write_invocation_affiliation: bool,
    writer: SharedWriter,
}

impl DataAggregatorProcessor {
    pub fn new(
        kind: RecordKind,
        max_elements: usize,
        aggregation_period: Duration,
        aggregator: Box<dyn Aggregator>,
        write_invocation_affiliation: bool,
        writer: SharedWriter,
    ) -> PipelineResult<Self> {
        let buffer = AggregationBuffer::new(max_elements, aggregation_period)?;
        debug!(
            kind = %kind,
            aggregator = aggregator.name(),
            max_elements,
            period_ms = aggregation_period.as_millis() as u64,
            "Created aggregating processor"
        );
        Ok(Self {
            kind,
            buffer,
            aggregator,
            write_invocation_affiliation,
            writer,
        })
    }

    /// Aggregator with the default element limit and bucket width
    pub fn with_defaults(
        kind: RecordKind,
        aggregator: Box<dyn Aggregator>,
        write_invocation_affiliation: bool,
        writer: SharedWriter,
    ) -> PipelineResult<Self> {
        Self::new(
            kind,
            DEFAULT_MAX_ELEMENTS,
            DEFAULT_AGGREGATION_PERIOD,
            aggregator,
            write_invocation_affiliation,
            writer,
        )
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    /// Accumulators currently buffered
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn write_flushed(&self, flushed: Vec<FlushedAggregate>) -> Vec<PendingWrite> {
        if flushed.is_empty() {
            return Vec::new();
        }

        // One flush may mix an expired bucket with a size flush
        let mut by_trigger: Vec<(FlushTrigger, usize)> = Vec::new();
        for entry in &flushed {
            match by_trigger.last_mut() {
                Some((trigger, count)) if *trigger == entry.trigger => *count += 1,
                _ => by_trigger.push((entry.trigger, 1)),
            }
        }
        for (trigger, count) in by_trigger {
            debug!(trigger = trigger.as_str(), count, "Flushing aggregates");
            metrics().aggregates_flushed(trigger, count);
        }

        flushed
            .into_iter()
            .map(|entry| {
                let record = MonitoringRecord::from(entry.aggregate);
                if self.write_invocation_affiliation {
                    write_record(self.writer.as_ref(), record)
                } else {
                    write_annotated(
                        self.writer.as_ref(),
                        record,
                        without_invocation_affiliation(),
                    )
                }
            })
            .collect()
    }
}

impl RecordProcessor for DataAggregatorProcessor {
    fn name(&self) -> &'static str {
        "data_aggregator"
    }

    fn can_process(&self, record: &MonitoringRecord) -> bool {
        record.kind() == self.kind
    }

    fn process_data(&self, record: &MonitoringRecord) -> Vec<PendingWrite> {
        let outcome = self.buffer.offer(record, self.aggregator.as_ref());
        metrics().record_aggregated(outcome.created);
        self.write_flushed(outcome.flushed)
    }

    #[instrument(skip(self), fields(kind = %self.kind))]
    fn flush(&self) -> Vec<PendingWrite> {
        self.write_flushed(self.buffer.drain(FlushTrigger::Explicit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{SqlStatementAggregator, TimerAggregator};
    use crate::record::{
        AggregatedRecord, RecordIdentity, SqlStatementRecord, TimerRecord, TimerStats,
    };
    use crate::storage::WRITE_INVOCATION_AFFILIATION;
    use crate::testing::mocks::{CountingAggregator, MockStorageWriter};
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::Value;
    use std::sync::Arc;
    use std::thread;

    fn at(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    fn timer_at(millis: i64, method: i64) -> MonitoringRecord {
        let mut timer = TimerRecord::new(
            RecordIdentity::new(at(millis), 1, 1, method),
            TimerStats::single(4.0, 1.0),
        );
        timer.invocation_parents.insert(77);
        timer.into()
    }

    fn aggregated(record: &MonitoringRecord) -> &AggregatedRecord {
        match record {
            MonitoringRecord::Aggregated(aggregated) => aggregated,
            other => panic!("expected aggregated record, got {:?}", other.kind()),
        }
    }

    fn timer_processor(
        max_elements: usize,
        period_ms: u64,
        write_invocation_affiliation: bool,
        writer: Arc<MockStorageWriter>,
    ) -> DataAggregatorProcessor {
        DataAggregatorProcessor::new(
            RecordKind::Timer,
            max_elements,
            Duration::from_millis(period_ms),
            Box::new(TimerAggregator),
            write_invocation_affiliation,
            writer,
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_invalid_configuration() {
        let writer = Arc::new(MockStorageWriter::new());
        assert!(DataAggregatorProcessor::new(
            RecordKind::Timer,
            0,
            Duration::from_secs(1),
            Box::new(TimerAggregator),
            true,
            writer.clone(),
        )
        .is_err());
        assert!(DataAggregatorProcessor::new(
            RecordKind::Timer,
            10,
            Duration::ZERO,
            Box::new(TimerAggregator),
            true,
            writer,
        )
        .is_err());
    }

    #[test]
    fn test_defaults() {
        let writer = Arc::new(MockStorageWriter::new());
        let processor = DataAggregatorProcessor::with_defaults(
            RecordKind::Timer,
            Box::new(TimerAggregator),
            true,
            writer,
        )
        .unwrap();
        assert_eq!(processor.buffer.max_elements(), DEFAULT_MAX_ELEMENTS);
        assert_eq!(
            processor.buffer.aggregation_period(),
            DEFAULT_AGGREGATION_PERIOD
        );
    }

    #[test]
    fn test_only_configured_kind_is_accepted() {
        let writer = Arc::new(MockStorageWriter::new());
        let processor = timer_processor(10, 1000, true, writer.clone());
        let statement: MonitoringRecord = SqlStatementRecord::new(
            TimerRecord::new(RecordIdentity::new(at(0), 1, 1, 1), TimerStats::single(1.0, 0.0)),
            "SELECT 1",
        )
        .into();

        assert!(!processor.can_process(&statement));
        assert!(processor.process(&statement).is_empty());
        assert_eq!(processor.buffered(), 0);
    }

    #[test]
    fn test_same_bucket_merges_into_one_write() {
        let writer = Arc::new(MockStorageWriter::new());
        let counting = CountingAggregator::new();
        let calls = counting.calls();
        let processor = DataAggregatorProcessor::new(
            RecordKind::Timer,
            1,
            Duration::from_secs(3600),
            Box::new(counting),
            false,
            writer.clone(),
        )
        .unwrap();

        for i in 0..500 {
            assert!(processor.process(&timer_at(1_000 + i, 1)).is_empty());
        }
        assert_eq!(writer.total_calls(), 0);
        assert_eq!(calls.empty_clones(), 1);
        assert_eq!(calls.aggregations(), 500);

        assert_eq!(processor.flush().len(), 1);

        let annotated = writer.annotated_writes();
        assert_eq!(annotated.len(), 1);
        let (record, annotations) = &annotated[0];
        assert_eq!(aggregated(record).count(), 500);
        assert_eq!(
            annotations.get(WRITE_INVOCATION_AFFILIATION),
            Some(&Value::Bool(false))
        );
        assert_eq!(processor.buffered(), 0);
    }

    #[test]
    fn test_later_bucket_flushes_previous_accumulator() {
        let writer = Arc::new(MockStorageWriter::new());
        let processor = timer_processor(1, 1000, false, writer.clone());

        assert!(processor.process(&timer_at(10_000, 1)).is_empty());
        let handles = processor.process(&timer_at(12_000, 1));

        assert_eq!(handles.len(), 1);
        let annotated = writer.annotated_writes();
        assert_eq!(annotated.len(), 1);
        let (record, annotations) = &annotated[0];
        let first = aggregated(record);
        assert_eq!(first.count(), 1);
        assert_eq!(first.identity.timestamp, at(10_000));
        assert_eq!(
            annotations.get(WRITE_INVOCATION_AFFILIATION),
            Some(&Value::Bool(false))
        );

        // The second record is still buffered
        assert_eq!(processor.buffered(), 1);
        processor.flush();
        let annotated = writer.annotated_writes();
        assert_eq!(aggregated(&annotated[1].0).identity.timestamp, at(12_000));
    }

    #[test]
    fn test_size_limit_flushes_everything() {
        let writer = Arc::new(MockStorageWriter::new());
        let processor = timer_processor(2, 60_000, true, writer.clone());

        assert!(processor.process(&timer_at(0, 1)).is_empty());
        assert!(processor.process(&timer_at(0, 2)).is_empty());
        let handles = processor.process(&timer_at(0, 3));

        assert_eq!(handles.len(), 3);
        assert_eq!(writer.write_count(), 3);
        assert_eq!(processor.buffered(), 0);
    }

    #[test]
    fn test_affiliation_flag_selects_plain_write() {
        let writer = Arc::new(MockStorageWriter::new());
        let processor = timer_processor(10, 1000, true, writer.clone());

        processor.process(&timer_at(0, 1));
        processor.flush();

        assert!(writer.annotated_writes().is_empty());
        let writes = writer.writes();
        assert_eq!(writes.len(), 1);
        assert!(aggregated(&writes[0]).invocation_parents.contains(&77));
    }

    #[test]
    fn test_statements_split_by_sql_text() {
        let writer = Arc::new(MockStorageWriter::new());
        let processor = DataAggregatorProcessor::new(
            RecordKind::SqlStatement,
            100,
            Duration::from_secs(60),
            Box::new(SqlStatementAggregator),
            true,
            writer.clone(),
        )
        .unwrap();

        for sql in ["SELECT a", "SELECT b", "SELECT a"] {
            let timer = TimerRecord::new(
                RecordIdentity::new(at(500), 1, 1, 1),
                TimerStats::single(1.0, 0.0),
            );
            processor.process(&SqlStatementRecord::new(timer, sql).into());
        }

        assert_eq!(processor.buffered(), 2);
        processor.flush();
        let counts: Vec<u64> = writer
            .writes()
            .iter()
            .map(|record| aggregated(record).count())
            .collect();
        assert_eq!(counts.iter().sum::<u64>(), 3);
        assert!(counts.contains(&2));
    }

    #[test]
    fn test_concurrent_producers_lose_nothing() {
        let writer = Arc::new(MockStorageWriter::new());
        let processor = Arc::new(timer_processor(4, 60_000, true, writer.clone()));

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let processor = Arc::clone(&processor);
                thread::spawn(move || {
                    for i in 0..250 {
                        processor.process(&timer_at(1_000, (worker * 250 + i) % 6));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        processor.flush();

        let total: u64 = writer
            .writes()
            .iter()
            .map(|record| aggregated(record).count())
            .sum();
        assert_eq!(total, 2000);
    }

    #[test]
    fn test_flush_on_empty_buffer_writes_nothing() {
        let writer = Arc::new(MockStorageWriter::new());
        let processor = timer_processor(10, 1000, false, writer.clone());

        assert!(processor.flush().is_empty());
        assert_eq!(writer.total_calls(), 0);
    }
}
