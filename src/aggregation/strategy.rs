//! Pluggable aggregation strategies

use super::AggregationKey;
use crate::error::{PipelineError, PipelineResult};
use crate::record::{AggregatedRecord, MonitoringRecord, RecordKind, StatementSummary};
use std::fmt;

/// Strategy used by the aggregating processor
///
/// `aggregate` must be order independent for records of one key, so that
/// the flushed result does not depend on arrival order.
pub trait Aggregator: Send + Sync + fmt::Debug {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Key grouping this record with others
    fn aggregation_key(&self, record: &MonitoringRecord) -> AggregationKey;

    /// Fresh accumulator for the key of this record, with nothing merged yet
    fn empty_clone(&self, record: &MonitoringRecord) -> AggregatedRecord;

    /// Merge a record into an accumulator in place
    fn aggregate(&self, aggregate: &mut AggregatedRecord, record: &MonitoringRecord);
}

/// Merge the timing statistics and invocation parents of a record
fn merge_timing(aggregate: &mut AggregatedRecord, record: &MonitoringRecord) {
    if let Some(stats) = record.timer_stats() {
        aggregate.stats.merge(stats);
    }
    if let Some(parents) = record.invocation_parents() {
        aggregate.invocation_parents.extend(parents.iter().copied());
    }
}

fn identity_key(record: &MonitoringRecord) -> AggregationKey {
    let identity = record.identity();
    AggregationKey::new(
        identity.platform_ident,
        identity.sensor_type_ident,
        identity.method_ident,
    )
}

/// Aggregates timers by agent, sensor and method
#[derive(Debug, Default, Clone)]
pub struct TimerAggregator;

impl Aggregator for TimerAggregator {
    fn name(&self) -> &str {
        "timer"
    }

    fn aggregation_key(&self, record: &MonitoringRecord) -> AggregationKey {
        identity_key(record)
    }

    fn empty_clone(&self, record: &MonitoringRecord) -> AggregatedRecord {
        AggregatedRecord::empty(
            record.identity().clone(),
            record.kind(),
            self.aggregation_key(record),
        )
    }

    fn aggregate(&self, aggregate: &mut AggregatedRecord, record: &MonitoringRecord) {
        merge_timing(aggregate, record);
    }
}

/// Aggregates SQL statements by agent, sensor, method and statement text
#[derive(Debug, Default, Clone)]
pub struct SqlStatementAggregator;

impl Aggregator for SqlStatementAggregator {
    fn name(&self) -> &str {
        "sql_statement"
    }

    fn aggregation_key(&self, record: &MonitoringRecord) -> AggregationKey {
        let key = identity_key(record);
        match record {
            MonitoringRecord::SqlStatement(statement) => {
                key.with_discriminator(statement.sql.clone())
            }
            _ => key,
        }
    }

    fn empty_clone(&self, record: &MonitoringRecord) -> AggregatedRecord {
        let mut aggregate = AggregatedRecord::empty(
            record.identity().clone(),
            record.kind(),
            self.aggregation_key(record),
        );
        if let MonitoringRecord::SqlStatement(statement) = record {
            aggregate.statement = Some(StatementSummary {
                sql: statement.sql.clone(),
                prepared: statement.prepared,
            });
        }
        aggregate
    }

    fn aggregate(&self, aggregate: &mut AggregatedRecord, record: &MonitoringRecord) {
        merge_timing(aggregate, record);
    }
}

/// Built-in strategy for a record kind
pub fn aggregator_for(kind: RecordKind) -> PipelineResult<Box<dyn Aggregator>> {
    match kind {
        RecordKind::Timer => Ok(Box::new(TimerAggregator)),
        RecordKind::SqlStatement => Ok(Box::new(SqlStatementAggregator)),
        other => Err(PipelineError::invalid_configuration(format!(
            "no aggregator available for {other} records"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RecordIdentity, SqlStatementRecord, TimerRecord, TimerStats};
    use chrono::{TimeZone, Utc};

    fn timer(method: i64, duration: f64) -> MonitoringRecord {
        let identity =
            RecordIdentity::new(Utc.timestamp_millis_opt(10_000).unwrap(), 7, 3, method);
        TimerRecord::new(identity, TimerStats::single(duration, 0.0)).into()
    }

    fn statement(sql: &str) -> MonitoringRecord {
        match timer(1, 4.0) {
            MonitoringRecord::Timer(timer) => SqlStatementRecord::new(timer, sql).into(),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_timer_key_uses_identity_fields() {
        let key = TimerAggregator.aggregation_key(&timer(42, 1.0));
        assert_eq!(key, AggregationKey::new(7, 3, 42));
        assert_ne!(key, TimerAggregator.aggregation_key(&timer(43, 1.0)));
    }

    #[test]
    fn test_timer_clone_is_empty_and_aggregate_merges() {
        let first = timer(1, 10.0);
        let mut aggregate = TimerAggregator.empty_clone(&first);
        assert_eq!(aggregate.count(), 0);
        assert_eq!(aggregate.source_kind, RecordKind::Timer);

        TimerAggregator.aggregate(&mut aggregate, &first);
        TimerAggregator.aggregate(&mut aggregate, &timer(1, 30.0));

        assert_eq!(aggregate.count(), 2);
        assert_eq!(aggregate.stats.min, 10.0);
        assert_eq!(aggregate.stats.max, 30.0);
    }

    #[test]
    fn test_aggregate_collects_invocation_parents() {
        let mut record = timer(1, 1.0);
        if let MonitoringRecord::Timer(timer) = &mut record {
            timer.invocation_parents.insert(11);
        }

        let mut aggregate = TimerAggregator.empty_clone(&record);
        TimerAggregator.aggregate(&mut aggregate, &record);
        assert!(aggregate.invocation_parents.contains(&11));
    }

    #[test]
    fn test_sql_key_distinguishes_statements() {
        let select = SqlStatementAggregator.aggregation_key(&statement("SELECT 1"));
        let update = SqlStatementAggregator.aggregation_key(&statement("UPDATE t SET a = 1"));
        assert_ne!(select, update);
        assert_eq!(select.discriminator.as_deref(), Some("SELECT 1"));
    }

    #[test]
    fn test_sql_clone_keeps_statement_summary() {
        let aggregate = SqlStatementAggregator.empty_clone(&statement("SELECT 1"));
        let summary = aggregate.statement.expect("statement summary");
        assert_eq!(summary.sql, "SELECT 1");
        assert!(!summary.prepared);
    }

    #[test]
    fn test_aggregator_for_kind() {
        assert_eq!(aggregator_for(RecordKind::Timer).unwrap().name(), "timer");
        assert_eq!(
            aggregator_for(RecordKind::SqlStatement).unwrap().name(),
            "sql_statement"
        );
        assert!(aggregator_for(RecordKind::Invocation).is_err());
    }
}
