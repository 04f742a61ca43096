//! Record types shared by every pipeline stage

use crate::aggregation::AggregationKey;
use crate::record::InvocationRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Kind tag of a monitoring record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Timer,
    SqlStatement,
    Invocation,
    Aggregated,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Timer => "timer",
            RecordKind::SqlStatement => "sql_statement",
            RecordKind::Invocation => "invocation",
            RecordKind::Aggregated => "aggregated",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity attributes carried by every record
///
/// These never change once a record has been captured. Processors read them
/// but no stage rewrites them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordIdentity {
    #[serde(default)]
    pub id: i64,
    /// Capture time reported by the agent
    pub timestamp: DateTime<Utc>,
    /// Owning agent (platform) identifier
    pub platform_ident: i64,
    pub sensor_type_ident: i64,
    pub method_ident: i64,
}

impl RecordIdentity {
    pub fn new(
        timestamp: DateTime<Utc>,
        platform_ident: i64,
        sensor_type_ident: i64,
        method_ident: i64,
    ) -> Self {
        Self {
            id: 0,
            timestamp,
            platform_ident,
            sensor_type_ident,
            method_ident,
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = id;
        self
    }
}

/// Timing statistics of one or more measurements, in milliseconds
///
/// An empty value has `count == 0`; its min/max are meaningless until the
/// first merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimerStats {
    pub count: u64,
    pub duration: f64,
    pub min: f64,
    pub max: f64,
    #[serde(default)]
    pub cpu_duration: f64,
    #[serde(default)]
    pub cpu_min: f64,
    #[serde(default)]
    pub cpu_max: f64,
}

impl TimerStats {
    /// Statistics of a single measurement
    pub fn single(duration: f64, cpu_duration: f64) -> Self {
        Self {
            count: 1,
            duration,
            min: duration,
            max: duration,
            cpu_duration,
            cpu_min: cpu_duration,
            cpu_max: cpu_duration,
        }
    }

    /// Merge other statistics into these. Order of merges does not matter.
    pub fn merge(&mut self, other: &TimerStats) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = other.clone();
            return;
        }

        self.count += other.count;
        self.duration += other.duration;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.cpu_duration += other.cpu_duration;
        self.cpu_min = self.cpu_min.min(other.cpu_min);
        self.cpu_max = self.cpu_max.max(other.cpu_max);
    }

    pub fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.duration / self.count as f64
        }
    }
}

/// Timing measurement of one instrumented method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerRecord {
    pub identity: RecordIdentity,
    pub stats: TimerStats,
    /// Ids of invocations this measurement was captured in
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub invocation_parents: BTreeSet<i64>,
}

impl TimerRecord {
    pub fn new(identity: RecordIdentity, stats: TimerStats) -> Self {
        Self {
            identity,
            stats,
            invocation_parents: BTreeSet::new(),
        }
    }
}

/// Execution of one SQL statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlStatementRecord {
    pub timer: TimerRecord,
    pub sql: String,
    #[serde(default)]
    pub prepared: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameter_values: Vec<String>,
}

impl SqlStatementRecord {
    pub fn new(timer: TimerRecord, sql: impl Into<String>) -> Self {
        Self {
            timer,
            sql: sql.into(),
            prepared: false,
            parameter_values: Vec::new(),
        }
    }
}

/// SQL details kept on an aggregate of SQL statement records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementSummary {
    pub sql: String,
    pub prepared: bool,
}

/// Accumulator combining every record of one key within one time bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedRecord {
    /// Identity of the seeding record, timestamp set to the bucket start
    pub identity: RecordIdentity,
    pub source_kind: RecordKind,
    pub key: AggregationKey,
    pub stats: TimerStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement: Option<StatementSummary>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub invocation_parents: BTreeSet<i64>,
}

impl AggregatedRecord {
    /// Empty accumulator for the given key; nothing merged yet
    pub fn empty(identity: RecordIdentity, source_kind: RecordKind, key: AggregationKey) -> Self {
        Self {
            identity,
            source_kind,
            key,
            stats: TimerStats::default(),
            statement: None,
            invocation_parents: BTreeSet::new(),
        }
    }

    /// Number of source records merged into this accumulator
    pub fn count(&self) -> u64 {
        self.stats.count
    }
}

/// Any record that can travel through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MonitoringRecord {
    Timer(TimerRecord),
    SqlStatement(SqlStatementRecord),
    Invocation(InvocationRecord),
    Aggregated(AggregatedRecord),
}

impl MonitoringRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            MonitoringRecord::Timer(_) => RecordKind::Timer,
            MonitoringRecord::SqlStatement(_) => RecordKind::SqlStatement,
            MonitoringRecord::Invocation(_) => RecordKind::Invocation,
            MonitoringRecord::Aggregated(_) => RecordKind::Aggregated,
        }
    }

    pub fn identity(&self) -> &RecordIdentity {
        match self {
            MonitoringRecord::Timer(timer) => &timer.identity,
            MonitoringRecord::SqlStatement(statement) => &statement.timer.identity,
            MonitoringRecord::Invocation(invocation) => &invocation.identity,
            MonitoringRecord::Aggregated(aggregated) => &aggregated.identity,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.identity().timestamp
    }

    pub fn platform_ident(&self) -> i64 {
        self.identity().platform_ident
    }

    /// Timing statistics, if this kind of record carries any
    pub fn timer_stats(&self) -> Option<&TimerStats> {
        match self {
            MonitoringRecord::Timer(timer) => Some(&timer.stats),
            MonitoringRecord::SqlStatement(statement) => Some(&statement.timer.stats),
            MonitoringRecord::Aggregated(aggregated) => Some(&aggregated.stats),
            MonitoringRecord::Invocation(_) => None,
        }
    }

    /// Invocation-affiliation data carried by this record
    pub fn invocation_parents(&self) -> Option<&BTreeSet<i64>> {
        match self {
            MonitoringRecord::Timer(timer) => Some(&timer.invocation_parents),
            MonitoringRecord::SqlStatement(statement) => Some(&statement.timer.invocation_parents),
            MonitoringRecord::Aggregated(aggregated) => Some(&aggregated.invocation_parents),
            MonitoringRecord::Invocation(_) => None,
        }
    }

    /// Drop invocation-affiliation data, as requested by writers that
    /// persist without it
    pub fn strip_invocation_affiliation(&mut self) {
        match self {
            MonitoringRecord::Timer(timer) => timer.invocation_parents.clear(),
            MonitoringRecord::SqlStatement(statement) => {
                statement.timer.invocation_parents.clear()
            }
            MonitoringRecord::Aggregated(aggregated) => aggregated.invocation_parents.clear(),
            MonitoringRecord::Invocation(_) => {}
        }
    }

    pub fn as_invocation(&self) -> Option<&InvocationRecord> {
        match self {
            MonitoringRecord::Invocation(invocation) => Some(invocation),
            _ => None,
        }
    }
}

impl From<TimerRecord> for MonitoringRecord {
    fn from(record: TimerRecord) -> Self {
        MonitoringRecord::Timer(record)
    }
}

impl From<SqlStatementRecord> for MonitoringRecord {
    fn from(record: SqlStatementRecord) -> Self {
        MonitoringRecord::SqlStatement(record)
    }
}

impl From<InvocationRecord> for MonitoringRecord {
    fn from(record: InvocationRecord) -> Self {
        MonitoringRecord::Invocation(record)
    }
}

impl From<AggregatedRecord> for MonitoringRecord {
    fn from(record: AggregatedRecord) -> Self {
        MonitoringRecord::Aggregated(record)
    }
}
