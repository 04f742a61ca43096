//! Keyed aggregation buffer
//!
//! Holds at most one accumulator per aggregation key together with the
//! start of the time bucket it covers. Lookup, insert, merge and both flush
//! checks happen under one lock, so a buffer generation is evicted by exactly
//! one caller. Evicted accumulators are handed back to the caller, which
//! writes them after the lock is released.

use super::{AggregationKey, Aggregator};
use crate::error::{PipelineError, PipelineResult};
use crate::record::{AggregatedRecord, MonitoringRecord};
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Why an accumulator left the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// A record for the same key arrived in a later (or earlier) bucket
    BucketExpired,
    /// The buffer grew beyond its element limit
    SizeExceeded,
    /// Forced from outside, e.g. by a periodic scheduler or at shutdown
    Explicit,
}

impl FlushTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::BucketExpired => "bucket_expired",
            FlushTrigger::SizeExceeded => "size_exceeded",
            FlushTrigger::Explicit => "explicit",
        }
    }
}

/// Accumulator evicted from the buffer
#[derive(Debug, Clone, PartialEq)]
pub struct FlushedAggregate {
    pub aggregate: AggregatedRecord,
    pub trigger: FlushTrigger,
}

#[derive(Debug)]
struct BufferedAggregate {
    aggregate: AggregatedRecord,
    bucket_start: DateTime<Utc>,
}

/// Outcome of offering one record to the buffer
#[derive(Debug, Default)]
pub struct OfferOutcome {
    /// A new accumulator was created for the record's key
    pub created: bool,
    pub flushed: Vec<FlushedAggregate>,
}

/// Internally synchronized mapping from key to accumulator
#[derive(Debug)]
pub struct AggregationBuffer {
    entries: Mutex<HashMap<AggregationKey, BufferedAggregate>>,
    max_elements: usize,
    period_millis: i64,
}

impl AggregationBuffer {
    /// Create a buffer flushing once more than `max_elements` keys are held,
    /// with buckets `aggregation_period` wide
    pub fn new(max_elements: usize, aggregation_period: Duration) -> PipelineResult<Self> {
        if max_elements == 0 {
            return Err(PipelineError::invalid_configuration(
                "max_elements must be greater than zero",
            ));
        }

        let period_millis = i64::try_from(aggregation_period.as_millis()).map_err(|_| {
            PipelineError::invalid_configuration("aggregation period is too large")
        })?;
        if period_millis <= 0 {
            return Err(PipelineError::invalid_configuration(
                "aggregation period must be at least one millisecond",
            ));
        }

        Ok(Self {
            entries: Mutex::new(HashMap::new()),
            max_elements,
            period_millis,
        })
    }

    pub fn max_elements(&self) -> usize {
        self.max_elements
    }

    pub fn aggregation_period(&self) -> Duration {
        Duration::from_millis(self.period_millis as u64)
    }

    /// Start of the bucket a timestamp falls into
    pub fn bucket_start(&self, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        let offset = timestamp.timestamp_millis().rem_euclid(self.period_millis);
        timestamp
            .checked_sub_signed(TimeDelta::milliseconds(offset))
            .unwrap_or(timestamp)
    }

    /// Merge a record into the accumulator for its key
    ///
    /// A missing or expired accumulator is replaced by a fresh one from the
    /// strategy; an expired one is returned for writing. If the buffer then
    /// holds more than `max_elements` accumulators, all of them are returned.
    pub fn offer(&self, record: &MonitoringRecord, aggregator: &dyn Aggregator) -> OfferOutcome {
        let key = aggregator.aggregation_key(record);
        let bucket_start = self.bucket_start(record.timestamp());
        let mut outcome = OfferOutcome::default();

        let mut entries = self.lock();

        let in_bucket = entries
            .get(&key)
            .is_some_and(|current| current.bucket_start == bucket_start);

        if in_bucket {
            if let Some(current) = entries.get_mut(&key) {
                aggregator.aggregate(&mut current.aggregate, record);
            }
        } else {
            let mut aggregate = aggregator.empty_clone(record);
            aggregate.identity.timestamp = bucket_start;
            aggregator.aggregate(&mut aggregate, record);
            outcome.created = true;

            let replaced = entries.insert(
                key,
                BufferedAggregate {
                    aggregate,
                    bucket_start,
                },
            );
            if let Some(expired) = replaced {
                outcome.flushed.push(FlushedAggregate {
                    aggregate: expired.aggregate,
                    trigger: FlushTrigger::BucketExpired,
                });
            }
        }

        if entries.len() > self.max_elements {
            outcome
                .flushed
                .extend(Self::drain_sorted(&mut entries, FlushTrigger::SizeExceeded));
        }

        outcome
    }

    /// Evict every accumulator
    pub fn drain(&self, trigger: FlushTrigger) -> Vec<FlushedAggregate> {
        let mut entries = self.lock();
        Self::drain_sorted(&mut entries, trigger)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn drain_sorted(
        entries: &mut HashMap<AggregationKey, BufferedAggregate>,
        trigger: FlushTrigger,
    ) -> Vec<FlushedAggregate> {
        let mut drained: Vec<BufferedAggregate> = entries.drain().map(|(_, entry)| entry).collect();
        drained.sort_by(|a, b| {
            a.bucket_start
                .cmp(&b.bucket_start)
                .then_with(|| a.aggregate.key.cmp(&b.aggregate.key))
        });
        drained
            .into_iter()
            .map(|entry| FlushedAggregate {
                aggregate: entry.aggregate,
                trigger,
            })
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<AggregationKey, BufferedAggregate>> {
        // Recover from poisoning; the map is never left half-updated.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
