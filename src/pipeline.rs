//! Pipeline runtime
//!
//! [`Pipeline`] is the head of a configured chain. Producers hand it records
//! one at a time; a periodic task forces partially filled aggregation
//! buckets out so quiet keys still reach storage.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::observability::metrics;
use crate::processor::{flush_chain, forward_to_chain, DataProcessor, SharedWriter};
use crate::record::MonitoringRecord;
use crate::storage::{wait_all, PendingWrite, WriteSummary};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Outstanding handles kept before completed ones are reaped
const REAP_THRESHOLD: usize = 1024;

/// Head of a processor chain
#[derive(Debug)]
pub struct Pipeline {
    processors: Vec<DataProcessor>,
}

impl Pipeline {
    pub fn new(processors: Vec<DataProcessor>) -> Self {
        Self { processors }
    }

    /// Build the configured chain writing into `writer`
    pub fn from_config(config: &PipelineConfig, writer: SharedWriter) -> PipelineResult<Self> {
        let processors = config.build_processors(writer)?;
        info!(stages = processors.len(), "Pipeline built");
        Ok(Self::new(processors))
    }

    /// Hand a record to every head stage that accepts it
    pub fn process(&self, record: &MonitoringRecord) -> Vec<PendingWrite> {
        let _span = crate::pipeline_span!(kind = %record.kind()).entered();
        metrics().record_received();
        forward_to_chain(&self.processors, record)
    }

    pub fn process_batch(&self, records: &[MonitoringRecord]) -> Vec<PendingWrite> {
        records.iter().flat_map(|record| self.process(record)).collect()
    }

    /// Write out everything buffered anywhere in the chain
    pub fn flush(&self) -> Vec<PendingWrite> {
        let _span = crate::flush_span!(stages = self.processors.len()).entered();
        flush_chain(&self.processors)
    }

    pub fn stages(&self) -> &[DataProcessor] {
        &self.processors
    }
}

/// Flush the pipeline every `interval` until the returned task is aborted
///
/// The first flush happens one interval after spawning.
pub fn spawn_periodic_flush(pipeline: Arc<Pipeline>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let handles = pipeline.flush();
            if handles.is_empty() {
                continue;
            }
            let summary = wait_all(handles).await;
            debug!(
                succeeded = summary.succeeded,
                failed = summary.failed,
                "Periodic flush completed"
            );
        }
    })
}

/// Parse one JSON-lines input record; `line` is 1-based
pub fn parse_record_line(line: usize, text: &str) -> PipelineResult<MonitoringRecord> {
    serde_json::from_str(text).map_err(|e| PipelineError::malformed_record(line, e))
}

/// Result of feeding a JSON-lines stream through a pipeline
#[derive(Debug, Default)]
pub struct IngestReport {
    pub processed: u64,
    pub skipped: u64,
    /// Writes that finished while ingesting
    pub completed: WriteSummary,
    /// Writes still in flight
    pub pending: Vec<PendingWrite>,
}

/// Feed every record of a JSON-lines stream through the pipeline
///
/// Blank lines are ignored; malformed lines are logged and skipped.
pub async fn ingest_jsonl<R>(pipeline: &Pipeline, reader: R) -> PipelineResult<IngestReport>
where
    R: AsyncBufRead + Unpin,
{
    let mut report = IngestReport::default();
    ingest_jsonl_into(pipeline, reader, &mut report).await?;
    Ok(report)
}

/// Like [`ingest_jsonl`], accumulating into a caller-owned report
///
/// The report is updated after every line, so when the future is dropped
/// part way (e.g. on interrupt) it still holds every handle issued so far.
pub async fn ingest_jsonl_into<R>(
    pipeline: &Pipeline,
    reader: R,
    report: &mut IngestReport,
) -> PipelineResult<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut line_number = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }

        match parse_record_line(line_number, &line) {
            Ok(record) => {
                report.pending.extend(pipeline.process(&record));
                report.processed += 1;
            }
            Err(e) => {
                warn!(error = %e, "Skipping malformed record");
                report.skipped += 1;
            }
        }

        if report.pending.len() >= REAP_THRESHOLD {
            reap_completed(&mut report.pending, &mut report.completed);
        }
    }

    info!(
        processed = report.processed,
        skipped = report.skipped,
        "Input exhausted"
    );
    Ok(())
}

/// Drop handles that already resolved, counting their outcomes
fn reap_completed(pending: &mut Vec<PendingWrite>, completed: &mut WriteSummary) {
    pending.retain_mut(|handle| match handle.try_outcome() {
        Some(result) => {
            completed.record(&result);
            false
        }
        None => true,
    });
}
