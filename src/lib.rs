//! recordflow - monitoring record processing pipeline
//!
//! Filters, reshapes, aggregates and persists a stream of performance
//! monitoring records (timers, SQL statements and nested invocation traces)
//! coming from many monitored agents.
//!
//! # Overview
//!
//! - [`record`]: record model and invocation trees
//! - [`processor`]: the stage contract and every pipeline stage
//! - [`aggregation`]: aggregation strategies and the keyed bucket buffer
//! - [`storage`]: the asynchronous writer contract and a JSON-lines backend
//! - [`pipeline`]: chain head, periodic flushing and JSON-lines ingestion
//!
//! # Quick Start
//!
//! ```rust
//! use recordflow::processor::{DataSaverProcessor, RecordProcessor};
//! use recordflow::record::{InvocationRecord, MonitoringRecord, RecordIdentity, RecordKind};
//! use recordflow::testing::MockStorageWriter;
//! use chrono::Utc;
//! use std::collections::HashSet;
//! use std::sync::Arc;
//!
//! let writer = Arc::new(MockStorageWriter::new());
//! let saver = DataSaverProcessor::new(HashSet::from([RecordKind::Invocation]), true, writer.clone());
//!
//! let record: MonitoringRecord =
//!     InvocationRecord::new(RecordIdentity::new(Utc::now(), 10, 1, 1)).into();
//! let handles = saver.process(&record);
//!
//! assert_eq!(handles.len(), 1);
//! assert_eq!(writer.write_count(), 1);
//! ```

pub mod aggregation;
pub mod config;
pub mod error;
pub mod observability;
pub mod pipeline;
pub mod processor;
pub mod record;
pub mod storage;
pub mod testing;

pub use config::{ConfigError, PipelineConfig, ProcessorConfig};
pub use error::{PipelineError, PipelineResult, StorageError, StorageResult};
pub use pipeline::{ingest_jsonl, ingest_jsonl_into, spawn_periodic_flush, Pipeline};
pub use processor::{DataProcessor, RecordProcessor};
pub use record::{MonitoringRecord, RecordKind};
pub use storage::{PendingWrite, StorageWriter};
