//! Storage writer contract
//!
//! The pipeline decides what to persist and when; a [`StorageWriter`] decides
//! how. Writes return immediately with a [`PendingWrite`] that resolves once
//! the record is durable (or failed). The pipeline never waits on it.

pub mod jsonl;
pub mod pending;
pub mod queued;

pub use jsonl::JsonLinesBackend;
pub use pending::{wait_all, PendingWrite, WriteCompletion, WriteSummary};
pub use queued::{QueuedStorageWriter, StorageBackend};

use crate::record::MonitoringRecord;
use serde_json::Value;
use std::collections::HashMap;

/// Auxiliary key-value settings passed along with a write
pub type Annotations = HashMap<String, Value>;

/// Annotation telling the writer whether invocation-affiliation data
/// (the invocation parents of a measurement) is persisted
pub const WRITE_INVOCATION_AFFILIATION: &str = "write_invocation_affiliation";

/// Sink every persisting stage writes into
pub trait StorageWriter: Send + Sync {
    /// Persist a record out of line
    fn write(&self, record: MonitoringRecord) -> PendingWrite;

    /// Persist a record with writer annotations; unknown keys are passed through
    fn write_with_annotations(
        &self,
        record: MonitoringRecord,
        annotations: Annotations,
    ) -> PendingWrite;
}

/// Annotations asking the writer to skip invocation-affiliation data
pub fn without_invocation_affiliation() -> Annotations {
    Annotations::from([(WRITE_INVOCATION_AFFILIATION.to_string(), Value::Bool(false))])
}

/// Whether the annotations allow invocation-affiliation data; defaults to true
pub fn writes_invocation_affiliation(annotations: &Annotations) -> bool {
    annotations
        .get(WRITE_INVOCATION_AFFILIATION)
        .and_then(Value::as_bool)
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_affiliation_defaults_to_true() {
        assert!(writes_invocation_affiliation(&Annotations::new()));
    }

    #[test]
    fn test_affiliation_annotation_is_honored() {
        assert!(!writes_invocation_affiliation(&without_invocation_affiliation()));

        let mut annotations = Annotations::new();
        annotations.insert(WRITE_INVOCATION_AFFILIATION.to_string(), json!(true));
        annotations.insert("compression".to_string(), json!("none"));
        assert!(writes_invocation_affiliation(&annotations));
    }

    #[test]
    fn test_non_boolean_affiliation_value_falls_back_to_true() {
        let mut annotations = Annotations::new();
        annotations.insert(WRITE_INVOCATION_AFFILIATION.to_string(), json!("no"));
        assert!(writes_invocation_affiliation(&annotations));
    }
}
