//! JSON-lines file backend

use super::{writes_invocation_affiliation, Annotations, StorageBackend};
use crate::error::StorageResult;
use crate::record::MonitoringRecord;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

/// Appends one JSON object per record to a file
#[derive(Debug)]
pub struct JsonLinesBackend {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonLinesBackend {
    /// Open (or create) the file for appending
    pub async fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        debug!(path = %path.display(), "Opened JSON-lines storage");
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StorageBackend for JsonLinesBackend {
    async fn persist(
        &mut self,
        record: &MonitoringRecord,
        annotations: &Annotations,
    ) -> StorageResult<()> {
        let mut line = if writes_invocation_affiliation(annotations) {
            serde_json::to_vec(record)?
        } else {
            let mut stripped = record.clone();
            stripped.strip_invocation_affiliation();
            serde_json::to_vec(&stripped)?
        };
        line.push(b'\n');

        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn sync(&mut self) -> StorageResult<()> {
        self.writer.flush().await?;
        self.writer.get_ref().sync_all().await?;
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "jsonl"
    }
}
