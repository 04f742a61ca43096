//! Pipeline configuration
//!
//! A TOML file names the storage output, the periodic flush interval and the
//! processor chain. Chains nest: filtering stages carry their own
//! `processors` array.

use crate::aggregation::aggregator_for;
use crate::error::PipelineResult;
use crate::processor::{
    AgentFilterProcessor, DataAggregatorProcessor, DataProcessor, DataSaverProcessor,
    InvocationClonerProcessor, InvocationExtractorProcessor, SharedWriter, TimeFrameProcessor,
};
use crate::processor::data_aggregator::{DEFAULT_AGGREGATION_PERIOD, DEFAULT_MAX_ELEMENTS};
use crate::record::RecordKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Top-level pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    pub storage: StorageSection,
    #[serde(default)]
    pub flush: FlushSection,
    #[serde(default)]
    pub processors: Vec<ProcessorConfig>,
}

/// Where persisted records go
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageSection {
    /// JSON-lines file records are appended to
    pub output: PathBuf,
}

/// Periodic flush of partially filled aggregation buckets
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlushSection {
    #[serde(default = "default_flush_interval")]
    pub interval_secs: u64,
}

impl Default for FlushSection {
    fn default() -> Self {
        Self {
            interval_secs: default_flush_interval(),
        }
    }
}

impl FlushSection {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn default_flush_interval() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_max_elements() -> usize {
    DEFAULT_MAX_ELEMENTS
}

fn default_aggregation_period_ms() -> u64 {
    DEFAULT_AGGREGATION_PERIOD.as_millis() as u64
}

/// One stage of a processor chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcessorConfig {
    DataSaver {
        kinds: Vec<RecordKind>,
        #[serde(default = "default_true")]
        inclusive: bool,
    },
    AgentFilter {
        agents: Vec<i64>,
        #[serde(default)]
        processors: Vec<ProcessorConfig>,
    },
    InvocationCloner,
    InvocationExtractor {
        #[serde(default)]
        processors: Vec<ProcessorConfig>,
    },
    TimeFrame {
        /// RFC 3339, inclusive
        start: DateTime<Utc>,
        /// RFC 3339, inclusive
        end: DateTime<Utc>,
        #[serde(default)]
        processors: Vec<ProcessorConfig>,
    },
    DataAggregator {
        kind: RecordKind,
        #[serde(default = "default_max_elements")]
        max_elements: usize,
        #[serde(default = "default_aggregation_period_ms")]
        aggregation_period_ms: u64,
        #[serde(default = "default_true")]
        write_invocation_affiliation: bool,
    },
}

impl ProcessorConfig {
    pub fn type_name(&self) -> &'static str {
        match self {
            ProcessorConfig::DataSaver { .. } => "data_saver",
            ProcessorConfig::AgentFilter { .. } => "agent_filter",
            ProcessorConfig::InvocationCloner => "invocation_cloner",
            ProcessorConfig::InvocationExtractor { .. } => "invocation_extractor",
            ProcessorConfig::TimeFrame { .. } => "time_frame",
            ProcessorConfig::DataAggregator { .. } => "data_aggregator",
        }
    }

    fn sub_chain(&self) -> &[ProcessorConfig] {
        match self {
            ProcessorConfig::AgentFilter { processors, .. }
            | ProcessorConfig::InvocationExtractor { processors }
            | ProcessorConfig::TimeFrame { processors, .. } => processors,
            _ => &[],
        }
    }

    /// Check this stage and its sub-chain
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            ProcessorConfig::TimeFrame { start, end, .. } if start > end => {
                return Err(ConfigError::InvalidConfig(format!(
                    "time_frame start {start} is after end {end}"
                )));
            }
            ProcessorConfig::DataAggregator {
                kind,
                max_elements,
                aggregation_period_ms,
                ..
            } => {
                if *max_elements == 0 {
                    return Err(ConfigError::InvalidConfig(
                        "data_aggregator max_elements must be greater than zero".to_string(),
                    ));
                }
                if *aggregation_period_ms == 0 {
                    return Err(ConfigError::InvalidConfig(
                        "data_aggregator aggregation_period_ms must be greater than zero"
                            .to_string(),
                    ));
                }
                if aggregator_for(*kind).is_err() {
                    return Err(ConfigError::InvalidConfig(format!(
                        "no aggregation strategy for record kind '{kind}'"
                    )));
                }
            }
            _ => {}
        }

        self.sub_chain().iter().try_for_each(ProcessorConfig::validate)
    }

    /// Construct the stage, with its sub-chain, writing into `writer`
    pub fn build(&self, writer: &SharedWriter) -> PipelineResult<DataProcessor> {
        let stage = match self {
            ProcessorConfig::DataSaver { kinds, inclusive } => DataSaverProcessor::new(
                kinds.iter().copied().collect(),
                *inclusive,
                Arc::clone(writer),
            )
            .into(),
            ProcessorConfig::AgentFilter { agents, processors } => AgentFilterProcessor::new(
                agents.iter().copied().collect::<HashSet<_>>(),
                build_chain(processors, writer)?,
            )
            .into(),
            ProcessorConfig::InvocationCloner => {
                InvocationClonerProcessor::new(Arc::clone(writer)).into()
            }
            ProcessorConfig::InvocationExtractor { processors } => {
                InvocationExtractorProcessor::new(build_chain(processors, writer)?).into()
            }
            ProcessorConfig::TimeFrame {
                start,
                end,
                processors,
            } => TimeFrameProcessor::new(*start, *end, build_chain(processors, writer)?)?.into(),
            ProcessorConfig::DataAggregator {
                kind,
                max_elements,
                aggregation_period_ms,
                write_invocation_affiliation,
            } => DataAggregatorProcessor::new(
                *kind,
                *max_elements,
                Duration::from_millis(*aggregation_period_ms),
                aggregator_for(*kind)?,
                *write_invocation_affiliation,
                Arc::clone(writer),
            )?
            .into(),
        };
        Ok(stage)
    }
}

/// Build a chain of stages in configuration order
pub fn build_chain(
    configs: &[ProcessorConfig],
    writer: &SharedWriter,
) -> PipelineResult<Vec<DataProcessor>> {
    configs.iter().map(|config| config.build(writer)).collect()
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to render TOML: {0}")]
    TomlRender(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PipelineConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flush.interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "flush interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.storage.output.as_os_str().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "storage output path must not be empty".to_string(),
            ));
        }
        self.processors.iter().try_for_each(ProcessorConfig::validate)
    }

    /// Construct the head chain of the pipeline
    pub fn build_processors(&self, writer: SharedWriter) -> PipelineResult<Vec<DataProcessor>> {
        build_chain(&self.processors, &writer)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[storage]
output = "records.jsonl"

[[processors]]
type = "data_saver"
kinds = ["invocation"]

[[processors]]
type = "agent_filter"
agents = [10]

  [[processors.processors]]
  type = "data_aggregator"
  kind = "timer"
  max_elements = 1
  aggregation_period_ms = 1000
  write_invocation_affiliation = false
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::RecordProcessor;
    use crate::record::{InvocationRecord, MonitoringRecord, RecordIdentity, TimerRecord, TimerStats};
    use crate::testing::mocks::MockStorageWriter;
    use chrono::TimeZone;

    #[test]
    fn test_full_config() {
        let config = PipelineConfig::from_toml(
            r#"
[storage]
output = "/var/lib/recordflow/out.jsonl"

[flush]
interval_secs = 5

[[processors]]
type = "invocation_cloner"

[[processors]]
type = "time_frame"
start = "2024-01-01T00:00:00Z"
end = "2024-12-31T23:59:59Z"

  [[processors.processors]]
  type = "invocation_extractor"

    [[processors.processors.processors]]
    type = "data_aggregator"
    kind = "sql_statement"
"#,
        )
        .unwrap();

        assert_eq!(config.flush.interval(), Duration::from_secs(5));
        assert_eq!(config.processors.len(), 2);
        assert_eq!(config.processors[0], ProcessorConfig::InvocationCloner);

        let ProcessorConfig::TimeFrame { processors, .. } = &config.processors[1] else {
            panic!("expected time_frame");
        };
        let ProcessorConfig::InvocationExtractor { processors } = &processors[0] else {
            panic!("expected invocation_extractor");
        };
        assert_eq!(
            processors[0],
            ProcessorConfig::DataAggregator {
                kind: RecordKind::SqlStatement,
                max_elements: 1000,
                aggregation_period_ms: 5000,
                write_invocation_affiliation: true,
            }
        );
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = PipelineConfig::from_toml("[storage]\noutput = \"out.jsonl\"\n").unwrap();
        assert_eq!(config.flush.interval_secs, 30);
        assert!(config.processors.is_empty());
    }

    #[test]
    fn test_unknown_processor_type_is_rejected() {
        let result = PipelineConfig::from_toml(
            r#"
[storage]
output = "out.jsonl"

[[processors]]
type = "alerting"
"#,
        );
        assert!(matches!(result, Err(ConfigError::TomlParse(_))));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let cases = [
            "type = \"data_aggregator\"\nkind = \"timer\"\nmax_elements = 0",
            "type = \"data_aggregator\"\nkind = \"timer\"\naggregation_period_ms = 0",
            "type = \"data_aggregator\"\nkind = \"invocation\"",
            "type = \"time_frame\"\nstart = \"2024-02-01T00:00:00Z\"\nend = \"2024-01-01T00:00:00Z\"",
        ];

        for case in cases {
            let toml_content = format!("[storage]\noutput = \"out.jsonl\"\n\n[[processors]]\n{case}\n");
            let result = PipelineConfig::from_toml(&toml_content);
            assert!(
                matches!(result, Err(ConfigError::InvalidConfig(_))),
                "case should be invalid: {case}"
            );
        }
    }

    #[test]
    fn test_nested_invalid_stage_is_rejected() {
        let result = PipelineConfig::from_toml(
            r#"
[storage]
output = "out.jsonl"

[[processors]]
type = "agent_filter"
agents = [1]

  [[processors.processors]]
  type = "data_aggregator"
  kind = "timer"
  max_elements = 0
"#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_flush_interval_is_rejected() {
        let result =
            PipelineConfig::from_toml("[storage]\noutput = \"out.jsonl\"\n\n[flush]\ninterval_secs = 0\n");
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_build_processors_wires_chain() {
        let config = PipelineConfig::test_config();
        config.validate().unwrap();

        let writer = Arc::new(MockStorageWriter::new());
        let chain = config.build_processors(writer.clone()).unwrap();
        let names: Vec<&str> = chain.iter().map(|stage| stage.name()).collect();
        assert_eq!(names, vec!["data_saver", "agent_filter"]);

        let at = |millis| Utc.timestamp_millis_opt(millis).unwrap();
        let invocation: MonitoringRecord =
            InvocationRecord::new(RecordIdentity::new(at(0), 10, 1, 1)).into();
        let timer = |millis, agent| -> MonitoringRecord {
            TimerRecord::new(
                RecordIdentity::new(at(millis), agent, 1, 1),
                TimerStats::single(1.0, 0.0),
            )
            .into()
        };

        for stage in &chain {
            stage.process(&invocation);
            stage.process(&timer(0, 10));
            stage.process(&timer(0, 20));
            stage.process(&timer(5_000, 10));
        }

        assert_eq!(writer.write_count(), 1);
        assert_eq!(writer.annotated_writes().len(), 1);
    }

    #[test]
    fn test_round_trips_through_toml() {
        let config = PipelineConfig::test_config();
        let rendered = config.to_toml_string().unwrap();
        assert_eq!(PipelineConfig::from_toml(&rendered).unwrap(), config);
    }

    #[test]
    fn test_load_missing_file() {
        let result = PipelineConfig::load_from_file(Path::new("/nonexistent/recordflow.toml"));
        assert!(matches!(result, Err(ConfigError::FileRead(_))));
    }
}
