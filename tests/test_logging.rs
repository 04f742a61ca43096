//! Tests for logging configuration and format parsing
//!
//! Covers the pure parsing helpers and the span macros; subscriber
//! installation is global and only checked for not panicking.

use recordflow::observability::logging::{init_logging, parse_level, LogFormat};
use recordflow::{flush_span, pipeline_span};
use tracing::Level;

#[test]
fn test_log_format_parse_is_case_insensitive() {
    assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
    assert_eq!(LogFormat::parse("Pretty"), LogFormat::Pretty);
    assert_eq!(LogFormat::parse("compact"), LogFormat::Compact);
}

#[test]
fn test_log_format_parse_does_not_trim() {
    // Only exact names select a human-readable format
    assert_eq!(LogFormat::parse("  pretty  "), LogFormat::Json);
    assert_eq!(LogFormat::parse("compact\n"), LogFormat::Json);
}

#[test]
fn test_log_level_defaults_to_info() {
    assert_eq!(parse_level("nonsense"), Level::INFO);
    assert_eq!(parse_level("Trace"), Level::TRACE);
}

#[test]
fn test_span_macros_build_spans() {
    init_logging(Level::TRACE, LogFormat::Compact, true);

    let span = pipeline_span!(kind = "timer");
    let _entered = span.enter();
    let flush = flush_span!(stages = 3usize);
    if let Some(metadata) = flush.metadata() {
        assert_eq!(metadata.name(), "aggregate_flush");
    }
}
