//! Run report generation.
//!
//! Summarizes what came out of a merged stream and renders it as plain text
//! or JSON.

use crate::workload::WorkloadError;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Everything observed during one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// When collection started.
    pub started_at: DateTime<Utc>,
    /// Wall-clock time until the merged stream closed.
    pub duration_seconds: f64,
    /// Number of source slots supplied, including absent ones.
    pub sources: usize,
    /// Errors the workload would report if left to run to completion.
    pub expected_errors: usize,
    /// Errors reported by sources.
    pub source_errors: usize,
    /// Cancellation error, if one was forwarded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancellation: Option<String>,
    /// Every error in the order it was received.
    pub errors: Vec<String>,
    /// Time taken to drain the same workload one source at a time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequential_seconds: Option<f64>,
}

impl RunReport {
    /// Build a report from the errors drained out of the merged stream.
    pub fn new(
        started_at: DateTime<Utc>,
        duration_seconds: f64,
        sources: usize,
        expected_errors: usize,
        errors: &[WorkloadError],
    ) -> Self {
        let cancellation = errors
            .iter()
            .find(|e| e.is_cancellation())
            .map(ToString::to_string);

        Self {
            started_at,
            duration_seconds,
            sources,
            expected_errors,
            source_errors: errors.iter().filter(|e| !e.is_cancellation()).count(),
            cancellation,
            errors: errors.iter().map(ToString::to_string).collect(),
            sequential_seconds: None,
        }
    }

    /// Total number of errors that came out of the merged stream.
    pub fn total_errors(&self) -> usize {
        self.errors.len()
    }
}

/// Render the report as plain text.
pub fn generate_text_report(report: &RunReport) -> String {
    let mut output = String::new();

    output.push_str("errfan run\n\n");
    output.push_str(&format!(
        "  Started:  {}\n",
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    output.push_str(&format!("  Sources:  {}\n", report.sources));
    output.push_str(&format!(
        "  Duration: {:.3}s\n",
        report.duration_seconds
    ));
    if let Some(sequential) = report.sequential_seconds {
        output.push_str(&format!("  Sequential: {:.3}s\n", sequential));
    }
    output.push('\n');

    output.push_str(&format!(
        "  Errors collected: {} ({} from sources, expected {})\n",
        report.total_errors(),
        report.source_errors,
        report.expected_errors
    ));
    match report.cancellation {
        Some(ref cancellation) => {
            output.push_str(&format!("  Cancellation: {}\n", cancellation));
        }
        None => output.push_str("  Cancellation: none\n"),
    }

    if !report.errors.is_empty() {
        output.push('\n');
        for (i, err) in report.errors.iter().enumerate() {
            output.push_str(&format!("  {:>3}. {}\n", i + 1, err));
        }
    }

    output
}

/// Render the report as JSON.
pub fn generate_json_report(report: &RunReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}
