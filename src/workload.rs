//! Simulated error sources driven by configuration.
//!
//! Each configured source sleeps for its delay, then reports its nil values
//! and errors before completing.

use errfan::{CancelError, ErrorSource};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Errors flowing through a simulated collection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkloadError {
    /// A simulated source reported a failure.
    #[error("source '{source_name}' failed (#{ordinal})")]
    Failed { source_name: String, ordinal: u32 },

    /// The collection's cancellation fired.
    #[error(transparent)]
    Cancelled(#[from] CancelError),
}

impl WorkloadError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, WorkloadError::Cancelled(_))
    }
}

/// One simulated source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Name used in reported errors.
    pub name: String,

    /// How long the source works before reporting.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,

    /// Number of errors reported after the delay.
    #[serde(default)]
    pub errors: u32,

    /// Number of nil values reported before the errors.
    #[serde(default)]
    pub nils: u32,

    /// Supply no source at all in this slot.
    #[serde(default)]
    pub absent: bool,
}

pub fn default_delay_ms() -> u64 {
    50
}

impl SourceSpec {
    pub fn new(name: impl Into<String>, delay_ms: u64, errors: u32) -> Self {
        Self {
            name: name.into(),
            delay_ms,
            errors,
            nils: 0,
            absent: false,
        }
    }

    /// `count` identical sources named `source-1`, `source-2`, ...
    pub fn uniform(count: usize, delay_ms: u64, errors: u32) -> Vec<Self> {
        (1..=count)
            .map(|i| Self::new(format!("source-{}", i), delay_ms, errors))
            .collect()
    }

    /// Errors this source reports when left to run to completion.
    pub fn expected_errors(&self) -> usize {
        if self.absent {
            0
        } else {
            self.errors as usize
        }
    }

    /// Start the simulated work and return its source.
    ///
    /// Must be called from inside a tokio runtime.
    pub fn start(&self) -> ErrorSource<WorkloadError> {
        if self.absent {
            debug!("Source '{}' is absent", self.name);
            return ErrorSource::absent();
        }

        let (tx, source) = ErrorSource::channel(1);
        let spec = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(spec.delay_ms)).await;

            for _ in 0..spec.nils {
                if tx.report_nil().await.is_err() {
                    return;
                }
            }

            for ordinal in 1..=spec.errors {
                let err = WorkloadError::Failed {
                    source_name: spec.name.clone(),
                    ordinal,
                };
                if tx.report(err).await.is_err() {
                    return;
                }
            }

            debug!("Source '{}' finished", spec.name);
        });

        source
    }
}

/// Start every source in `specs`.
pub fn start_all(specs: &[SourceSpec]) -> Vec<ErrorSource<WorkloadError>> {
    specs.iter().map(SourceSpec::start).collect()
}

/// Run the sources one after another, draining each before starting the
/// next. Used as a baseline against concurrent collection.
pub async fn run_sequential(specs: &[SourceSpec]) -> (Vec<WorkloadError>, Duration) {
    let start = Instant::now();
    let mut errors = Vec::new();

    for spec in specs {
        let mut merged = errfan::collect(vec![spec.start()]);
        while let Some(err) = merged.next().await {
            errors.push(err);
        }
    }

    (errors, start.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use errfan::{collect, collect_with_cancellation, CancelSource};

    #[test]
    fn test_uniform_names() {
        let specs = SourceSpec::uniform(3, 10, 1);
        assert_eq!(specs.len(), 3);
        assert_eq!(specs[0].name, "source-1");
        assert_eq!(specs[2].name, "source-3");
        assert!(specs.iter().all(|s| s.delay_ms == 10 && s.errors == 1));
    }

    #[test]
    fn test_expected_errors() {
        let mut spec = SourceSpec::new("a", 0, 3);
        assert_eq!(spec.expected_errors(), 3);
        spec.absent = true;
        assert_eq!(spec.expected_errors(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_workload_errors_are_collected() {
        let mut specs = SourceSpec::uniform(3, 20, 2);
        specs[1].nils = 4;
        specs.push(SourceSpec {
            absent: true,
            ..SourceSpec::new("ghost", 0, 9)
        });

        let errors: Vec<_> = collect(start_all(&specs)).collect().await;

        assert_eq!(errors.len(), 6);
        assert!(errors.iter().all(|e| !e.is_cancellation()));
        assert!(errors.contains(&WorkloadError::Failed {
            source_name: "source-2".to_string(),
            ordinal: 2,
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_workload_with_deadline() {
        let deadline = CancelSource::with_timeout(Duration::from_millis(100));
        let specs = SourceSpec::uniform(3, 500, 1);

        let errors: Vec<_> = collect_with_cancellation(&deadline, start_all(&specs))
            .collect()
            .await;

        assert_eq!(errors.len(), 4);
        assert_eq!(errors.iter().filter(|e| e.is_cancellation()).count(), 1);
        assert_eq!(
            errors[0],
            WorkloadError::Cancelled(CancelError::DeadlineExceeded)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_sequential() {
        let specs = SourceSpec::uniform(2, 50, 1);

        let (errors, _elapsed) = run_sequential(&specs).await;

        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_error_display() {
        let err = WorkloadError::Failed {
            source_name: "db".to_string(),
            ordinal: 2,
        };
        assert_eq!(err.to_string(), "source 'db' failed (#2)");
        assert_eq!(
            WorkloadError::from(CancelError::Cancelled).to_string(),
            "operation cancelled"
        );
    }
}
