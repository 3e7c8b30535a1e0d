//! Fan-in of many error sources into a single [`MergedStream`].
//!
//! A collection spawns one listener task per source and, when a cancellation
//! bound is supplied, one watcher task. All of them write into the same
//! channel. A barrier task owns the set of spawned tasks together with the
//! original sender and drops the sender only after every task has finished,
//! so the stream closes exactly once and never before the last write.
//!
//! Cancellation is additive: when it fires, its error is forwarded alongside
//! whatever the sources go on to report. Listeners are never interrupted.
//! The one exception is a cancellation that has already fired when the
//! collection starts, in which case no listener is spawned at all.

use crate::cancel::{CancelError, Cancellation};
use crate::merged::MergedStream;
use crate::source::ErrorSource;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Default capacity of the merged channel. Tokio channels cannot be
/// unbuffered, so a single slot is the closest equivalent.
pub const DEFAULT_BUFFER: usize = 1;

/// Builder for a collection.
#[derive(Debug, Clone)]
pub struct Collector {
    buffer: usize,
    cancellation: Cancellation,
}

impl Default for Collector {
    fn default() -> Self {
        Self {
            buffer: DEFAULT_BUFFER,
            cancellation: Cancellation::Unset,
        }
    }
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capacity of the merged channel. Zero is treated as one.
    pub fn buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    /// Bound the collection by a cancellation signal.
    pub fn cancellation(mut self, cancellation: impl Into<Cancellation>) -> Self {
        self.cancellation = cancellation.into();
        self
    }

    /// Start collecting from `sources` and return the merged stream
    /// immediately.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn collect<E, I>(self, sources: I) -> MergedStream<E>
    where
        E: From<CancelError> + Send + 'static,
        I: IntoIterator<Item = ErrorSource<E>>,
    {
        let sources: Vec<ErrorSource<E>> = sources.into_iter().collect();
        let (tx, rx) = mpsc::channel(self.buffer);
        let mut tasks = JoinSet::new();

        // Cancellation is only observed when there is work to bound.
        if !self.cancellation.is_unset() && !sources.is_empty() {
            tasks.spawn(watch_cancellation(self.cancellation.clone(), tx.clone()));

            if let Some(err) = self.cancellation.error() {
                info!(
                    "Cancellation already fired ({}), not starting {} sources",
                    err,
                    sources.len()
                );
                tokio::spawn(close_when_finished(tasks, tx));
                return MergedStream::new(rx);
            }
        }

        debug!("Collecting from {} sources", sources.len());
        for (index, source) in sources.into_iter().enumerate() {
            tasks.spawn(listen(index, source, tx.clone()));
        }

        tokio::spawn(close_when_finished(tasks, tx));
        MergedStream::new(rx)
    }
}

/// Merge every error reported by `sources` into one stream.
///
/// # Panics
///
/// Panics if called outside a tokio runtime.
pub fn collect<E, I>(sources: I) -> MergedStream<E>
where
    E: From<CancelError> + Send + 'static,
    I: IntoIterator<Item = ErrorSource<E>>,
{
    Collector::new().collect(sources)
}

/// Like [`collect`], but also forwards the cancellation error once
/// `cancellation` fires.
///
/// If it has already fired, the stream yields only that error and the
/// sources are never read.
///
/// # Panics
///
/// Panics if called outside a tokio runtime.
pub fn collect_with_cancellation<E, I>(
    cancellation: impl Into<Cancellation>,
    sources: I,
) -> MergedStream<E>
where
    E: From<CancelError> + Send + 'static,
    I: IntoIterator<Item = ErrorSource<E>>,
{
    Collector::new().cancellation(cancellation).collect(sources)
}

/// Forward the cancellation error once, or exit quietly when there is
/// nothing to wait on.
async fn watch_cancellation<E>(cancellation: Cancellation, tx: mpsc::Sender<E>)
where
    E: From<CancelError>,
{
    let fired = tokio::select! {
        biased;
        fired = cancellation.wait() => fired,
        _ = tx.closed() => {
            debug!("Merged stream dropped, cancellation watcher exiting");
            return;
        }
    };

    match fired {
        Some(err) => {
            debug!("Cancellation fired: {}", err);
            let _ = tx.send(E::from(err)).await;
        }
        None => debug!("Cancellation cannot fire, watcher exiting"),
    }
}

/// Drain one source, forwarding every non-nil error.
async fn listen<E>(index: usize, source: ErrorSource<E>, tx: mpsc::Sender<E>) {
    let Some(mut errors) = source.into_stream() else {
        debug!("Source {} is absent", index);
        return;
    };

    let mut forwarded = 0usize;
    loop {
        let next = tokio::select! {
            biased;
            next = errors.next() => next,
            _ = tx.closed() => {
                debug!("Merged stream dropped, source {} listener exiting", index);
                return;
            }
        };

        match next {
            Some(Some(err)) => {
                if tx.send(err).await.is_err() {
                    debug!("Merged stream dropped, source {} listener exiting", index);
                    return;
                }
                forwarded += 1;
            }
            Some(None) => continue,
            None => break,
        }
    }

    debug!("Source {} completed, forwarded {} errors", index, forwarded);
}

/// Wait for every spawned task, then close the stream by dropping the last
/// sender held outside the tasks.
async fn close_when_finished<E>(mut tasks: JoinSet<()>, tx: mpsc::Sender<E>) {
    let total = tasks.len();
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!("Collection task did not finish cleanly: {}", e);
        }
    }

    drop(tx);
    debug!("All {} collection tasks finished, merged stream closed", total);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelSource;
    use futures::stream;
    use std::time::Duration;
    use thiserror::Error;
    use tokio::time::{sleep, Instant};

    #[derive(Debug, Clone, PartialEq, Eq, Error)]
    enum TestError {
        #[error("{0}")]
        Source(&'static str),
        #[error(transparent)]
        Cancel(#[from] CancelError),
    }

    fn delayed(delay: Duration, errors: Vec<&'static str>) -> ErrorSource<TestError> {
        let (tx, source) = ErrorSource::channel(1);
        tokio::spawn(async move {
            sleep(delay).await;
            for err in errors {
                let _ = tx.report(TestError::Source(err)).await;
            }
        });
        source
    }

    async fn drain(mut merged: MergedStream<TestError>) -> Vec<TestError> {
        let mut errors = Vec::new();
        while let Some(err) = merged.recv().await {
            errors.push(err);
        }
        errors
    }

    fn cancellations(errors: &[TestError]) -> usize {
        errors
            .iter()
            .filter(|e| matches!(e, TestError::Cancel(_)))
            .count()
    }

    #[tokio::test]
    async fn test_no_sources() {
        let errors = drain(collect(Vec::<ErrorSource<TestError>>::new())).await;
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn test_one_of_three_sources_fails() {
        let errors = drain(collect(vec![
            ErrorSource::closed(),
            ErrorSource::from_errors(vec![TestError::Source("err")]),
            ErrorSource::closed(),
        ]))
        .await;

        assert_eq!(errors, vec![TestError::Source("err")]);
    }

    #[tokio::test]
    async fn test_every_source_error_is_forwarded() {
        let errors = drain(collect(vec![
            ErrorSource::spawn(async { Err(TestError::Source("err1")) }),
            ErrorSource::spawn(async { Err(TestError::Source("err2")) }),
            ErrorSource::from_errors(vec![
                TestError::Source("err3"),
                TestError::Source("err4"),
            ]),
        ]))
        .await;

        assert_eq!(errors.len(), 4);
        for expected in ["err1", "err2", "err3", "err4"] {
            assert!(errors.contains(&TestError::Source(expected)));
        }
    }

    #[tokio::test]
    async fn test_already_closed_source_contributes_nothing() {
        let (tx, closed) = ErrorSource::channel(1);
        drop(tx);

        let errors = drain(collect(vec![
            closed,
            ErrorSource::from_errors(vec![TestError::Source("err2")]),
        ]))
        .await;

        assert_eq!(errors, vec![TestError::Source("err2")]);
    }

    #[tokio::test]
    async fn test_absent_sources_and_nils_are_skipped() {
        let errors = drain(collect(vec![
            ErrorSource::absent(),
            ErrorSource::from_stream(stream::iter(vec![
                None,
                Some(TestError::Source("real")),
                None,
            ])),
            ErrorSource::absent(),
        ]))
        .await;

        assert_eq!(errors, vec![TestError::Source("real")]);
    }

    #[tokio::test]
    async fn test_never_cancellation_with_no_sources() {
        let errors = drain(collect_with_cancellation(
            Cancellation::Never,
            Vec::<ErrorSource<TestError>>::new(),
        ))
        .await;
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn test_fired_cancellation_with_no_sources() {
        let errors = drain(collect_with_cancellation(
            CancelError::Cancelled,
            Vec::<ErrorSource<TestError>>::new(),
        ))
        .await;
        assert!(errors.is_empty());

        let source = CancelSource::new();
        source.cancel();
        let errors = drain(collect_with_cancellation(
            &source,
            Vec::<ErrorSource<TestError>>::new(),
        ))
        .await;
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn test_stream_reports_termination() {
        let mut merged = collect(vec![
            ErrorSource::absent(),
            ErrorSource::from_errors(vec![TestError::Source("only")]),
        ]);
        assert!(!merged.is_terminated());

        assert_eq!(merged.recv().await, Some(TestError::Source("only")));
        assert_eq!(merged.recv().await, None);
        assert!(merged.is_terminated());
        assert_eq!(merged.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_cancellation_ignored_without_sources() {
        let source = CancelSource::with_timeout(Duration::from_secs(1));
        let start = Instant::now();

        let errors = drain(collect_with_cancellation(
            &source,
            Vec::<ErrorSource<TestError>>::new(),
        ))
        .await;

        assert!(errors.is_empty());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_firing_cancellation_waits_for_sources() {
        let errors = drain(collect_with_cancellation(
            Cancellation::Never,
            vec![delayed(Duration::from_millis(50), vec!["late"])],
        ))
        .await;

        assert_eq!(errors, vec![TestError::Source("late")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_source_exceeds_deadline() {
        let source = CancelSource::with_timeout(Duration::from_millis(100));

        let errors = drain(collect_with_cancellation(
            &source,
            vec![delayed(Duration::from_secs(1), vec![])],
        ))
        .await;

        assert_eq!(
            errors,
            vec![TestError::Cancel(CancelError::DeadlineExceeded)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_mid_flight_is_additive() {
        let source = CancelSource::with_timeout(Duration::from_secs(2));
        let canceller = source.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(200)).await;
            canceller.cancel();
        });

        let errors = drain(collect_with_cancellation(
            &source,
            vec![
                delayed(Duration::from_secs(1), vec!["err1"]),
                delayed(Duration::from_secs(1), vec!["err2"]),
                delayed(Duration::from_secs(1), vec!["err3"]),
            ],
        ))
        .await;

        assert_eq!(errors.len(), 4);
        assert_eq!(cancellations(&errors), 1);
        assert_eq!(errors[0], TestError::Cancel(CancelError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pre_fired_cancellation_short_circuits() {
        let source = CancelSource::with_timeout(Duration::from_secs(2));
        source.cancel();
        let start = Instant::now();

        let errors = drain(collect_with_cancellation(
            &source,
            vec![
                delayed(Duration::from_secs(1), vec!["err1"]),
                delayed(Duration::from_secs(1), vec!["err2"]),
            ],
        ))
        .await;

        assert_eq!(errors, vec![TestError::Cancel(CancelError::Cancelled)]);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_fired_variant_short_circuits() {
        let errors = drain(collect_with_cancellation(
            CancelError::DeadlineExceeded,
            vec![ErrorSource::from_errors(vec![TestError::Source("never")])],
        ))
        .await;

        assert_eq!(
            errors,
            vec![TestError::Cancel(CancelError::DeadlineExceeded)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_collector_buffer_lets_producers_run_ahead() {
        let merged = Collector::new().buffer(8).collect(vec![ErrorSource::from_errors(
            vec![TestError::Source("a"), TestError::Source("b")],
        )]);

        sleep(Duration::from_millis(10)).await;
        let errors = drain(merged).await;
        assert_eq!(
            errors,
            vec![TestError::Source("a"), TestError::Source("b")]
        );
    }

    #[tokio::test]
    async fn test_dropping_stream_releases_tasks() {
        let (tx, source) = ErrorSource::channel(1);
        let merged = collect::<TestError, _>(vec![source]);
        drop(merged);

        tokio::time::timeout(Duration::from_secs(5), async {
            while !tx.is_closed() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("listener should drop the source once the stream is gone");
    }

    #[tokio::test]
    async fn test_concurrent_collections_are_independent() {
        let first = collect(vec![ErrorSource::from_errors(vec![TestError::Source(
            "first",
        )])]);
        let second = collect(vec![ErrorSource::from_errors(vec![
            TestError::Source("second"),
            TestError::Source("second"),
        ])]);

        let (first, second) = tokio::join!(drain(first), drain(second));
        assert_eq!(first, vec![TestError::Source("first")]);
        assert_eq!(second.len(), 2);
    }
}
