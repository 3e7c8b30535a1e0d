//! Error sources: asynchronous units of work that report errors over time.

use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::fmt;
use std::future::Future;
use thiserror::Error;
use tokio::sync::mpsc;

/// Returned by [`ErrorSender`] when the receiving side has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("error source is no longer being read")]
pub struct SourceClosed;

/// A handle to an in-progress unit of work that yields zero or more errors
/// and then completes.
///
/// `None` items are nil reports and are discarded by the collector. An
/// absent source behaves as one that has already completed.
pub struct ErrorSource<E> {
    stream: Option<BoxStream<'static, Option<E>>>,
}

impl<E> fmt::Debug for ErrorSource<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorSource")
            .field("absent", &self.stream.is_none())
            .finish()
    }
}

impl<E: Send + 'static> ErrorSource<E> {
    /// A source that does not exist and contributes nothing.
    pub fn absent() -> Self {
        Self { stream: None }
    }

    /// A source that is already complete.
    pub fn closed() -> Self {
        Self::from_stream(stream::empty())
    }

    /// Wrap any stream of optional errors.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Option<E>> + Send + 'static,
    {
        Self {
            stream: Some(stream.boxed()),
        }
    }

    /// Wrap the receiving half of a channel. The source completes when every
    /// sender has been dropped.
    pub fn from_receiver(mut rx: mpsc::Receiver<Option<E>>) -> Self {
        Self::from_stream(stream::poll_fn(move |cx| rx.poll_recv(cx)))
    }

    /// A source whose errors are all known up front.
    pub fn from_errors<I>(errors: I) -> Self
    where
        I: IntoIterator<Item = E>,
        I::IntoIter: Send + 'static,
    {
        Self::from_stream(stream::iter(errors.into_iter().map(Some)))
    }

    /// Create a source together with the sender used to feed it.
    pub fn channel(capacity: usize) -> (ErrorSender<E>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (ErrorSender { tx }, Self::from_receiver(rx))
    }

    /// Run `work` on the tokio runtime and report its error, if any.
    ///
    /// The work starts immediately, whether or not the source is ever read.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn<F>(work: F) -> Self
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
    {
        let (tx, source) = Self::channel(1);
        tokio::spawn(async move {
            if let Err(err) = work.await {
                // Nobody is listening any more; the error has nowhere to go.
                let _ = tx.report(err).await;
            }
        });
        source
    }
}

impl<E> ErrorSource<E> {
    pub fn is_absent(&self) -> bool {
        self.stream.is_none()
    }

    pub(crate) fn into_stream(self) -> Option<BoxStream<'static, Option<E>>> {
        self.stream
    }
}

impl<E: Send + 'static> From<mpsc::Receiver<Option<E>>> for ErrorSource<E> {
    fn from(rx: mpsc::Receiver<Option<E>>) -> Self {
        Self::from_receiver(rx)
    }
}

impl<E, T> From<Option<T>> for ErrorSource<E>
where
    E: Send + 'static,
    T: Into<ErrorSource<E>>,
{
    fn from(source: Option<T>) -> Self {
        source.map(Into::into).unwrap_or_else(Self::absent)
    }
}

/// Producer half of a channel-backed [`ErrorSource`].
///
/// The source completes once every clone of the sender is dropped.
pub struct ErrorSender<E> {
    tx: mpsc::Sender<Option<E>>,
}

impl<E> Clone for ErrorSender<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<E> fmt::Debug for ErrorSender<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorSender")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl<E> ErrorSender<E> {
    /// Report an error, waiting for room in the channel.
    pub async fn report(&self, err: E) -> Result<(), SourceClosed> {
        self.tx.send(Some(err)).await.map_err(|_| SourceClosed)
    }

    /// Report a nil value. Collectors drop these.
    pub async fn report_nil(&self) -> Result<(), SourceClosed> {
        self.tx.send(None).await.map_err(|_| SourceClosed)
    }

    /// Returns true if the source has been dropped by its reader.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
