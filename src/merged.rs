//! The receive-only side of a collection.

use futures::stream::{FusedStream, Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Every error forwarded by a collection, ending when all of its tasks have
/// finished.
///
/// After the end has been observed the stream keeps yielding `None`.
/// Dropping it early makes the collection's tasks stop forwarding.
#[derive(Debug)]
pub struct MergedStream<E> {
    rx: mpsc::Receiver<E>,
    terminated: bool,
}

impl<E> MergedStream<E> {
    pub(crate) fn new(rx: mpsc::Receiver<E>) -> Self {
        Self {
            rx,
            terminated: false,
        }
    }

    /// Receive the next error, or `None` once the stream has closed.
    pub async fn recv(&mut self) -> Option<E> {
        self.next().await
    }

    /// Returns true once the end of the stream has been observed.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }
}

impl<E> Stream for MergedStream<E> {
    type Item = E;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<E>> {
        if self.terminated {
            return Poll::Ready(None);
        }

        match self.rx.poll_recv(cx) {
            Poll::Ready(None) => {
                self.terminated = true;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl<E> FusedStream for MergedStream<E> {
    fn is_terminated(&self) -> bool {
        MergedStream::is_terminated(self)
    }
}
