//! Cancellation signals that can bound a collection.
//!
//! A [`CancelSource`] owns the right to cancel; it hands out cloneable
//! [`CancelSignal`]s that observers can query or await. [`Cancellation`] is
//! what the collector accepts: either no cancellation at all, a signal that
//! can never fire, a live signal, or an error that has already fired.

use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Terminal error carried by a fired cancellation signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum CancelError {
    /// The signal was cancelled explicitly.
    #[error("operation cancelled")]
    Cancelled,
    /// The signal's deadline elapsed before it was cancelled.
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// Observable handle to a cancellation that may fire at most once.
///
/// Once a reason has been recorded it never changes, so every observer sees
/// the same [`CancelError`].
#[derive(Debug, Clone)]
pub struct CancelSignal {
    token: CancellationToken,
    deadline: Option<Instant>,
    reason: Arc<OnceLock<CancelError>>,
}

impl CancelSignal {
    fn new(token: CancellationToken, deadline: Option<Instant>) -> Self {
        Self {
            token,
            deadline,
            reason: Arc::new(OnceLock::new()),
        }
    }

    /// The instant at which the signal fires on its own, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the terminal error if the signal has fired.
    ///
    /// An elapsed deadline counts as fired even if nobody was waiting on it.
    pub fn error(&self) -> Option<CancelError> {
        if let Some(reason) = self.reason.get() {
            return Some(*reason);
        }

        if self.token.is_cancelled() {
            return Some(self.fire(CancelError::Cancelled));
        }

        if self.deadline_elapsed() {
            return Some(self.fire(CancelError::DeadlineExceeded));
        }

        None
    }

    /// Returns true once the signal has fired.
    pub fn is_fired(&self) -> bool {
        self.error().is_some()
    }

    /// Wait until the signal fires and return its terminal error.
    ///
    /// Never completes for a signal with no deadline that is never cancelled.
    pub async fn cancelled(&self) -> CancelError {
        if let Some(err) = self.error() {
            return err;
        }

        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }

        self.error().unwrap_or(CancelError::Cancelled)
    }

    fn deadline_elapsed(&self) -> bool {
        self.deadline
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }

    /// Record `reason` unless another reason won first, then wake waiters.
    fn fire(&self, reason: CancelError) -> CancelError {
        let recorded = *self.reason.get_or_init(|| reason);
        self.token.cancel();
        recorded
    }
}

/// Owner side of a [`CancelSignal`].
#[derive(Debug, Clone)]
pub struct CancelSource {
    signal: CancelSignal,
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSource {
    /// Create a source that only fires when cancelled explicitly.
    pub fn new() -> Self {
        Self {
            signal: CancelSignal::new(CancellationToken::new(), None),
        }
    }

    /// Create a source that fires with [`CancelError::DeadlineExceeded`]
    /// once `timeout` has elapsed.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Create a source that fires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            signal: CancelSignal::new(CancellationToken::new(), Some(deadline)),
        }
    }

    /// A handle observers can query and await.
    pub fn signal(&self) -> CancelSignal {
        self.signal.clone()
    }

    /// Fire the signal. Has no effect if it already fired.
    ///
    /// A deadline that has already elapsed takes precedence, matching what a
    /// concurrent observer would have seen.
    pub fn cancel(&self) {
        if self.signal.deadline_elapsed() {
            self.signal.fire(CancelError::DeadlineExceeded);
        } else {
            self.signal.fire(CancelError::Cancelled);
        }
    }

    /// Returns true once the signal has fired.
    pub fn is_cancelled(&self) -> bool {
        self.signal.is_fired()
    }
}

/// Snapshot of a [`Cancellation`] at the moment it was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelState {
    /// No cancellation was requested.
    Unset,
    /// Cancellation may still fire.
    Pending,
    /// Cancellation has fired with the given error.
    Fired(CancelError),
}

/// Cancellation bound handed to the collector.
#[derive(Debug, Clone, Default)]
pub enum Cancellation {
    /// No cancellation requested; the collector skips cancellation handling.
    #[default]
    Unset,
    /// A cancellation that exists but can never fire.
    Never,
    /// A live signal. It may have fired since it was wrapped.
    Pending(CancelSignal),
    /// A cancellation that has already fired.
    Fired(CancelError),
}

impl Cancellation {
    pub fn is_unset(&self) -> bool {
        matches!(self, Cancellation::Unset)
    }

    /// Observe the current state.
    pub fn state(&self) -> CancelState {
        match self {
            Cancellation::Unset => CancelState::Unset,
            Cancellation::Never => CancelState::Pending,
            Cancellation::Pending(signal) => match signal.error() {
                Some(err) => CancelState::Fired(err),
                None => CancelState::Pending,
            },
            Cancellation::Fired(err) => CancelState::Fired(*err),
        }
    }

    /// The terminal error, if cancellation has fired.
    pub fn error(&self) -> Option<CancelError> {
        match self.state() {
            CancelState::Fired(err) => Some(err),
            CancelState::Unset | CancelState::Pending => None,
        }
    }

    /// Wait for the cancellation to fire.
    ///
    /// Returns `None` immediately when there is nothing to wait on.
    pub(crate) async fn wait(&self) -> Option<CancelError> {
        match self {
            Cancellation::Unset | Cancellation::Never => None,
            Cancellation::Pending(signal) => Some(signal.cancelled().await),
            Cancellation::Fired(err) => Some(*err),
        }
    }
}

impl From<CancelSignal> for Cancellation {
    fn from(signal: CancelSignal) -> Self {
        Cancellation::Pending(signal)
    }
}

impl From<&CancelSource> for Cancellation {
    fn from(source: &CancelSource) -> Self {
        Cancellation::Pending(source.signal())
    }
}

impl From<CancelError> for Cancellation {
    fn from(err: CancelError) -> Self {
        Cancellation::Fired(err)
    }
}

impl From<CancellationToken> for Cancellation {
    fn from(token: CancellationToken) -> Self {
        Cancellation::Pending(CancelSignal::new(token, None))
    }
}

impl<T> From<Option<T>> for Cancellation
where
    T: Into<Cancellation>,
{
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_default()
    }
}
