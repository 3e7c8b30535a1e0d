//! errfan - fan-in aggregation of asynchronous error sources.
//!
//! Many independent units of work each report errors through an
//! [`ErrorSource`]. [`collect`] merges them into one [`MergedStream`] that
//! closes once every source has completed. [`collect_with_cancellation`]
//! additionally races a [`Cancellation`] against the sources and forwards its
//! error into the same stream when it fires.
//!
//! ```no_run
//! use errfan::{collect_with_cancellation, CancelSource, ErrorSource};
//! use futures::StreamExt;
//! use std::time::Duration;
//!
//! # async fn run() {
//! let deadline = CancelSource::with_timeout(Duration::from_secs(5));
//! let sources = vec![
//!     ErrorSource::spawn(async { Err(anyhow::anyhow!("upload failed")) }),
//!     ErrorSource::spawn(async { Ok(()) }),
//! ];
//!
//! let mut errors = collect_with_cancellation(&deadline, sources);
//! while let Some(err) = errors.next().await {
//!     eprintln!("{err}");
//! }
//! # }
//! ```

pub mod cancel;
pub mod collect;
pub mod merged;
pub mod source;

pub use cancel::{CancelError, CancelSignal, CancelSource, CancelState, Cancellation};
pub use collect::{collect, collect_with_cancellation, Collector, DEFAULT_BUFFER};
pub use merged::MergedStream;
pub use source::{ErrorSender, ErrorSource, SourceClosed};
