//! Retrieval scheduling, cancellation and the single retry policy
//!
//! Every track source implements [`DataSource`]. Its default [`DataSource::records`]
//! method applies the recovery policy for transient I/O failures: invalidate the
//! cache entry, reopen the source and try exactly once more.
//!
//! [`TrackRetriever`] imposes the one-active-request-per-track rule. Each request
//! runs on its own worker thread with its own [`CancellationToken`]; issuing a new
//! request cancels the token of the one still in flight. Engines check the token
//! between records and tree nodes.

use std::any::Any;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, warn};
use parking_lot::Mutex;

use crate::error::{CancelReason, Error, Result, RetrievalError};
use crate::reference::GenomicRange;

/// Which stored resolution a continuous retrieval should read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resolution {
    /// Coarsest level that still resolves the view
    #[default]
    Auto,
    /// Always the finest stored level
    Finest,
}

/// Guard against retrievals that grow without bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetrievalLimits {
    /// Cancel with [`CancelReason::LowMemory`] once this many records are held
    pub max_records: Option<usize>,
}
impl RetrievalLimits {
    #[must_use]
    pub fn max_records(mut self, max_records: usize) -> Self {
        self.max_records = Some(max_records);
        self
    }
}

const RUNNING: u8 = 0;

fn reason_code(reason: CancelReason) -> u8 {
    match reason {
        CancelReason::Superseded => 1,
        CancelReason::Explicit => 2,
        CancelReason::LowMemory => 3,
    }
}

fn reason_from_code(code: u8) -> Option<CancelReason> {
    match code {
        1 => Some(CancelReason::Superseded),
        2 => Some(CancelReason::Explicit),
        3 => Some(CancelReason::LowMemory),
        _ => None,
    }
}

/// Shared cancellation flag for one retrieval.
///
/// Clones observe the same state. The first cancellation reason sticks.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    state: Arc<AtomicU8>,
    limits: RetrievalLimits,
}
impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_limits(limits: RetrievalLimits) -> Self {
        Self {
            state: Arc::default(),
            limits,
        }
    }

    #[must_use]
    pub fn limits(&self) -> RetrievalLimits {
        self.limits
    }

    /// Cancels on behalf of the caller
    pub fn cancel(&self) {
        self.cancel_with(CancelReason::Explicit);
    }

    /// Cancels with `reason` unless the token is already cancelled
    pub fn cancel_with(&self, reason: CancelReason) {
        let _ = self.state.compare_exchange(
            RUNNING,
            reason_code(reason),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) != RUNNING
    }

    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        reason_from_code(self.state.load(Ordering::Acquire))
    }

    /// Fails with [`RetrievalError::Cancelled`] if the token has been cancelled
    pub fn check(&self) -> Result<()> {
        match self.reason() {
            Some(reason) => Err(RetrievalError::Cancelled(reason).into()),
            None => Ok(()),
        }
    }

    /// Checks for cancellation between records, tripping the memory guard first
    ///
    /// # Arguments
    ///
    /// * `records` - number of records the retrieval currently holds
    pub fn checkpoint(&self, records: usize) -> Result<()> {
        if self.limits.max_records.is_some_and(|max| records >= max) {
            self.cancel_with(CancelReason::LowMemory);
        }
        self.check()
    }
}

/// A track that answers range queries
pub trait DataSource: Send {
    type Record: Send + 'static;

    /// URI the source was opened from
    fn uri(&self) -> &str;

    /// Reference names in file order
    fn references(&self) -> &[String];

    /// Reads the records of `reference` over `range` in a single attempt.
    ///
    /// An absent reference yields an empty result.
    fn fetch(
        &mut self,
        reference: &str,
        range: GenomicRange,
        resolution: Resolution,
        token: &CancellationToken,
    ) -> Result<Vec<Self::Record>>;

    /// Drops any cache entry for the source and reopens it from the original URI
    fn reopen(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    /// Reads records, retrying once after a transient failure
    fn records(
        &mut self,
        reference: &str,
        range: GenomicRange,
        resolution: Resolution,
        token: &CancellationToken,
    ) -> Result<Vec<Self::Record>> {
        match self.fetch(reference, range, resolution, token) {
            Err(e) if e.is_transient() => {
                warn!(
                    "retrieval of {reference}:{range} from {} failed ({e}), retrying once",
                    self.uri()
                );
                self.reopen()?;
                self.fetch(reference, range, resolution, token)
            }
            result => result,
        }
    }
}

/// How a scheduled retrieval ended
#[derive(Debug)]
pub enum RetrievalOutcome<T> {
    Completed(Vec<T>),
    /// Not a failure; the view should not report an error
    Cancelled(CancelReason),
    Failed(Error),
}
impl<T> RetrievalOutcome<T> {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Returns the records of a completed retrieval
    #[must_use]
    pub fn into_records(self) -> Option<Vec<T>> {
        match self {
            Self::Completed(records) => Some(records),
            _ => None,
        }
    }

    fn from_result(result: Result<Vec<T>>) -> Self {
        match result {
            Ok(records) => Self::Completed(records),
            Err(Error::RetrievalError(RetrievalError::Cancelled(reason))) => {
                Self::Cancelled(reason)
            }
            Err(e) => Self::Failed(e),
        }
    }
}

/// A retrieval running on its own worker thread
pub struct RetrievalHandle<T> {
    token: CancellationToken,
    worker: JoinHandle<Result<Vec<T>>>,
}
impl<T> RetrievalHandle<T> {
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Waits for the worker and classifies its result
    pub fn join(self) -> RetrievalOutcome<T> {
        match self.worker.join() {
            Ok(result) => RetrievalOutcome::from_result(result),
            Err(payload) => RetrievalOutcome::Failed(Error::GenericError(
                panic_message(payload.as_ref()).into(),
            )),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("retrieval worker panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("retrieval worker panicked: {message}")
    } else {
        "retrieval worker panicked".to_string()
    }
}

/// Runs requests against one track, at most one of them active at a time
pub struct TrackRetriever<S: DataSource> {
    source: Arc<Mutex<S>>,
    current: Mutex<Option<CancellationToken>>,
    limits: RetrievalLimits,
}
impl<S: DataSource + 'static> TrackRetriever<S> {
    pub fn new(source: S) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
            current: Mutex::new(None),
            limits: RetrievalLimits::default(),
        }
    }

    /// Set the memory guard applied to every request
    #[must_use]
    pub fn with_limits(mut self, limits: RetrievalLimits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn source(&self) -> &Arc<Mutex<S>> {
        &self.source
    }

    /// Starts a retrieval, superseding any request still in flight.
    ///
    /// The source is locked for the duration of the worker, so a superseded
    /// worker releases it at its next checkpoint.
    pub fn request(
        &self,
        reference: &str,
        range: GenomicRange,
        resolution: Resolution,
    ) -> RetrievalHandle<S::Record> {
        let token = CancellationToken::with_limits(self.limits);
        if let Some(previous) = self.current.lock().replace(token.clone()) {
            previous.cancel_with(CancelReason::Superseded);
        }

        let source = Arc::clone(&self.source);
        let reference = reference.to_string();
        let worker_token = token.clone();
        let worker = thread::spawn(move || -> Result<Vec<S::Record>> {
            let mut source = source.lock();
            worker_token.check()?;
            debug!("retrieving {reference}:{range} from {}", source.uri());
            source.records(&reference, range, resolution, &worker_token)
        });
        RetrievalHandle { token, worker }
    }

    /// Cancels the request in flight, if any
    pub fn cancel(&self) {
        if let Some(token) = self.current.lock().take() {
            token.cancel();
        }
    }

    /// Cancels the request in flight and closes the source
    pub fn close(&self) -> Result<()> {
        self.cancel();
        self.source.lock().close()
    }
}
