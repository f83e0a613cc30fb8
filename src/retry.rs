//! Retrying of download attempts.
use crate::error::{DownloadError, ErrorKind, Result};
use async_trait::async_trait;
use backoff::backoff::{Backoff as BackoffTrait, Constant};
use slog::{debug, warn, Logger};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Configuration for retrying a download.  The default makes a single attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Retry {
    /// Number of retries (not counting the first try) for transient errors.  Zero to disable
    /// retries entirely. (default 0)
    pub retries: u32,

    /// Fixed delay between a failed attempt and the next one. (default 0)
    pub delay: Duration,
}

impl Retry {
    pub fn new(retries: u32, delay: Duration) -> Self {
        Self { retries, delay }
    }
}

/// Backoff tracker for a single, possibly-retried operation.  This is a thin wrapper around
/// [backoff::backoff::Constant] that counts retries.
#[derive(Debug)]
pub(crate) struct Backoff<'a> {
    retry: &'a Retry,
    tries: u32,
    backoff: Constant,
}

impl<'a> Backoff<'a> {
    pub(crate) fn new(retry: &'a Retry) -> Self {
        Backoff {
            retry,
            tries: 0,
            backoff: Constant::new(retry.delay),
        }
    }

    /// Return the next backoff interval or, if the operation should not be retried,
    /// None.
    pub(crate) fn next_backoff(&mut self) -> Option<Duration> {
        self.tries += 1;
        if self.tries > self.retry.retries {
            None
        } else {
            self.backoff.next_backoff()
        }
    }
}

/// A single attempt at the operation being retried.
#[async_trait]
pub(crate) trait Attempt: Send {
    async fn attempt(&mut self) -> Result<()>;
}

/// The result of one attempt, after classification.
#[derive(Debug)]
pub(crate) enum Outcome {
    Success,
    Retryable(DownloadError),
    Fatal(DownloadError),
    Cancelled,
}

impl Outcome {
    /// Classify the result of an attempt.  Cancellation is checked first, so a cancelled
    /// download is never retried no matter how the attempt failed.
    pub(crate) fn classify(result: Result<()>, cancel: &CancellationToken) -> Self {
        let err = match result {
            Ok(()) => return Outcome::Success,
            Err(err) => err,
        };
        if cancel.is_cancelled() {
            return Outcome::Cancelled;
        }
        match err.kind() {
            ErrorKind::Cancelled => Outcome::Cancelled,
            ErrorKind::TransportFailure | ErrorKind::ChecksumMismatch => Outcome::Retryable(err),
            ErrorKind::InvalidMetadata
            | ErrorKind::TlsTrustFailure
            | ErrorKind::NotFound
            | ErrorKind::Oversize
            | ErrorKind::RetriesExhausted
            | ErrorKind::Storage => Outcome::Fatal(err),
        }
    }
}

/// States of a single logical download.
#[derive(Debug)]
enum State {
    Attempting,
    Retrying(Duration),
    Succeeded,
    FailedFatal(DownloadError),
    Cancelled,
}

/// Run attempts until one succeeds, one fails fatally, the retry budget is exhausted, or the
/// download is cancelled.  The delay between attempts is cut short by cancellation.
pub(crate) async fn run<A: Attempt>(
    retry: &Retry,
    cancel: &CancellationToken,
    logger: &Logger,
    attempt: &mut A,
) -> Result<()> {
    let mut backoff = Backoff::new(retry);
    let mut attempts = 0;
    let mut state = State::Attempting;

    loop {
        state = match state {
            State::Attempting if cancel.is_cancelled() => State::Cancelled,
            State::Attempting => {
                attempts += 1;
                debug!(logger, "starting attempt"; "attempt" => attempts);
                match Outcome::classify(attempt.attempt().await, cancel) {
                    Outcome::Success => State::Succeeded,
                    Outcome::Cancelled => State::Cancelled,
                    Outcome::Fatal(err) => State::FailedFatal(err),
                    Outcome::Retryable(err) => match backoff.next_backoff() {
                        Some(delay) => {
                            warn!(logger, "attempt failed; retrying";
                                "attempt" => attempts, "error" => %err, "delay" => ?delay);
                            State::Retrying(delay)
                        }
                        None => State::FailedFatal(DownloadError::RetriesExhausted {
                            attempts,
                            last: Box::new(err),
                        }),
                    },
                }
            }
            State::Retrying(delay) => tokio::select! {
                biased;
                _ = cancel.cancelled() => State::Cancelled,
                _ = tokio::time::sleep(delay) => State::Attempting,
            },
            State::Succeeded => return Ok(()),
            State::Cancelled => return Err(DownloadError::Cancelled),
            State::FailedFatal(err) => return Err(err),
        };
    }
}
