//! Completion signal for a submitted service-manager job.
//!
//! The manager answers a start/stop/restart request immediately with a job
//! handle and reports the outcome later.  [`JobCompletion`] is the receiving
//! half of that report: a future that resolves exactly once with the job's
//! result string.  [`JobReporter`] is the matching single-use sender, owned
//! by whatever task watches the manager's job signals.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;

use super::SystemdError;

/// Terminal result of a job as reported by the service manager
/// (`"done"`, `"failed"`, `"canceled"`, `"timeout"`, `"dependency"`, …).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult(String);

impl JobResult {
    pub const DONE: &'static str = "done";

    pub fn new(result: impl Into<String>) -> Self {
        Self(result.into())
    }

    pub fn is_done(&self) -> bool {
        self.0 == Self::DONE
    }
}

impl fmt::Display for JobResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Single-write half of a job completion.
#[derive(Debug)]
pub struct JobReporter {
    tx: oneshot::Sender<JobResult>,
}

impl JobReporter {
    /// Deliver the result.  Consumes the reporter, so a job can only be
    /// reported once; a receiver that has gone away is not an error.
    pub fn report(self, result: JobResult) {
        let _ = self.tx.send(result);
    }
}

/// Single-read half of a job completion.
///
/// Resolves with [`SystemdError::JobAbandoned`] if the reporter is dropped
/// without reporting.
#[derive(Debug)]
pub struct JobCompletion {
    unit: String,
    rx: oneshot::Receiver<JobResult>,
}

impl JobCompletion {
    /// A linked reporter/completion pair for a job on `unit`.
    pub fn channel(unit: impl Into<String>) -> (JobReporter, JobCompletion) {
        let (tx, rx) = oneshot::channel();
        (JobReporter { tx }, JobCompletion { unit: unit.into(), rx })
    }

    /// A completion that has already resolved.
    pub fn ready(unit: impl Into<String>, result: JobResult) -> Self {
        let (reporter, completion) = Self::channel(unit);
        reporter.report(result);
        completion
    }

    /// Wait for the result, giving up after `limit` when one is set.
    /// `None` waits for as long as the job takes.
    pub async fn wait(self, limit: Option<Duration>) -> Result<JobResult, SystemdError> {
        match limit {
            None => self.await,
            Some(after) => {
                let unit = self.unit.clone();
                tokio::time::timeout(after, self)
                    .await
                    .unwrap_or_else(|_| Err(SystemdError::JobTimeout { unit, after }))
            }
        }
    }
}

impl Future for JobCompletion {
    type Output = Result<JobResult, SystemdError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        Pin::new(&mut this.rx).poll(cx).map(|res| {
            res.map_err(|_| SystemdError::JobAbandoned { unit: this.unit.clone() })
        })
    }
}
