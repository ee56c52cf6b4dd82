//! Service-manager adapter.
//!
//! The rest of the bot talks to systemd through two narrow traits:
//!
//! - [`ServiceManager`] submits start/stop/restart jobs and reads a unit's
//!   `ActiveState`.  Submission returns as soon as the job is queued; the
//!   outcome arrives later through a [`JobCompletion`].
//! - [`StateSubscriber`] opens one shared subscription over a set of units
//!   and streams [`StatusBatch`]es of state changes.
//!
//! [`dbus::DbusSystemd`] implements both over the system bus.  Tests use
//! in-memory fakes.

pub mod dbus;
pub mod job;

pub use job::{JobCompletion, JobReporter, JobResult};

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::units::Command;

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SystemdError {
    /// Transport or manager-side failure; the text is shown to users as-is.
    #[error(transparent)]
    Dbus(#[from] zbus::Error),

    #[error("lost track of the job for {unit} before it finished")]
    JobAbandoned { unit: String },

    #[error("gave up waiting for {unit} after {}s", .after.as_secs())]
    JobTimeout { unit: String, after: Duration },
}

// ── Jobs ─────────────────────────────────────────────────────────────────────

/// The job kinds the bot may enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobVerb {
    Start,
    Stop,
    Restart,
}

impl JobVerb {
    /// The job verb behind a chat command; `Status` enqueues nothing.
    pub fn for_command(command: Command) -> Option<Self> {
        match command {
            Command::Start => Some(JobVerb::Start),
            Command::Stop => Some(JobVerb::Stop),
            Command::Restart => Some(JobVerb::Restart),
            Command::Status => None,
        }
    }

    /// Reply sent when a job on `unit` finishes with `"done"`.
    pub fn done_message(&self, unit: &str) -> String {
        match self {
            JobVerb::Start => format!("Started {unit}"),
            JobVerb::Stop => format!("Stopped {unit}"),
            JobVerb::Restart => format!("Restarted {unit}"),
        }
    }
}

impl fmt::Display for JobVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobVerb::Start => "start",
            JobVerb::Stop => "stop",
            JobVerb::Restart => "restart",
        })
    }
}

/// Mode passed with every job: replace conflicting queued jobs.
pub const JOB_MODE_REPLACE: &str = "replace";

/// `ActiveState` value the aggregate status report leaves out.
pub const STATE_INACTIVE: &str = "inactive";

/// `ActiveState` value that counts a unit as running in the presence text.
pub const STATE_ACTIVE: &str = "active";

// ── Subscription ─────────────────────────────────────────────────────────────

/// Snapshot of one unit inside a [`StatusBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitStatus {
    pub active_state: String,
}

impl UnitStatus {
    pub fn new(active_state: impl Into<String>) -> Self {
        Self { active_state: active_state.into() }
    }

    pub fn is_active(&self) -> bool {
        self.active_state == STATE_ACTIVE
    }
}

/// Units whose state changed since the previous batch, keyed by unit name.
pub type StatusBatch = HashMap<String, UnitStatus>;

/// Receiving ends of an open subscription.
pub struct Subscription {
    pub batches: mpsc::Receiver<StatusBatch>,
    pub errors: mpsc::Receiver<SystemdError>,
}

// ── Traits ───────────────────────────────────────────────────────────────────

#[async_trait]
pub trait ServiceManager: Send + Sync {
    /// Enqueue a job on `unit`.  Returns once the manager has accepted (or
    /// rejected) the job, not when it finishes.
    async fn submit(&self, verb: JobVerb, unit: &str) -> Result<JobCompletion, SystemdError>;

    /// Current `ActiveState` of `unit`.
    async fn active_state(&self, unit: &str) -> Result<String, SystemdError>;
}

#[async_trait]
pub trait StateSubscriber: Send + Sync {
    /// Watch `units` and stream their state changes until the returned
    /// receivers are dropped.
    async fn subscribe(&self, units: Vec<String>) -> Subscription;
}
