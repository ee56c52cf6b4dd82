//! In-memory fakes for unit tests: a scripted service manager, a recording
//! responder, and a recording presence sink.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::commands::Responder;
use crate::error::AppError;
use crate::status::PresenceSink;
use crate::systemd::{
    JobCompletion, JobReporter, JobResult, JobVerb, ServiceManager, StateSubscriber, Subscription,
    SystemdError,
};

pub fn dbus_failure(message: &str) -> SystemdError {
    SystemdError::Dbus(zbus::Error::Failure(message.to_string()))
}

// ── FakeSystemd ──────────────────────────────────────────────────────────────

/// Scripted [`ServiceManager`].  Every call is recorded as `"verb unit"`.
#[derive(Default)]
pub struct FakeSystemd {
    /// `ActiveState` per unit; `Err` text becomes a read error.
    pub states: HashMap<String, Result<String, String>>,
    /// Job result per unit; units not listed finish with `"done"`.
    pub job_results: HashMap<String, String>,
    /// Units whose submission is rejected with the given text.
    pub rejections: HashMap<String, String>,
    /// Units whose jobs never finish.
    pub stuck: HashSet<String>,
    pub calls: Mutex<Vec<String>>,
    held: Mutex<Vec<JobReporter>>,
}

impl FakeSystemd {
    pub fn with_state(mut self, unit: &str, state: &str) -> Self {
        self.states.insert(unit.into(), Ok(state.into()));
        self
    }

    pub fn with_state_error(mut self, unit: &str, message: &str) -> Self {
        self.states.insert(unit.into(), Err(message.into()));
        self
    }

    pub fn with_job_result(mut self, unit: &str, result: &str) -> Self {
        self.job_results.insert(unit.into(), result.into());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ServiceManager for FakeSystemd {
    async fn submit(&self, verb: JobVerb, unit: &str) -> Result<JobCompletion, SystemdError> {
        self.calls.lock().unwrap().push(format!("{verb} {unit}"));
        if let Some(message) = self.rejections.get(unit) {
            return Err(dbus_failure(message));
        }
        if self.stuck.contains(unit) {
            let (reporter, completion) = JobCompletion::channel(unit);
            self.held.lock().unwrap().push(reporter);
            return Ok(completion);
        }
        let result = self.job_results.get(unit).map(String::as_str).unwrap_or(JobResult::DONE);
        Ok(JobCompletion::ready(unit, JobResult::new(result)))
    }

    async fn active_state(&self, unit: &str) -> Result<String, SystemdError> {
        self.calls.lock().unwrap().push(format!("status {unit}"));
        match self.states.get(unit) {
            Some(Ok(state)) => Ok(state.clone()),
            Some(Err(message)) => Err(dbus_failure(message)),
            None => Err(dbus_failure(&format!("Unit {unit} not loaded."))),
        }
    }
}

// ── FakeSubscriber ───────────────────────────────────────────────────────────

/// Hands out a pre-built [`Subscription`] once and records the units asked for.
pub struct FakeSubscriber {
    subscription: Mutex<Option<Subscription>>,
    pub subscribed: Mutex<Vec<String>>,
}

impl FakeSubscriber {
    pub fn new(subscription: Subscription) -> Self {
        Self { subscription: Mutex::new(Some(subscription)), subscribed: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl StateSubscriber for FakeSubscriber {
    async fn subscribe(&self, units: Vec<String>) -> Subscription {
        self.subscribed.lock().unwrap().extend(units);
        match self.subscription.lock().unwrap().take() {
            Some(subscription) => subscription,
            None => {
                let (_, batches) = mpsc::channel(1);
                let (_, errors) = mpsc::channel(1);
                Subscription { batches, errors }
            }
        }
    }
}

// ── RecordingResponder ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Immediate(String),
    Deferred,
    FollowUp(String),
}

/// [`Responder`] that records what the engine sent.
#[derive(Default)]
pub struct RecordingResponder {
    pub fail_defer: bool,
    pub replies: Mutex<Vec<Reply>>,
}

impl RecordingResponder {
    pub fn failing_defer() -> Self {
        Self { fail_defer: true, ..Default::default() }
    }

    pub fn replies(&self) -> Vec<Reply> {
        self.replies.lock().unwrap().clone()
    }
}

#[async_trait]
impl Responder for RecordingResponder {
    async fn respond(&self, content: String) -> Result<(), AppError> {
        self.replies.lock().unwrap().push(Reply::Immediate(content));
        Ok(())
    }

    async fn defer(&self) -> Result<(), AppError> {
        if self.fail_defer {
            return Err(AppError::Discord("interaction expired".into()));
        }
        self.replies.lock().unwrap().push(Reply::Deferred);
        Ok(())
    }

    async fn follow_up(&self, content: String) -> Result<(), AppError> {
        self.replies.lock().unwrap().push(Reply::FollowUp(content));
        Ok(())
    }
}

// ── ChannelPresence ──────────────────────────────────────────────────────────

/// [`PresenceSink`] that forwards every presence text to a channel.
pub struct ChannelPresence {
    pub tx: mpsc::UnboundedSender<String>,
    pub fail: bool,
}

#[async_trait]
impl PresenceSink for ChannelPresence {
    async fn set_presence(&self, text: &str) -> Result<(), AppError> {
        let _ = self.tx.send(text.to_string());
        if self.fail {
            return Err(AppError::Discord("shard offline".into()));
        }
        Ok(())
    }
}
