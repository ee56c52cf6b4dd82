//! Status watcher: mirrors running units into the bot's presence.
//!
//! One task per process.  It opens a single subscription over every
//! status-readable unit, folds each [`StatusBatch`] into [`ActiveStates`], and
//! pushes the resulting presence text.  Neither subscription errors nor
//! presence failures stop it; only the shutdown token does.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::systemd::{StateSubscriber, StatusBatch};

/// Separator between unit names in the presence text.
pub const PRESENCE_SEPARATOR: &str = ", ";

/// Where the presence text goes.  An empty text clears the presence.
#[async_trait]
pub trait PresenceSink: Send + Sync {
    async fn set_presence(&self, text: &str) -> Result<(), AppError>;
}

// ── ActiveStates ─────────────────────────────────────────────────────────────

/// Accumulated `unit -> is active` knowledge for the watched units.
///
/// Keys only ever get added: a batch overwrites the units it reports and
/// leaves every other unit at its last known value.
#[derive(Debug, Clone, Default)]
pub struct ActiveStates {
    units: Vec<String>,
    active: HashMap<String, bool>,
}

impl ActiveStates {
    /// `units` fixes the order of the presence text.
    pub fn new(units: Vec<String>) -> Self {
        Self { units, active: HashMap::new() }
    }

    pub fn merge(&mut self, batch: &StatusBatch) {
        for (unit, status) in batch {
            self.active.insert(unit.clone(), status.is_active());
        }
    }

    /// Active units in watch order.  Units never reported count as inactive.
    pub fn active_units(&self) -> Vec<&str> {
        self.units
            .iter()
            .filter(|unit| self.active.get(unit.as_str()).copied().unwrap_or(false))
            .map(String::as_str)
            .collect()
    }

    pub fn presence(&self) -> String {
        self.active_units().join(PRESENCE_SEPARATOR)
    }
}

// ── Watcher ──────────────────────────────────────────────────────────────────

/// Watch `units` until `shutdown` fires.
pub async fn run(
    units: Vec<String>,
    subscriber: Arc<dyn StateSubscriber>,
    presence: Arc<dyn PresenceSink>,
    shutdown: CancellationToken,
) {
    let mut states = ActiveStates::new(units.clone());
    let mut subscription = subscriber.subscribe(units).await;
    let mut errors_open = true;

    info!("status watcher started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("status watcher: shutdown signal received");
                return;
            }
            batch = subscription.batches.recv() => {
                let Some(batch) = batch else {
                    warn!("status subscription closed, presence will no longer update");
                    shutdown.cancelled().await;
                    return;
                };
                states.merge(&batch);
                let text = states.presence();
                debug!(changed = batch.len(), presence = %text, "unit states changed");
                if let Err(e) = presence.set_presence(&text).await {
                    warn!(error = %e, "could not update presence");
                }
            }
            error = subscription.errors.recv(), if errors_open => match error {
                Some(e) => warn!(error = %e, "status subscription error"),
                None => errors_open = false,
            },
        }
    }
}
