//! systemd over the system D-Bus.
//!
//! Jobs are enqueued with `StartUnit`/`StopUnit`/`RestartUnit` and their
//! outcome is read from the manager's `JobRemoved` signal.  Unit state comes
//! from the `ActiveState` property of the unit object returned by `LoadUnit`.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::{StreamExt, StreamMap};
use tracing::{debug, info, warn};
use zbus::proxy;
use zbus::proxy::PropertyStream;
use zbus::zvariant::{ObjectPath, OwnedObjectPath};
use zbus::Connection;

use super::{
    JOB_MODE_REPLACE, JobCompletion, JobResult, JobVerb, ServiceManager, StateSubscriber,
    StatusBatch, Subscription, SystemdError, UnitStatus,
};

/// Capacity of each subscription channel.
const SUBSCRIPTION_BUFFER: usize = 32;

// ── Proxies ──────────────────────────────────────────────────────────────────

#[proxy(
    interface = "org.freedesktop.systemd1.Manager",
    default_service = "org.freedesktop.systemd1",
    default_path = "/org/freedesktop/systemd1",
    gen_blocking = false
)]
trait SystemdManager {
    fn start_unit(&self, name: &str, mode: &str) -> zbus::Result<OwnedObjectPath>;

    fn stop_unit(&self, name: &str, mode: &str) -> zbus::Result<OwnedObjectPath>;

    fn restart_unit(&self, name: &str, mode: &str) -> zbus::Result<OwnedObjectPath>;

    #[zbus(object = "SystemdUnit")]
    fn load_unit(&self, name: &str);

    /// Ask the manager to emit job and unit signals to this connection.
    fn subscribe(&self) -> zbus::Result<()>;

    #[zbus(signal)]
    fn job_removed(
        &self,
        id: u32,
        job: ObjectPath<'_>,
        unit: &str,
        result: &str,
    ) -> zbus::Result<()>;
}

#[proxy(
    interface = "org.freedesktop.systemd1.Unit",
    default_service = "org.freedesktop.systemd1",
    gen_blocking = false
)]
trait SystemdUnit {
    #[zbus(property)]
    fn active_state(&self) -> zbus::Result<String>;
}

// ── DbusSystemd ──────────────────────────────────────────────────────────────

/// [`ServiceManager`] and [`StateSubscriber`] backed by the system bus.
#[derive(Clone)]
pub struct DbusSystemd {
    manager: SystemdManagerProxy<'static>,
}

impl DbusSystemd {
    /// Connect to the system bus and subscribe to manager signals.
    pub async fn connect() -> Result<Self, SystemdError> {
        let conn = Connection::system().await?;
        let manager = SystemdManagerProxy::new(&conn).await?;
        manager.subscribe().await?;
        info!("connected to systemd on the system bus");
        Ok(Self { manager })
    }
}

#[async_trait]
impl ServiceManager for DbusSystemd {
    async fn submit(&self, verb: JobVerb, unit: &str) -> Result<JobCompletion, SystemdError> {
        // Listen before enqueuing: a fast job can finish before the reply.
        let mut removed = self.manager.receive_job_removed().await?;

        let job = match verb {
            JobVerb::Start => self.manager.start_unit(unit, JOB_MODE_REPLACE).await?,
            JobVerb::Stop => self.manager.stop_unit(unit, JOB_MODE_REPLACE).await?,
            JobVerb::Restart => self.manager.restart_unit(unit, JOB_MODE_REPLACE).await?,
        };
        debug!(%unit, %verb, job = %job.as_str(), "job queued");

        let (reporter, completion) = JobCompletion::channel(unit);
        let unit = unit.to_string();
        tokio::spawn(async move {
            while let Some(signal) = removed.next().await {
                let args = match signal.args() {
                    Ok(args) => args,
                    Err(e) => {
                        warn!(%unit, error = %e, "unreadable JobRemoved signal");
                        continue;
                    }
                };
                if args.job().as_str() == job.as_str() {
                    debug!(%unit, result = %args.result(), "job finished");
                    reporter.report(JobResult::new(*args.result()));
                    return;
                }
            }
            warn!(%unit, "JobRemoved stream closed before the job finished");
        });

        Ok(completion)
    }

    async fn active_state(&self, unit: &str) -> Result<String, SystemdError> {
        let proxy = self.manager.load_unit(unit).await?;
        Ok(proxy.active_state().await?)
    }
}

#[async_trait]
impl StateSubscriber for DbusSystemd {
    async fn subscribe(&self, units: Vec<String>) -> Subscription {
        let (batch_tx, batches) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let (error_tx, errors) = mpsc::channel(SUBSCRIPTION_BUFFER);
        tokio::spawn(forward_state_changes(
            self.manager.clone(),
            units,
            batch_tx,
            error_tx,
        ));
        Subscription { batches, errors }
    }
}

// ── forward_state_changes ────────────────────────────────────────────────────

/// Emit one batch with every reachable unit's current state, then one batch
/// per observed `ActiveState` change.  Returns when the batch receiver is
/// dropped or every property stream has ended.
async fn forward_state_changes(
    manager: SystemdManagerProxy<'static>,
    units: Vec<String>,
    batch_tx: mpsc::Sender<StatusBatch>,
    error_tx: mpsc::Sender<SystemdError>,
) {
    let mut streams: StreamMap<String, PropertyStream<'static, String>> = StreamMap::new();
    let mut initial = StatusBatch::new();

    for unit in units {
        let proxy = match manager.load_unit(&unit).await {
            Ok(proxy) => proxy,
            Err(e) => {
                warn!(%unit, error = %e, "cannot watch unit");
                let _ = error_tx.send(e.into()).await;
                continue;
            }
        };
        streams.insert(unit.clone(), proxy.receive_active_state_changed().await);
        match proxy.active_state().await {
            Ok(state) => {
                initial.insert(unit, UnitStatus::new(state));
            }
            Err(e) => {
                let _ = error_tx.send(e.into()).await;
            }
        }
    }

    debug!(units = streams.len(), "state subscription open");
    if batch_tx.send(initial).await.is_err() {
        return;
    }

    while let Some((unit, changed)) = streams.next().await {
        match changed.get().await {
            Ok(state) => {
                let batch = StatusBatch::from([(unit, UnitStatus::new(state))]);
                if batch_tx.send(batch).await.is_err() {
                    debug!("state subscriber dropped, closing subscription");
                    return;
                }
            }
            Err(e) => {
                let _ = error_tx.send(e.into()).await;
            }
        }
    }

    debug!("all unit property streams ended");
}
