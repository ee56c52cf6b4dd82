//! Command execution engine.
//!
//! Each routed command runs through a fixed sequence:
//!
//! - **start / stop / restart**: authorise → defer the reply → submit the job
//!   → wait for its completion → follow up with the outcome.
//! - **status** without a unit: read every status-permitted unit in order and
//!   answer immediately with the non-inactive ones.
//! - **status** with a unit: authorise → read once → answer immediately.
//!
//! Authorisation failures end the command before the service manager is
//! touched.  A failed defer ends it with only a log line; no job is submitted.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::systemd::{JobVerb, STATE_INACTIVE, ServiceManager};
use crate::units::{Command, CommandUnitIndex};

use super::RoutedCommand;

/// Reply to a unit the command may not target.
pub const NOT_ALLOWED: &str = "Command is not allowed";

/// Aggregate status reply when no unit is running.
pub const NOTHING_ACTIVE: &str = "Nothing is active";

// ── Responder ────────────────────────────────────────────────────────────────

/// Reply channel for one invocation.
#[async_trait]
pub trait Responder: Send + Sync {
    /// Answer right away with `content`.
    async fn respond(&self, content: String) -> Result<(), AppError>;

    /// Acknowledge now, promising a [`Responder::follow_up`] later.
    async fn defer(&self) -> Result<(), AppError>;

    /// Deliver the answer promised by [`Responder::defer`].
    async fn follow_up(&self, content: String) -> Result<(), AppError>;
}

// ── Dispatch ─────────────────────────────────────────────────────────────────

/// Everything a handler may touch while running one invocation.
pub struct ExecContext<'a> {
    pub command: Command,
    pub unit: Option<&'a str>,
    pub units: &'a CommandUnitIndex,
    pub systemd: &'a dyn ServiceManager,
    pub responder: &'a dyn Responder,
    pub job_timeout: Option<Duration>,
}

pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

pub type Handler = for<'a> fn(ExecContext<'a>) -> HandlerFuture<'a>;

/// The handler table.
pub fn handler_for(command: Command) -> Handler {
    match command {
        Command::Start | Command::Stop | Command::Restart => job_handler as Handler,
        Command::Status => status_handler as Handler,
    }
}

fn job_handler<'a>(ctx: ExecContext<'a>) -> HandlerFuture<'a> {
    Box::pin(run_job(ctx))
}

fn status_handler<'a>(ctx: ExecContext<'a>) -> HandlerFuture<'a> {
    Box::pin(run_status(ctx))
}

// ── Engine ───────────────────────────────────────────────────────────────────

/// Shared, read-only collaborators for every invocation.
pub struct Engine {
    units: Arc<CommandUnitIndex>,
    systemd: Arc<dyn ServiceManager>,
    job_timeout: Option<Duration>,
}

impl Engine {
    pub fn new(
        units: Arc<CommandUnitIndex>,
        systemd: Arc<dyn ServiceManager>,
        job_timeout: Option<Duration>,
    ) -> Self {
        Self { units, systemd, job_timeout }
    }

    /// Run `routed` to completion, answering through `responder`.
    /// Unknown command names are ignored.
    pub async fn execute(&self, routed: &RoutedCommand, responder: &dyn Responder) {
        let command = match routed.name.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                debug!("no handler: {e}");
                return;
            }
        };
        debug!(%command, unit = routed.unit().unwrap_or_default(), "executing command");

        let ctx = ExecContext {
            command,
            unit: routed.unit(),
            units: &self.units,
            systemd: self.systemd.as_ref(),
            responder,
            job_timeout: self.job_timeout,
        };
        handler_for(command)(ctx).await;
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn run_job(ctx: ExecContext<'_>) {
    let Some(verb) = JobVerb::for_command(ctx.command) else {
        debug!(command = %ctx.command, "command has no job verb");
        return;
    };
    let Some(unit) = authorize(&ctx).await else {
        return;
    };

    if let Err(e) = ctx.responder.defer().await {
        warn!(command = %ctx.command, %unit, error = %e, "could not acknowledge command, dropping it");
        return;
    }

    let reply = match ctx.systemd.submit(verb, unit).await {
        Err(e) => {
            warn!(%verb, %unit, error = %e, "job submission failed");
            e.to_string()
        }
        Ok(completion) => match completion.wait(ctx.job_timeout).await {
            Ok(result) if result.is_done() => {
                info!(%verb, %unit, "job done");
                verb.done_message(unit)
            }
            Ok(result) => {
                info!(%verb, %unit, %result, "job finished without success");
                result.to_string()
            }
            Err(e) => {
                warn!(%verb, %unit, error = %e, "job did not report");
                e.to_string()
            }
        },
    };

    if let Err(e) = ctx.responder.follow_up(reply).await {
        warn!(%verb, %unit, error = %e, "could not send follow-up");
    }
}

async fn run_status(ctx: ExecContext<'_>) {
    let reply = match ctx.unit {
        None => aggregate_status(ctx.units.units(Command::Status), ctx.systemd).await,
        Some(_) => {
            let Some(unit) = authorize(&ctx).await else {
                return;
            };
            match ctx.systemd.active_state(unit).await {
                Ok(state) => state,
                Err(e) => {
                    warn!(%unit, error = %e, "could not read unit state");
                    e.to_string()
                }
            }
        }
    };
    respond(ctx.responder, reply).await;
}

/// Status report over `units`, read one at a time so lines keep unit order.
/// Inactive units are left out; read failures still get a line.
pub async fn aggregate_status(units: &[String], systemd: &dyn ServiceManager) -> String {
    let mut lines = Vec::new();
    for unit in units {
        match systemd.active_state(unit).await {
            Ok(state) if state == STATE_INACTIVE => {}
            Ok(state) => lines.push(format!("{unit}: {state}")),
            Err(e) => {
                warn!(%unit, error = %e, "error fetching unit state");
                lines.push(format!("{unit}: error getting status"));
            }
        }
    }
    if lines.is_empty() {
        NOTHING_ACTIVE.to_string()
    } else {
        lines.join("\n")
    }
}

/// The requested unit, if the command may target it.  Otherwise answers
/// [`NOT_ALLOWED`] and returns `None`.
async fn authorize<'a>(ctx: &ExecContext<'a>) -> Option<&'a str> {
    match ctx.unit {
        Some(unit) if ctx.units.is_allowed(ctx.command, unit) => Some(unit),
        unit => {
            warn!(command = %ctx.command, unit = unit.unwrap_or_default(), "command is not allowed for unit");
            respond(ctx.responder, NOT_ALLOWED.to_string()).await;
            None
        }
    }
}

async fn respond(responder: &dyn Responder, content: String) {
    if let Err(e) = responder.respond(content).await {
        warn!(error = %e, "could not send reply");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CommandOption;
    use crate::testing::{FakeSystemd, RecordingResponder, Reply};
    use crate::units::{Permission, Unit};

    fn index() -> Arc<CommandUnitIndex> {
        Arc::new(CommandUnitIndex::from_units(&[
            Unit::new("startable", [Permission::Start]),
            Unit::new("stoppable", [Permission::Stop]),
            Unit::new("restartable", [Permission::Start, Permission::Stop]),
            Unit::new("a", [Permission::Status]),
            Unit::new("b", [Permission::Status]),
            Unit::new("c", [Permission::Status]),
        ]))
    }

    fn routed(name: &str, unit: Option<&str>) -> RoutedCommand {
        RoutedCommand {
            name: name.into(),
            options: unit.map(|u| vec![CommandOption::string("unit", u)]).unwrap_or_default(),
        }
    }

    async fn run(
        systemd: FakeSystemd,
        responder: &RecordingResponder,
        command: RoutedCommand,
    ) -> Arc<FakeSystemd> {
        let systemd = Arc::new(systemd);
        let engine = Engine::new(index(), systemd.clone(), None);
        engine.execute(&command, responder).await;
        systemd
    }

    #[tokio::test]
    async fn start_defers_then_reports_done() {
        let responder = RecordingResponder::default();
        let systemd = run(FakeSystemd::default(), &responder, routed("start", Some("startable.service"))).await;
        assert_eq!(systemd.calls(), ["start startable.service"]);
        assert_eq!(
            responder.replies(),
            [Reply::Deferred, Reply::FollowUp("Started startable.service".into())]
        );
    }

    #[tokio::test]
    async fn stop_and_restart_report_done() {
        let responder = RecordingResponder::default();
        run(FakeSystemd::default(), &responder, routed("stop", Some("stoppable.service"))).await;
        run(FakeSystemd::default(), &responder, routed("restart", Some("restartable.service"))).await;
        assert_eq!(
            responder.replies(),
            [
                Reply::Deferred,
                Reply::FollowUp("Stopped stoppable.service".into()),
                Reply::Deferred,
                Reply::FollowUp("Restarted restartable.service".into()),
            ]
        );
    }

    #[tokio::test]
    async fn other_job_results_are_reported_verbatim() {
        for result in ["failed", "canceled", "timeout", "dependency"] {
            let responder = RecordingResponder::default();
            let systemd = FakeSystemd::default().with_job_result("startable.service", result);
            run(systemd, &responder, routed("start", Some("startable.service"))).await;
            assert_eq!(responder.replies(), [Reply::Deferred, Reply::FollowUp(result.into())]);
        }
    }

    #[tokio::test]
    async fn submission_error_text_is_the_reply() {
        let responder = RecordingResponder::default();
        let mut systemd = FakeSystemd::default();
        systemd
            .rejections
            .insert("startable.service".into(), "Unit startable.service is masked.".into());
        run(systemd, &responder, routed("start", Some("startable.service"))).await;
        let replies = responder.replies();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0], Reply::Deferred);
        assert!(matches!(&replies[1], Reply::FollowUp(text) if text.contains("is masked")));
    }

    #[tokio::test]
    async fn disallowed_unit_never_reaches_systemd() {
        let responder = RecordingResponder::default();
        // Restart needs both permissions; startable only has start.
        let systemd = run(FakeSystemd::default(), &responder, routed("restart", Some("startable.service"))).await;
        assert!(systemd.calls().is_empty());
        assert_eq!(responder.replies(), [Reply::Immediate(NOT_ALLOWED.into())]);
    }

    #[tokio::test]
    async fn missing_unit_is_not_allowed() {
        let responder = RecordingResponder::default();
        let systemd = run(FakeSystemd::default(), &responder, routed("stop", None)).await;
        assert!(systemd.calls().is_empty());
        assert_eq!(responder.replies(), [Reply::Immediate(NOT_ALLOWED.into())]);
    }

    #[tokio::test]
    async fn failed_defer_skips_job_and_follow_up() {
        let responder = RecordingResponder::failing_defer();
        let systemd = run(FakeSystemd::default(), &responder, routed("start", Some("startable.service"))).await;
        assert!(systemd.calls().is_empty());
        assert!(responder.replies().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_job_times_out_when_bounded() {
        let responder = RecordingResponder::default();
        let mut systemd = FakeSystemd::default();
        systemd.stuck.insert("startable.service".into());
        let engine = Engine::new(index(), Arc::new(systemd), Some(Duration::from_secs(60)));
        engine.execute(&routed("start", Some("startable.service")), &responder).await;
        assert_eq!(
            responder.replies(),
            [
                Reply::Deferred,
                Reply::FollowUp("gave up waiting for startable.service after 60s".into())
            ]
        );
    }

    #[tokio::test]
    async fn aggregate_status_skips_inactive_and_keeps_errors() {
        let responder = RecordingResponder::default();
        let systemd = FakeSystemd::default()
            .with_state("a.service", "active")
            .with_state("b.service", "inactive")
            .with_state_error("c.service", "Connection reset");
        let systemd = run(systemd, &responder, routed("status", None)).await;
        assert_eq!(systemd.calls(), ["status a.service", "status b.service", "status c.service"]);
        assert_eq!(
            responder.replies(),
            [Reply::Immediate("a.service: active\nc.service: error getting status".into())]
        );
    }

    #[tokio::test]
    async fn aggregate_status_with_nothing_running() {
        let responder = RecordingResponder::default();
        let systemd = FakeSystemd::default()
            .with_state("a.service", "inactive")
            .with_state("b.service", "inactive")
            .with_state("c.service", "inactive");
        run(systemd, &responder, routed("status", None)).await;
        assert_eq!(responder.replies(), [Reply::Immediate(NOTHING_ACTIVE.into())]);
    }

    #[tokio::test]
    async fn aggregate_status_reports_transitional_states() {
        let responder = RecordingResponder::default();
        let systemd = FakeSystemd::default()
            .with_state("a.service", "activating")
            .with_state("b.service", "failed")
            .with_state("c.service", "inactive");
        run(systemd, &responder, routed("status", None)).await;
        assert_eq!(
            responder.replies(),
            [Reply::Immediate("a.service: activating\nb.service: failed".into())]
        );
    }

    #[tokio::test]
    async fn single_status_reports_inactive() {
        let responder = RecordingResponder::default();
        let systemd = FakeSystemd::default().with_state("b.service", "inactive");
        run(systemd, &responder, routed("status", Some("b.service"))).await;
        assert_eq!(responder.replies(), [Reply::Immediate("inactive".into())]);
    }

    #[tokio::test]
    async fn single_status_error_text_is_the_reply() {
        let responder = RecordingResponder::default();
        let systemd = FakeSystemd::default().with_state_error("a.service", "Access denied");
        run(systemd, &responder, routed("status", Some("a.service"))).await;
        let replies = responder.replies();
        assert!(matches!(&replies[..], [Reply::Immediate(text)] if text.contains("Access denied")));
    }

    #[tokio::test]
    async fn single_status_requires_permission() {
        let responder = RecordingResponder::default();
        let systemd = run(FakeSystemd::default(), &responder, routed("status", Some("startable.service"))).await;
        assert!(systemd.calls().is_empty());
        assert_eq!(responder.replies(), [Reply::Immediate(NOT_ALLOWED.into())]);
    }

    #[tokio::test]
    async fn unknown_command_is_ignored() {
        let responder = RecordingResponder::default();
        let systemd = run(FakeSystemd::default(), &responder, routed("reload", Some("a.service"))).await;
        assert!(systemd.calls().is_empty());
        assert!(responder.replies().is_empty());
    }

    #[test]
    fn every_command_has_a_handler() {
        for command in Command::ALL {
            let _ = handler_for(command);
        }
    }
}
