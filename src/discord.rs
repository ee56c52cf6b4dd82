//! Discord gateway adapter (serenity).
//!
//! Connects with the `GUILDS` intent only.  On `ready` the command surface is
//! registered in the configured guild and the status watcher is started;
//! every slash-command interaction is converted into a [`CommandInvocation`],
//! routed, and handed to the [`Engine`].
//!
//! A failed command registration is fatal: the handler records it and fires
//! the shutdown token, and [`run`] returns [`AppError::CommandRegistration`].

use std::sync::{Arc, OnceLock};
use std::sync::atomic::{AtomicBool, Ordering};

use serenity::all::{
    ActivityData, ApplicationId, Client, CommandDataOption, CommandDataOptionValue,
    CommandInteraction, CommandOptionType, Context, CreateCommand, CreateCommandOption,
    CreateInteractionResponse, CreateInteractionResponseFollowup, CreateInteractionResponseMessage,
    EventHandler, GatewayIntents, GuildId, Http, Interaction, Ready,
};
use serenity::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::commands::registry::{self, CommandSpec, CommandSurface};
use crate::commands::{CommandInvocation, CommandOption, Engine, OptionValue, Responder, Router};
use crate::config::Config;
use crate::error::AppError;
use crate::status::{self, PresenceSink};
use crate::systemd::{ServiceManager, StateSubscriber};
use crate::units::Command;

// ── Inbound conversion ───────────────────────────────────────────────────────

/// Borrowed value of one inbound option.
pub enum OptionView<'a, T> {
    String(&'a str),
    SubCommand(&'a [T]),
    Other,
}

/// An option tree as delivered by the platform.
pub trait InboundOption: Sized {
    fn name(&self) -> &str;
    fn view(&self) -> OptionView<'_, Self>;
}

impl InboundOption for CommandDataOption {
    fn name(&self) -> &str {
        &self.name
    }

    fn view(&self) -> OptionView<'_, Self> {
        match &self.value {
            CommandDataOptionValue::String(value) => OptionView::String(value),
            CommandDataOptionValue::SubCommand(options) => OptionView::SubCommand(options),
            _ => OptionView::Other,
        }
    }
}

pub fn to_option<T: InboundOption>(option: &T) -> CommandOption {
    let value = match option.view() {
        OptionView::String(value) => OptionValue::String(value.to_string()),
        OptionView::SubCommand(options) => {
            OptionValue::SubCommand(options.iter().map(to_option).collect())
        }
        OptionView::Other => OptionValue::Other,
    };
    CommandOption { name: option.name().to_string(), value }
}

pub fn invocation<T: InboundOption>(name: &str, options: &[T]) -> CommandInvocation {
    CommandInvocation { name: name.to_string(), options: options.iter().map(to_option).collect() }
}

pub fn to_invocation(interaction: &CommandInteraction) -> CommandInvocation {
    invocation(&interaction.data.name, &interaction.data.options)
}

/// The slash-command part of an interaction; pings, autocomplete and
/// component interactions yield `None`.
pub fn command_interaction(interaction: Interaction) -> Option<CommandInteraction> {
    match interaction {
        Interaction::Command(command) => Some(command),
        other => {
            debug!(kind = ?other.kind(), "ignoring non-command interaction");
            None
        }
    }
}

// ── Outbound: replies and presence ───────────────────────────────────────────

/// Answers one command interaction.
pub struct InteractionResponder {
    http: Arc<Http>,
    interaction: CommandInteraction,
}

#[async_trait]
impl Responder for InteractionResponder {
    async fn respond(&self, content: String) -> Result<(), AppError> {
        let message = CreateInteractionResponseMessage::new().content(content);
        self.interaction
            .create_response(self.http.as_ref(), CreateInteractionResponse::Message(message))
            .await?;
        Ok(())
    }

    async fn defer(&self) -> Result<(), AppError> {
        self.interaction
            .create_response(
                self.http.as_ref(),
                CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
            )
            .await?;
        Ok(())
    }

    async fn follow_up(&self, content: String) -> Result<(), AppError> {
        self.interaction
            .create_followup(
                self.http.as_ref(),
                CreateInteractionResponseFollowup::new().content(content),
            )
            .await?;
        Ok(())
    }
}

/// Shows the presence text as a "Playing …" activity.
pub struct DiscordPresence {
    ctx: Context,
}

#[async_trait]
impl PresenceSink for DiscordPresence {
    async fn set_presence(&self, text: &str) -> Result<(), AppError> {
        let activity = (!text.is_empty()).then(|| ActivityData::playing(text));
        self.ctx.set_activity(activity);
        Ok(())
    }
}

// ── Command registration ─────────────────────────────────────────────────────

fn unit_option(spec: &CommandSpec) -> CreateCommandOption {
    let option = &spec.unit_option;
    let base = CreateCommandOption::new(CommandOptionType::String, &option.name, &option.description)
        .required(option.required);
    option
        .choices
        .iter()
        .fold(base, |base, choice| base.add_string_choice(&choice.label, &choice.value))
}

/// serenity builders for `surface`.
pub fn build_commands(surface: &CommandSurface) -> Vec<CreateCommand> {
    let specs = surface.commands();
    match surface {
        CommandSurface::Single { parent, description, .. } => {
            let command = specs.iter().fold(
                CreateCommand::new(parent).description(description),
                |command, spec| {
                    command.add_option(
                        CreateCommandOption::new(
                            CommandOptionType::SubCommand,
                            spec.command.as_str(),
                            &spec.description,
                        )
                        .add_sub_option(unit_option(spec)),
                    )
                },
            );
            vec![command]
        }
        CommandSurface::Multiple(_) => specs
            .iter()
            .map(|spec| {
                CreateCommand::new(spec.command.as_str())
                    .description(&spec.description)
                    .add_option(unit_option(spec))
            })
            .collect(),
    }
}

// ── Event handler ────────────────────────────────────────────────────────────

struct Handler {
    guild_id: GuildId,
    surface: CommandSurface,
    router: Router,
    engine: Engine,
    subscriber: Arc<dyn StateSubscriber>,
    status_units: Vec<String>,
    watcher_started: AtomicBool,
    registration_failure: Arc<OnceLock<String>>,
    shutdown: CancellationToken,
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!(user = %ready.user.name, guild_id = %self.guild_id, "discord gateway ready");

        let commands = build_commands(&self.surface);
        match self.guild_id.set_commands(&ctx.http, commands).await {
            Ok(registered) => info!(count = registered.len(), "slash commands registered"),
            Err(e) => {
                error!(error = %e, "could not register slash commands, shutting down");
                let _ = self.registration_failure.set(e.to_string());
                self.shutdown.cancel();
                return;
            }
        }

        if self.watcher_started.swap(true, Ordering::SeqCst) {
            debug!("status watcher already running");
            return;
        }
        let presence: Arc<dyn PresenceSink> = Arc::new(DiscordPresence { ctx });
        tokio::spawn(status::run(
            self.status_units.clone(),
            self.subscriber.clone(),
            presence,
            self.shutdown.clone(),
        ));
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let Some(interaction) = command_interaction(interaction) else {
            return;
        };
        let routed = self.router.route(to_invocation(&interaction));
        let responder = InteractionResponder { http: ctx.http.clone(), interaction };
        self.engine.execute(&routed, &responder).await;
    }
}

// ── Entry point ──────────────────────────────────────────────────────────────

/// Connect to Discord and serve commands until `shutdown` fires.
pub async fn run<S>(config: Config, systemd: Arc<S>, shutdown: CancellationToken) -> Result<(), AppError>
where
    S: ServiceManager + StateSubscriber + 'static,
{
    let surface = registry::command_surface(&config.units, &config.command_shape);
    let status_units = config.units.units(Command::Status).to_vec();
    let units = Arc::new(config.units);
    let registration_failure = Arc::new(OnceLock::new());

    let handler = Handler {
        guild_id: GuildId::new(config.guild_id),
        surface,
        router: Router::new(config.command_shape),
        engine: Engine::new(units, systemd.clone(), config.job_timeout),
        subscriber: systemd,
        status_units,
        watcher_started: AtomicBool::new(false),
        registration_failure: registration_failure.clone(),
        shutdown: shutdown.clone(),
    };

    let mut client = Client::builder(&config.discord_token, GatewayIntents::GUILDS)
        .event_handler(handler)
        .application_id(ApplicationId::new(config.application_id))
        .await?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        shutdown.cancelled().await;
        info!("shutting down discord shards");
        shard_manager.shutdown_all().await;
    });

    let started = client.start().await;
    client_outcome(started, registration_failure.get())
}

/// Why the client stopped.  A registration failure outranks whatever the
/// gateway reported while shutting down.
fn client_outcome(
    started: Result<(), serenity::Error>,
    registration_failure: Option<&String>,
) -> Result<(), AppError> {
    if let Some(reason) = registration_failure {
        return Err(AppError::CommandRegistration(reason.clone()));
    }
    started.map_err(|e| {
        warn!(error = %e, "discord gateway stopped");
        AppError::Gateway(e.to_string())
    })
}
