//! Chat command handling.
//!
//! An inbound slash command travels through three stages:
//!
//! 1. the chat adapter converts it into a platform-neutral
//!    [`CommandInvocation`];
//! 2. [`router::Router`] strips the parent command used by the
//!    [`CommandShape::Single`] layout, yielding a [`router::RoutedCommand`];
//! 3. [`engine::Engine`] authorises it against the unit index, drives the
//!    service manager, and answers through a [`engine::Responder`].
//!
//! [`registry`] derives the command surface registered with the platform.

pub mod engine;
pub mod registry;
pub mod router;

pub use engine::{Engine, Responder};
pub use router::{RoutedCommand, Router};

/// Name of the parent command in the single-command layout.
pub const PARENT_COMMAND: &str = "systemctl";

/// Name of the option carrying the target unit.
pub const UNIT_OPTION: &str = "unit";

/// How commands are exposed to the chat platform.  Chosen once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandShape {
    /// One parent command (`/systemctl start …`) with a sub-command per action.
    Single { parent: String },
    /// One top-level command per action (`/start …`).
    Multiple,
}

impl CommandShape {
    /// The single-command layout under [`PARENT_COMMAND`].
    pub fn single() -> Self {
        CommandShape::Single { parent: PARENT_COMMAND.to_string() }
    }
}

/// A slash command as delivered by the chat platform.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandInvocation {
    pub name: String,
    pub options: Vec<CommandOption>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandOption {
    pub name: String,
    pub value: OptionValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    String(String),
    /// A sub-command and its own options.
    SubCommand(Vec<CommandOption>),
    /// Any value kind the bot never registers.
    Other,
}

impl CommandOption {
    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: OptionValue::String(value.into()) }
    }

    pub fn sub_command(name: impl Into<String>, options: Vec<CommandOption>) -> Self {
        Self { name: name.into(), value: OptionValue::SubCommand(options) }
    }
}
