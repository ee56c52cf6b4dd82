//! Command surface derived from the unit index.
//!
//! Platform-neutral: the chat adapter turns a [`CommandSurface`] into its own
//! registration payload.  A command with no permitted units is not offered.

use tracing::warn;

use crate::units::{Command, CommandUnitIndex, display_label};

use super::{CommandShape, UNIT_OPTION};

/// Most choices a single option may carry on the chat platform.
pub const MAX_CHOICES: usize = 25;

/// Description of the parent command in the single-command layout.
pub const PARENT_DESCRIPTION: &str = "Controls units";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitChoice {
    /// Shown to the user.
    pub label: String,
    /// Sent back in the invocation.
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOptionSpec {
    pub name: String,
    pub description: String,
    pub required: bool,
    pub choices: Vec<UnitChoice>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub command: Command,
    pub description: String,
    pub unit_option: UnitOptionSpec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandSurface {
    Single {
        parent: String,
        description: String,
        subcommands: Vec<CommandSpec>,
    },
    Multiple(Vec<CommandSpec>),
}

impl CommandSurface {
    /// Every action command, whichever layout wraps them.
    pub fn commands(&self) -> &[CommandSpec] {
        match self {
            CommandSurface::Single { subcommands, .. } => subcommands,
            CommandSurface::Multiple(commands) => commands,
        }
    }
}

/// `(command description, option description, option required)`.
fn describe(command: Command) -> (&'static str, &'static str, bool) {
    match command {
        Command::Start => ("Start units", "The unit to start", true),
        Command::Stop => ("Stop units", "The unit to stop", true),
        Command::Restart => ("Restart units", "The unit to restart", true),
        Command::Status => ("Check units' status", "The unit to check", false),
    }
}

fn command_spec(command: Command, units: &[String]) -> CommandSpec {
    let (description, option_description, required) = describe(command);
    if units.len() > MAX_CHOICES {
        warn!(
            %command,
            units = units.len(),
            max = MAX_CHOICES,
            "too many units for one choice list, extra units are not offered"
        );
    }
    let choices = units
        .iter()
        .take(MAX_CHOICES)
        .map(|unit| UnitChoice { label: display_label(unit).to_string(), value: unit.clone() })
        .collect();

    CommandSpec {
        command,
        description: description.to_string(),
        unit_option: UnitOptionSpec {
            name: UNIT_OPTION.to_string(),
            description: option_description.to_string(),
            required,
            choices,
        },
    }
}

/// Build the surface for `shape`.  Commands keep the order start, stop,
/// restart, status.
pub fn command_surface(units: &CommandUnitIndex, shape: &CommandShape) -> CommandSurface {
    let specs: Vec<CommandSpec> = Command::ALL
        .iter()
        .filter(|&&command| !units.units(command).is_empty())
        .map(|&command| command_spec(command, units.units(command)))
        .collect();

    match shape {
        CommandShape::Single { parent } => CommandSurface::Single {
            parent: parent.clone(),
            description: PARENT_DESCRIPTION.to_string(),
            subcommands: specs,
        },
        CommandShape::Multiple => CommandSurface::Multiple(specs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::{Permission, Unit};

    fn index() -> CommandUnitIndex {
        CommandUnitIndex::from_units(&[
            Unit::new("web", [Permission::Start, Permission::Stop, Permission::Status]),
            Unit::new("backup.timer", [Permission::Status]),
        ])
    }

    #[test]
    fn multiple_shape_lists_commands_in_order() {
        let surface = command_surface(&index(), &CommandShape::Multiple);
        let names: Vec<Command> = surface.commands().iter().map(|c| c.command).collect();
        assert_eq!(names, Command::ALL);
        assert!(matches!(surface, CommandSurface::Multiple(_)));
    }

    #[test]
    fn single_shape_wraps_subcommands() {
        let surface = command_surface(&index(), &CommandShape::single());
        match &surface {
            CommandSurface::Single { parent, description, subcommands } => {
                assert_eq!(parent, "systemctl");
                assert_eq!(description, PARENT_DESCRIPTION);
                assert_eq!(subcommands.len(), 4);
            }
            other => panic!("unexpected surface: {other:?}"),
        }
    }

    #[test]
    fn choices_strip_service_suffix_only() {
        let surface = command_surface(&index(), &CommandShape::Multiple);
        let status = &surface.commands()[3];
        assert_eq!(status.command, Command::Status);
        assert!(!status.unit_option.required);
        assert_eq!(status.unit_option.description, "The unit to check");
        assert_eq!(
            status.unit_option.choices,
            [
                UnitChoice { label: "web".into(), value: "web.service".into() },
                UnitChoice { label: "backup.timer".into(), value: "backup.timer".into() },
            ]
        );
    }

    #[test]
    fn job_commands_require_a_unit() {
        let surface = command_surface(&index(), &CommandShape::Multiple);
        for spec in &surface.commands()[..3] {
            assert!(spec.unit_option.required, "{} should require a unit", spec.command);
            assert_eq!(spec.unit_option.name, UNIT_OPTION);
        }
        assert_eq!(surface.commands()[2].description, "Restart units");
    }

    #[test]
    fn commands_without_units_are_omitted() {
        let units = CommandUnitIndex::from_units(&[Unit::new("a", [Permission::Status])]);
        let surface = command_surface(&units, &CommandShape::Multiple);
        let names: Vec<Command> = surface.commands().iter().map(|c| c.command).collect();
        assert_eq!(names, [Command::Status]);
    }

    #[test]
    fn choice_lists_are_capped() {
        let units: Vec<Unit> = (0..30).map(|i| Unit::new(format!("u{i}"), [Permission::Start])).collect();
        let surface = command_surface(&CommandUnitIndex::from_units(&units), &CommandShape::Multiple);
        let choices = &surface.commands()[0].unit_option.choices;
        assert_eq!(choices.len(), MAX_CHOICES);
        assert_eq!(choices[0].value, "u0.service");
        assert_eq!(choices[24].value, "u24.service");
    }
}
