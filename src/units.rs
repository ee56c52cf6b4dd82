//! Unit permission model.
//!
//! Operators declare a list of [`Unit`]s, each carrying a set of
//! [`Permission`]s.  [`CommandUnitIndex::from_units`] turns that list into a
//! per-[`Command`] allow-list once at startup; the index is the only thing
//! the command engine consults when authorising a request.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Suffix appended to configured unit names that carry no unit type.
pub const DEFAULT_UNIT_SUFFIX: &str = ".service";

// ── Permission ───────────────────────────────────────────────────────────────

/// A capability an operator grants on a unit.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum Permission {
    Start,
    Stop,
    Status,
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Permission::Start),
            "stop" => Ok(Permission::Stop),
            "status" => Ok(Permission::Status),
            other => Err(format!("invalid unit permission: {other:?}")),
        }
    }
}

// ── Command ──────────────────────────────────────────────────────────────────

/// The closed set of user-facing commands.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Restart,
    Status,
}

impl Command {
    /// Every command, in the order they are offered to the chat platform.
    pub const ALL: [Command; 4] = [Command::Start, Command::Stop, Command::Restart, Command::Status];

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Stop => "stop",
            Command::Restart => "restart",
            Command::Status => "status",
        }
    }

    /// Permissions a unit must hold for this command to target it.
    /// `Restart` is derived: it needs both `Start` and `Stop`.
    pub fn required_permissions(&self) -> &'static [Permission] {
        match self {
            Command::Start => &[Permission::Start],
            Command::Stop => &[Permission::Stop],
            Command::Restart => &[Permission::Start, Permission::Stop],
            Command::Status => &[Permission::Status],
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Command::Start),
            "stop" => Ok(Command::Stop),
            "restart" => Ok(Command::Restart),
            "status" => Ok(Command::Status),
            other => Err(format!("unknown command: {other:?}")),
        }
    }
}

// ── Unit ─────────────────────────────────────────────────────────────────────

/// A service-manager unit exposed to chat users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    pub name: String,
    pub permissions: HashSet<Permission>,
}

impl Unit {
    /// Build a unit, appending [`DEFAULT_UNIT_SUFFIX`] when `name` has no
    /// type suffix of its own.
    pub fn new(name: impl Into<String>, permissions: impl IntoIterator<Item = Permission>) -> Self {
        Self {
            name: normalize_unit_name(name.into()),
            permissions: permissions.into_iter().collect(),
        }
    }

    /// Whether this unit holds every permission `command` requires.
    pub fn allows(&self, command: Command) -> bool {
        command
            .required_permissions()
            .iter()
            .all(|p| self.permissions.contains(p))
    }
}

/// `"nginx"` becomes `"nginx.service"`; `"backup.timer"` is left alone.
pub fn normalize_unit_name(name: String) -> String {
    if name.is_empty() || name.contains('.') {
        name
    } else {
        format!("{name}{DEFAULT_UNIT_SUFFIX}")
    }
}

/// Choice label shown to chat users: the unit name without `.service`.
pub fn display_label(unit: &str) -> &str {
    unit.strip_suffix(DEFAULT_UNIT_SUFFIX).unwrap_or(unit)
}

// ── CommandUnitIndex ─────────────────────────────────────────────────────────

/// `Command -> ordered unit names`, derived once from the configured units.
///
/// Within each list units keep their configuration order; that order drives
/// the choice lists shown to users, the aggregate status report, and the
/// presence string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandUnitIndex {
    by_command: HashMap<Command, Vec<String>>,
}

impl CommandUnitIndex {
    pub fn from_units(units: &[Unit]) -> Self {
        let by_command = Command::ALL
            .iter()
            .map(|&command| {
                let names = units
                    .iter()
                    .filter(|unit| unit.allows(command))
                    .map(|unit| unit.name.clone())
                    .collect();
                (command, names)
            })
            .collect();
        Self { by_command }
    }

    /// Units `command` may target, in configuration order.
    pub fn units(&self, command: Command) -> &[String] {
        self.by_command.get(&command).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_allowed(&self, command: Command, unit: &str) -> bool {
        self.units(command).iter().any(|u| u == unit)
    }
}
