//! Configuration loading with env-var overrides.
//!
//! Reads a TOML file (default `/etc/systemctl-bot.toml`), then applies the
//! `SBOT_*` env overrides.  Unit permissions are folded into a
//! [`CommandUnitIndex`] here, once, before anything else runs.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::commands::CommandShape;
use crate::error::AppError;
use crate::units::{CommandUnitIndex, Permission, Unit};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/systemctl-bot.toml";

/// Fully-resolved bot configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub application_id: u64,
    pub guild_id: u64,
    pub discord_token: String,
    pub command_shape: CommandShape,
    pub log_level: String,
    /// Upper bound on waiting for a job to finish.  `None` waits forever.
    pub job_timeout: Option<Duration>,
    pub units: CommandUnitIndex,
}

/// Values taken from the environment that override the file.
/// Tests build this directly instead of mutating env vars.
#[derive(Debug, Default, Clone)]
pub struct EnvOverrides {
    pub application_id: Option<String>,
    pub guild_id: Option<String>,
    pub discord_token: Option<String>,
    pub command_type: Option<String>,
    pub log_level: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            application_id: env::var("SBOT_APPLICATION_ID").ok(),
            guild_id: env::var("SBOT_GUILD_ID").ok(),
            discord_token: env::var("SBOT_DISCORD_TOKEN").ok(),
            command_type: env::var("SBOT_COMMAND_TYPE").ok(),
            log_level: env::var("SBOT_LOG_LEVEL").ok(),
        }
    }
}

/// Raw TOML shape, the `serde` target before resolution.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default)]
    application_id: u64,
    #[serde(default)]
    guild_id: u64,
    #[serde(default)]
    discord_token: String,
    #[serde(default = "default_command_type")]
    command_type: String,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    job_timeout_secs: Option<u64>,
    #[serde(default)]
    units: Vec<RawUnit>,
}

#[derive(Deserialize)]
struct RawUnit {
    #[serde(default)]
    name: String,
    /// Kept as strings so unknown values are reported with everything else
    /// instead of failing the whole parse.
    #[serde(default)]
    permissions: Vec<String>,
}

fn default_command_type() -> String {
    "single".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Load config from `path` (or [`DEFAULT_CONFIG_PATH`]), then apply env overrides.
pub fn load(path: Option<&str>) -> Result<Config, AppError> {
    let path = expand_home(path.unwrap_or(DEFAULT_CONFIG_PATH));
    load_from(&path, &EnvOverrides::from_env())
}

/// Loader with an explicit path and overrides.
pub fn load_from(path: &Path, overrides: &EnvOverrides) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
    parse(&raw, overrides)
        .map_err(|e| AppError::Config(format!("{}: {e}", path.display())))
}

/// Parse and validate TOML text.  Every validation problem is collected and
/// reported in one error, one per line.
pub fn parse(text: &str, overrides: &EnvOverrides) -> Result<Config, String> {
    let mut raw: RawConfig = toml::from_str(text).map_err(|e| format!("parse error: {e}"))?;

    if let Some(id) = overrides.application_id.as_deref().and_then(|v| parse_id("SBOT_APPLICATION_ID", v)) {
        raw.application_id = id;
    }
    if let Some(id) = overrides.guild_id.as_deref().and_then(|v| parse_id("SBOT_GUILD_ID", v)) {
        raw.guild_id = id;
    }
    if let Some(token) = &overrides.discord_token {
        raw.discord_token = token.clone();
    }
    if let Some(command_type) = &overrides.command_type {
        raw.command_type = command_type.clone();
    }
    if let Some(level) = &overrides.log_level {
        raw.log_level = level.clone();
    }

    let mut errors: Vec<String> = Vec::new();

    if raw.application_id == 0 {
        errors.push("missing application_id".into());
    }
    if raw.discord_token.is_empty() {
        errors.push("missing discord_token".into());
    }
    if raw.guild_id == 0 {
        errors.push("missing guild_id".into());
    }
    let command_shape = match raw.command_type.as_str() {
        "single" => Some(CommandShape::single()),
        "multiple" => Some(CommandShape::Multiple),
        _ => {
            errors.push(format!("invalid command_type: {:?}", raw.command_type));
            None
        }
    };
    if raw.units.is_empty() {
        errors.push("missing units".into());
    }

    let mut units = Vec::with_capacity(raw.units.len());
    for raw_unit in raw.units {
        if raw_unit.name.is_empty() {
            errors.push("missing unit name".into());
        }
        if raw_unit.permissions.is_empty() {
            errors.push(format!("missing permissions for unit {:?}", raw_unit.name));
        }
        let mut permissions = Vec::with_capacity(raw_unit.permissions.len());
        for p in &raw_unit.permissions {
            match p.parse::<Permission>() {
                Ok(p) => permissions.push(p),
                Err(e) => errors.push(format!("{e} for unit {:?}", raw_unit.name)),
            }
        }
        units.push(Unit::new(raw_unit.name, permissions));
    }

    let Some(command_shape) = command_shape.filter(|_| errors.is_empty()) else {
        return Err(errors.join("\n"));
    };

    Ok(Config {
        application_id: raw.application_id,
        guild_id: raw.guild_id,
        discord_token: raw.discord_token,
        command_shape,
        log_level: raw.log_level,
        job_timeout: raw.job_timeout_secs.filter(|s| *s > 0).map(Duration::from_secs),
        units: CommandUnitIndex::from_units(&units),
    })
}

/// An unparsable id override is ignored and the file value kept.
fn parse_id(key: &str, value: &str) -> Option<u64> {
    match value.parse::<u64>() {
        Ok(id) => Some(id),
        Err(e) => {
            warn!(%key, %value, "ignoring unparsable env override: {e}");
            None
        }
    }
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}
