//! Application-wide error types.

use thiserror::Error;

use crate::systemd::SystemdError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    /// Building the Discord client failed.
    #[error("discord error: {0}")]
    Discord(String),

    /// The gateway connection could not be opened or dropped with an error.
    #[error("discord gateway error: {0}")]
    Gateway(String),

    #[error("slash command registration failed: {0}")]
    CommandRegistration(String),

    #[error("systemd error: {0}")]
    Systemd(#[from] SystemdError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Process exit code for a startup failure in this category.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Config(_) | AppError::Logger(_) => 10,
            AppError::Systemd(_) => 20,
            AppError::Discord(_) => 30,
            AppError::Gateway(_) => 31,
            AppError::CommandRegistration(_) => 32,
            AppError::Io(_) => 1,
        }
    }
}

impl From<serenity::Error> for AppError {
    fn from(e: serenity::Error) -> Self {
        AppError::Discord(e.to_string())
    }
}
