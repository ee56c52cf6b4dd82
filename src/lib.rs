// Library root: exposes internals for integration tests.
// The binary entry point is src/main.rs.

pub mod commands;
pub mod config;
pub mod discord;
pub mod error;
pub mod logger;
pub mod status;
pub mod systemd;
pub mod units;

#[cfg(test)]
mod testing;
