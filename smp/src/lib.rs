//! smp derives reproducible passwords from a long-term secret and a short hint.
//! Secrets and derivation policies live in named namespaces inside a YAML
//! config file that this crate creates, validates and switches between.

pub mod cli;
pub mod config;
pub mod crypto;
pub mod error;
pub mod init;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{CliError, CliResult};
