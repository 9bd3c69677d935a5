//! CLI error types

use thiserror::Error;

use crate::config::ConfigError;
use crate::crypto::derive::DeriveError;
use crate::init::InitError;

/// Every failure a command can report. `main` logs it and exits non-zero.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Init(#[from] InitError),

    #[error("derivation failed: {0}")]
    Derive(#[from] DeriveError),

    /// A required positional argument was omitted or empty
    #[error("{0} is not specified")]
    MissingArgument(&'static str),

    #[error("unable to locate the home directory for the default config path")]
    HomeDir,

    #[error("unable to write output: {0}")]
    Output(#[from] std::io::Error),
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;
