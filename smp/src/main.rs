//! smp binary: parses the command line, sets up logging and reports the first
//! error before exiting with a failure status.

use std::io;
use std::process;

use chrono::Local;
use clap::Parser;
use rand::rngs::OsRng;
use smp::cli::{execute, Cli};
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() {
    let cli = Cli::parse();

    let filter = if cli.global.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_target(false)
                .with_writer(io::stderr),
        )
        .init();

    let now = Local::now().naive_local();
    if let Err(err) = execute(cli, &mut OsRng, now, &mut io::stdout().lock()) {
        error!("{err}");
        process::exit(1);
    }
}
