//! Migrates LXD data from the Ubuntu package installation to the snap.
//!
//! [`run`] is the command-line entrypoint: it partitions configuration flags
//! from tool flags, loads [`lxd_migrate_config::Config`], initialises
//! diagnostics, and drives the migration against the installed daemons.
//! Operator narration goes to stdout; failures are reported on stderr as
//! `error: <message>`.

mod cli;
mod config;
mod daemon;
mod database;
mod errors;
mod files;
mod migration;
mod packages;
mod preflight;
mod prompt;
mod report;
mod sanity;
mod telemetry;

use std::ffi::OsString;
use std::io::{BufRead, Write};
use std::process::ExitCode;

use clap::Parser;
use lxd_migrate_config::Config;
use tracing::{info, warn};

use cli::Cli;
use config::{ConfigLoader, OrthoConfigLoader, split_config_arguments};
use daemon::{Connector, SystemConnector};
use errors::AppError;
use migration::{
    BridgeTools, Collaborators, Migration, MigrationLayout, MigrationOptions, SystemBridge,
};
use preflight::{HostProbe, SystemHost};
use prompt::Prompt;

/// Flags forwarded to the configuration loader instead of `clap`.
///
/// MAINTENANCE: This list must be kept in sync with the fields of
/// `lxd_migrate_config::Config`.
const CONFIG_CLI_FLAGS: &[&str] = &[
    "--config-path",
    "--log-filter",
    "--log-format",
    "--source-dir",
    "--destination-dir",
    "--database-path",
    "--bridge-config",
    "--bridge-destination",
    "--wait-timeout-secs",
];
const CLI_TARGET: &str = "lxd_migrate::cli";

/// Host-facing collaborators of a run.
struct Environment<'a, C> {
    host: &'a dyn HostProbe,
    bridge: &'a dyn BridgeTools,
    connector: &'a C,
}

/// Runs the migration tool with the given arguments and streams.
#[must_use]
pub fn run<I, R, W, E>(args: I, input: R, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    R: BufRead,
    W: Write,
    E: Write,
{
    let host = SystemHost::new();
    let bridge = SystemBridge::new();
    let environment = Environment {
        host: &host,
        bridge: &bridge,
        connector: &SystemConnector,
    };
    run_with(args, input, stdout, stderr, &OrthoConfigLoader, &environment)
}

fn run_with<I, R, W, E, L, C>(
    args: I,
    input: R,
    stdout: &mut W,
    stderr: &mut E,
    loader: &L,
    environment: &Environment<'_, C>,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    R: BufRead,
    W: Write,
    E: Write,
    L: ConfigLoader,
    C: Connector,
{
    let args: Vec<OsString> = args.into_iter().collect();
    let split = split_config_arguments(&args);

    let result = Cli::try_parse_from(&split.cli_arguments)
        .map_err(AppError::CliUsage)
        .and_then(|cli| {
            loader
                .load(&split.config_arguments)
                .map(|config| (cli, config))
        })
        .and_then(|(cli, config)| {
            telemetry::initialise(&config)?;
            migrate(&cli, &config, input, &mut *stdout, environment)
        });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(AppError::CliUsage(error)) if !error.use_stderr() => {
            let _ = write!(stdout, "{error}");
            ExitCode::SUCCESS
        }
        Err(AppError::CliUsage(error)) => {
            let _ = write!(stderr, "{error}");
            ExitCode::FAILURE
        }
        Err(error) => {
            let _ = writeln!(stderr, "error: {error}");
            ExitCode::FAILURE
        }
    }
}

fn migrate<R, W, C>(
    cli: &Cli,
    config: &Config,
    input: R,
    stdout: &mut W,
    environment: &Environment<'_, C>,
) -> Result<(), AppError>
where
    R: BufRead,
    W: Write,
    C: Connector,
{
    let layout = MigrationLayout::from_config(config);
    let options = MigrationOptions {
        assume_yes: cli.yes,
    };
    let mut prompt = Prompt::new(input);
    let collaborators = Collaborators {
        host: environment.host,
        bridge: environment.bridge,
        confirm: &mut prompt,
    };
    let mut migration = Migration::new(&layout, options, collaborators, &mut *stdout);
    match migration.run(environment.connector) {
        Ok(outcome) => {
            info!(target: CLI_TARGET, outcome = ?outcome, "migration finished");
            Ok(())
        }
        Err(error) => {
            warn!(
                target: CLI_TARGET,
                last_step = ?migration.journal().last(),
                action = ?error.action(),
                "migration stopped"
            );
            Err(error.into())
        }
    }
}
