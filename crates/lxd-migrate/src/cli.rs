//! Command-line interface of the migration tool.

use clap::Parser;

const CONFIGURATION_HELP: &str = "\
Configuration flags (also read from lxd-migrate.toml and LXD_MIGRATE_* variables):
      --config-path <PATH>         Configuration file to load
      --log-filter <FILTER>        Diagnostic log filter, e.g. lxd_migrate=debug
      --log-format <FORMAT>        Diagnostic log format: compact or json
      --source-dir <PATH>          Data directory of the packaged LXD
      --destination-dir <PATH>     Data directory of the snap LXD
      --database-path <PATH>       Where the snap keeps its database
      --bridge-config <PATH>       Legacy bridge configuration of the packaged LXD
      --bridge-destination <PATH>  Where the snap reads legacy bridge configuration
      --wait-timeout-secs <SECS>   How long to wait for the snap LXD to start";

/// Moves containers, images, and configuration from the packaged LXD into the
/// snap.
#[derive(Parser, Debug)]
#[command(
    name = "lxd-migrate",
    version,
    about = "Migrate LXD data from the Ubuntu package to the snap",
    after_help = CONFIGURATION_HELP
)]
pub(crate) struct Cli {
    /// Answer yes to every question, including removal of the old LXD.
    #[arg(long, short = 'y')]
    pub(crate) yes: bool,
}
