//! CLI entrypoint for the LXD data migration tool.
//!
//! The binary delegates to [`lxd_migrate::run`], which loads configuration,
//! asks for confirmation on stdin, and narrates the migration on stdout.

use std::io::{self, StderrLock, StdinLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let stdin: StdinLock<'_> = io::stdin().lock();
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    lxd_migrate::run(std::env::args_os(), stdin, &mut stdout, &mut stderr)
}
