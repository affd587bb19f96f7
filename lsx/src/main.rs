//! # lsx
//!
//! Storage executor binary. A client invokes it once per operation and reads
//! the result from stdout and the exit code.
//!
//! ## Usage
//!
//! ```bash
//! # Host identity as JSON
//! lsx vfs instanceID
//!
//! # Devices visible to the OS
//! lsx vfs localDevices deep
//!
//! # Block until the attached volume shows up
//! lsx vfs wait quick vol-0123 30s
//!
//! # Supported operations bitmask
//! lsx vfs supported
//! ```
//!
//! ## Exit Codes
//!
//! - **0**: success
//! - **1**: failure
//! - **2**: operation not implemented by this driver on this host
//! - **255**: `wait` timed out; stdout still carries the last device snapshot

mod cli;
mod config;
mod dispatch;

use clap::error::ErrorKind;
use clap::Parser;

use cli::Cli;
use dispatch::EXIT_CODE_USAGE;

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // clap exits with 2 on usage errors, which clients read as "not implemented"
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => EXIT_CODE_USAGE,
            };
            std::process::exit(code);
        }
    };

    // stdout is the result channel, so logs go to stderr
    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Stderr)
        .init();

    let stdout = std::io::stdout();
    let exit_code = dispatch::run(&cli, &mut stdout.lock());

    log::debug!("{} {} exited with {}", cli.driver, cli.command.command(), exit_code);
    std::process::exit(exit_code);
}
