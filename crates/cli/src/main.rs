/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Entry point for the `server`/`client`/`mta-sts` CLI surface (§6).
//! Exit codes: 0 success, 1 assertion failure, 2 configuration error,
//! 3 I/O failure.

mod client_cmd;
mod config;
mod mta_sts_cmd;
mod server;
mod tls_config;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use trc::{Error, ErrorKind};

#[derive(Parser)]
#[command(name = "robin-cli", about = "Server, client, and MTA-STS lookup front end")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Runs the server against a config directory of flattened JSON files.
    Server { config_dir: PathBuf },
    /// Runs one client test case against a route, asserting the dialogue it observes.
    Client {
        case_file: PathBuf,
        #[arg(short = 'c', long = "client-config")]
        client_config: Option<PathBuf>,
    },
    /// Fetches and prints a domain's MTA-STS policy.
    MtaSts { domain: String },
}

/// Maps a failure to the exit code the CLI surface promises (§6):
/// assertion failures take priority, then configuration errors, then
/// everything else is an I/O failure.
fn exit_code_for(err: &Error) -> ExitCode {
    if err.assertion_failure().is_some() {
        ExitCode::from(1)
    } else if matches!(err.kind, ErrorKind::LocalPermanent) {
        ExitCode::from(2)
    } else {
        ExitCode::from(3)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    trc::subscriber::init(false);

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Server { config_dir } => server::run(&config_dir).await,
        Command::Client { case_file, client_config } => {
            client_cmd::run(&case_file, client_config.as_deref()).await
        }
        Command::MtaSts { domain } => mta_sts_cmd::run(&domain).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            exit_code_for(&err)
        }
    }
}
