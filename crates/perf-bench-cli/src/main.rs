use anyhow::Result;
use clap::Parser;
use console::style;
use std::process::ExitCode;

mod cli;
mod commands;
mod logging;

use cli::{Cli, Command};
use commands::bench::{plan_benchmark, run_benchmark};
use logging::setup_logging;

/// Request, catalog, config and publish errors
const EXIT_ERROR: u8 = 1;

async fn dispatch(cli: Cli) -> Result<u8> {
    let _guard = setup_logging(cli.log_dir.as_deref())?;

    match cli.command {
        Command::Run { args } => {
            let outcome = run_benchmark(&args).await?;
            Ok(outcome.exit_code() as u8)
        }
        Command::Plan { args } => {
            plan_benchmark(&args)?;
            Ok(0)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        // usage errors share the exit code of other invalid requests
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            return ExitCode::from(EXIT_ERROR);
        }
        Err(e) => e.exit(),
    };

    match dispatch(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{} {:#}", style("error:").red().bold(), e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}
