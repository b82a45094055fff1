use std::process::ExitCode;

use clap::Parser;
use tasktally::cli::{error_line, exit_code, run_cli, Args};
use tracing::error;

// `tally start` forks, so no runtime may exist before a command builds its own.
fn main() -> ExitCode {
    let args = Args::parse();
    match run_cli(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Error running cli {e:?}");
            eprintln!("{}", error_line(&e));
            exit_code(&e)
        }
    }
}
