use cdsdl_core::logging;
use clap::Parser;

mod cli;

use crate::cli::Cli;

/// Exit status of a run stopped by Ctrl-C.
const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // File logging first; stderr when the state dir is unusable or debug output was asked for.
    if cli.verbose || logging::init_logging().is_err() {
        logging::init_logging_stderr(cli.verbose);
    }

    match cli.run().await {
        Ok(cli::Status::Done) => {}
        Ok(cli::Status::Failures) => std::process::exit(1),
        Ok(cli::Status::Interrupted) => std::process::exit(EXIT_INTERRUPTED),
        Err(err) => {
            eprintln!("cdsdl error: {:#}", err);
            std::process::exit(1);
        }
    }
}
