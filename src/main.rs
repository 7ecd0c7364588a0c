mod cli;
mod execute;
mod output;

use std::process::ExitCode;
use clap::Parser;
use crate::cli::CLI;

fn main() -> ExitCode {
    let cli = CLI::parse();
    setup_logging(&cli);
    match execute::execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::error(format!("{e:#}"));
            let code = e
                .downcast_ref::<oppm::Error>()
                .map(oppm::Error::exit_code)
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

fn setup_logging(cli: &CLI) {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if cli.quiet {
        "error"
    } else if cli.verbose == 0 {
        "warn"
    } else if cli.verbose == 1 {
        "info"
    } else {
        "debug"
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .try_init();
}
