use std::process::ExitCode;

use clap::Parser;
use rdt_abstract::ConfigError;
use rdt_cli::Args;

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    // clap itself exits 2 on malformed arguments.
    let args = Args::parse();

    match rdt_cli::run(args) {
        Ok(summary) if summary.threshold_exceeded => {
            eprintln!("one or more experiments exceeded the failed-run threshold");
            ExitCode::from(1)
        }
        Ok(_) => ExitCode::SUCCESS,
        Err(err) if err.downcast_ref::<ConfigError>().is_some() => {
            eprintln!("configuration error: {err:#}");
            ExitCode::from(2)
        }
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}
