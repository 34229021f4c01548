use clap::Parser;
use tracing::debug;

use tappet::cli::{self, Cli};

/// Determine the log level based on verbosity count
fn get_log_level(verbose: u8) -> &'static str {
    match verbose {
        0 | 1 => "warn",
        2 => "debug",
        _ => "trace",
    }
}

/// Initialize the tracing subscriber with the appropriate settings
fn init_tracing(verbose: u8) {
    tracing_subscriber::fmt()
        .with_env_filter(get_log_level(verbose))
        .with_target(verbose >= 2)
        .with_writer(std::io::stderr)
        .init();

    debug!("tappet started with verbosity level: {}", verbose);
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli::run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("tappet: {err:#}");
            // Internal errors are distinct from test failures.
            std::process::exit(255);
        }
    }
}
