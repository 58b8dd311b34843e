use clap::Parser;
use std::process;
use tracing_subscriber::EnvFilter;

use fetch_har::cli::Cli;
use fetch_har::router;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = router::run(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
