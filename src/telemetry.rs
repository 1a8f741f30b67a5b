//! Tracing setup for the CLI.
//!
//! Verbosity maps `-q` to errors only, the default to progress messages, and
//! repeated `-v` to cache and detector diagnostics. The `LOG` environment
//! variable overrides the derived level.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub fn init(verbose: u8, quiet: bool) {
    let filter = EnvFilter::builder()
        .with_default_directive(level(verbose, quiet).into())
        .with_env_var("LOG")
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(filter)
        .init();
}

fn level(verbose: u8, quiet: bool) -> tracing::metadata::LevelFilter {
    if quiet {
        return tracing::metadata::LevelFilter::ERROR;
    }
    match verbose {
        0 => tracing::metadata::LevelFilter::INFO,
        1 => tracing::metadata::LevelFilter::DEBUG,
        _ => tracing::metadata::LevelFilter::TRACE,
    }
}
