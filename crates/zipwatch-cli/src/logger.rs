//! Logging setup for the zipwatch binary
//!
//! `--verbose` enables debug output, `--quiet` limits output to errors,
//! otherwise `RUST_LOG` wins over the info-level default.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "zipwatch=info,zipwatch_core=info,zipwatch_daemon=info";

pub fn filter(verbose: bool, quiet: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("zipwatch=debug,zipwatch_core=debug,zipwatch_daemon=debug")
    } else if quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}

pub fn init_logger(verbose: bool, quiet: bool) {
    let fmt_layer = fmt::layer().with_target(false).with_level(true).compact();

    tracing_subscriber::registry()
        .with(filter(verbose, quiet))
        .with(fmt_layer)
        .init();
}
