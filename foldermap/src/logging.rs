//! Logging initialization.

use tracing_subscriber::{EnvFilter, fmt};

const VERBOSE_DIRECTIVES: &str = "info,foldermap=debug,foldermap_core=debug,foldermap_scanner=debug";

/// Install the global subscriber. `RUST_LOG` wins when set; otherwise the
/// level is `info`, with the foldermap crates raised to `debug` when verbose.
///
/// Logs are written to stderr so stdout stays clean for reports and JSON.
pub fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(verbose));

    // A second init (e.g. from tests) keeps the first subscriber.
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn default_filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new(VERBOSE_DIRECTIVES)
    } else {
        EnvFilter::new("info")
    }
}
