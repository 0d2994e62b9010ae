pub mod config;
pub mod data;
pub mod flatten;
pub mod pipeline;
pub mod report;
pub mod sink;
pub mod trigger;

pub use config::{Config, ConfigError, SinkTarget, fetch_settings};
pub use data::SqliteSink;
pub use flatten::{FlatRecord, flatten};
pub use pipeline::{RunError, RunOutcome, execute_run};
pub use report::generate_tree_report;
pub use sink::{BigQuerySink, RecordSink, SinkError};
pub use trigger::{Acknowledgement, GoogleNotifier, Notifier, TriggerError, TriggerTarget};

// Re-exported so callers only need this crate.
pub use foldermap_scanner as scanner;

pub fn print_banner() {
    use colored::Colorize;
    println!(
        "{} {}",
        "foldermap".bright_green().bold(),
        env!("CARGO_PKG_VERSION").bright_black()
    );
}
