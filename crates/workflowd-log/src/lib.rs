// ABOUTME: Shared logging setup for the workflowd server and agent binaries
// ABOUTME: Workflowd crates log at INFO (DEBUG with --verbose), dependencies at WARN

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Crates whose events are shown at the chosen level.
const WORKFLOWD_CRATES: &[&str] = &[
    "workflowd_server",
    "workflowd_agent",
    "workflowd_grpc",
];

/// Pick the level for workflowd crates.
pub fn level_for(verbose: bool) -> Level {
    if verbose {
        Level::DEBUG
    } else {
        Level::INFO
    }
}

/// WARN for everything, `level` for workflowd crates. RUST_LOG may add
/// directives for other targets.
pub fn filter(level: Level) -> EnvFilter {
    let mut filter = EnvFilter::from_default_env().add_directive(Level::WARN.into());
    for name in WORKFLOWD_CRATES {
        let directive = format!("{name}={level}");
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

/// Logging to stderr for both binaries.
pub fn init(verbose: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(filter(level_for(verbose)))
        .with_target(verbose)
        .init();
}
