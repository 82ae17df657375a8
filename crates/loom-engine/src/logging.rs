//! `tracing` subscriber bootstrap.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to
/// `config.filter`.
///
/// Returns `false` if a global subscriber was already installed (by an
/// earlier call or by the host application); that subscriber stays in place.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(&config.filter).unwrap_or_else(|err| {
            eprintln!("invalid log filter '{}' ({err}); using 'warn'", config.filter);
            EnvFilter::new("warn")
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.ansi)
        .try_init()
        .is_ok()
}
