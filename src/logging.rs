//! Logging setup: a single `tracing-subscriber` formatter, respecting `NO_COLOR` and
//! mapping `EffectiveConfig.log_level` to a `tracing::Level`. Library code never writes
//! to stdout/stderr directly; the CLI binary is the only place user-facing reports are
//! printed outside this formatter.

use tracing_subscriber::EnvFilter;

use crate::config::LogLevel;

fn tracing_level(level: LogLevel) -> tracing::Level {
    match level {
        LogLevel::Debug => tracing::Level::DEBUG,
        LogLevel::Info => tracing::Level::INFO,
        LogLevel::Warn => tracing::Level::WARN,
        LogLevel::Error => tracing::Level::ERROR,
    }
}

/// Install the global subscriber for the process. Safe to call at most once; a second
/// call is a silent no-op (mirrors `tracing_subscriber`'s own `try_init` semantics).
pub fn init(level: LogLevel, verbose: bool) {
    let default_directive = tracing_level(if verbose { LogLevel::Debug } else { level }).to_string();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let ansi = std::env::var_os("NO_COLOR").is_none();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(ansi)
        .with_target(false)
        .try_init();
}
