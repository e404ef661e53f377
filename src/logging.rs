//! Dual logging stack: `env_logger` for the `log` facade used throughout
//! the crate's ordinary call sites, `tracing-subscriber` for the
//! structured spans emitted around integrity-sensitive code. Both write
//! to stderr; the CLI entry point initializes both once at startup.
//!
//! Integrity-zone spans (see [`crate::fingerprint::chain::compute_fingerprint`])
//! record only the 5-character hash prefixes defined by
//! [`bastion_api::constants::INTEGRITY_LOG_PREFIX_LEN`], never a full
//! fingerprint or a plaintext password.

use log::LevelFilter;

/// Initializes `env_logger` at `level`, and a `tracing-subscriber`
/// formatting layer honoring `RUST_LOG` if set, otherwise `level`.
/// Safe to call once per process; a second call is a no-op.
pub fn init(level: LevelFilter) {
    let _ = env_logger::Builder::new().filter_level(level).try_init();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_does_not_panic_on_repeated_calls() {
        init(LevelFilter::Debug);
        init(LevelFilter::Debug);
    }
}
