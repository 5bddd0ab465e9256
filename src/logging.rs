//! Tracing setup for embedding applications and tests.
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to the host. `init_tracing` is a convenience for hosts without their own.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs a global fmt subscriber.
///
/// The filter comes from `RUST_LOG`, falling back to `default_filter`
/// (e.g. `"meterstat=info"`). Returns `false` if a global subscriber was
/// already installed, in which case nothing changes.
pub fn init_tracing(default_filter: &str) -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_no_op() {
        init_tracing("meterstat=debug");
        assert!(!init_tracing("meterstat=debug"));
        tracing::debug!("subscriber installed");
    }
}
