//! Logging setup shared by the binary and integration tests.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global subscriber: `RUST_LOG` when set, else `default_directive`.
///
/// Returns an error instead of panicking when a subscriber is already set.
pub fn init_tracing(default_directive: &str) -> Result<(), tracing_subscriber::util::TryInitError> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directive.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_twice_is_an_error() {
        // First call may race other tests installing a subscriber
        let _ = init_tracing("signal_engine=debug");
        assert!(init_tracing("signal_engine=debug").is_err());
    }
}
