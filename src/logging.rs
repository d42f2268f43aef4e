//! Global `tracing` subscriber setup.
//!
//! Every mutating store operation carries a `#[tracing::instrument]` span;
//! this module wires those spans (and any `error_stack::Report` built while
//! one is active) up to an actual subscriber. The `ErrorLayer` is what lets
//! `error-stack`'s `spantrace` feature capture the active span stack at the
//! point a `Report` is created, not just the backtrace.

use tracing_subscriber::{
    filter::{Directive, LevelFilter},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter,
};

/// Installs the process-wide subscriber: an `RUST_LOG`-driven filter, a
/// plain-text writer to stderr, and `tracing_error`'s layer so span traces
/// attach to error reports raised anywhere under an instrumented span.
///
/// Falls back to `debug` in debug builds and `warn` in release builds when
/// `RUST_LOG` is unset, matching the default the durable backend's
/// connection-pool wiring was grounded on.
///
/// # Errors
///
/// Returns [`TryInitError`] if a global subscriber has already been
/// installed.
pub fn init() -> Result<(), TryInitError> {
    let filter = std::env::var("RUST_LOG").map_or_else(
        |_| {
            let default = if cfg!(debug_assertions) {
                LevelFilter::DEBUG
            } else {
                LevelFilter::WARN
            };
            EnvFilter::default().add_directive(Directive::from(default))
        },
        EnvFilter::new,
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(tracing_error::ErrorLayer::default())
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_reports_the_second_attempt_as_already_set() {
        // The global subscriber is process-wide, so only the first `init`
        // in the whole test binary can succeed; this just checks the second
        // one fails the way `TryInitError` promises rather than panicking.
        let _ = init();
        assert!(init().is_err());
    }
}
