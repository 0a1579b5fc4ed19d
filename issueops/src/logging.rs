//! Development-time tracing.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: dev diagnostics on stderr, filtered by
//!   `RUST_LOG` or `--verbose`. Not persisted.
//!
//! - **Operation logging (`io/operation_log`)**: product artifacts in the
//!   working folder (`issue-operation-log.md`, `operation-report.json`).
//!   Always written, unaffected by either filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_DIRECTIVE: &str = "warn";
/// Filter used by `--verbose` when `RUST_LOG` is unset.
pub const VERBOSE_DIRECTIVE: &str = "warn,issueops=debug";

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins over `verbose`.
///
/// # Example
/// ```bash
/// RUST_LOG=issueops::io::lookup_cache=debug issueops refresh-cache --force
/// ```
pub fn init(verbose: bool) {
    let fallback = if verbose {
        VERBOSE_DIRECTIVE
    } else {
        DEFAULT_DIRECTIVE
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose)
                .compact(),
        )
        .init();
}
