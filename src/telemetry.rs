use tracing_subscriber::{prelude::*, util::SubscriberInitExt, EnvFilter};

/// Installs the fmt subscriber for the `escrow-sim` binary and the
/// `purchase_flow` demo. Filtering comes from `RUST_LOG`, defaulting to `info`.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_filter(filter),
        )
        .init();
}
