use tracing_subscriber::EnvFilter;

/// Initializes a `tracing_subscriber` using `PVFEED_LOG` first, then
/// `RUST_LOG`, then a default.
///
/// Log field contract for feed events:
/// - Include `feed` (train / valid_multi / valid_single) on any feed event.
/// - Include `epoch` on any per-epoch event.
/// - Include `seed` when an order was derived from one.
pub fn init_tracing() {
    let filter = env_filter();
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("PVFEED_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
