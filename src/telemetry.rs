use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging for the `cavemaster` binary.
///
/// - `tracing-subscriber::fmt` for structured logging.
/// - `EnvFilter` for dynamic log levels (`RUST_LOG`).
/// - `json` switches the fmt layer to one JSON object per line.
pub fn init(json: bool) {
    let filter_layer = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,cavemaster_session=debug"));

    let registry = tracing_subscriber::registry().with(filter_layer);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_line_number(true)
                    .compact(),
            )
            .init();
    }
}
