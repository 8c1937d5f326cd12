use super::Severity;

/// Installs a compact stderr subscriber.
///
/// With `Some(severity)` everything at or above that level is printed, with `None` the filter is
/// read from `RUST_LOG`. Thread names are kept in the output since handle pools are per-thread.
#[cfg(feature = "build-tracing")]
pub fn install_tracing_subscriber(severity: Option<Severity>) {
    use ::tracing_subscriber::{
        filter::LevelFilter, prelude::__tracing_subscriber_SubscriberExt,
        util::SubscriberInitExt, EnvFilter,
    };

    let formatter = ::tracing_subscriber::fmt::layer()
        .with_ansi(true)
        .with_thread_names(true)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .compact();

    let result = if let Some(severity) = severity {
        let filter = LevelFilter::from_level(severity.into_tracing_level());

        ::tracing_subscriber::registry()
            .with(formatter)
            .with(filter)
            .try_init()
    } else {
        let filter = EnvFilter::from_default_env();

        ::tracing_subscriber::registry()
            .with(formatter)
            .with(filter)
            .try_init()
    };

    result.unwrap_or_else(|_| eprintln!("Failed to set tracing subscriber."));
}

#[cfg(not(feature = "build-tracing"))]
pub fn install_tracing_subscriber(_severity: Option<Severity>) {}
