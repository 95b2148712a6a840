//! Tracing setup for hosts and tests.
//!
//! The executor only emits `tracing` events; installing a subscriber is left to
//! the embedding application. `init_tracing` is a ready-made one.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Map a `FANOUT_LOG` value to a filter level. Unknown values mean `info`.
pub fn level_for(value: Option<&str>) -> &'static str {
    match value {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("warn") | Some("warning") => "warn",
        Some("error") => "error",
        _ => "info",
    }
}

/// Install a stderr subscriber.
///
/// `RUST_LOG` takes precedence; otherwise `FANOUT_LOG` sets the level for this
/// crate. `LOG_FORMAT=json` switches to JSON lines. Does nothing if a global
/// subscriber is already set.
pub fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = level_for(std::env::var("FANOUT_LOG").ok().as_deref());
        EnvFilter::new(format!("fanout={level}"))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}
