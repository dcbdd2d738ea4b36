use std::env;
use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Install the global `tracing` subscriber.
///
/// Filtering follows `RUST_LOG` (default `info`). `RUST_LOG_FORMAT=json`
/// selects JSON output, `NO_COLOR` disables ANSI colours. Subsequent calls
/// do nothing.
pub fn init_logging() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let builder = tracing_subscriber::fmt().with_env_filter(filter);
        let json = matches!(env::var("RUST_LOG_FORMAT").as_deref(), Ok("json"));
        let result = if json {
            builder.json().try_init()
        } else {
            builder.with_ansi(colour()).try_init()
        };
        if let Err(err) = result {
            eprintln!("logging already initialized: {err}")
        }
    });
}

fn colour() -> bool {
    env::var_os("NO_COLOR").is_none_or(|v| v.is_empty())
}
