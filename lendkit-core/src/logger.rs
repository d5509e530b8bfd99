//! Process-wide structured logging.
//!
//! Library code only emits `tracing` events; binaries call [`init_logging`]
//! once at start-up to install a subscriber.

use std::sync::OnceLock;

use tracing_log::LogTracer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Filter used when neither `RUST_LOG` nor an explicit filter is given.
pub const DEFAULT_FILTER: &str = "info";

// HTTP internals are noisy at debug level.
const QUIET_DEPENDENCIES: [&str; 3] = ["hyper_util=warn", "reqwest=warn", "rustls=warn"];

static INITIALIZED: OnceLock<()> = OnceLock::new();

/// Installs the `tracing` subscriber and bridges `log` records into it.
///
/// `RUST_LOG` takes precedence over `filter`, which falls back to
/// [`DEFAULT_FILTER`]. Returns `false` when logging was already initialised,
/// in which case nothing changes.
pub fn init_logging(filter: Option<&str>) -> bool {
    let mut installed = false;
    INITIALIZED.get_or_init(|| {
        installed = true;
        install(filter);
    });
    installed
}

fn install(filter: Option<&str>) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut directives = filter.unwrap_or(DEFAULT_FILTER).to_string();
        for quiet in QUIET_DEPENDENCIES {
            directives.push(',');
            directives.push_str(quiet);
        }
        EnvFilter::try_new(&directives).unwrap_or_else(|e| {
            eprintln!("Invalid log filter {directives:?}: {e}; using {DEFAULT_FILTER}");
            EnvFilter::new(DEFAULT_FILTER)
        })
    });

    // Another logger may already own the `log` facade, e.g. in tests.
    if let Err(e) = LogTracer::init() {
        eprintln!("Failed to bridge log records: {e}");
    }

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true));
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set logger: {e}");
    }
}
