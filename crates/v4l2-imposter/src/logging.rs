//! Diagnostics output on stderr

use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

/// Install the stderr subscriber; a subscriber already set by the host wins
pub fn init_logging(debug_enabled: bool) {
    let level = if debug_enabled { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        debug!("Tracing subscriber already installed");
    }
}
