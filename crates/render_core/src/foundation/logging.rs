//! Logging setup

pub use log::{debug, error, info, trace, warn};

/// Initialize the logging system, honouring `RUST_LOG`
pub fn init() {
    init_with_default("info");
}

/// Initialize logging with a fallback filter used when `RUST_LOG` is unset.
///
/// Calling this more than once is harmless.
pub fn init_with_default(filter: &str) {
    let env = env_logger::Env::default().default_filter_or(filter);
    if env_logger::Builder::from_env(env).format_timestamp_millis().try_init().is_err() {
        log::trace!("logger already initialised");
    }
}
