//! Subscriber setup for binaries and tests embedding the directory.

use tracing_subscriber::{fmt, EnvFilter};

/// Install a formatting subscriber honouring `RUST_LOG`, falling back to
/// `default_filter`. Returns `false` if a subscriber was already installed.
pub fn init_tracing(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_harmless() {
        init_tracing("sigil_directory=debug,warn");
        assert!(!init_tracing("info"));
    }
}
