//! tracing-subscriber setup for binaries and long-running sessions.

use tracing_subscriber::EnvFilter;

/// Install a formatted subscriber. `RUST_LOG` wins over `default_filter`.
///
/// Returns false when a global subscriber was already installed (tests, embedding
/// applications); that is not an error.
pub fn init(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_harmless() {
        init("warn");
        assert!(!init("debug"));
    }
}
