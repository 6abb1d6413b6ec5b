//! Process-wide `tracing` setup
//!
//! Events use targets under `doctx::` (`doctx::tx`, `doctx::pipeline`,
//! `doctx::triggers`, `doctx::storage`, `doctx::live`) so each layer can be
//! filtered on its own, e.g. `RUST_LOG=info,doctx::triggers=debug`.

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

static SUBSCRIBER: OnceCell<bool> = OnceCell::new();

/// Install a formatting subscriber filtered by `RUST_LOG`, falling back to
/// `filter`.
///
/// Only the first call has an effect. Returns true if this process uses the
/// subscriber installed here, false if another global subscriber was set
/// first.
pub fn init_tracing(filter: &str) -> bool {
    *SUBSCRIBER.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(filter))
            .unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
            .is_ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let first = init_tracing("debug");
        assert_eq!(init_tracing("warn"), first);
    }
}
