//! Idempotent logging setup (spec §5, §8 invariant 4).
//!
//! `tracing_subscriber`'s global default can only be installed once per
//! process; a second `init_logging()` call would otherwise panic. We guard
//! it with `std::sync::Once` so every binary can call it unconditionally
//! at the top of `main()`, mirroring the once-guarded `init_logging`
//! pattern called out in spec's design notes.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Initialize the process-wide tracing subscriber. Calling this more than
/// once is a no-op after the first call.
pub fn init_logging(json: bool) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info"));

        if json {
            tracing_subscriber::fmt().with_env_filter(filter).json().init();
        } else {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_is_idempotent() {
        init_logging(false);
        init_logging(false);
        init_logging(true);
    }
}
