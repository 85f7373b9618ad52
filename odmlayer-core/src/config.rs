//! Store-wide configuration.

use std::time::Duration;

use crate::context::{CancelGuard, Ctx};

/// Default timeout applied to operations called without an explicit context.
pub const DEFAULT_CTX_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration shared by every collection handle of a store.
///
/// A config is fixed when the store is built and only read afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Timeout of the context created for operations called without one.
    pub ctx_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ctx_timeout: DEFAULT_CTX_TIMEOUT,
        }
    }
}

impl Config {
    /// Creates a config with the given default context timeout.
    pub fn with_ctx_timeout(ctx_timeout: Duration) -> Self {
        Self { ctx_timeout }
    }

    /// Creates a fresh context bounded by [`Config::ctx_timeout`].
    ///
    /// The context is cancelled when the returned guard is dropped.
    pub fn ctx(&self) -> (Ctx, CancelGuard) {
        Ctx::background().with_timeout(self.ctx_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeout_is_ten_seconds() {
        assert_eq!(Config::default().ctx_timeout, Duration::from_secs(10));
    }

    #[test]
    fn ctx_carries_deadline() {
        let config = Config::with_ctx_timeout(Duration::from_millis(250));
        let (ctx, _cancel) = config.ctx();

        assert!(ctx.deadline().is_some());
        assert!(!ctx.is_cancelled());
    }
}
