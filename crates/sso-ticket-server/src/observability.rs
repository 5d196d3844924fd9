//! Process-wide tracing subscriber driven by [`LoggingConfig`].
//!
//! `RUST_LOG`, when set, replaces the configured filter at startup and keeps
//! it across configuration reloads.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

use crate::config::LoggingConfig;

static FILTER: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

fn rust_log_filter() -> Option<EnvFilter> {
    std::env::var_os("RUST_LOG").and_then(|_| EnvFilter::try_from_default_env().ok())
}

impl LoggingConfig {
    #[must_use]
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::new(self.directives())
    }

    /// Installs the global subscriber with this configuration's filter.
    ///
    /// Once a subscriber is installed, further calls behave like
    /// [`apply`](Self::apply).
    pub fn install(&self) {
        if FILTER.get().is_some() {
            self.apply();
            return;
        }

        let filter = rust_log_filter().unwrap_or_else(|| self.env_filter());
        let (filter_layer, handle) = reload::Layer::new(filter);
        let installed = tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt::layer())
            .try_init();
        if installed.is_ok() {
            let _ = FILTER.set(handle);
        }
    }

    /// Swaps the running filter for this configuration's.
    ///
    /// Returns `false` when nothing changed: `RUST_LOG` is set or no
    /// subscriber was installed through [`install`](Self::install).
    pub fn apply(&self) -> bool {
        if std::env::var_os("RUST_LOG").is_some() {
            return false;
        }
        let Some(handle) = FILTER.get() else {
            return false;
        };
        handle.reload(self.env_filter()).is_ok()
    }
}
