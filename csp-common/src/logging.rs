//! Tracing filter setup shared by the binaries
//!
//! Logging starts before the config file is read, at [`BOOTSTRAP_LEVEL`], so
//! config loading itself is logged. Once `[logging] level` is known it replaces
//! the bootstrap filter unless `RUST_LOG` was set.

use tracing_subscriber::{reload, EnvFilter, Registry};

use crate::{Error, Result};

/// Level in force until the config file has been read
pub const BOOTSTRAP_LEVEL: &str = "info";

/// Filter layer to install on the registry
pub type FilterLayer = reload::Layer<EnvFilter, Registry>;

/// Applies the configured level once it is known
pub struct LogLevelHandle {
    handle: reload::Handle<EnvFilter, Registry>,
    from_env: bool,
}

/// `RUST_LOG` if set, otherwise [`BOOTSTRAP_LEVEL`]
pub fn bootstrap_filter() -> (FilterLayer, LogLevelHandle) {
    filter_layer(EnvFilter::try_from_default_env().ok())
}

fn filter_layer(env_filter: Option<EnvFilter>) -> (FilterLayer, LogLevelHandle) {
    let from_env = env_filter.is_some();
    let (layer, handle) =
        reload::Layer::new(env_filter.unwrap_or_else(|| EnvFilter::new(BOOTSTRAP_LEVEL)));
    (layer, LogLevelHandle { handle, from_env })
}

impl LogLevelHandle {
    /// Switch to `level`; returns false when `RUST_LOG` takes precedence
    pub fn apply(&self, level: &str) -> Result<bool> {
        if self.from_env {
            return Ok(false);
        }
        let filter = EnvFilter::try_new(level)
            .map_err(|e| Error::Config(format!("Invalid logging level '{}': {}", level, e)))?;
        self.handle
            .reload(filter)
            .map_err(|e| Error::Config(format!("Failed to apply logging level: {}", e)))?;
        Ok(true)
    }
}
