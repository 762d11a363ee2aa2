//! Runtime log level control.
//!
//! The binary installs its `EnvFilter` behind a `reload` layer and hands the
//! handle to the coordinator, so `debug_logging` can be flipped through
//! [`CoordinatorOptions`](crate::CoordinatorOptions) without a restart.

use tracing::{info, Level};
use tracing_subscriber::{reload, EnvFilter, Registry};

use crate::error::{Result, YarboError};

/// Switches debug logging on or off
#[cfg_attr(test, mockall::automock)]
pub trait LogLevelControl: Send + Sync {
    fn set_debug(&self, enabled: bool) -> Result<()>;
}

/// Filter from `RUST_LOG` with `info` or `debug` added as the default level
pub fn env_filter(debug: bool) -> EnvFilter {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    EnvFilter::from_default_env().add_directive(level.into())
}

/// [`LogLevelControl`] backed by a `tracing_subscriber` reload handle
#[derive(Debug)]
pub struct ReloadLogControl {
    handle: reload::Handle<EnvFilter, Registry>,
}

impl ReloadLogControl {
    pub fn new(handle: reload::Handle<EnvFilter, Registry>) -> Self {
        Self { handle }
    }
}

impl LogLevelControl for ReloadLogControl {
    fn set_debug(&self, enabled: bool) -> Result<()> {
        self.handle
            .reload(env_filter(enabled))
            .map_err(|e| YarboError::Logging(e.to_string()))?;
        info!("Debug logging {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }
}
