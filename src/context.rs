//! Library context: configuration, registries and the system clock.
//!
//! A [`Context`] is created once by the application and handed to
//! [`Pipeline::new`](crate::element::Pipeline::new) and
//! [`Bin::new`](crate::element::Bin::new). Nothing in padflow keeps
//! process-wide mutable state.
//!
//! ```rust
//! use padflow::context::{Context, ContextConfig};
//!
//! let ctx = Context::with_config(ContextConfig::default().with_scheduler("threaded"));
//! assert_eq!(ctx.config().default_scheduler, "threaded");
//! assert!(ctx.schedulers().get("basic").is_some());
//! ```

use crate::autoplug::Registry;
use crate::bus::DEFAULT_BUS_CAPACITY;
use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::scheduler::{Scheduler, SchedulerRegistry};
use std::fmt;
use std::sync::Arc;

/// Environment variable overriding [`ContextConfig::default_scheduler`].
pub const ENV_SCHEDULER: &str = "PADFLOW_SCHEDULER";

/// Environment variable overriding [`ContextConfig::queue_max_buffers`].
pub const ENV_QUEUE_MAX_BUFFERS: &str = "PADFLOW_QUEUE_MAX_BUFFERS";

/// Tunables shared by everything created from one [`Context`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextConfig {
    /// Policy used by bins that do not name one.
    pub default_scheduler: String,
    /// Messages a pipeline bus keeps for slow subscribers.
    pub bus_capacity: usize,
    /// Default buffer limit of a queue element (0 = unlimited).
    pub queue_max_buffers: usize,
    /// Default byte limit of a queue element (0 = unlimited).
    pub queue_max_bytes: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            default_scheduler: "basic".to_string(),
            bus_capacity: DEFAULT_BUS_CAPACITY,
            queue_max_buffers: 100,
            queue_max_bytes: 10 * 1024 * 1024,
        }
    }
}

impl ContextConfig {
    /// Defaults overlaid with `PADFLOW_SCHEDULER` and
    /// `PADFLOW_QUEUE_MAX_BUFFERS`. Unparsable values are ignored.
    pub fn from_env() -> Self {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(name) = lookup(ENV_SCHEDULER).filter(|s| !s.is_empty()) {
            self.default_scheduler = name;
        }
        if let Some(raw) = lookup(ENV_QUEUE_MAX_BUFFERS) {
            match raw.trim().parse() {
                Ok(n) => self.queue_max_buffers = n,
                Err(_) => tracing::warn!(value = %raw, "ignoring {ENV_QUEUE_MAX_BUFFERS}"),
            }
        }
        self
    }

    /// Set the default scheduler policy.
    pub fn with_scheduler(mut self, name: impl Into<String>) -> Self {
        self.default_scheduler = name.into();
        self
    }

    /// Set the bus capacity.
    pub fn with_bus_capacity(mut self, capacity: usize) -> Self {
        self.bus_capacity = capacity.max(1);
        self
    }

    /// Set the default queue limits.
    pub fn with_queue_limits(mut self, max_buffers: usize, max_bytes: usize) -> Self {
        self.queue_max_buffers = max_buffers;
        self.queue_max_bytes = max_bytes;
        self
    }
}

struct ContextInner {
    config: ContextConfig,
    schedulers: SchedulerRegistry,
    registry: Registry,
    system_clock: Arc<dyn Clock>,
}

/// Shared library state. Clones refer to the same context.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Context with the default configuration and built-in factories.
    pub fn new() -> Self {
        Self::with_config(ContextConfig::default())
    }

    /// Context with `config` and built-in factories.
    pub fn with_config(config: ContextConfig) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                config,
                schedulers: SchedulerRegistry::with_builtins(),
                registry: Registry::with_builtins(),
                system_clock: Arc::new(SystemClock::new()),
            }),
        }
    }

    /// Configuration.
    pub fn config(&self) -> &ContextConfig {
        &self.inner.config
    }

    /// Scheduler policies by name.
    pub fn schedulers(&self) -> &SchedulerRegistry {
        &self.inner.schedulers
    }

    /// Element factories used by autoplugging.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Clock used when no element provides one.
    pub fn system_clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.inner.system_clock)
    }

    /// Scheduler `name` with the policy registered as `policy`.
    ///
    /// # Errors
    ///
    /// [`crate::Error::UnknownFactory`] for an unregistered policy.
    pub fn create_scheduler(&self, policy: &str, name: &str) -> Result<Scheduler> {
        self.inner
            .schedulers
            .create(policy, name, self.system_clock())
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.inner.config)
            .field("schedulers", &self.inner.schedulers)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ContextConfig::default();
        assert_eq!(config.default_scheduler, "basic");
        assert_eq!(config.bus_capacity, 256);
    }

    #[test]
    fn test_env_overlay() {
        let env: HashMap<&str, &str> = [
            (ENV_SCHEDULER, "threaded"),
            (ENV_QUEUE_MAX_BUFFERS, " 7 "),
        ]
        .into();
        let config = ContextConfig::default().overlay(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.default_scheduler, "threaded");
        assert_eq!(config.queue_max_buffers, 7);

        let config = ContextConfig::default()
            .overlay(|k| (k == ENV_QUEUE_MAX_BUFFERS).then(|| "lots".to_string()));
        assert_eq!(config.queue_max_buffers, 100);
    }

    #[test]
    fn test_unknown_scheduler() {
        let ctx = Context::new();
        assert!(ctx.create_scheduler("nope", "bin").is_err());
        let s = ctx.create_scheduler("basic", "bin").unwrap();
        assert_eq!(s.policy_name(), "basic");
    }
}
