//! Named scheduler policies.

use super::{BasicPolicy, Scheduler, SchedulerPolicy, ThreadedPolicy};
use crate::clock::Clock;
use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Builds a fresh policy for every scheduler.
pub type PolicyConstructor = Arc<dyn Fn() -> Box<dyn SchedulerPolicy> + Send + Sync>;

/// A named way of creating scheduler policies.
#[derive(Clone)]
pub struct SchedulerFactory {
    name: String,
    constructor: PolicyConstructor,
}

impl SchedulerFactory {
    /// Factory `name` calling `constructor`.
    pub fn new<F>(name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn() -> Box<dyn SchedulerPolicy> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            constructor: Arc::new(constructor),
        }
    }

    /// Registered name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A new policy instance.
    pub fn create_policy(&self) -> Box<dyn SchedulerPolicy> {
        (self.constructor)()
    }
}

impl fmt::Debug for SchedulerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerFactory").field("name", &self.name).finish()
    }
}

/// Scheduler factories by name.
#[derive(Default)]
pub struct SchedulerRegistry {
    factories: RwLock<BTreeMap<String, SchedulerFactory>>,
}

impl SchedulerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `"basic"` and `"threaded"`.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register(SchedulerFactory::new("basic", || {
            Box::new(BasicPolicy::default()) as Box<dyn SchedulerPolicy>
        }));
        registry.register(SchedulerFactory::new("threaded", || {
            Box::new(ThreadedPolicy::default()) as Box<dyn SchedulerPolicy>
        }));
        registry
    }

    /// Add `factory`, replacing one with the same name.
    pub fn register(&self, factory: SchedulerFactory) {
        if let Some(old) = self
            .factories
            .write()
            .insert(factory.name.clone(), factory)
        {
            tracing::debug!(name = %old.name, "scheduler factory replaced");
        }
    }

    /// Factory called `name`.
    pub fn get(&self, name: &str) -> Option<SchedulerFactory> {
        self.factories.read().get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.factories.read().keys().cloned().collect()
    }

    /// Scheduler `scheduler_name` using the policy registered as `policy`.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownFactory`] if no such policy is registered.
    pub fn create(
        &self,
        policy: &str,
        scheduler_name: impl Into<String>,
        system_clock: Arc<dyn Clock>,
    ) -> Result<Scheduler> {
        let factory = self
            .get(policy)
            .ok_or_else(|| Error::UnknownFactory(policy.to_string()))?;
        Ok(Scheduler::new(scheduler_name, factory.create_policy(), system_clock))
    }
}

impl fmt::Debug for SchedulerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerRegistry")
            .field("factories", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    #[test]
    fn test_builtins() {
        let registry = SchedulerRegistry::with_builtins();
        assert_eq!(registry.names(), ["basic", "threaded"]);

        let scheduler = registry
            .create("threaded", "bin0", Arc::new(SystemClock::new()))
            .unwrap();
        assert_eq!(scheduler.name(), "bin0");
        assert_eq!(scheduler.policy_name(), "threaded");
    }

    #[test]
    fn test_unknown_policy() {
        let registry = SchedulerRegistry::with_builtins();
        let err = registry
            .create("fancy", "bin0", Arc::new(SystemClock::new()))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownFactory(name) if name == "fancy"));
    }

    #[test]
    fn test_register_custom() {
        let registry = SchedulerRegistry::new();
        registry.register(SchedulerFactory::new("mine", || {
            Box::new(BasicPolicy::default()) as Box<dyn SchedulerPolicy>
        }));
        assert!(registry.get("mine").is_some());
        assert!(registry.get("basic").is_none());
    }
}
