//! Registry of named breakers owned by the composition root.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use crate::breaker::{Breaker, BreakerConfig, BreakerState};
use crate::guarded::GuardedCaller;

/// Hands out one shared [`Breaker`] per name.
///
/// Names follow `"{dependency}.{operation_class}"`, e.g. `"catalog.write"`.
/// Clients that ask for the same name share the same breaker.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    defaults: BreakerConfig,
    overrides: HashMap<String, BreakerConfig>,
    breakers: Mutex<BTreeMap<String, Arc<Breaker>>>,
}

impl BreakerRegistry {
    pub fn new(defaults: BreakerConfig) -> Self {
        Self {
            defaults,
            overrides: HashMap::new(),
            breakers: Mutex::new(BTreeMap::new()),
        }
    }

    /// Uses `config` instead of the defaults for the breaker called `name`.
    pub fn with_override(mut self, name: impl Into<String>, config: BreakerConfig) -> Self {
        self.overrides.insert(name.into(), config);
        self
    }

    /// Returns the breaker for `name`, creating it on first use.
    pub fn breaker(&self, name: &str) -> Arc<Breaker> {
        let mut breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                let config = self.overrides.get(name).copied().unwrap_or(self.defaults);
                Arc::new(Breaker::new(name, config))
            })
            .clone()
    }

    /// Shorthand for a [`GuardedCaller`] over the breaker for `name`.
    pub fn caller(&self, name: &str) -> GuardedCaller {
        GuardedCaller::new(self.breaker(name))
    }

    /// Current state of every breaker, ordered by name.
    pub fn snapshot(&self) -> Vec<(String, BreakerState)> {
        self.breakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.state()))
            .collect()
    }
}
