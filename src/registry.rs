//! Key-to-factory registry shared by both plugin kinds.
//!
//! The first factory registered under a key wins. Later registrations for the
//! same key are logged and dropped, so a key never resolves to two factories.

use std::collections::HashMap;

use tracing::{error, info, warn};

use crate::error::SimError;

/// Builds one plugin instance from a construction context.
pub trait Factory<C, T>: Send + Sync {
    fn create(&self, ctx: &C) -> Result<T, SimError>;
}

impl<C, T, F> Factory<C, T> for F
where
    F: Fn(&C) -> Result<T, SimError> + Send + Sync,
{
    fn create(&self, ctx: &C) -> Result<T, SimError> {
        self(ctx)
    }
}

pub struct Registry<C, T> {
    kind: &'static str,
    makers: HashMap<String, Box<dyn Factory<C, T>>>,
}

impl<C, T> Registry<C, T> {
    /// `kind` names the plugin family in logs and errors.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            makers: HashMap::new(),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Register a closure factory. Returns `false` when `key` was already taken.
    pub fn register<F>(&mut self, key: &str, factory: F) -> bool
    where
        F: Fn(&C) -> Result<T, SimError> + Send + Sync + 'static,
        C: 'static,
        T: 'static,
    {
        self.register_factory(key, Box::new(factory))
    }

    pub fn register_factory(&mut self, key: &str, factory: Box<dyn Factory<C, T>>) -> bool {
        if self.makers.contains_key(key) {
            warn!("{} {} already registered, ignoring duplicate", self.kind, key);
            return false;
        }
        self.makers.insert(key.to_string(), factory);
        info!("registered {} {}", self.kind, key);
        true
    }

    /// # Errors
    ///
    /// [`SimError::UnknownPlugin`] when nothing is registered under `key`, or
    /// whatever the factory itself reports.
    pub fn create(&self, key: &str, ctx: &C) -> Result<T, SimError> {
        let Some(factory) = self.makers.get(key) else {
            error!("no {} registered for key {}", self.kind, key);
            return Err(SimError::UnknownPlugin {
                kind: self.kind,
                key: key.to_string(),
            });
        };
        factory.create(ctx)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.makers.contains_key(key)
    }

    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.makers.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.makers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.makers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_registration_wins() {
        let mut registry: Registry<u32, String> = Registry::new("widget");
        assert!(registry.register("A", |n: &u32| Ok(format!("first {n}"))));
        assert!(!registry.register("A", |n: &u32| Ok(format!("second {n}"))));
        assert_eq!(registry.create("A", &7).unwrap(), "first 7");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_key_is_an_error() {
        let registry: Registry<(), ()> = Registry::new("widget");
        match registry.create("MISSING", &()) {
            Err(SimError::UnknownPlugin { kind, key }) => {
                assert_eq!(kind, "widget");
                assert_eq!(key, "MISSING");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_factory_errors_pass_through() {
        let mut registry: Registry<(), ()> = Registry::new("widget");
        registry.register("BAD", |_: &()| Err(SimError::Config("broken".to_string())));
        assert!(matches!(registry.create("BAD", &()), Err(SimError::Config(_))));
    }

    #[test]
    fn test_keys_sorted() {
        let mut registry: Registry<(), u8> = Registry::new("widget");
        registry.register("B", |_: &()| Ok(2));
        registry.register("A", |_: &()| Ok(1));
        assert_eq!(registry.keys(), vec!["A", "B"]);
        assert!(registry.contains("B"));
        assert!(!registry.is_empty());
    }
}
