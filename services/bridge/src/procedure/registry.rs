//! services/bridge/src/procedure/registry.rs
//!
//! Compile-time table of the procedures the bridge can load, keyed by name.

use crate::procedure::machine::LoadError;
use crate::procedures::ventriculostomy::Ventriculostomy;
use indexmap::IndexMap;
use neuro_surgery_core::Procedure;

pub type ProcedureFactory = fn() -> Box<dyn Procedure>;

struct Entry {
    description: &'static str,
    factory: ProcedureFactory,
}

pub struct ProcedureRegistry {
    entries: IndexMap<&'static str, Entry>,
}

impl ProcedureRegistry {
    pub fn empty() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    /// Every procedure shipped with the bridge.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(
            "ventriculostomy",
            "External ventricular drain placement procedure",
            ventriculostomy,
        );
        registry
    }

    /// Adds or replaces a procedure under `key`.
    pub fn register(&mut self, key: &'static str, description: &'static str, factory: ProcedureFactory) {
        self.entries.insert(key, Entry {
            description,
            factory,
        });
    }

    /// `(key, description)` pairs in registration order.
    pub fn list(&self) -> Vec<(&'static str, &'static str)> {
        self.entries
            .iter()
            .map(|(key, entry)| (*key, entry.description))
            .collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Instantiates a fresh procedure.
    pub fn create(&self, key: &str) -> Result<Box<dyn Procedure>, LoadError> {
        self.entries
            .get(key)
            .map(|entry| (entry.factory)())
            .ok_or_else(|| LoadError::UnknownProcedure(key.to_string()))
    }
}

fn ventriculostomy() -> Box<dyn Procedure> {
    Box::new(Ventriculostomy::new())
}

impl Default for ProcedureRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_creates_ventriculostomy() {
        let registry = ProcedureRegistry::builtin();
        assert!(registry.contains("ventriculostomy"));
        let procedure = registry.create("ventriculostomy").unwrap();
        assert_eq!(procedure.name(), "Ventriculostomy");
    }

    #[test]
    fn unknown_keys_are_an_error() {
        let registry = ProcedureRegistry::builtin();
        assert!(matches!(
            registry.create("appendectomy"),
            Err(LoadError::UnknownProcedure(key)) if key == "appendectomy"
        ));
    }
}
