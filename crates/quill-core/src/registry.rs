//! Component registry.
//!
//! Maps string identifiers to [`ComponentFactory`] instances. The registry
//! is built once at start-up (built-ins plus any plugin factories), then
//! frozen behind an `Arc` and only read afterwards.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use quill_types::{QuillError, Result};

use crate::component::ComponentFactory;
use crate::components;

/// Registry of available component kinds.
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    factories: BTreeMap<String, Arc<dyn ComponentFactory>>,
}

impl ComponentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding every built-in component.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        components::register_builtins(&mut registry);
        registry
    }

    /// Register a factory. Replaces any factory with the same name.
    pub fn register(&mut self, factory: Arc<dyn ComponentFactory>) {
        let name = factory.name().to_string();
        debug!(component = %name, "registering component");
        self.factories.insert(name, factory);
    }

    /// Resolve a name to its factory.
    pub fn get(&self, name: &str) -> Result<Arc<dyn ComponentFactory>> {
        self.factories
            .get(name)
            .cloned()
            .ok_or_else(|| QuillError::UnknownComponent { name: name.into() })
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Number of registered factories.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("components", &self.names())
            .finish()
    }
}
