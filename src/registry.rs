// Module registry
// Maps configured package names to module constructors

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::ModuleError;
use crate::module::{Module, ModuleFactory};
use crate::modules::{demo::DemoFactory, exec::ExecFactory, virt::VirtFactory};

/// Registry of module constructors, looked up by `pkg` name
pub struct Registry {
    factories: BTreeMap<&'static str, Arc<dyn ModuleFactory>>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Create a registry with the builtin modules pre-loaded
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.load_builtins();
        registry
    }

    /// Register every builtin module
    pub fn load_builtins(&mut self) {
        self.register(Arc::new(VirtFactory));
        self.register(Arc::new(DemoFactory));
        self.register(Arc::new(ExecFactory));
    }

    /// Register a factory; a later registration under the same name wins
    pub fn register(&mut self, factory: Arc<dyn ModuleFactory>) {
        self.factories.insert(factory.pkg(), factory);
    }

    pub fn contains(&self, pkg: &str) -> bool {
        self.factories.contains_key(pkg)
    }

    /// Registered package names, sorted
    pub fn names(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Build a module instance of package `pkg`
    pub async fn instantiate(
        &self,
        pkg: &str,
        params: toml::Table,
    ) -> Result<Arc<dyn Module>, ModuleError> {
        let factory = self
            .factories
            .get(pkg)
            .ok_or_else(|| ModuleError::UnknownPackage {
                name: pkg.to_string(),
                available: self.names().join(", "),
            })?;
        factory.create(params).await
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_with_builtins() {
        let registry = Registry::with_builtins();
        assert_eq!(registry.names(), vec!["demo", "exec", "virt"]);
        assert!(registry.contains("virt"));
        assert!(!registry.contains("vm"));
    }

    #[tokio::test]
    async fn test_unknown_package_lists_available() {
        let registry = Registry::with_builtins();
        let err = match registry.instantiate("nope", toml::Table::new()).await {
            Err(e) => e,
            Ok(_) => panic!("instantiated an unknown package"),
        };
        assert_eq!(
            err.to_string(),
            "No loaded module of the name 'nope' (only demo, exec, virt)"
        );
    }

    #[tokio::test]
    async fn test_instantiate_demo() {
        let registry = Registry::with_builtins();
        let module = registry
            .instantiate("demo", toml::Table::new())
            .await
            .unwrap();
        assert_eq!(module.pkg(), "demo");
    }

    #[test]
    fn test_empty_registry() {
        let registry = Registry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }
}
