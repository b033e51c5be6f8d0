//! The resource-type registry: name → schema descriptor + handler.

use std::collections::HashMap;
use std::sync::Arc;

use crate::schema::TypeDescriptor;

use super::ResourceHandler;

/// A registered resource type: its schema and its operations.
pub struct RegisteredType {
    pub desc: TypeDescriptor,
    pub handler: Arc<dyn ResourceHandler>,
}

/// Lookup of registered resource types by name.
pub trait Registry: Send + Sync {
    fn type_of(&self, name: &str) -> Option<Arc<RegisteredType>>;

    /// All registered type names, sorted. Used for spelling suggestions.
    fn names(&self) -> Vec<String>;
}

/// A registry populated once at startup.
#[derive(Default)]
pub struct StaticRegistry {
    types: HashMap<String, Arc<RegisteredType>>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        desc: TypeDescriptor,
        handler: Arc<dyn ResourceHandler>,
    ) -> &mut Self {
        self.types
            .insert(desc.name.clone(), Arc::new(RegisteredType { desc, handler }));
        self
    }
}

impl Registry for StaticRegistry {
    fn type_of(&self, name: &str) -> Option<Arc<RegisteredType>> {
        self.types.get(name).cloned()
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.types.keys().cloned().collect();
        names.sort();
        names
    }
}
