//! Relationship type token registry.
//!
//! Relationship type names map to dense numeric tokens. Creation is
//! idempotent and master-arbitrated so every cluster member agrees on the
//! numbering.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;
use tracing::debug;

struct RegistryInner {
    by_name: HashMap<String, u32>,
    names: Vec<String>,
}

/// Name-to-token registry for relationship types.
pub struct RelationshipTypeRegistry {
    inner: RwLock<RegistryInner>,
}

impl RelationshipTypeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                by_name: HashMap::new(),
                names: Vec::new(),
            }),
        }
    }

    /// Returns the token for `name`, registering it first if unknown.
    pub fn get_or_create(&self, name: &str) -> u32 {
        if let Some(id) = self.id_for(name) {
            return id;
        }

        let mut inner = self.inner.write();
        if let Some(id) = inner.by_name.get(name) {
            return *id;
        }

        let id = inner.names.len() as u32;
        inner.names.push(name.to_string());
        inner.by_name.insert(name.to_string(), id);
        debug!(name, id, "registered relationship type");
        id
    }

    /// Returns the token for `name` if registered.
    pub fn id_for(&self, name: &str) -> Option<u32> {
        self.inner.read().by_name.get(name).copied()
    }

    /// Returns the name behind a token.
    pub fn name_of(&self, id: u32) -> Option<String> {
        self.inner.read().names.get(id as usize).cloned()
    }

    /// Returns the number of registered types.
    pub fn len(&self) -> usize {
        self.inner.read().names.len()
    }

    /// Returns true when no types are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RelationshipTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RelationshipTypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationshipTypeRegistry")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_ids() {
        let registry = RelationshipTypeRegistry::new();
        assert_eq!(registry.get_or_create("KNOWS"), 0);
        assert_eq!(registry.get_or_create("LIKES"), 1);
        assert_eq!(registry.get_or_create("KNOWS"), 0);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_lookup() {
        let registry = RelationshipTypeRegistry::new();
        registry.get_or_create("KNOWS");

        assert_eq!(registry.id_for("KNOWS"), Some(0));
        assert_eq!(registry.id_for("LIKES"), None);
        assert_eq!(registry.name_of(0), Some("KNOWS".to_string()));
        assert_eq!(registry.name_of(9), None);
    }
}
