use crate::model::Id;
use serde::{Deserialize, Serialize};

/// A tracked real-world object or event.
///
/// Entities are unique by `(name, integration_source)`; the workflow always
/// resolves them through that pair and never by raw identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_id: Id,
    pub name: String,
    pub description: String,
    pub integration_source: String,
    pub template: i32,
}

impl Entity {
    pub fn key(&self) -> EntityKey<'_> {
        EntityKey {
            name: &self.name,
            integration_source: &self.integration_source,
        }
    }
}

/// Identity lookup key for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityKey<'a> {
    pub name: &'a str,
    pub integration_source: &'a str,
}

impl<'a> EntityKey<'a> {
    pub fn new(name: &'a str, integration_source: &'a str) -> Self {
        Self {
            name,
            integration_source,
        }
    }
}

impl std::fmt::Display for EntityKey<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "'{}' from '{}'", self.name, self.integration_source)
    }
}

/// Input for the create-entity gateway operation. The identifier is
/// assigned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEntity {
    pub name: String,
    pub description: String,
    pub integration_source: String,
    pub template: i32,
}

impl NewEntity {
    pub fn key(&self) -> EntityKey<'_> {
        EntityKey::new(&self.name, &self.integration_source)
    }

    pub fn into_entity(self, entity_id: Id) -> Entity {
        Entity {
            entity_id,
            name: self.name,
            description: self.description,
            integration_source: self.integration_source,
            template: self.template,
        }
    }
}
