use std::collections::BTreeMap;

use generational_arena::{Arena, Index};
use rustc_hash::FxHashMap;
use ::serde::Serialize;

mod bit_field;
mod components;
mod config;
mod entity_filter;
mod error;
pub mod query;
mod serde;

pub use bit_field::BitField;
pub use components::{Component, ComponentDefId, ComponentRegistry};
pub use config::{ConfigSection, ExecuteOptions};
pub use entity_filter::{EntityFilter, FilterType};
pub use error::{QueryError, QueryResult};
pub use query::{Query, QueryBuilder, Value};

pub type EntityId = u64;

/// A bag of components keyed by their def id.
///
/// The component bitfield is kept in step with the component map so filters
/// never have to rebuild it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entity {
    id: EntityId,
    components: BTreeMap<ComponentDefId, Component>,
    /// Rebuilt from `components` on deserialize.
    #[serde(skip)]
    bitfield: BitField,
}

impl Entity {
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            components: BTreeMap::new(),
            bitfield: BitField::new(),
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn with_component(mut self, component: Component) -> Self {
        self.add_component(component);
        self
    }

    /// Adds or replaces the component with the same def id.
    pub fn add_component(&mut self, component: Component) -> Option<Component> {
        self.bitfield.set(component.def_id(), true);
        self.components.insert(component.def_id(), component)
    }

    pub fn remove_component(&mut self, def_id: ComponentDefId) -> Option<Component> {
        let removed = self.components.remove(&def_id);
        if removed.is_some() {
            self.bitfield.set(def_id, false);
        }
        removed
    }

    pub fn remove_components(&mut self, def_ids: impl IntoIterator<Item = ComponentDefId>) {
        for def_id in def_ids {
            self.remove_component(def_id);
        }
    }

    pub fn has(&self, def_id: ComponentDefId) -> bool {
        self.components.contains_key(&def_id)
    }

    pub fn component(&self, def_id: ComponentDefId) -> Option<&Component> {
        self.components.get(&def_id)
    }

    pub fn component_mut(&mut self, def_id: ComponentDefId) -> Option<&mut Component> {
        self.components.get_mut(&def_id)
    }

    /// Components in ascending def id order.
    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.components.values()
    }

    /// Components whose def id is in `def_ids`, or all of them for `None`.
    pub fn get_components(&self, def_ids: Option<&BitField>) -> Vec<&Component> {
        match def_ids {
            Some(ids) => self
                .components
                .iter()
                .filter(|(id, _)| ids.get(**id))
                .map(|(_, c)| c)
                .collect(),
            None => self.components.values().collect(),
        }
    }

    pub fn num_components(&self) -> usize {
        self.components.len()
    }

    pub fn bitfield(&self) -> &BitField {
        &self.bitfield
    }
}

/// Ordered collection of entities.
///
/// Entities live in an arena; `order` keeps insertion order and `index` maps
/// entity ids to arena slots. Iteration always follows insertion order.
#[derive(Debug, Clone, Default)]
pub struct EntitySet {
    entities: Arena<Entity>,
    order: Vec<Index>,
    index: FxHashMap<EntityId, Index>,
    next_id: EntityId,
}

impl EntitySet {
    pub fn new() -> Self {
        Self {
            entities: Arena::new(),
            order: Vec::new(),
            index: FxHashMap::default(),
            next_id: 1,
        }
    }

    /// Allocates a fresh entity with the next unused id.
    pub fn spawn(&mut self) -> &mut Entity {
        let id = self.next_id.max(1);
        let idx = self.entities.insert(Entity::new(id));
        self.order.push(idx);
        self.index.insert(id, idx);
        self.next_id = id.saturating_add(1);
        &mut self.entities[idx]
    }

    /// Inserts an entity. An entity with the same id is replaced in place
    /// and keeps its position.
    pub fn add_entity(&mut self, entity: Entity) {
        let id = entity.id();
        if id >= self.next_id {
            self.next_id = id.saturating_add(1);
        }

        match self.index.get(&id) {
            Some(&idx) => self.entities[idx] = entity,
            None => {
                let idx = self.entities.insert(entity);
                self.order.push(idx);
                self.index.insert(id, idx);
            }
        }
    }

    pub fn add_entities(&mut self, entities: impl IntoIterator<Item = Entity>) {
        for entity in entities {
            self.add_entity(entity);
        }
    }

    pub fn remove_entity(&mut self, id: EntityId) -> Option<Entity> {
        let idx = self.index.remove(&id)?;
        self.order.retain(|i| *i != idx);
        self.entities.remove(idx)
    }

    pub fn get_entity(&self, id: EntityId) -> Option<&Entity> {
        self.index.get(&id).and_then(|&idx| self.entities.get(idx))
    }

    pub fn get_entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.index.get(&id).and_then(|&idx| self.entities.get_mut(idx))
    }

    pub fn has_entity(&self, id: EntityId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn size(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> + '_ {
        self.order.iter().filter_map(|&idx| self.entities.get(idx))
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.iter().map(Entity::id).collect()
    }
}

impl PartialEq for EntitySet {
    fn eq(&self, other: &Self) -> bool {
        self.size() == other.size() && self.iter().eq(other.iter())
    }
}

impl FromIterator<Entity> for EntitySet {
    fn from_iter<I: IntoIterator<Item = Entity>>(iter: I) -> Self {
        let mut set = Self::new();
        set.add_entities(iter);
        set
    }
}
