use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::{BitField, EntitySet, QueryError, QueryResult};

/// Dense id assigned to a registered component uri, used as a bit index.
pub type ComponentDefId = u32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    def_id: ComponentDefId,
    #[serde(default)]
    attributes: Map<String, Json>,
}

impl Component {
    pub fn new(def_id: ComponentDefId) -> Self {
        Self {
            def_id,
            attributes: Map::new(),
        }
    }

    pub fn with_attributes(def_id: ComponentDefId, attributes: Map<String, Json>) -> Self {
        Self {
            def_id,
            attributes,
        }
    }

    pub fn def_id(&self) -> ComponentDefId {
        self.def_id
    }

    pub fn get(&self, name: &str) -> Option<&Json> {
        self.attributes.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Json>) -> &mut Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn attributes(&self) -> &Map<String, Json> {
        &self.attributes
    }
}

/// Resolves component uris to def ids and back.
///
/// Ids are handed out from 1 in registration order and never reused.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    ids: FxHashMap<String, ComponentDefId>,
    uris: Vec<String>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `uri` if it is not known yet and returns its def id.
    pub fn register(&mut self, uri: impl Into<String>) -> ComponentDefId {
        let uri = uri.into();
        if let Some(&id) = self.ids.get(&uri) {
            return id;
        }

        self.uris.push(uri.clone());
        let id = self.uris.len() as ComponentDefId;
        self.ids.insert(uri, id);
        tracing::debug!(id, uri = %self.uris[id as usize - 1], "registered component");
        id
    }

    pub fn get_iid(&self, uri: &str) -> QueryResult<ComponentDefId> {
        self.ids
            .get(uri)
            .copied()
            .ok_or_else(|| QueryError::UnknownComponent(uri.to_string()))
    }

    pub fn get_iids<S: AsRef<str>>(&self, uris: &[S]) -> QueryResult<Vec<ComponentDefId>> {
        uris.iter().map(|uri| self.get_iid(uri.as_ref())).collect()
    }

    pub fn uri_of(&self, id: ComponentDefId) -> Option<&str> {
        (id as usize)
            .checked_sub(1)
            .and_then(|i| self.uris.get(i))
            .map(String::as_str)
    }

    pub fn components_to_bitfield<S: AsRef<str>>(&self, uris: &[S]) -> QueryResult<BitField> {
        Ok(BitField::from_values(self.get_iids(uris)?))
    }

    /// Builds a component of a registered uri. An object becomes the
    /// attribute map, `null` means no attributes and any other value is
    /// stored under `"value"`.
    pub fn create_component(&self, uri: &str, attributes: Json) -> QueryResult<Component> {
        let def_id = self.get_iid(uri)?;
        let attributes = match attributes {
            Json::Object(map) => map,
            Json::Null => Map::new(),
            other => Map::from_iter([("value".to_string(), other)]),
        };
        Ok(Component::with_attributes(def_id, attributes))
    }

    pub fn create_entity_set(&self) -> EntitySet {
        EntitySet::new()
    }

    pub fn len(&self) -> usize {
        self.uris.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uris.is_empty()
    }
}
