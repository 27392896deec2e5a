use std::collections::BTreeMap;

use serde::{de::IgnoredAny, Deserialize, Deserializer, Serialize, Serializer};

use crate::{BitField, Component, ComponentDefId, Entity, EntityFilter, EntityId, EntitySet, FilterType};

// BitField: "all" or the ascending set-bit indices.
impl Serialize for BitField {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.is_all() {
            serializer.serialize_str("all")
        } else {
            serializer.collect_seq(self.iter())
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BitFieldRepr {
    Indices(Vec<u32>),
    Text(String),
    Other(IgnoredAny),
}

impl<'de> Deserialize<'de> for BitField {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match BitFieldRepr::deserialize(deserializer)? {
            BitFieldRepr::Indices(indices) => BitField::from_values(indices),
            BitFieldRepr::Text(text) => BitField::parse(&text),
            BitFieldRepr::Other(_) => BitField::new(),
        })
    }
}

// EntityFilter: {"ALL": [..], "ANY": [..]}
impl Serialize for EntityFilter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.filters.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for EntityFilter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        BTreeMap::<FilterType, BitField>::deserialize(deserializer).map(EntityFilter::from)
    }
}

// Entity: the bitfield is derived from the component map, whatever the input says.
#[derive(Deserialize)]
struct EntityRepr {
    id: EntityId,
    #[serde(default)]
    components: BTreeMap<ComponentDefId, Component>,
}

impl<'de> Deserialize<'de> for Entity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = EntityRepr::deserialize(deserializer)?;
        Ok(repr
            .components
            .into_values()
            .fold(Entity::new(repr.id), Entity::with_component))
    }
}

// EntitySet: the entities in insertion order.
impl Serialize for EntitySet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl<'de> Deserialize<'de> for EntitySet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<Entity>::deserialize(deserializer).map(EntitySet::from_iter)
    }
}
