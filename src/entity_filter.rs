use std::{
    borrow::Cow,
    collections::BTreeMap,
    fmt,
    hash::{Hash, Hasher},
};

use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{BitField, ComponentDefId, Entity};

/// How a filter bitfield is tested against an entity's component bitfield.
///
/// The declaration order is the evaluation order: predicates run against the
/// untouched entity, then INCLUDE/EXCLUDE strip components from survivors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FilterType {
    /// Every filter component must be present.
    All,
    /// At least one filter component must be present.
    Any,
    /// The entity must have at least one component.
    Some,
    /// No filter component may be present.
    None,
    /// Keep only the filter components.
    Include,
    /// Drop the filter components.
    Exclude,
    /// Accept everything.
    Root,
}

impl FilterType {
    pub fn is_transform(self) -> bool {
        matches!(self, FilterType::Include | FilterType::Exclude)
    }

    pub fn name(self) -> &'static str {
        match self {
            FilterType::All => "ALL",
            FilterType::Any => "ANY",
            FilterType::Some => "SOME",
            FilterType::None => "NONE",
            FilterType::Include => "INCLUDE",
            FilterType::Exclude => "EXCLUDE",
            FilterType::Root => "ROOT",
        }
    }
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One bitfield per filter type, evaluated together against an entity.
///
/// The same instance is reused for every entity a query fragment visits and
/// never holds on to any of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityFilter {
    pub(crate) filters: BTreeMap<FilterType, BitField>,
}

impl EntityFilter {
    pub fn new() -> Self {
        Self {
            filters: BTreeMap::new(),
        }
    }

    /// A pass-through filter that accepts everything.
    pub fn root() -> Self {
        let mut filter = Self::new();
        filter.add(FilterType::Root, None);
        filter
    }

    pub fn with(filter_type: FilterType, bit_field: BitField) -> Self {
        let mut filter = Self::new();
        filter.add(filter_type, Some(bit_field));
        filter
    }

    /// Adds a filter type, OR-ing into an existing bitfield of the same type.
    /// ROOT never carries bits.
    pub fn add(&mut self, filter_type: FilterType, bit_field: Option<BitField>) -> &mut Self {
        let entry = self.filters.entry(filter_type).or_default();
        if filter_type == FilterType::Root {
            return self;
        }
        if let Some(bit_field) = bit_field {
            *entry |= &bit_field;
        }
        self
    }

    pub fn add_values(
        &mut self,
        filter_type: FilterType,
        values: impl IntoIterator<Item = ComponentDefId>,
    ) -> &mut Self {
        self.add(filter_type, Some(BitField::from_values(values)))
    }

    /// Unions every type of `other` into this filter.
    pub fn merge(&mut self, other: &EntityFilter) -> &mut Self {
        for (&filter_type, bit_field) in &other.filters {
            self.add(filter_type, Some(bit_field.clone()));
        }
        self
    }

    /// Adds the serialized `{TYPE: bits}` map shape.
    pub fn add_map(&mut self, map: BTreeMap<FilterType, BitField>) -> &mut Self {
        for (filter_type, bit_field) in map {
            self.add(filter_type, Some(bit_field));
        }
        self
    }

    /// Whether following this filter with `other` can be folded into a
    /// single pass without changing the result.
    ///
    /// ANY and INCLUDE do not distribute over union, and a predicate that
    /// follows a transform has to see the transformed entity.
    pub fn can_absorb(&self, other: &EntityFilter) -> bool {
        let transforms = self.filters.keys().any(|t| t.is_transform());
        other.filters.keys().all(|&t| {
            let collides = matches!(t, FilterType::Any | FilterType::Include)
                && self.filters.contains_key(&t);
            let reordered = transforms && !t.is_transform() && t != FilterType::Root;
            !collides && !reordered
        })
    }

    pub fn get(&self, filter_type: FilterType) -> Option<&BitField> {
        self.filters.get(&filter_type)
    }

    pub fn filter_types(&self) -> impl Iterator<Item = FilterType> + '_ {
        self.filters.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Union of the bits of every type but ROOT.
    pub fn component_ids(&self) -> BitField {
        let mut ids = BitField::new();
        for (_, bit_field) in self.filters.iter().filter(|(t, _)| **t != FilterType::Root) {
            ids |= bit_field;
        }
        ids
    }

    /// Tests a raw component bitfield. Transforms apply to the returned
    /// bitfield.
    pub fn accept_bitfield(&self, bit_field: &BitField) -> Option<BitField> {
        let mut current = bit_field.clone();
        for (&filter_type, filter_bits) in &self.filters {
            match filter_type {
                FilterType::Include => current = current.intersection(filter_bits),
                FilterType::Exclude => {
                    for id in filter_bits.to_values() {
                        current.set(id, false);
                    }
                }
                _ if !Self::accept_type(filter_type, &current, filter_bits) => return None,
                _ => {}
            }
        }
        Some(current)
    }

    /// Tests `bit_field` as if the `extra` components were present as well.
    /// The caller's bitfield is left alone.
    pub fn accept_with_extra(&self, bit_field: &BitField, extra: &[ComponentDefId]) -> Option<BitField> {
        let mut scoped = bit_field.clone();
        scoped.set_values(extra.iter().copied(), true);
        self.accept_bitfield(&scoped)
    }

    /// Tests an entity. INCLUDE/EXCLUDE hand back a stripped copy; the
    /// entity itself is borrowed back when nothing had to change.
    pub fn accept_entity<'e>(&self, entity: &'e Entity) -> Option<Cow<'e, Entity>> {
        let mut current = Cow::Borrowed(entity);
        for (&filter_type, filter_bits) in &self.filters {
            if filter_type.is_transform() {
                let stripped = Self::stripped(filter_type, current.bitfield(), filter_bits);
                if !stripped.is_empty() {
                    current.to_mut().remove_components(stripped);
                }
            } else if !Self::accept_type(filter_type, current.bitfield(), filter_bits) {
                trace!(entity = entity.id(), %filter_type, "entity rejected");
                return None;
            }
        }
        Some(current)
    }

    /// The per-type predicate. `src` is the entity's bitfield, `bit_field`
    /// the filter's.
    pub fn accept_type(filter_type: FilterType, src: &BitField, bit_field: &BitField) -> bool {
        match filter_type {
            FilterType::Some => src.count() > 0,
            FilterType::None => {
                src.is_empty() || bit_field.is_empty() || !BitField::aand(bit_field, src)
            }
            FilterType::Any => {
                if bit_field.is_empty() {
                    return true;
                }
                !src.is_empty() && BitField::aand(bit_field, src)
            }
            FilterType::All => bit_field.is_empty() || BitField::and(bit_field, src),
            FilterType::Include | FilterType::Exclude | FilterType::Root => true,
        }
    }

    /// Applies an INCLUDE or EXCLUDE transform to `entity` in place.
    pub fn transform(filter_type: FilterType, entity: &mut Entity, bit_field: &BitField) {
        let stripped = Self::stripped(filter_type, entity.bitfield(), bit_field);
        entity.remove_components(stripped);
    }

    fn stripped(filter_type: FilterType, src: &BitField, bit_field: &BitField) -> Vec<ComponentDefId> {
        match filter_type {
            FilterType::Include => src.iter().filter(|&id| !bit_field.get(id)).collect(),
            FilterType::Exclude => src.iter().filter(|&id| bit_field.get(id)).collect(),
            _ => Vec::new(),
        }
    }

    /// Canonical JSON form: `{"ALL": [1, 2], "ROOT": []}`, keys in type order.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Hash of the canonical JSON form. Stable across insertion order of the
    /// filter types.
    pub fn hash(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.to_json().hash(&mut hasher);
        hasher.finish()
    }

    pub fn hash_string(&self) -> String {
        format!("{:016x}", self.hash())
    }
}

impl From<BTreeMap<FilterType, BitField>> for EntityFilter {
    fn from(map: BTreeMap<FilterType, BitField>) -> Self {
        let mut filter = Self::new();
        filter.add_map(map);
        filter
    }
}
