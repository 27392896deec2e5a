use std::{borrow::Cow, cmp::Ordering};

use serde_json::Value as Json;

use crate::{Entity, EntitySet};

/// A value flowing through query execution.
///
/// Entity and entity set payloads borrow from the execution root where they
/// can; anything a command produces is owned.
#[derive(Debug, Clone, PartialEq)]
pub enum Value<'a> {
    Json(Json),
    Entity(Cow<'a, Entity>),
    EntitySet(Cow<'a, EntitySet>),
}

impl<'a> Value<'a> {
    pub fn null() -> Self {
        Value::Json(Json::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Json(Json::Null))
    }

    /// Loose truthiness: null, false, 0, "" are false, containers and
    /// entities are true.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Json(json) => truthy(json),
            Value::Entity(_) | Value::EntitySet(_) => true,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Json(Json::Null) => "null",
            Value::Json(Json::Bool(_)) => "bool",
            Value::Json(Json::Number(_)) => "number",
            Value::Json(Json::String(_)) => "string",
            Value::Json(Json::Array(_)) => "array",
            Value::Json(Json::Object(_)) => "object",
            Value::Entity(_) => "entity",
            Value::EntitySet(_) => "entity set",
        }
    }

    pub fn as_json(&self) -> Option<&Json> {
        match self {
            Value::Json(json) => Some(json),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            Value::Entity(entity) => Some(&**entity),
            _ => None,
        }
    }

    pub fn as_entity_set(&self) -> Option<&EntitySet> {
        match self {
            Value::EntitySet(set) => Some(&**set),
            _ => None,
        }
    }

    /// JSON view used by comparisons: entities compare by id, entity sets by
    /// their ordered id list.
    pub fn to_json(&self) -> Json {
        match self {
            Value::Json(json) => json.clone(),
            Value::Entity(entity) => Json::from(entity.id()),
            Value::EntitySet(set) => Json::from(set.ids()),
        }
    }

    /// A view of this value that borrows entity payloads instead of cloning
    /// them.
    pub fn reborrow(&self) -> Value<'_> {
        match self {
            Value::Json(json) => Value::Json(json.clone()),
            Value::Entity(entity) => Value::Entity(Cow::Borrowed(&**entity)),
            Value::EntitySet(set) => Value::EntitySet(Cow::Borrowed(&**set)),
        }
    }

    pub fn into_owned(self) -> Value<'static> {
        match self {
            Value::Json(json) => Value::Json(json),
            Value::Entity(entity) => Value::Entity(Cow::Owned(entity.into_owned())),
            Value::EntitySet(set) => Value::EntitySet(Cow::Owned(set.into_owned())),
        }
    }
}

impl From<Json> for Value<'_> {
    fn from(json: Json) -> Self {
        Value::Json(json)
    }
}

impl<'a> From<&'a Entity> for Value<'a> {
    fn from(entity: &'a Entity) -> Self {
        Value::Entity(Cow::Borrowed(entity))
    }
}

impl<'a> From<&'a EntitySet> for Value<'a> {
    fn from(set: &'a EntitySet) -> Self {
        Value::EntitySet(Cow::Borrowed(set))
    }
}

impl From<Entity> for Value<'_> {
    fn from(entity: Entity) -> Self {
        Value::Entity(Cow::Owned(entity))
    }
}

impl From<EntitySet> for Value<'_> {
    fn from(set: EntitySet) -> Self {
        Value::EntitySet(Cow::Owned(set))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equals,
    NotEquals,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

impl CompareOp {
    pub fn name(self) -> &'static str {
        match self {
            CompareOp::Equals => "EQUALS",
            CompareOp::NotEquals => "NOT_EQUALS",
            CompareOp::LessThan => "LESS_THAN",
            CompareOp::LessThanOrEqual => "LESS_THAN_OR_EQUAL",
            CompareOp::GreaterThan => "GREATER_THAN",
            CompareOp::GreaterThanOrEqual => "GREATER_THAN_OR_EQUAL",
        }
    }

    pub fn eval(self, lhs: &Json, rhs: &Json) -> bool {
        match self {
            CompareOp::Equals => equals(lhs, rhs),
            CompareOp::NotEquals => !equals(lhs, rhs),
            CompareOp::LessThan => ordering(lhs, rhs) == Some(Ordering::Less),
            CompareOp::LessThanOrEqual => {
                matches!(ordering(lhs, rhs), Some(Ordering::Less | Ordering::Equal))
            }
            CompareOp::GreaterThan => ordering(lhs, rhs) == Some(Ordering::Greater),
            CompareOp::GreaterThanOrEqual => {
                matches!(ordering(lhs, rhs), Some(Ordering::Greater | Ordering::Equal))
            }
        }
    }
}

pub(crate) fn truthy(json: &Json) -> bool {
    match json {
        Json::Null => false,
        Json::Bool(b) => *b,
        Json::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Json::String(s) => !s.is_empty(),
        Json::Array(_) | Json::Object(_) => true,
    }
}

/// Equality with array membership: a scalar equals an array containing it,
/// two arrays must match element-wise. Numbers compare by value.
pub fn equals(lhs: &Json, rhs: &Json) -> bool {
    match (lhs, rhs) {
        (Json::Array(a), Json::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| equals(x, y))
        }
        (Json::Array(items), scalar) | (scalar, Json::Array(items)) => {
            items.iter().any(|item| equals(item, scalar))
        }
        (Json::Number(a), Json::Number(b)) => a.as_f64() == b.as_f64(),
        _ => lhs == rhs,
    }
}

/// Ordering between two scalars of the same kind. Mixed kinds and
/// containers are unordered.
pub fn ordering(lhs: &Json, rhs: &Json) -> Option<Ordering> {
    match (lhs, rhs) {
        (Json::Number(a), Json::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Json::String(a), Json::String(b)) => Some(a.cmp(b)),
        (Json::Bool(a), Json::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Treats `json` as a list: arrays as-is, null as empty, scalars as a
/// single item.
pub(crate) fn as_list(json: Json) -> Vec<Json> {
    match json {
        Json::Array(items) => items,
        Json::Null => Vec::new(),
        other => vec![other],
    }
}
