use std::borrow::Cow;

use rustc_hash::FxHashMap;
use serde_json::Value as Json;
use tracing::trace;

use super::{
    value::{as_list, equals},
    Command, ComponentRef, FilterOptions, Value,
};
use crate::{BitField, Entity, EntityFilter, EntityId, EntitySet, ExecuteOptions, QueryError, QueryResult};

/// Per-execution scratch space: the root the query runs against, the value
/// piped out of the previous command and the stored aliases.
#[derive(Debug, Clone)]
pub struct QueryContext<'a> {
    root: Value<'a>,
    last: Value<'a>,
    alias: FxHashMap<String, Value<'a>>,
    /// Components selected by the enclosing entity filter.
    component_ids: Option<BitField>,
    debug: bool,
}

impl<'a> QueryContext<'a> {
    pub fn new(target: Value<'a>, debug: bool) -> Self {
        Self {
            root: target.clone(),
            last: target,
            alias: FxHashMap::default(),
            component_ids: None,
            debug,
        }
    }

    /// Context for running a filter function against one entity. Aliases and
    /// the root are visible, nothing written to the child leaks back.
    pub fn child<'b>(&'b self, entity: Cow<'b, Entity>, component_ids: BitField) -> QueryContext<'b> {
        QueryContext {
            root: self.root.reborrow(),
            last: Value::Entity(entity),
            alias: self
                .alias
                .iter()
                .map(|(name, value)| (name.clone(), value.reborrow()))
                .collect(),
            component_ids: Some(component_ids),
            debug: self.debug,
        }
    }

    pub fn root(&self) -> &Value<'a> {
        &self.root
    }

    pub fn last(&self) -> &Value<'a> {
        &self.last
    }

    pub fn alias(&self, name: &str) -> Option<&Value<'a>> {
        self.alias.get(name)
    }
}

/// Runs a compiled command list.
pub struct Executor<'o> {
    options: &'o ExecuteOptions,
}

impl<'o> Executor<'o> {
    pub fn new(options: &'o ExecuteOptions) -> Self {
        Self { options }
    }

    pub fn run<'a>(&self, commands: &[Command], target: Value<'a>) -> QueryResult<Value<'a>> {
        let mut ctx = QueryContext::new(target, self.options.debug);
        self.pipeline(&mut ctx, commands)?;
        Ok(ctx.last)
    }

    fn pipeline<'a>(&self, ctx: &mut QueryContext<'a>, commands: &[Command]) -> QueryResult {
        for command in commands {
            let value = self.eval(ctx, command)?;
            if ctx.debug {
                trace!(cmd = command.opcode(), result = value.kind(), "executed");
            }
            ctx.last = value;
        }
        Ok(())
    }

    pub fn eval<'a>(&self, ctx: &mut QueryContext<'a>, command: &Command) -> QueryResult<Value<'a>> {
        match command {
            Command::Value(json) => Ok(Value::Json(json.clone())),
            Command::Root => Ok(ctx.root.clone()),
            Command::Compare { op, lhs, rhs } => {
                let lhs = self.eval(ctx, lhs)?.to_json();
                let rhs = self.eval(ctx, rhs)?.to_json();
                Ok(Json::Bool(op.eval(&lhs, &rhs)).into())
            }
            Command::And(lhs, rhs) => {
                let result = self.eval(ctx, lhs)?.truthy() && self.eval(ctx, rhs)?.truthy();
                Ok(Json::Bool(result).into())
            }
            Command::Or(lhs, rhs) => {
                let result = self.eval(ctx, lhs)?.truthy() || self.eval(ctx, rhs)?.truthy();
                Ok(Json::Bool(result).into())
            }
            Command::Attr {
                components,
                attributes,
            } => self.command_attr(ctx, components.as_ref(), attributes),
            Command::Alias(name) => {
                let value = ctx.last.clone();
                ctx.alias.insert(name.clone(), value.clone());
                Ok(value)
            }
            Command::AliasGet(name) => ctx
                .alias(name)
                .cloned()
                .ok_or_else(|| QueryError::MissingAlias(name.clone())),
            Command::Pluck {
                components,
                attributes,
                unique,
            } => command_pluck(&ctx.last, components, attributes, *unique),
            Command::Without(lhs, rhs) => {
                let lhs = self.eval(ctx, lhs)?;
                let rhs = self.eval(ctx, rhs)?;
                command_without(lhs, &rhs)
            }
            Command::Limit { count, offset } => command_limit(&ctx.last, *count, *offset),
            Command::SelectById { ids, from_root } => {
                let (ids, source) = match ids {
                    Some(ids) => {
                        let ids = self.eval(ctx, ids)?;
                        let piped = matches!(ctx.last, Value::Entity(_) | Value::EntitySet(_));
                        let source = if *from_root || !piped { &ctx.root } else { &ctx.last };
                        (ids, source)
                    }
                    None => (ctx.last.clone(), &ctx.root),
                };
                command_select_by_id(source, &ids)
            }
            Command::EntityFilter {
                filter,
                filter_fn,
                options,
            } => self.command_filter(ctx, filter, filter_fn.as_deref(), *options),
            Command::Compose(commands) => {
                let saved = ctx.last.clone();
                let result = self.pipeline(ctx, commands);
                let last = std::mem::replace(&mut ctx.last, saved);
                result.map(|()| last)
            }
            Command::Filter { .. } => Err(QueryError::UnknownCommand(command.opcode())),
        }
    }

    fn command_filter<'a>(
        &self,
        ctx: &QueryContext<'a>,
        filter: &EntityFilter,
        filter_fn: Option<&Command>,
        options: FilterOptions,
    ) -> QueryResult<Value<'a>> {
        match &ctx.last {
            Value::Entity(entity) => {
                let Some(accepted) = accept(filter, entity.clone()) else {
                    return Ok(Value::null());
                };
                if let Some(filter_fn) = filter_fn {
                    if !self.test_entity(ctx, filter, filter_fn, &accepted)? {
                        return Ok(Value::null());
                    }
                }
                Ok(Value::Entity(accepted))
            }
            Value::EntitySet(set) => {
                let mut result = EntitySet::new();
                let mut skipped = 0;
                for entity in set.iter() {
                    if options.limit.is_some_and(|limit| result.size() >= limit) {
                        break;
                    }
                    let Some(accepted) = filter.accept_entity(entity) else {
                        continue;
                    };
                    if let Some(filter_fn) = filter_fn {
                        if !self.test_entity(ctx, filter, filter_fn, &accepted)? {
                            continue;
                        }
                    }
                    if skipped < options.offset {
                        skipped += 1;
                        continue;
                    }
                    result.add_entity(accepted.into_owned());
                }
                Ok(result.into())
            }
            Value::Json(Json::Null) => Ok(Value::null()),
            other => Err(QueryError::InvalidTarget {
                command: "ENTITY_FILTER",
                found: other.kind(),
            }),
        }
    }

    fn test_entity(
        &self,
        ctx: &QueryContext<'_>,
        filter: &EntityFilter,
        filter_fn: &Command,
        entity: &Entity,
    ) -> QueryResult<bool> {
        let mut child = ctx.child(Cow::Borrowed(entity), filter.component_ids());
        let passed = self.eval(&mut child, filter_fn)?.truthy();
        if ctx.debug && !passed {
            trace!(entity = entity.id(), "filter function rejected entity");
        }
        Ok(passed)
    }

    fn command_attr<'a>(
        &self,
        ctx: &QueryContext<'a>,
        components: Option<&ComponentRef>,
        attributes: &[String],
    ) -> QueryResult<Value<'a>> {
        let entity = match &ctx.last {
            Value::Entity(entity) => entity,
            Value::Json(Json::Null) => return Ok(Value::null()),
            other => {
                return Err(QueryError::InvalidTarget {
                    command: "ATTR",
                    found: other.kind(),
                })
            }
        };
        let ids = match components {
            None => ctx.component_ids.as_ref(),
            Some(ComponentRef::Root) => None,
            Some(ComponentRef::Ids(ids)) => Some(ids),
            Some(ComponentRef::Uris(_)) => return Err(QueryError::UnknownCommand("ATTR")),
        };

        let mut values = attribute_values(entity, ids, attributes);
        Ok(match values.len() {
            0 => Value::null(),
            1 => Value::Json(values.remove(0)),
            _ => Value::Json(Json::Array(values)),
        })
    }
}

/// Filters an entity that may be borrowed from the root or owned by an
/// earlier command.
fn accept<'a>(filter: &EntityFilter, entity: Cow<'a, Entity>) -> Option<Cow<'a, Entity>> {
    match entity {
        Cow::Borrowed(entity) => filter.accept_entity(entity),
        Cow::Owned(entity) => {
            let stripped = filter.accept_entity(&entity).map(|accepted| match accepted {
                Cow::Borrowed(_) => None,
                Cow::Owned(stripped) => Some(stripped),
            })?;
            Some(Cow::Owned(stripped.unwrap_or(entity)))
        }
    }
}

fn attribute_values(entity: &Entity, ids: Option<&BitField>, attributes: &[String]) -> Vec<Json> {
    entity
        .get_components(ids)
        .into_iter()
        .flat_map(|component| attributes.iter().filter_map(move |name| component.get(name)))
        .cloned()
        .collect()
}

fn command_pluck<'a>(
    target: &Value<'_>,
    components: &ComponentRef,
    attributes: &[String],
    unique: bool,
) -> QueryResult<Value<'a>> {
    let ids = match components {
        ComponentRef::Root => None,
        ComponentRef::Ids(ids) => Some(ids),
        ComponentRef::Uris(_) => return Err(QueryError::UnknownCommand("PLUCK")),
    };
    let values: Vec<Json> = match target {
        Value::Entity(entity) => attribute_values(entity, ids, attributes),
        Value::EntitySet(set) => set
            .iter()
            .flat_map(|entity| attribute_values(entity, ids, attributes))
            .collect(),
        Value::Json(Json::Null) => Vec::new(),
        other => {
            return Err(QueryError::InvalidTarget {
                command: "PLUCK",
                found: other.kind(),
            })
        }
    };

    if !unique {
        return Ok(Json::Array(values).into());
    }
    let mut seen: Vec<Json> = Vec::with_capacity(values.len());
    for value in values {
        if !seen.contains(&value) {
            seen.push(value);
        }
    }
    Ok(Json::Array(seen).into())
}

/// Ids named by a value: a number, an array of numbers, an entity or an
/// entity set. Anything else names no entity.
fn entity_ids(value: &Value<'_>) -> Vec<EntityId> {
    match value {
        Value::Entity(entity) => vec![entity.id()],
        Value::EntitySet(set) => set.ids(),
        Value::Json(json) => as_list(json.clone()).iter().filter_map(Json::as_u64).collect(),
    }
}

fn command_without<'a>(lhs: Value<'a>, rhs: &Value<'_>) -> QueryResult<Value<'a>> {
    match lhs {
        Value::EntitySet(set) => {
            let excluded = entity_ids(rhs);
            Ok(set
                .iter()
                .filter(|entity| !excluded.contains(&entity.id()))
                .cloned()
                .collect::<EntitySet>()
                .into())
        }
        Value::Entity(entity) => Ok(if entity_ids(rhs).contains(&entity.id()) {
            Value::null()
        } else {
            Value::Entity(entity)
        }),
        Value::Json(json) => {
            let excluded = as_list(rhs.to_json());
            let kept = as_list(json)
                .into_iter()
                .filter(|item| !excluded.iter().any(|other| equals(item, other)))
                .collect();
            Ok(Json::Array(kept).into())
        }
    }
}

fn command_limit<'a>(target: &Value<'_>, count: usize, offset: usize) -> QueryResult<Value<'a>> {
    match target {
        Value::EntitySet(set) => Ok(set
            .iter()
            .skip(offset)
            .take(count)
            .cloned()
            .collect::<EntitySet>()
            .into()),
        Value::Json(Json::Array(items)) => {
            Ok(Json::Array(items.iter().skip(offset).take(count).cloned().collect()).into())
        }
        Value::Json(Json::Null) => Ok(Value::null()),
        other => Err(QueryError::InvalidTarget {
            command: "LIMIT",
            found: other.kind(),
        }),
    }
}

/// Entities of `source` by id, in the requested order. Unknown ids are
/// dropped, repeated ids collapse.
fn command_select_by_id<'a>(source: &Value<'_>, ids: &Value<'_>) -> QueryResult<Value<'a>> {
    let mut result = EntitySet::new();
    for id in entity_ids(ids) {
        let entity = match source {
            Value::EntitySet(set) => set.get_entity(id),
            Value::Entity(entity) => Some(&**entity).filter(|entity| entity.id() == id),
            Value::Json(_) => {
                return Err(QueryError::InvalidTarget {
                    command: "SELECT_BY_ID",
                    found: source.kind(),
                })
            }
        };
        if let Some(entity) = entity {
            if !result.has_entity(id) {
                result.add_entity(entity.clone());
            }
        }
    }
    Ok(result.into())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{query::CompareOp, Component};

    fn set() -> EntitySet {
        (1..=4)
            .map(|id| {
                let mut component = Component::new(1);
                component.set("n", id);
                let entity = Entity::new(id).with_component(component);
                if id % 2 == 0 {
                    entity.with_component(Component::new(2))
                } else {
                    entity
                }
            })
            .collect()
    }

    fn run<'a>(commands: &[Command], target: impl Into<Value<'a>>) -> QueryResult<Value<'a>> {
        Executor::new(&ExecuteOptions::debug()).run(commands, target.into())
    }

    fn lit(json: Json) -> Box<Command> {
        Box::new(Command::Value(json))
    }

    fn filter(filter: EntityFilter) -> Command {
        Command::EntityFilter {
            filter,
            filter_fn: None,
            options: FilterOptions::default(),
        }
    }

    #[test]
    fn empty_pipeline_returns_the_target() {
        let set = set();
        let result = run(&[], &set).unwrap();
        assert!(matches!(result, Value::EntitySet(Cow::Borrowed(_))));
    }

    #[test]
    fn set_filter_keeps_order() {
        let set = set();
        let result = run(&[filter(EntityFilter::with(crate::FilterType::All, BitField::from_values([2])))], &set)
            .unwrap();
        assert_eq!(result.as_entity_set().map(EntitySet::ids), Some(vec![2, 4]));
        assert_eq!(set.size(), 4);
    }

    #[test]
    fn single_entity_filter_borrows_when_unchanged() {
        let set = set();
        let entity = set.get_entity(2).unwrap();
        let result = run(&[filter(EntityFilter::root())], entity).unwrap();
        assert!(matches!(result, Value::Entity(Cow::Borrowed(_))));

        let none = EntityFilter::with(crate::FilterType::None, BitField::from_values([2]));
        assert!(run(&[filter(none)], entity).unwrap().is_null());
    }

    #[test]
    fn filter_function_sees_each_entity() {
        let set = set();
        let filter_fn = Command::Compare {
            op: CompareOp::GreaterThan,
            lhs: Box::new(Command::Attr {
                components: None,
                attributes: vec!["n".into()],
            }),
            rhs: lit(json!(2)),
        };
        let command = Command::EntityFilter {
            filter: EntityFilter::with(crate::FilterType::All, BitField::from_values([1])),
            filter_fn: Some(Box::new(filter_fn)),
            options: FilterOptions {
                limit: Some(1),
                offset: 0,
            },
        };
        let result = run(&[command], &set).unwrap();
        assert_eq!(result.as_entity_set().map(EntitySet::ids), Some(vec![3]));
    }

    #[test]
    fn attr_unwraps_singletons() {
        let entity = Entity::new(1)
            .with_component(Component::with_attributes(1, json!({"v": 1}).as_object().cloned().unwrap()))
            .with_component(Component::with_attributes(2, json!({"v": 2}).as_object().cloned().unwrap()));
        let attr = |ids: Option<ComponentRef>, name: &str| Command::Attr {
            components: ids,
            attributes: vec![name.to_string()],
        };

        let one = run(&[attr(Some(ComponentRef::Ids(BitField::from_values([2]))), "v")], &entity).unwrap();
        assert_eq!(one.to_json(), json!(2));
        let both = run(&[attr(None, "v")], &entity).unwrap();
        assert_eq!(both.to_json(), json!([1, 2]));
        let missing = run(&[attr(None, "w")], &entity).unwrap();
        assert!(missing.is_null());

        let err = run(&[attr(None, "v")], &set()).unwrap_err();
        assert!(matches!(err, QueryError::InvalidTarget { command: "ATTR", .. }));
    }

    #[test]
    fn and_or_short_circuit_on_truthiness() {
        let missing = Box::new(Command::AliasGet("nope".into()));
        let and = Command::And(lit(json!(0)), missing.clone());
        assert_eq!(run(&[and], json!(null)).unwrap().to_json(), json!(false));
        let or = Command::Or(lit(json!("x")), missing);
        assert_eq!(run(&[or], json!(null)).unwrap().to_json(), json!(true));
    }

    #[test]
    fn aliases_round_trip_and_fail_when_missing() {
        let set = set();
        let commands = [
            Command::Alias("everything".into()),
            Command::Value(json!(1)),
            Command::AliasGet("everything".into()),
        ];
        let result = run(&commands, &set).unwrap();
        assert_eq!(result.as_entity_set().map(EntitySet::size), Some(4));

        let err = run(&[Command::AliasGet("gone".into())], &set).unwrap_err();
        assert!(matches!(err, QueryError::MissingAlias(name) if name == "gone"));
    }

    #[test]
    fn pluck_and_without() {
        let set = set();
        let pluck = Command::Pluck {
            components: ComponentRef::Ids(BitField::from_values([1])),
            attributes: vec!["n".into()],
            unique: false,
        };
        assert_eq!(run(&[pluck], &set).unwrap().to_json(), json!([1, 2, 3, 4]));

        let without = Command::Without(lit(json!([1, 2, 3])), lit(json!([2])));
        assert_eq!(run(&[without], &set).unwrap().to_json(), json!([1, 3]));

        let without_ids = Command::Without(Box::new(Command::Root), lit(json!([1, 4])));
        assert_eq!(run(&[without_ids], &set).unwrap().to_json(), json!([2, 3]));
    }

    #[test]
    fn unique_pluck_drops_repeats() {
        let set: EntitySet = (1..=3)
            .map(|id| {
                let mut component = Component::new(1);
                component.set("kind", if id == 2 { "b" } else { "a" });
                Entity::new(id).with_component(component)
            })
            .collect();
        let pluck = Command::Pluck {
            components: ComponentRef::Root,
            attributes: vec!["kind".into()],
            unique: true,
        };
        assert_eq!(run(&[pluck], &set).unwrap().to_json(), json!(["a", "b"]));
    }

    #[test]
    fn runtime_limit_slices() {
        let set = set();
        let limit = Command::Limit { count: 2, offset: 1 };
        assert_eq!(run(&[limit.clone()], &set).unwrap().to_json(), json!([2, 3]));
        assert_eq!(run(&[limit], json!([5, 6, 7, 8])).unwrap().to_json(), json!([6, 7]));
    }

    #[test]
    fn select_by_id_sources() {
        let set = set();
        let select = |ids: Json, from_root: bool| Command::SelectById {
            ids: Some(lit(ids)),
            from_root,
        };
        assert_eq!(run(&[select(json!([3, 1, 3, 99]), false)], &set).unwrap().to_json(), json!([3, 1]));

        // Entity 1 lacks component 2, so the filtered set does not hold it.
        let even = filter(EntityFilter::with(crate::FilterType::All, BitField::from_values([2])));
        let piped = [even.clone(), select(json!([1, 2]), false)];
        assert_eq!(run(&piped, &set).unwrap().to_json(), json!([2]));
        let rooted = [even, select(json!([1, 2]), true)];
        assert_eq!(run(&rooted, &set).unwrap().to_json(), json!([1, 2]));

        let ids_piped = [
            Command::Value(json!(2)),
            Command::SelectById {
                ids: None,
                from_root: true,
            },
        ];
        assert_eq!(run(&ids_piped, &set).unwrap().to_json(), json!([2]));
    }

    #[test]
    fn compose_runs_against_the_piped_value() {
        let set = set();
        let first_two = Command::Compose(vec![Command::Limit { count: 2, offset: 0 }]);
        let command = Command::Compare {
            op: CompareOp::Equals,
            lhs: Box::new(first_two),
            rhs: lit(json!([1, 2])),
        };
        assert_eq!(run(&[command], &set).unwrap().to_json(), json!(true));
    }

    #[test]
    fn unresolved_filters_are_rejected() {
        let command = Command::Filter {
            kind: crate::FilterType::All,
            components: ComponentRef::Uris(vec!["/c/a".into()]),
            filter_fn: None,
        };
        let err = run(&[command], &set()).unwrap_err();
        assert!(matches!(err, QueryError::UnknownCommand("ALL_FILTER")));
    }
}
