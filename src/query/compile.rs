use tracing::debug;

use super::{dsl::rpn_to_tree, Command, ComponentRef, FilterOptions};
use crate::{ComponentRegistry, EntityFilter, FilterType, QueryResult};

/// Turns command trees into the executable command list.
///
/// Component uris are resolved against the registry, `*_FILTER` commands
/// become `ENTITY_FILTER`s, adjacent plain entity filters are folded into one
/// and a `LIMIT` right after a plain entity filter becomes that filter's
/// offset/limit.
pub struct Compiler<'r> {
    registry: &'r ComponentRegistry,
}

impl<'r> Compiler<'r> {
    pub fn new(registry: &'r ComponentRegistry) -> Self {
        Self { registry }
    }

    pub fn compile(&self, commands: Vec<Command>) -> QueryResult<Vec<Command>> {
        let before = commands.len();
        let mut compiled: Vec<Command> = Vec::with_capacity(before);
        for command in commands {
            let command = self.compile_command(command)?;
            push_merged(&mut compiled, command);
        }
        debug!(before, after = compiled.len(), "compiled query");
        Ok(compiled)
    }

    fn compile_command(&self, command: Command) -> QueryResult<Command> {
        Ok(match command {
            Command::Filter {
                kind,
                components,
                filter_fn,
            } => {
                let filter = self.entity_filter(kind, components)?;
                let filter_fn = match filter_fn {
                    Some(tokens) => self.compile_filter_fn(rpn_to_tree(&tokens)?)?,
                    None => None,
                };
                Command::EntityFilter {
                    filter,
                    filter_fn,
                    options: FilterOptions::default(),
                }
            }
            Command::EntityFilter {
                filter,
                filter_fn,
                options,
            } => Command::EntityFilter {
                filter,
                filter_fn: match filter_fn {
                    Some(f) => Some(Box::new(self.compile_command(*f)?)),
                    None => None,
                },
                options,
            },
            Command::Attr {
                components,
                attributes,
            } => Command::Attr {
                components: match components {
                    None | Some(ComponentRef::Root) => None,
                    Some(components) => Some(self.resolve(components)?),
                },
                attributes,
            },
            Command::Pluck {
                components,
                attributes,
                unique,
            } => Command::Pluck {
                components: self.resolve(components)?,
                attributes,
                unique,
            },
            Command::Compare { op, lhs, rhs } => Command::Compare {
                op,
                lhs: self.compile_boxed(lhs)?,
                rhs: self.compile_boxed(rhs)?,
            },
            Command::And(lhs, rhs) => Command::And(self.compile_boxed(lhs)?, self.compile_boxed(rhs)?),
            Command::Or(lhs, rhs) => Command::Or(self.compile_boxed(lhs)?, self.compile_boxed(rhs)?),
            Command::Without(lhs, rhs) => {
                Command::Without(self.compile_boxed(lhs)?, self.compile_boxed(rhs)?)
            }
            Command::SelectById {
                ids: Some(ids),
                from_root,
            } => Command::SelectById {
                ids: Some(self.compile_boxed(ids)?),
                from_root,
            },
            Command::Compose(commands) => Command::Compose(self.compile(commands)?),
            other => other,
        })
    }

    fn compile_boxed(&self, command: Box<Command>) -> QueryResult<Box<Command>> {
        self.compile_command(*command).map(Box::new)
    }

    fn compile_filter_fn(&self, tree: Vec<Command>) -> QueryResult<Option<Box<Command>>> {
        let mut compiled = self.compile(tree)?;
        Ok(match compiled.len() {
            0 => None,
            1 => compiled.pop().map(Box::new),
            _ => Some(Box::new(Command::Compose(compiled))),
        })
    }

    fn resolve(&self, components: ComponentRef) -> QueryResult<ComponentRef> {
        Ok(match components {
            ComponentRef::Uris(uris) => ComponentRef::Ids(self.registry.components_to_bitfield(&uris)?),
            other => other,
        })
    }

    fn entity_filter(&self, kind: FilterType, components: ComponentRef) -> QueryResult<EntityFilter> {
        let bits = match components {
            ComponentRef::Root => return Ok(EntityFilter::root()),
            ComponentRef::Uris(uris) => self.registry.components_to_bitfield(&uris)?,
            ComponentRef::Ids(bits) => bits,
        };
        // ALL of nothing accepts everything.
        if kind == FilterType::All && bits.is_empty() {
            return Ok(EntityFilter::root());
        }
        Ok(EntityFilter::with(kind, bits))
    }
}

fn is_plain_filter(command: &Command) -> bool {
    matches!(command, Command::EntityFilter { filter_fn: None, options, .. } if options.is_empty())
}

/// Appends `command`, folding it into the previous command where the two
/// can run as one.
fn push_merged(compiled: &mut Vec<Command>, command: Command) {
    let prev = compiled.last_mut().filter(|prev| is_plain_filter(prev));
    if let Some(Command::EntityFilter { filter, options, .. }) = prev {
        match command {
            Command::Limit { count, offset } => {
                *options = FilterOptions {
                    limit: Some(count),
                    offset,
                };
                return;
            }
            Command::EntityFilter {
                filter: ref other,
                filter_fn: None,
                options: next_options,
            } if next_options.is_empty() && filter.can_absorb(other) => {
                filter.merge(other);
                // ROOT adds nothing once other types are present.
                if filter.len() > 1 {
                    filter.filters.remove(&FilterType::Root);
                }
                return;
            }
            _ => {}
        }
    }
    compiled.push(command);
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::query::{CompareOp, QueryBuilder, Root};
    use crate::BitField;

    fn registry() -> ComponentRegistry {
        let mut registry = ComponentRegistry::new();
        for uri in ["/c/a", "/c/b", "/c/c"] {
            registry.register(uri);
        }
        registry
    }

    fn compile(build: impl FnOnce(&mut QueryBuilder)) -> QueryResult<Vec<Command>> {
        let builder = QueryBuilder::build(build);
        Compiler::new(&registry()).compile(builder.to_tree()?)
    }

    fn filter_of(command: &Command) -> &EntityFilter {
        match command {
            Command::EntityFilter { filter, .. } => filter,
            other => panic!("expected an entity filter, got {}", other.opcode()),
        }
    }

    #[test]
    fn adjacent_filters_merge() {
        let compiled = compile(|q| {
            q.all("/c/a").any("/c/b");
        })
        .unwrap();
        assert_eq!(compiled.len(), 1);
        let filter = filter_of(&compiled[0]);
        assert_eq!(filter.get(FilterType::All).map(BitField::to_values), Some(vec![1]));
        assert_eq!(filter.get(FilterType::Any).map(BitField::to_values), Some(vec![2]));
    }

    #[test]
    fn filters_that_change_meaning_stay_apart() {
        let compiled = compile(|q| {
            q.any("/c/a").any("/c/b");
        })
        .unwrap();
        assert_eq!(compiled.len(), 2);

        let compiled = compile(|q| {
            q.include("/c/a").all("/c/b");
        })
        .unwrap();
        assert_eq!(compiled.len(), 2);

        // A predicate after a transform must see the stripped entity.
        let compiled = compile(|q| {
            q.exclude("/c/a").all("/c/b");
        })
        .unwrap();
        assert_eq!(compiled.len(), 2);

        let compiled = compile(|q| {
            q.all("/c/a").exclude("/c/b");
        })
        .unwrap();
        assert_eq!(compiled.len(), 1);
    }

    #[test]
    fn filter_functions_are_not_merged() {
        let compiled = compile(|q| {
            q.all("/c/a").all_where("/c/b", |f| {
                f.attr("/c/b", "n").greater_than(1);
            });
        })
        .unwrap();
        assert_eq!(compiled.len(), 2);
        assert!(matches!(
            &compiled[1],
            Command::EntityFilter { filter_fn: Some(f), .. }
                if matches!(**f, Command::Compare { op: CompareOp::GreaterThan, .. })
        ));
    }

    #[test]
    fn limit_attaches_to_the_previous_filter() {
        let compiled = compile(|q| {
            q.all("/c/a").any("/c/b").limit(3, 2);
        })
        .unwrap();
        assert_eq!(compiled.len(), 1);
        assert!(matches!(
            &compiled[0],
            Command::EntityFilter { options: FilterOptions { limit: Some(3), offset: 2 }, .. }
        ));

        let compiled = compile(|q| {
            q.all("/c/a").limit(3, 0).all("/c/b");
        })
        .unwrap();
        assert_eq!(compiled.len(), 2, "a limited filter is a boundary");

        let compiled = compile(|q| {
            q.root().limit(1, 0);
        })
        .unwrap();
        assert_eq!(compiled[1], Command::Limit { count: 1, offset: 0 });

        // Never attached to the filter that follows.
        let compiled = compile(|q| {
            q.value(json!([1, 2])).limit(1, 0).all("/c/a");
        })
        .unwrap();
        assert_eq!(compiled.len(), 3);
        assert_eq!(compiled[1], Command::Limit { count: 1, offset: 0 });
        assert!(matches!(&compiled[2], Command::EntityFilter { options, .. } if options.is_empty()));
    }

    #[test]
    fn empty_all_is_a_root_pass() {
        let compiled = compile(|q| {
            q.all(Vec::<String>::new());
        })
        .unwrap();
        assert_eq!(filter_of(&compiled[0]), &EntityFilter::root());

        let compiled = compile(|q| {
            q.all(Root).all("/c/c");
        })
        .unwrap();
        assert_eq!(compiled.len(), 1);
        let filter = filter_of(&compiled[0]);
        assert!(filter.get(FilterType::Root).is_none());
        assert_eq!(filter.get(FilterType::All).map(BitField::to_values), Some(vec![3]));
    }

    #[test]
    fn uris_are_resolved() {
        let compiled = compile(|q| {
            q.pluck(("/c/a", "/c/c"), "name");
        })
        .unwrap();
        assert!(matches!(
            &compiled[0],
            Command::Pluck { components: ComponentRef::Ids(ids), .. } if ids.to_values() == vec![1, 3]
        ));

        let compiled = compile(|q| {
            q.attr(Root, "name").equals(json!(1));
        })
        .unwrap();
        assert!(matches!(
            &compiled[0],
            Command::Compare { lhs, .. } if matches!(**lhs, Command::Attr { components: None, .. })
        ));
    }

    #[test]
    fn unknown_uri_fails_at_compile_time() {
        let err = compile(|q| {
            q.all("/c/missing");
        })
        .unwrap_err();
        assert!(matches!(err, crate::QueryError::UnknownComponent(uri) if uri == "/c/missing"));
    }

    #[test]
    fn recompiling_is_stable() {
        let first = compile(|q| {
            q.all("/c/a").none("/c/b").limit(2, 0);
        })
        .unwrap();
        let again = Compiler::new(&registry()).compile(first.clone()).unwrap();
        assert_eq!(first, again);
    }
}
