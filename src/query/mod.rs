//! Query DSL, compiler and executor.
//!
//! A [`QueryBuilder`] accumulates tokens in reverse Polish order, the
//! compiler turns them into a list of [`Command`]s (resolving component uris
//! and merging adjacent entity filters) and the executor runs that list as a
//! pipeline against an entity or an entity set.

use serde_json::Value as Json;

use crate::{BitField, ComponentRegistry, EntityFilter, EntitySet, ExecuteOptions, FilterType, QueryResult};

mod compile;
mod dsl;
mod execute;
mod value;

pub use compile::Compiler;
pub use dsl::{rpn_to_tree, Operator, QueryBuilder, Root, Selected, Selection, Token};
pub use execute::{Executor, QueryContext};
pub use value::{equals, ordering, CompareOp, Value};

/// Component argument of a command, before or after uri resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentRef {
    /// Every component, no restriction.
    Root,
    Uris(Vec<String>),
    Ids(BitField),
}

/// Offset/limit attached to an entity filter by a following `limit`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterOptions {
    pub limit: Option<usize>,
    pub offset: usize,
}

impl FilterOptions {
    pub fn is_empty(&self) -> bool {
        self.limit.is_none() && self.offset == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// A literal.
    Value(Json),
    /// The value the query was executed against.
    Root,
    Compare {
        op: CompareOp,
        lhs: Box<Command>,
        rhs: Box<Command>,
    },
    And(Box<Command>, Box<Command>),
    Or(Box<Command>, Box<Command>),
    /// Attribute values of the current entity. Without components the ids of
    /// the enclosing entity filter are used.
    Attr {
        components: Option<ComponentRef>,
        attributes: Vec<String>,
    },
    /// Stores the piped value under a name and passes it on.
    Alias(String),
    AliasGet(String),
    Pluck {
        components: ComponentRef,
        attributes: Vec<String>,
        unique: bool,
    },
    Without(Box<Command>, Box<Command>),
    Limit {
        count: usize,
        offset: usize,
    },
    /// Entities by id, taken from the piped entity set or, with `from_root`,
    /// from the root. Without `ids` the piped value supplies the ids and the
    /// entities come from the root.
    SelectById {
        ids: Option<Box<Command>>,
        from_root: bool,
    },
    /// An unresolved `*_FILTER`. The nested filter function is kept as RPN
    /// tokens until compilation.
    Filter {
        kind: FilterType,
        components: ComponentRef,
        filter_fn: Option<Vec<Token>>,
    },
    EntityFilter {
        filter: EntityFilter,
        filter_fn: Option<Box<Command>>,
        options: FilterOptions,
    },
    /// A nested pipeline, produced by a parenthesised group.
    Compose(Vec<Command>),
}

impl Command {
    pub fn opcode(&self) -> &'static str {
        match self {
            Command::Value(_) => "VALUE",
            Command::Root => "ROOT",
            Command::Compare { op, .. } => op.name(),
            Command::And(..) => "AND",
            Command::Or(..) => "OR",
            Command::Attr { .. } => "ATTR",
            Command::Alias(_) => "ALIAS",
            Command::AliasGet(_) => "ALIAS_GET",
            Command::Pluck { .. } => "PLUCK",
            Command::Without(..) => "WITHOUT",
            Command::Limit { .. } => "LIMIT",
            Command::SelectById { .. } => "SELECT_BY_ID",
            Command::Filter { kind, .. } => match kind {
                FilterType::All => "ALL_FILTER",
                FilterType::Any => "ANY_FILTER",
                FilterType::Some => "SOME_FILTER",
                FilterType::None => "NONE_FILTER",
                FilterType::Include => "INCLUDE_FILTER",
                FilterType::Exclude => "EXCLUDE_FILTER",
                FilterType::Root => "ROOT_FILTER",
            },
            Command::EntityFilter { .. } => "ENTITY_FILTER",
            Command::Compose(_) => "COMPOSE",
        }
    }
}

/// A query built once and executed any number of times.
///
/// The compiled command list is cached on first use and never carries
/// per-execution state.
#[derive(Debug, Clone, Default)]
pub struct Query {
    source: Vec<Token>,
    compiled: Option<Vec<Command>>,
}

impl Query {
    pub fn new(build: impl FnOnce(&mut QueryBuilder)) -> Self {
        let mut builder = QueryBuilder::new();
        build(&mut builder);
        Self::from_builder(builder)
    }

    pub fn from_builder(builder: QueryBuilder) -> Self {
        Self {
            source: builder.into_rpn(),
            compiled: None,
        }
    }

    /// A query over an already built command list.
    pub fn from_commands(commands: impl IntoIterator<Item = Command>) -> Self {
        Self {
            source: commands.into_iter().map(Token::Operand).collect(),
            compiled: None,
        }
    }

    pub fn tokens(&self) -> &[Token] {
        &self.source
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled.is_some()
    }

    pub fn compiled(&self) -> Option<&[Command]> {
        self.compiled.as_deref()
    }

    /// Compiles the query. Compiling again returns the cached list.
    pub fn compile(&mut self, registry: &ComponentRegistry) -> QueryResult<&[Command]> {
        if self.compiled.is_none() {
            let tree = rpn_to_tree(&self.source)?;
            self.compiled = Some(Compiler::new(registry).compile(tree)?);
        }
        Ok(self.compiled.as_deref().unwrap_or_default())
    }

    pub fn execute<'a>(
        &mut self,
        registry: &ComponentRegistry,
        target: impl Into<Value<'a>>,
        options: &ExecuteOptions,
    ) -> QueryResult<Value<'a>> {
        let commands = self.compile(registry)?;
        Executor::new(options).run(commands, target.into())
    }
}

impl EntitySet {
    /// Runs `query` against this set with default options.
    pub fn query(&self, registry: &ComponentRegistry, query: &mut Query) -> QueryResult<Value<'_>> {
        query.execute(registry, self, &ExecuteOptions::default())
    }
}
