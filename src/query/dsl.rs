use impl_trait_for_tuples::impl_for_tuples;
use serde_json::Value as Json;

use super::{value::CompareOp, Command, ComponentRef};
use crate::{FilterType, QueryError, QueryResult};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Operand(Command),
    Op(Operator),
    /// A parenthesised sub-expression, folded on its own.
    Group(Vec<Token>),
}

/// Binary operators understood by the shift-reduce pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Or,
    And,
    Compare(CompareOp),
    Without,
}

impl Operator {
    pub fn precedence(self) -> u8 {
        match self {
            Operator::Or => 1,
            Operator::And => 2,
            Operator::Compare(_) => 3,
            Operator::Without => 4,
        }
    }

    /// How many operands the operator folds off the value stack.
    pub fn arg_count(self) -> usize {
        match self {
            Operator::Or | Operator::And | Operator::Compare(_) | Operator::Without => 2,
        }
    }

    fn build(self, args: Vec<Command>) -> QueryResult<Command> {
        let [lhs, rhs]: [Command; 2] = args.try_into().map_err(|args: Vec<Command>| {
            QueryError::MalformedExpression(format!("operator expects 2 operands, got {}", args.len()))
        })?;
        let (lhs, rhs) = (Box::new(lhs), Box::new(rhs));
        Ok(match self {
            Operator::Or => Command::Or(lhs, rhs),
            Operator::And => Command::And(lhs, rhs),
            Operator::Compare(op) => Command::Compare { op, lhs, rhs },
            Operator::Without => Command::Without(lhs, rhs),
        })
    }
}

/// Marker selecting every component, the ROOT argument of a filter.
#[derive(Debug, Clone, Copy, Default)]
pub struct Root;

/// Names collected from a [`Selection`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selected {
    pub root: bool,
    pub names: Vec<String>,
}

impl Selected {
    pub fn of(selection: impl Selection) -> Self {
        let mut selected = Self::default();
        selection.select(&mut selected);
        selected
    }

    pub fn into_component_ref(self) -> ComponentRef {
        if self.root {
            ComponentRef::Root
        } else {
            ComponentRef::Uris(self.names)
        }
    }
}

/// Anything naming components or attributes: a string, [`Root`], or a
/// collection or tuple of those.
pub trait Selection {
    fn select(self, into: &mut Selected);
}

impl Selection for &str {
    fn select(self, into: &mut Selected) {
        into.names.push(self.to_string());
    }
}

impl Selection for String {
    fn select(self, into: &mut Selected) {
        into.names.push(self);
    }
}

impl Selection for &String {
    fn select(self, into: &mut Selected) {
        into.names.push(self.clone());
    }
}

impl Selection for Root {
    fn select(self, into: &mut Selected) {
        into.root = true;
    }
}

impl<T: Selection> Selection for Vec<T> {
    fn select(self, into: &mut Selected) {
        for item in self {
            item.select(into);
        }
    }
}

impl<T: Selection, const N: usize> Selection for [T; N] {
    fn select(self, into: &mut Selected) {
        for item in self {
            item.select(into);
        }
    }
}

#[impl_for_tuples(1, 12)]
impl Selection for Tuple {
    fn select(self, into: &mut Selected) {
        for_tuples!( #( self.Tuple.select(into); )* );
    }
}

/// Fluent two-stack builder.
///
/// Operands go straight to the value stream, operators wait on the operator
/// stack until one of equal or lower precedence arrives, so the stream ends
/// up in reverse Polish order. An operand that follows a complete operand
/// starts a new pipeline stage and closes every pending operator first.
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    values: Vec<Token>,
    ops: Vec<Operator>,
    /// The last token pushed was an operator still missing its right side.
    awaiting_operand: bool,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self {
            values: Vec::new(),
            ops: Vec::new(),
            awaiting_operand: false,
        }
    }

    /// Builds a standalone builder, handy for `where_all` clauses.
    pub fn build(f: impl FnOnce(&mut QueryBuilder)) -> Self {
        let mut builder = Self::new();
        f(&mut builder);
        builder
    }

    pub fn push_val(&mut self, command: Command) -> &mut Self {
        self.push_operand(Token::Operand(command))
    }

    pub fn push_op(&mut self, op: Operator) -> &mut Self {
        while let Some(&top) = self.ops.last() {
            if op.precedence() > top.precedence() {
                break;
            }
            self.ops.pop();
            self.values.push(Token::Op(top));
        }
        self.ops.push(op);
        self.awaiting_operand = true;
        self
    }

    /// Splices another builder's token stream into this one.
    pub fn push_builder(&mut self, other: QueryBuilder) -> &mut Self {
        if !self.awaiting_operand {
            self.flush_ops();
        }
        self.values.extend(other.into_rpn());
        self.awaiting_operand = false;
        self
    }

    /// Pushes another builder as a single parenthesised operand.
    pub fn push_group(&mut self, other: QueryBuilder) -> &mut Self {
        self.push_operand(Token::Group(other.into_rpn()))
    }

    fn push_operand(&mut self, token: Token) -> &mut Self {
        if !self.awaiting_operand {
            self.flush_ops();
        }
        self.values.push(token);
        self.awaiting_operand = false;
        self
    }

    fn flush_ops(&mut self) {
        while let Some(op) = self.ops.pop() {
            self.values.push(Token::Op(op));
        }
    }

    pub fn into_rpn(mut self) -> Vec<Token> {
        self.flush_ops();
        self.values
    }

    pub fn to_rpn(&self) -> Vec<Token> {
        self.clone().into_rpn()
    }

    pub fn to_tree(&self) -> QueryResult<Vec<Command>> {
        rpn_to_tree(&self.to_rpn())
    }

    pub fn root(&mut self) -> &mut Self {
        self.push_val(Command::Root)
    }

    pub fn value(&mut self, value: impl Into<Json>) -> &mut Self {
        self.push_val(Command::Value(value.into()))
    }

    pub fn and(&mut self) -> &mut Self {
        self.push_op(Operator::And)
    }

    pub fn or(&mut self) -> &mut Self {
        self.push_op(Operator::Or)
    }

    pub fn op(&mut self, op: Operator) -> &mut Self {
        self.push_op(op)
    }

    fn compare(&mut self, op: CompareOp, value: Json) -> &mut Self {
        self.push_op(Operator::Compare(op)).value(value)
    }

    pub fn equals(&mut self, value: impl Into<Json>) -> &mut Self {
        self.compare(CompareOp::Equals, value.into())
    }

    pub fn not_equals(&mut self, value: impl Into<Json>) -> &mut Self {
        self.compare(CompareOp::NotEquals, value.into())
    }

    pub fn less_than(&mut self, value: impl Into<Json>) -> &mut Self {
        self.compare(CompareOp::LessThan, value.into())
    }

    pub fn less_than_or_equal(&mut self, value: impl Into<Json>) -> &mut Self {
        self.compare(CompareOp::LessThanOrEqual, value.into())
    }

    pub fn greater_than(&mut self, value: impl Into<Json>) -> &mut Self {
        self.compare(CompareOp::GreaterThan, value.into())
    }

    pub fn greater_than_or_equal(&mut self, value: impl Into<Json>) -> &mut Self {
        self.compare(CompareOp::GreaterThanOrEqual, value.into())
    }

    fn filter(
        &mut self,
        kind: FilterType,
        components: impl Selection,
        filter_fn: Option<QueryBuilder>,
    ) -> &mut Self {
        self.push_val(Command::Filter {
            kind,
            components: Selected::of(components).into_component_ref(),
            filter_fn: filter_fn.map(QueryBuilder::into_rpn),
        })
    }

    pub fn all(&mut self, components: impl Selection) -> &mut Self {
        self.filter(FilterType::All, components, None)
    }

    pub fn any(&mut self, components: impl Selection) -> &mut Self {
        self.filter(FilterType::Any, components, None)
    }

    pub fn none(&mut self, components: impl Selection) -> &mut Self {
        self.filter(FilterType::None, components, None)
    }

    pub fn include(&mut self, components: impl Selection) -> &mut Self {
        self.filter(FilterType::Include, components, None)
    }

    pub fn exclude(&mut self, components: impl Selection) -> &mut Self {
        self.filter(FilterType::Exclude, components, None)
    }

    /// Entities with at least one component.
    pub fn some(&mut self) -> &mut Self {
        self.filter(FilterType::Some, Vec::<String>::new(), None)
    }

    pub fn all_where(
        &mut self,
        components: impl Selection,
        filter_fn: impl FnOnce(&mut QueryBuilder),
    ) -> &mut Self {
        self.filter(FilterType::All, components, Some(Self::build(filter_fn)))
    }

    pub fn any_where(
        &mut self,
        components: impl Selection,
        filter_fn: impl FnOnce(&mut QueryBuilder),
    ) -> &mut Self {
        self.filter(FilterType::Any, components, Some(Self::build(filter_fn)))
    }

    pub fn none_where(
        &mut self,
        components: impl Selection,
        filter_fn: impl FnOnce(&mut QueryBuilder),
    ) -> &mut Self {
        self.filter(FilterType::None, components, Some(Self::build(filter_fn)))
    }

    pub fn include_where(
        &mut self,
        components: impl Selection,
        filter_fn: impl FnOnce(&mut QueryBuilder),
    ) -> &mut Self {
        self.filter(FilterType::Include, components, Some(Self::build(filter_fn)))
    }

    pub fn attr(&mut self, components: impl Selection, attributes: impl Selection) -> &mut Self {
        self.push_val(Command::Attr {
            components: Some(Selected::of(components).into_component_ref()),
            attributes: Selected::of(attributes).names,
        })
    }

    /// Attributes of the components selected by the enclosing filter.
    pub fn context_attr(&mut self, attributes: impl Selection) -> &mut Self {
        self.push_val(Command::Attr {
            components: None,
            attributes: Selected::of(attributes).names,
        })
    }

    /// Stores the piped value as `name`.
    pub fn alias_as(&mut self, name: impl Into<String>) -> &mut Self {
        self.push_val(Command::Alias(name.into()))
    }

    pub fn alias(&mut self, name: impl Into<String>) -> &mut Self {
        self.push_val(Command::AliasGet(name.into()))
    }

    pub fn pluck(&mut self, components: impl Selection, attributes: impl Selection) -> &mut Self {
        self.push_pluck(components, attributes, false)
    }

    pub fn pluck_unique(&mut self, components: impl Selection, attributes: impl Selection) -> &mut Self {
        self.push_pluck(components, attributes, true)
    }

    fn push_pluck(&mut self, components: impl Selection, attributes: impl Selection, unique: bool) -> &mut Self {
        self.push_val(Command::Pluck {
            components: Selected::of(components).into_component_ref(),
            attributes: Selected::of(attributes).names,
            unique,
        })
    }

    pub fn without(&mut self, values: impl Into<Json>) -> &mut Self {
        self.push_op(Operator::Without).value(values)
    }

    pub fn limit(&mut self, count: usize, offset: usize) -> &mut Self {
        self.push_val(Command::Limit { count, offset })
    }

    /// Selects from the piped entity set, or the root when nothing was
    /// piped yet.
    pub fn select_by_id(&mut self, ids: impl Into<Json>) -> &mut Self {
        self.push_val(Command::SelectById {
            ids: Some(Box::new(Command::Value(ids.into()))),
            from_root: false,
        })
    }

    pub fn select_by_id_from_root(&mut self, ids: impl Into<Json>) -> &mut Self {
        self.push_val(Command::SelectById {
            ids: Some(Box::new(Command::Value(ids.into()))),
            from_root: true,
        })
    }

    /// Selects from the root by the ids in the piped value.
    pub fn select_by_id_piped(&mut self) -> &mut Self {
        self.push_val(Command::SelectById {
            ids: None,
            from_root: true,
        })
    }

    pub fn group(&mut self, build: impl FnOnce(&mut QueryBuilder)) -> &mut Self {
        self.push_group(Self::build(build))
    }

    /// Every clause must hold.
    pub fn where_all(&mut self, clauses: impl IntoIterator<Item = QueryBuilder>) -> &mut Self {
        self.join(clauses, Operator::And)
    }

    /// At least one clause must hold.
    pub fn where_any(&mut self, clauses: impl IntoIterator<Item = QueryBuilder>) -> &mut Self {
        self.join(clauses, Operator::Or)
    }

    fn join(&mut self, clauses: impl IntoIterator<Item = QueryBuilder>, op: Operator) -> &mut Self {
        let mut sub = QueryBuilder::new();
        for (i, clause) in clauses.into_iter().enumerate() {
            if i > 0 {
                sub.push_op(op);
            }
            sub.push_group(clause);
        }
        self.push_group(sub)
    }
}

/// Folds an RPN stream into command trees. Every operand left on the stack
/// at the end is a top-level command, in order.
pub fn rpn_to_tree(tokens: &[Token]) -> QueryResult<Vec<Command>> {
    let mut stack: Vec<Command> = Vec::with_capacity(tokens.len());
    for token in tokens {
        match token {
            Token::Operand(command) => stack.push(command.clone()),
            Token::Group(inner) => {
                let mut nodes = rpn_to_tree(inner)?;
                match nodes.len() {
                    0 => return Err(QueryError::MalformedExpression("empty group".into())),
                    1 => stack.extend(nodes.pop()),
                    _ => stack.push(Command::Compose(nodes)),
                }
            }
            Token::Op(op) => {
                let count = op.arg_count();
                if stack.len() < count {
                    return Err(QueryError::MalformedExpression(format!(
                        "{op:?} expects {count} operands, found {}",
                        stack.len()
                    )));
                }
                let args = stack.split_off(stack.len() - count);
                stack.push(op.build(args)?);
            }
        }
    }
    Ok(stack)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn lit(v: Json) -> Command {
        Command::Value(v)
    }

    #[test]
    fn selection_shapes() {
        assert_eq!(Selected::of("/c/a").names, vec!["/c/a"]);
        assert_eq!(Selected::of(("/c/a", "/c/b".to_string())).names, vec!["/c/a", "/c/b"]);
        assert_eq!(Selected::of(["/c/a", "/c/b"]).names.len(), 2);
        assert_eq!(Selected::of(vec!["/c/x"]).names, vec!["/c/x"]);
        assert!(Selected::of(Root).root);
        assert_eq!(Selected::of(Root).into_component_ref(), ComponentRef::Root);
    }

    #[test]
    fn precedence_orders_the_stream() {
        let mut q = QueryBuilder::new();
        q.value(1).equals(2).or().value(3).equals(4).and().value(5).equals(6);

        let ops: Vec<_> = q
            .to_rpn()
            .into_iter()
            .filter_map(|t| match t {
                Token::Op(op) => Some(op),
                _ => None,
            })
            .collect();
        let eq = Operator::Compare(CompareOp::Equals);
        assert_eq!(ops, vec![eq, eq, eq, Operator::And, Operator::Or]);
    }

    #[test]
    fn tree_respects_precedence() {
        let mut q = QueryBuilder::new();
        q.value(1).equals(1).or().value(2).equals(3).and().value(4).equals(4);

        let eq = |a: i32, b: i32| Command::Compare {
            op: CompareOp::Equals,
            lhs: Box::new(lit(json!(a))),
            rhs: Box::new(lit(json!(b))),
        };
        let tree = q.to_tree().unwrap();
        assert_eq!(
            tree,
            vec![Command::Or(
                Box::new(eq(1, 1)),
                Box::new(Command::And(Box::new(eq(2, 3)), Box::new(eq(4, 4)))),
            )]
        );
    }

    #[test]
    fn operands_without_operators_stay_in_sequence() {
        let mut q = QueryBuilder::new();
        q.all("/c/a").any("/c/b").limit(3, 0);
        let tree = q.to_tree().unwrap();
        assert_eq!(tree.len(), 3);
        assert_eq!(tree[0].opcode(), "ALL_FILTER");
        assert_eq!(tree[1].opcode(), "ANY_FILTER");
        assert_eq!(tree[2], Command::Limit { count: 3, offset: 0 });
    }

    #[test]
    fn comparison_binds_to_the_previous_operand() {
        let mut q = QueryBuilder::new();
        q.all("/c/a").attr("/c/a", "name").equals("x");
        let tree = q.to_tree().unwrap();
        assert_eq!(tree.len(), 2);
        assert!(matches!(&tree[1], Command::Compare { op: CompareOp::Equals, lhs, .. }
            if lhs.opcode() == "ATTR"));
    }

    #[test]
    fn groups_fold_on_their_own() {
        let mut q = QueryBuilder::new();
        q.where_all([
            QueryBuilder::build(|c| {
                c.value(1).equals(1);
            }),
            QueryBuilder::build(|c| {
                c.value(2).less_than(3);
            }),
        ]);
        let tree = q.to_tree().unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].opcode(), "AND");
    }

    #[test]
    fn multi_command_group_composes() {
        let mut q = QueryBuilder::new();
        q.group(|g| {
            g.all("/c/a").limit(1, 0);
        });
        let tree = q.to_tree().unwrap();
        assert!(matches!(&tree[..], [Command::Compose(inner)] if inner.len() == 2));
    }

    #[test]
    fn spliced_builder_joins_the_stream() {
        let mut inner = QueryBuilder::new();
        inner.value(2).equals(2);
        let mut q = QueryBuilder::new();
        q.root().push_builder(inner);
        assert_eq!(q.to_tree().unwrap().len(), 2);
    }

    #[test]
    fn operator_closes_before_the_next_stage() {
        let mut q = QueryBuilder::new();
        q.value(json!([1, 2, 3])).without(json!([2])).limit(1, 0);
        let tree = q.to_tree().unwrap();
        assert_eq!(
            tree,
            vec![
                Command::Without(Box::new(lit(json!([1, 2, 3]))), Box::new(lit(json!([2])))),
                Command::Limit { count: 1, offset: 0 },
            ]
        );

        let mut q = QueryBuilder::new();
        q.attr("/c/status", "value").equals("active").alias_as("s");
        let tree = q.to_tree().unwrap();
        assert_eq!(tree.len(), 2);
        assert!(matches!(&tree[0], Command::Compare { lhs, rhs, .. }
            if lhs.opcode() == "ATTR" && **rhs == lit(json!("active"))));
        assert_eq!(tree[1], Command::Alias("s".into()));
    }

    #[test]
    fn stages_after_a_filter_function_stay_inside_it() {
        let mut q = QueryBuilder::new();
        q.all_where("/c/a", |f| {
            f.attr("/c/a", "n").greater_than(1).alias_as("big");
        });
        let tree = q.to_tree().unwrap();
        let [Command::Filter { filter_fn: Some(tokens), .. }] = &tree[..] else {
            panic!("expected a single filter, got {tree:?}");
        };
        let inner = rpn_to_tree(tokens).unwrap();
        assert_eq!(inner.len(), 2);
        assert_eq!(inner[0].opcode(), "GREATER_THAN");
    }

    #[test]
    fn operator_underflow_is_malformed() {
        let mut q = QueryBuilder::new();
        q.equals(5);
        assert!(matches!(q.to_tree(), Err(QueryError::MalformedExpression(_))));
        assert!(matches!(
            rpn_to_tree(&[Token::Group(Vec::new())]),
            Err(QueryError::MalformedExpression(_))
        ));
    }

    #[test]
    fn without_binds_tighter_than_comparison() {
        let mut q = QueryBuilder::new();
        q.value(json!([1, 2, 3])).without(json!([2])).equals(json!([1, 3]));
        let tree = q.to_tree().unwrap();
        assert!(matches!(&tree[..], [Command::Compare { lhs, .. }] if lhs.opcode() == "WITHOUT"));
    }
}
