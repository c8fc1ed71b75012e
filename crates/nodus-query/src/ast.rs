//! Abstract syntax tree for queries

use nodus_core::Direction;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A parsed query: clauses in source order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub clauses: Vec<Clause>,
}

impl Query {
    /// True if any clause writes to the graph
    pub fn is_updating(&self) -> bool {
        self.clauses.iter().any(Clause::is_updating)
    }
}

/// A clause in a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Clause {
    /// MATCH or OPTIONAL MATCH, with its WHERE
    Match(MatchClause),
    /// UNWIND expr AS variable
    Unwind(UnwindClause),
    /// WITH projection, with its WHERE
    With(Projection),
    /// CREATE clause
    Create(CreateClause),
    /// MERGE clause
    Merge(MergeClause),
    /// SET clause
    Set(Vec<SetItem>),
    /// REMOVE clause
    Remove(Vec<RemoveItem>),
    /// DELETE / DETACH DELETE clause
    Delete(DeleteClause),
    /// RETURN projection
    Return(Projection),
}

impl Clause {
    /// Name used in error messages
    pub fn name(&self) -> &'static str {
        match self {
            Clause::Match(m) if m.optional => "OPTIONAL MATCH",
            Clause::Match(_) => "MATCH",
            Clause::Unwind(_) => "UNWIND",
            Clause::With(_) => "WITH",
            Clause::Create(_) => "CREATE",
            Clause::Merge(_) => "MERGE",
            Clause::Set(_) => "SET",
            Clause::Remove(_) => "REMOVE",
            Clause::Delete(_) => "DELETE",
            Clause::Return(_) => "RETURN",
        }
    }

    /// True for clauses that write to the graph
    pub fn is_updating(&self) -> bool {
        matches!(
            self,
            Clause::Create(_)
                | Clause::Merge(_)
                | Clause::Set(_)
                | Clause::Remove(_)
                | Clause::Delete(_)
        )
    }
}

/// MATCH clause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchClause {
    pub optional: bool,
    pub patterns: Vec<Pattern>,
    pub hints: Vec<IndexHint>,
    pub where_clause: Option<Expression>,
}

/// USING INDEX v:Label(property)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexHint {
    pub variable: String,
    pub label: String,
    pub property: String,
}

/// A pattern: a node followed by zero or more (relationship, node) steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    /// Path variable for `p = (...)`
    pub variable: Option<String>,
    pub start: NodePattern,
    pub steps: Vec<(RelationshipPattern, NodePattern)>,
}

impl Pattern {
    /// Node patterns in chain order
    pub fn nodes(&self) -> impl Iterator<Item = &NodePattern> {
        std::iter::once(&self.start).chain(self.steps.iter().map(|(_, n)| n))
    }

    /// Relationship patterns in chain order
    pub fn relationships(&self) -> impl Iterator<Item = &RelationshipPattern> {
        self.steps.iter().map(|(r, _)| r)
    }

    /// Every variable the pattern introduces or references
    pub fn variables(&self) -> BTreeSet<String> {
        let mut vars = BTreeSet::new();
        vars.extend(self.variable.clone());
        vars.extend(self.nodes().filter_map(|n| n.variable.clone()));
        vars.extend(self.relationships().filter_map(|r| r.variable.clone()));
        vars
    }
}

/// Node pattern `(v:Label {k: v})`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodePattern {
    pub variable: Option<String>,
    pub labels: Vec<String>,
    pub properties: Vec<(String, Expression)>,
}

/// Relationship pattern `-[v:TYPE|OTHER *min..max {k: v}]->`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipPattern {
    pub variable: Option<String>,
    pub types: Vec<String>,
    pub direction: Direction,
    pub length: Option<HopRange>,
    pub properties: Vec<(String, Expression)>,
}

/// Variable-length bounds; `None` means unspecified in the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopRange {
    pub min: Option<u32>,
    pub max: Option<u32>,
}

/// UNWIND clause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnwindClause {
    pub expression: Expression,
    pub variable: String,
}

/// Body shared by WITH and RETURN
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub distinct: bool,
    /// `*`: carry every variable in scope
    pub star: bool,
    pub items: Vec<ProjectionItem>,
    pub order_by: Vec<SortItem>,
    pub skip: Option<Expression>,
    pub limit: Option<Expression>,
    /// Only for WITH
    pub where_clause: Option<Expression>,
}

/// One projected expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionItem {
    pub expression: Expression,
    /// Explicit `AS` alias
    pub alias: Option<String>,
    /// Source text of the expression, the column name without an alias
    pub text: String,
}

impl ProjectionItem {
    /// Output column name
    pub fn name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.text)
    }
}

/// ORDER BY item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortItem {
    pub expression: Expression,
    pub ascending: bool,
}

/// CREATE clause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateClause {
    pub patterns: Vec<Pattern>,
}

/// MERGE clause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeClause {
    pub pattern: Pattern,
    pub on_create: Vec<SetItem>,
    pub on_match: Vec<SetItem>,
}

/// DELETE clause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteClause {
    pub detach: bool,
    pub expressions: Vec<Expression>,
}

/// SET item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SetItem {
    /// `v.key = expr`
    Property {
        variable: String,
        key: String,
        value: Expression,
    },
    /// `v = map`
    Replace { variable: String, value: Expression },
    /// `v += map`
    Merge { variable: String, value: Expression },
    /// `v:Label:Other`
    Labels {
        variable: String,
        labels: Vec<String>,
    },
}

/// REMOVE item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RemoveItem {
    Property { variable: String, key: String },
    Labels {
        variable: String,
        labels: Vec<String>,
    },
}

/// Expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    /// Literal value
    Literal(Literal),
    /// Variable reference
    Variable(String),
    /// Parameter ($name)
    Parameter(String),
    /// Property access (expr.key)
    Property(Box<Expression>, String),
    /// Subscript (expr[index])
    Index(Box<Expression>, Box<Expression>),
    /// Label predicate (expr:Label:Other)
    HasLabels(Box<Expression>, Vec<String>),
    /// Binary operation
    Binary {
        left: Box<Expression>,
        op: BinaryOp,
        right: Box<Expression>,
    },
    /// Unary operation
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },
    /// Function call
    Function {
        name: String,
        args: Vec<Expression>,
        distinct: bool,
    },
    /// count(*)
    CountStar,
    /// List expression [a, b, c]
    List(Vec<Expression>),
    /// Map expression {a: 1, b: 2}
    Map(Vec<(String, Expression)>),
}

/// Aggregate function names
pub const AGGREGATES: &[&str] = &["count", "sum", "avg", "min", "max", "collect"];

impl Expression {
    /// Convenience constructor for a binary node
    pub fn binary(left: Expression, op: BinaryOp, right: Expression) -> Self {
        Expression::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    /// True if this node itself is an aggregate call
    pub fn is_aggregate_call(&self) -> bool {
        match self {
            Expression::CountStar => true,
            Expression::Function { name, .. } => {
                AGGREGATES.contains(&name.to_ascii_lowercase().as_str())
            }
            _ => false,
        }
    }

    /// True if an aggregate call appears anywhere inside
    pub fn contains_aggregate(&self) -> bool {
        let mut found = false;
        self.walk(&mut |e| found |= e.is_aggregate_call());
        found
    }

    /// Visit this expression and every sub-expression, parents first
    pub fn walk(&self, visit: &mut dyn FnMut(&Expression)) {
        visit(self);
        match self {
            Expression::Property(inner, _) | Expression::HasLabels(inner, _) => inner.walk(visit),
            Expression::Index(target, index) => {
                target.walk(visit);
                index.walk(visit);
            }
            Expression::Binary { left, right, .. } => {
                left.walk(visit);
                right.walk(visit);
            }
            Expression::Unary { operand, .. } => operand.walk(visit),
            Expression::Function { args, .. } => args.iter().for_each(|a| a.walk(visit)),
            Expression::List(items) => items.iter().for_each(|i| i.walk(visit)),
            Expression::Map(entries) => entries.iter().for_each(|(_, v)| v.walk(visit)),
            Expression::Literal(_)
            | Expression::Variable(_)
            | Expression::Parameter(_)
            | Expression::CountStar => {}
        }
    }

    /// Variables referenced anywhere inside
    pub fn variables(&self) -> BTreeSet<String> {
        let mut vars = BTreeSet::new();
        self.walk(&mut |e| {
            if let Expression::Variable(name) = e {
                vars.insert(name.clone());
            }
        });
        vars
    }

    /// Split a conjunction into its conjuncts
    pub fn conjuncts(self) -> Vec<Expression> {
        match self {
            Expression::Binary {
                left,
                op: BinaryOp::And,
                right,
            } => {
                let mut parts = left.conjuncts();
                parts.extend(right.conjuncts());
                parts
            }
            other => vec![other],
        }
    }

    /// Join conjuncts back into one predicate
    pub fn and_all(parts: Vec<Expression>) -> Option<Expression> {
        parts
            .into_iter()
            .reduce(|acc, e| Expression::binary(acc, BinaryOp::And, e))
    }
}

/// Literal value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

/// Binary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    // Comparison
    Equals,
    NotEquals,
    LessThan,
    LessEquals,
    GreaterThan,
    GreaterEquals,
    // Logical
    And,
    Or,
    Xor,
    // Arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
    // String
    Contains,
    StartsWith,
    EndsWith,
    // List
    In,
}

/// Unary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Negate,
    IsNull,
    IsNotNull,
}
