//! Query Planning
//!
//! Lowers a parsed [`Query`] into a tree of [`PhysicalOperator`]s:
//! - Start scan selection by estimated cardinality (index statistics when
//!   available, a fixed heuristic order otherwise)
//! - Index seeks for label + property equality predicates
//! - Predicate pushdown: WHERE conjuncts are attached right after the
//!   operator that binds their last variable
//! - Bounded breadth-first expansion for variable-length relationships
//! - Sub-plans rooted at an [`PhysicalOperator::Argument`] for OPTIONAL
//!   MATCH and MERGE
//! - An eager barrier in front of the first write of read-write queries

use crate::ast::*;
use crate::functions::FunctionRegistry;
use nodus_core::{Direction, Error, Result};
use nodus_graph::{Schema, Statistics};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use tracing::debug;

/// Functions evaluated by the executor against bound entities
pub const ENTITY_FUNCTIONS: &[&str] = &[
    "id",
    "labels",
    "type",
    "keys",
    "properties",
    "length",
    "nodes",
    "relationships",
    "startnode",
    "endnode",
];

/// Reserved for similarity thresholds on expanded nodes
pub const SIMILARITY_FUNCTION: &str = "similarity";

/// Prefix of planner-generated variable names; never a valid identifier
const HIDDEN: &str = "  ";

/// Planner switches
#[derive(Debug, Clone, Copy)]
pub struct PlannerOptions {
    /// Attach predicates to the earliest operator that can evaluate them
    /// and use index seeks; when off, every predicate is applied once after
    /// the whole pattern is matched
    pub predicate_pushdown: bool,

    /// Upper bound used for `*` and `*n..` relationship patterns
    pub max_var_length: u32,

    /// Whether a similarity scorer is available for HybridExpand
    pub similarity_enabled: bool,

    /// Deepest expression nesting the parser accepts
    pub max_expression_depth: usize,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        Self {
            predicate_pushdown: true,
            max_var_length: 10,
            similarity_enabled: false,
            max_expression_depth: crate::parser::DEFAULT_MAX_EXPRESSION_DEPTH,
        }
    }
}

/// Aggregate functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    CountStar,
    Sum,
    Avg,
    Min,
    Max,
    Collect,
}

impl AggregateFunction {
    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "count" => Some(Self::Count),
            "sum" => Some(Self::Sum),
            "avg" => Some(Self::Avg),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "collect" => Some(Self::Collect),
            _ => None,
        }
    }
}

/// One aggregate column
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateCall {
    pub function: AggregateFunction,
    pub argument: Option<Expression>,
    pub distinct: bool,
}

/// Relationship traversal from a bound node
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandSpec {
    pub from: String,
    pub relationship: String,
    pub to: String,
    pub types: Vec<String>,
    pub direction: Direction,
    pub min_hops: u32,
    pub max_hops: u32,
    /// Bind the relationship variable to a list of relationships
    pub variable_length: bool,
    /// `to` is already bound; only paths ending at it are kept
    pub into: bool,
    /// Property equalities every traversed relationship must satisfy
    pub properties: Vec<(String, Expression)>,
    /// Relationship variables bound earlier in the same MATCH
    pub exclude: Vec<String>,
    /// Hidden variable receiving the traversed path segment
    pub segment: Option<String>,
}

/// `similarity(to.property, query) >= threshold` folded into an expansion
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityFilter {
    pub property: String,
    pub query: Expression,
    pub threshold: Expression,
    pub inclusive: bool,
}

/// Physical query operators
///
/// Every operator except [`PhysicalOperator::Argument`] pulls rows from an
/// input; `Argument` yields the row the enclosing operator was reset with
/// (an empty row at the top level).
#[derive(Debug, Clone, PartialEq)]
pub enum PhysicalOperator {
    Argument,

    /// Label or full node scan, once per input row
    NodeScan {
        input: Box<PhysicalOperator>,
        variable: String,
        label: Option<String>,
    },

    /// Property index point lookup
    IndexSeek {
        input: Box<PhysicalOperator>,
        variable: String,
        label: String,
        property: String,
        value: Expression,
    },

    Expand {
        input: Box<PhysicalOperator>,
        spec: ExpandSpec,
    },

    /// Expansion keeping only targets that score above a threshold
    HybridExpand {
        input: Box<PhysicalOperator>,
        spec: ExpandSpec,
        similarity: SimilarityFilter,
    },

    Filter {
        input: Box<PhysicalOperator>,
        predicate: Expression,
    },

    /// Evaluate named expressions; `keep_input` retains the input columns
    Projection {
        input: Box<PhysicalOperator>,
        items: Vec<(String, Expression)>,
        keep_input: bool,
    },

    Aggregate {
        input: Box<PhysicalOperator>,
        groups: Vec<(String, Expression)>,
        aggregates: Vec<(String, AggregateCall)>,
    },

    Distinct {
        input: Box<PhysicalOperator>,
        columns: Vec<String>,
    },

    Sort {
        input: Box<PhysicalOperator>,
        keys: Vec<(Expression, bool)>,
    },

    Skip {
        input: Box<PhysicalOperator>,
        count: Expression,
    },

    Limit {
        input: Box<PhysicalOperator>,
        count: Expression,
    },

    /// Narrow rows to the listed columns
    Select {
        input: Box<PhysicalOperator>,
        columns: Vec<String>,
    },

    Unwind {
        input: Box<PhysicalOperator>,
        expression: Expression,
        variable: String,
    },

    /// Run `subplan` per input row; null-extend rows it does not match
    Optional {
        input: Box<PhysicalOperator>,
        subplan: Box<PhysicalOperator>,
        new_variables: Vec<String>,
    },

    /// Run `matcher` per input row; create `pattern` when nothing matches
    Merge {
        input: Box<PhysicalOperator>,
        matcher: Box<PhysicalOperator>,
        pattern: Pattern,
        on_create: Vec<SetItem>,
        on_match: Vec<SetItem>,
    },

    Create {
        input: Box<PhysicalOperator>,
        patterns: Vec<Pattern>,
    },

    SetProperties {
        input: Box<PhysicalOperator>,
        items: Vec<SetItem>,
    },

    Remove {
        input: Box<PhysicalOperator>,
        items: Vec<RemoveItem>,
    },

    Delete {
        input: Box<PhysicalOperator>,
        expressions: Vec<Expression>,
        detach: bool,
    },

    /// Build a path from a start node and expansion segments
    NamedPath {
        input: Box<PhysicalOperator>,
        variable: String,
        start: String,
        segments: Vec<String>,
    },

    /// Materialize all input rows before yielding the first one
    Eager {
        input: Box<PhysicalOperator>,
    },

    /// Drain the input and yield nothing
    Discard {
        input: Box<PhysicalOperator>,
    },
}

impl PhysicalOperator {
    /// Operator name used in plan descriptions
    pub fn name(&self) -> &'static str {
        match self {
            PhysicalOperator::Argument => "Argument",
            PhysicalOperator::NodeScan { .. } => "NodeScan",
            PhysicalOperator::IndexSeek { .. } => "IndexSeek",
            PhysicalOperator::Expand { .. } => "Expand",
            PhysicalOperator::HybridExpand { .. } => "HybridExpand",
            PhysicalOperator::Filter { .. } => "Filter",
            PhysicalOperator::Projection { .. } => "Projection",
            PhysicalOperator::Aggregate { .. } => "Aggregate",
            PhysicalOperator::Distinct { .. } => "Distinct",
            PhysicalOperator::Sort { .. } => "Sort",
            PhysicalOperator::Skip { .. } => "Skip",
            PhysicalOperator::Limit { .. } => "Limit",
            PhysicalOperator::Select { .. } => "Select",
            PhysicalOperator::Unwind { .. } => "Unwind",
            PhysicalOperator::Optional { .. } => "Optional",
            PhysicalOperator::Merge { .. } => "Merge",
            PhysicalOperator::Create { .. } => "Create",
            PhysicalOperator::SetProperties { .. } => "SetProperties",
            PhysicalOperator::Remove { .. } => "Remove",
            PhysicalOperator::Delete { .. } => "Delete",
            PhysicalOperator::NamedPath { .. } => "NamedPath",
            PhysicalOperator::Eager { .. } => "Eager",
            PhysicalOperator::Discard { .. } => "Discard",
        }
    }

    /// Input operator, if any
    pub fn input(&self) -> Option<&PhysicalOperator> {
        match self {
            PhysicalOperator::Argument => None,
            PhysicalOperator::NodeScan { input, .. }
            | PhysicalOperator::IndexSeek { input, .. }
            | PhysicalOperator::Expand { input, .. }
            | PhysicalOperator::HybridExpand { input, .. }
            | PhysicalOperator::Filter { input, .. }
            | PhysicalOperator::Projection { input, .. }
            | PhysicalOperator::Aggregate { input, .. }
            | PhysicalOperator::Distinct { input, .. }
            | PhysicalOperator::Sort { input, .. }
            | PhysicalOperator::Skip { input, .. }
            | PhysicalOperator::Limit { input, .. }
            | PhysicalOperator::Select { input, .. }
            | PhysicalOperator::Unwind { input, .. }
            | PhysicalOperator::Optional { input, .. }
            | PhysicalOperator::Merge { input, .. }
            | PhysicalOperator::Create { input, .. }
            | PhysicalOperator::SetProperties { input, .. }
            | PhysicalOperator::Remove { input, .. }
            | PhysicalOperator::Delete { input, .. }
            | PhysicalOperator::NamedPath { input, .. }
            | PhysicalOperator::Eager { input }
            | PhysicalOperator::Discard { input } => Some(input),
        }
    }

    /// Sub-plan run per input row, if any
    pub fn subplan(&self) -> Option<&PhysicalOperator> {
        match self {
            PhysicalOperator::Optional { subplan, .. } => Some(subplan),
            PhysicalOperator::Merge { matcher, .. } => Some(matcher),
            _ => None,
        }
    }

    /// Count operators with the given name in this tree, sub-plans included
    pub fn count(&self, name: &str) -> usize {
        let own = usize::from(self.name() == name);
        own + self.input().map_or(0, |i| i.count(name))
            + self.subplan().map_or(0, |s| s.count(name))
    }

    fn describe(&self) -> String {
        match self {
            PhysicalOperator::NodeScan {
                variable, label, ..
            } => match label {
                Some(label) => format!("NodeScan({variable}:{label})"),
                None => format!("NodeScan({variable})"),
            },
            PhysicalOperator::IndexSeek {
                variable,
                label,
                property,
                ..
            } => format!("IndexSeek({variable}:{label}({property}))"),
            PhysicalOperator::Expand { spec, .. } | PhysicalOperator::HybridExpand { spec, .. } => {
                let (left, right) = match spec.direction {
                    Direction::Outgoing => ("-", "->"),
                    Direction::Incoming => ("<-", "-"),
                    Direction::Both => ("-", "-"),
                };
                let hops = if spec.variable_length {
                    format!("*{}..{}", spec.min_hops, spec.max_hops)
                } else {
                    String::new()
                };
                format!(
                    "{}(({}){}[{}{}]{}({}))",
                    self.name(),
                    spec.from.trim(),
                    left,
                    spec.types.join("|"),
                    hops,
                    right,
                    spec.to.trim()
                )
            }
            PhysicalOperator::Select { columns, .. } => format!("Select({})", columns.join(", ")),
            other => other.name().to_string(),
        }
    }

    fn write_tree(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        writeln!(f, "{}{}", "  ".repeat(depth), self.describe())?;
        if let Some(subplan) = self.subplan() {
            subplan.write_tree(f, depth + 2)?;
        }
        match self.input() {
            Some(input) => input.write_tree(f, depth + 1),
            None => Ok(()),
        }
    }
}

impl fmt::Display for PhysicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_tree(f, 0)
    }
}

/// Physical execution plan
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// Root physical operator
    pub root: PhysicalOperator,

    /// Result column names, empty when the query ends with an update
    pub columns: Vec<String>,

    /// Whether the plan writes to the graph
    pub updating: bool,
}

/// What a bound variable holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VarKind {
    Node,
    Relationship,
    RelationshipList,
    Path,
    Value,
}

impl VarKind {
    fn describe(&self) -> &'static str {
        match self {
            VarKind::Node => "a node",
            VarKind::Relationship => "a relationship",
            VarKind::RelationshipList => "a relationship list",
            VarKind::Path => "a path",
            VarKind::Value => "a value",
        }
    }
}

/// How a pattern chain gets its first node
#[derive(Debug, Clone, PartialEq)]
enum StartScan {
    Bound,
    IndexSeek {
        label: String,
        property: String,
        predicate: usize,
    },
    Label(String),
    AllNodes,
}

/// Query planner
pub struct QueryPlanner<'a> {
    schema: &'a Schema,
    statistics: Option<&'a Statistics>,
    functions: &'a FunctionRegistry,
    options: PlannerOptions,
    bound: BTreeMap<String, VarKind>,
    hidden_counter: usize,
    has_read: bool,
    seen_update: bool,
}

impl<'a> QueryPlanner<'a> {
    /// Create a planner over a schema snapshot and optional statistics
    pub fn new(
        schema: &'a Schema,
        statistics: Option<&'a Statistics>,
        functions: &'a FunctionRegistry,
        options: PlannerOptions,
    ) -> Self {
        Self {
            schema,
            statistics,
            functions,
            options,
            bound: BTreeMap::new(),
            hidden_counter: 0,
            has_read: false,
            seen_update: false,
        }
    }

    /// Plan a whole query
    pub fn plan(mut self, query: &Query) -> Result<ExecutionPlan> {
        let mut plan = PhysicalOperator::Argument;
        let mut columns = Vec::new();

        for clause in &query.clauses {
            if clause.is_updating() && !self.seen_update {
                self.seen_update = true;
                if self.has_read {
                    plan = PhysicalOperator::Eager {
                        input: Box::new(plan),
                    };
                }
            }

            plan = match clause {
                Clause::Match(m) => {
                    self.has_read = true;
                    self.plan_match(plan, m)?
                }
                Clause::Unwind(u) => self.plan_unwind(plan, u)?,
                Clause::With(projection) => self.plan_projection(plan, projection, false)?.0,
                Clause::Return(projection) => {
                    let (plan, names) = self.plan_projection(plan, projection, true)?;
                    columns = names;
                    plan
                }
                Clause::Create(create) => self.plan_create(plan, create)?,
                Clause::Merge(merge) => {
                    let plan = self.plan_merge(plan, merge)?;
                    self.has_read = true;
                    plan
                }
                Clause::Set(items) => {
                    self.check_set_items(items)?;
                    PhysicalOperator::SetProperties {
                        input: Box::new(plan),
                        items: items.clone(),
                    }
                }
                Clause::Remove(items) => {
                    for item in items {
                        if let RemoveItem::Labels { variable, .. } = item {
                            self.require_labelled(variable)?;
                        }
                    }
                    PhysicalOperator::Remove {
                        input: Box::new(plan),
                        items: items.clone(),
                    }
                }
                Clause::Delete(delete) => {
                    for expr in &delete.expressions {
                        self.check_expression(expr, false)?;
                    }
                    PhysicalOperator::Delete {
                        input: Box::new(plan),
                        expressions: delete.expressions.clone(),
                        detach: delete.detach,
                    }
                }
            };
        }

        if !matches!(query.clauses.last(), Some(Clause::Return(_))) {
            plan = PhysicalOperator::Discard {
                input: Box::new(plan),
            };
        }

        Ok(ExecutionPlan {
            root: plan,
            columns,
            updating: query.is_updating(),
        })
    }

    // ========== Variables ==========

    fn hidden(&mut self, kind: &str) -> String {
        self.hidden_counter += 1;
        format!("{HIDDEN}{kind}_{}", self.hidden_counter)
    }

    fn bind(&mut self, name: &str, kind: VarKind) -> Result<()> {
        match self.bound.get(name) {
            Some(existing) if *existing == kind && kind == VarKind::Node => Ok(()),
            Some(existing) => Err(Error::Planning(format!(
                "variable `{}` is already bound to {}; cannot rebind it to {}",
                name.trim(),
                existing.describe(),
                kind.describe()
            ))),
            None => {
                self.bound.insert(name.to_string(), kind);
                Ok(())
            }
        }
    }

    fn require_labelled(&self, variable: &str) -> Result<()> {
        match self.bound.get(variable) {
            Some(VarKind::Relationship) | Some(VarKind::RelationshipList) | Some(VarKind::Path) => {
                Err(Error::Planning(format!(
                    "labels can only be changed on nodes, `{variable}` is not a node"
                )))
            }
            _ => Ok(()),
        }
    }

    fn is_bound(&self, expr: &Expression) -> bool {
        expr.variables().iter().all(|v| self.bound.contains_key(v))
    }

    /// Give every anonymous node and relationship a hidden variable
    fn name_anonymous(&mut self, pattern: &Pattern) -> Pattern {
        let mut pattern = pattern.clone();
        if pattern.start.variable.is_none() {
            pattern.start.variable = Some(self.hidden("node"));
        }
        for (rel, node) in &mut pattern.steps {
            if rel.variable.is_none() {
                rel.variable = Some(self.hidden("rel"));
            }
            if node.variable.is_none() {
                node.variable = Some(self.hidden("node"));
            }
        }
        pattern
    }

    // ========== Expression Checks ==========

    /// Reject unknown functions and misplaced aggregates
    fn check_expression(&self, expr: &Expression, aggregates_allowed: bool) -> Result<()> {
        let mut error = None;
        expr.walk(&mut |e| {
            if error.is_some() {
                return;
            }
            match e {
                Expression::CountStar if !aggregates_allowed => {
                    error = Some(Error::Planning(
                        "count(*) is only allowed in RETURN and WITH".to_string(),
                    ));
                }
                Expression::Function { name, args, .. } => {
                    let lower = name.to_ascii_lowercase();
                    if AGGREGATES.contains(&lower.as_str()) {
                        if !aggregates_allowed {
                            error = Some(Error::Planning(format!(
                                "aggregate function {name}() is only allowed in RETURN and WITH"
                            )));
                        } else if args.iter().any(Expression::contains_aggregate) {
                            error = Some(Error::Planning(format!(
                                "aggregate function {name}() cannot contain another aggregate"
                            )));
                        } else if args.len() != 1 {
                            error = Some(Error::Planning(format!(
                                "aggregate function {name}() takes exactly one argument"
                            )));
                        }
                    } else if lower == SIMILARITY_FUNCTION {
                        error = Some(Error::Planning(
                            "similarity() is only supported as `similarity(n.property, value) >= threshold` on an expanded node in MATCH ... WHERE".to_string(),
                        ));
                    } else if !ENTITY_FUNCTIONS.contains(&lower.as_str())
                        && !self.functions.contains(&lower)
                    {
                        error = Some(Error::Planning(format!("unknown function '{name}'")));
                    }
                }
                _ => {}
            }
        });
        error.map_or(Ok(()), Err)
    }

    fn check_set_items(&self, items: &[SetItem]) -> Result<()> {
        for item in items {
            match item {
                SetItem::Property { value, .. }
                | SetItem::Replace { value, .. }
                | SetItem::Merge { value, .. } => self.check_expression(value, false)?,
                SetItem::Labels { variable, .. } => self.require_labelled(variable)?,
            }
        }
        Ok(())
    }

    // ========== MATCH ==========

    fn plan_match(&mut self, input: PhysicalOperator, clause: &MatchClause) -> Result<PhysicalOperator> {
        if !clause.optional {
            return self.plan_patterns(
                input,
                &clause.patterns,
                &clause.hints,
                clause.where_clause.as_ref(),
            );
        }

        let outer: HashSet<String> = self.bound.keys().cloned().collect();
        let subplan = self.plan_patterns(
            PhysicalOperator::Argument,
            &clause.patterns,
            &clause.hints,
            clause.where_clause.as_ref(),
        )?;
        let new_variables = self
            .bound
            .keys()
            .filter(|name| !outer.contains(*name))
            .cloned()
            .collect();
        Ok(PhysicalOperator::Optional {
            input: Box::new(input),
            subplan: Box::new(subplan),
            new_variables,
        })
    }

    fn plan_patterns(
        &mut self,
        input: PhysicalOperator,
        patterns: &[Pattern],
        hints: &[IndexHint],
        where_clause: Option<&Expression>,
    ) -> Result<PhysicalOperator> {
        let patterns: Vec<Pattern> = patterns.iter().map(|p| self.name_anonymous(p)).collect();
        self.check_pattern_kinds(&patterns)?;

        let mut predicates: Vec<Expression> =
            where_clause.cloned().map(Expression::conjuncts).unwrap_or_default();
        for pattern in &patterns {
            for node in pattern.nodes() {
                let var = Expression::Variable(node.variable.clone().unwrap_or_default());
                if !node.labels.is_empty() {
                    predicates.push(Expression::HasLabels(Box::new(var.clone()), node.labels.clone()));
                }
                for (key, value) in &node.properties {
                    predicates.push(Expression::binary(
                        Expression::Property(Box::new(var.clone()), key.clone()),
                        BinaryOp::Equals,
                        value.clone(),
                    ));
                }
            }
        }

        let mut similarity = self.extract_similarity(&mut predicates, &patterns)?;
        for predicate in &predicates {
            self.check_expression(predicate, false)?;
        }
        for pattern in &patterns {
            for rel in pattern.relationships() {
                for (_, value) in &rel.properties {
                    self.check_expression(value, false)?;
                }
            }
        }
        let forced = self.resolve_hints(hints, &predicates)?;

        let mut applied = vec![false; predicates.len()];
        let mut remaining = patterns;
        let mut plan = input;
        let mut match_relationships = Vec::new();

        while !remaining.is_empty() {
            let (index, reverse, scan) =
                self.choose_start(&remaining, &predicates, &applied, &forced, &similarity)?;
            let pattern = remaining.remove(index);
            plan = self.plan_chain(
                plan,
                &pattern,
                reverse,
                scan,
                &predicates,
                &mut applied,
                &mut match_relationships,
                &mut similarity,
            )?;
        }

        let rest: Vec<Expression> = predicates
            .into_iter()
            .zip(applied)
            .filter(|(_, done)| !done)
            .map(|(p, _)| p)
            .collect();
        if let Some(predicate) = Expression::and_all(rest) {
            plan = PhysicalOperator::Filter {
                input: Box::new(plan),
                predicate,
            };
        }
        Ok(plan)
    }

    fn check_pattern_kinds(&self, patterns: &[Pattern]) -> Result<()> {
        let mut local: HashMap<&str, VarKind> = HashMap::new();
        for pattern in patterns {
            if let Some(path) = &pattern.variable {
                if self.bound.contains_key(path) || local.contains_key(path.as_str()) {
                    return Err(Error::Planning(format!(
                        "path variable `{path}` is already bound"
                    )));
                }
                local.insert(path, VarKind::Path);
            }
            for node in pattern.nodes() {
                let name = node.variable.as_deref().unwrap_or_default();
                let kind = self.bound.get(name).or(local.get(name)).copied();
                if let Some(kind) = kind {
                    if kind != VarKind::Node {
                        return Err(Error::Planning(format!(
                            "variable `{name}` is {}, not a node",
                            kind.describe()
                        )));
                    }
                }
                local.insert(name, VarKind::Node);
            }
            for rel in pattern.relationships() {
                let name = rel.variable.as_deref().unwrap_or_default();
                if self.bound.contains_key(name) || local.contains_key(name) {
                    return Err(Error::Planning(format!(
                        "relationship variable `{name}` is already bound; rebinding it is ambiguous"
                    )));
                }
                local.insert(name, VarKind::Relationship);
            }
        }
        Ok(())
    }

    /// Pull `similarity(to.p, q) >= t` conjuncts out of the predicate list
    fn extract_similarity(
        &self,
        predicates: &mut Vec<Expression>,
        patterns: &[Pattern],
    ) -> Result<HashMap<String, SimilarityFilter>> {
        let targets: HashSet<&str> = patterns
            .iter()
            .flat_map(|p| p.steps.iter())
            .filter_map(|(_, node)| node.variable.as_deref())
            .collect();

        let mut found = HashMap::new();
        let mut kept = Vec::with_capacity(predicates.len());
        for predicate in predicates.drain(..) {
            match similarity_threshold(&predicate) {
                Some((target, filter)) if targets.contains(target.as_str()) => {
                    if !self.options.similarity_enabled {
                        return Err(Error::Planning(
                            "similarity() requires a registered similarity scorer".to_string(),
                        ));
                    }
                    let mut refs = filter.query.variables();
                    refs.extend(filter.threshold.variables());
                    if refs.contains(&target) || found.contains_key(&target) {
                        return Err(Error::Planning(format!(
                            "unsupported similarity predicate on `{target}`"
                        )));
                    }
                    self.check_expression(&filter.query, false)?;
                    self.check_expression(&filter.threshold, false)?;
                    found.insert(target, filter);
                }
                _ => kept.push(predicate),
            }
        }
        *predicates = kept;
        Ok(found)
    }

    /// Validate USING INDEX hints; returns variable -> (label, property)
    fn resolve_hints(
        &self,
        hints: &[IndexHint],
        predicates: &[Expression],
    ) -> Result<HashMap<String, (String, String)>> {
        let mut forced = HashMap::new();
        for hint in hints {
            if !self.schema.has_index(&hint.label, &hint.property) {
                return Err(Error::Planning(format!(
                    "USING INDEX {}:{}({}) refers to an index that does not exist",
                    hint.variable, hint.label, hint.property
                )));
            }
            let has_predicate = predicates.iter().any(|p| {
                equality_on(p, &hint.variable).is_some_and(|(prop, _)| prop == hint.property)
            });
            if !has_predicate {
                return Err(Error::Planning(format!(
                    "USING INDEX {}:{}({}) needs an equality predicate on {}.{}",
                    hint.variable, hint.label, hint.property, hint.variable, hint.property
                )));
            }
            forced.insert(
                hint.variable.clone(),
                (hint.label.clone(), hint.property.clone()),
            );
        }
        Ok(forced)
    }

    /// Labels a node is known to carry, from its pattern and HasLabels predicates
    fn known_labels(node: &NodePattern, predicates: &[Expression]) -> Vec<String> {
        let var = node.variable.as_deref().unwrap_or_default();
        let mut labels = node.labels.clone();
        for predicate in predicates {
            if let Expression::HasLabels(target, names) = predicate {
                if matches!(target.as_ref(), Expression::Variable(v) if v == var) {
                    for name in names {
                        if !labels.contains(name) {
                            labels.push(name.clone());
                        }
                    }
                }
            }
        }
        labels
    }

    /// Estimated rows produced by starting a chain at `node`
    fn estimate_start(
        &self,
        node: &NodePattern,
        predicates: &[Expression],
        applied: &[bool],
        forced: &HashMap<String, (String, String)>,
    ) -> Result<(f64, StartScan)> {
        let var = node.variable.clone().unwrap_or_default();
        if self.bound.contains_key(&var) {
            return Ok((1.0, StartScan::Bound));
        }

        let seekable = |property: &str| -> Option<usize> {
            predicates.iter().enumerate().position(|(i, p)| {
                !applied[i]
                    && equality_on(p, &var)
                        .is_some_and(|(prop, value)| prop == property && self.is_bound(value))
            })
        };

        if let Some((label, property)) = forced.get(&var) {
            let predicate = seekable(property).ok_or_else(|| {
                Error::Planning(format!(
                    "USING INDEX {var}:{label}({property}) cannot be used: the compared value depends on unbound variables"
                ))
            })?;
            return Ok((
                1.0,
                StartScan::IndexSeek {
                    label: label.clone(),
                    property: property.clone(),
                    predicate,
                },
            ));
        }

        let labels = Self::known_labels(node, predicates);
        let stats = self.statistics;
        let mut best: Option<(f64, StartScan)> = None;
        let mut consider = |estimate: f64, scan: StartScan| {
            if best.as_ref().is_none_or(|(current, _)| estimate < *current) {
                best = Some((estimate, scan));
            }
        };

        for label in &labels {
            let label_rows = stats.map(|s| s.label_count(label) as f64);
            let equalities: Vec<(usize, String)> = predicates
                .iter()
                .enumerate()
                .filter(|(i, _)| !applied[*i])
                .filter_map(|(i, p)| {
                    equality_on(p, &var)
                        .filter(|(_, value)| self.is_bound(value))
                        .map(|(prop, _)| (i, prop.to_string()))
                })
                .collect();

            for (predicate, property) in &equalities {
                if self.options.predicate_pushdown && self.schema.has_index(label, property) {
                    let estimate = stats
                        .and_then(|s| s.index(label, property))
                        .map(|s| s.selectivity().max(1.0))
                        .unwrap_or(10.0);
                    consider(
                        estimate,
                        StartScan::IndexSeek {
                            label: label.clone(),
                            property: property.clone(),
                            predicate: *predicate,
                        },
                    );
                } else {
                    let estimate = label_rows.map(|n| (n / 10.0).max(1.0)).unwrap_or(100.0);
                    consider(estimate, StartScan::Label(label.clone()));
                }
            }
            consider(label_rows.unwrap_or(1000.0), StartScan::Label(label.clone()));
        }
        consider(
            stats.map(|s| s.node_count() as f64).unwrap_or(10_000.0),
            StartScan::AllNodes,
        );

        Ok(best.unwrap_or((f64::MAX, StartScan::AllNodes)))
    }

    /// Pick the pattern and end to start from: lowest estimate wins
    fn choose_start(
        &self,
        patterns: &[Pattern],
        predicates: &[Expression],
        applied: &[bool],
        forced: &HashMap<String, (String, String)>,
        similarity: &HashMap<String, SimilarityFilter>,
    ) -> Result<(usize, bool, StartScan)> {
        let mut best: Option<(f64, usize, bool, StartScan)> = None;
        for (index, pattern) in patterns.iter().enumerate() {
            let mut ends = vec![(false, &pattern.start)];
            let reversible = pattern.variable.is_none()
                && !pattern.steps.is_empty()
                && !pattern.nodes().any(|n| {
                    n.variable.as_ref().is_some_and(|v| similarity.contains_key(v))
                });
            if reversible {
                if let Some((_, last)) = pattern.steps.last() {
                    ends.push((true, last));
                }
            }
            for (reverse, node) in ends {
                let (estimate, scan) = self.estimate_start(node, predicates, applied, forced)?;
                if best.as_ref().is_none_or(|(current, ..)| estimate < *current) {
                    best = Some((estimate, index, reverse, scan));
                }
            }
        }

        let (estimate, index, reverse, scan) =
            best.ok_or_else(|| Error::Internal("no pattern to plan".to_string()))?;
        let start = if reverse {
            patterns[index].steps.last().map(|(_, n)| n)
        } else {
            Some(&patterns[index].start)
        };
        debug!(
            variable = start.and_then(|n| n.variable.as_deref()).unwrap_or_default().trim(),
            estimate,
            scan = ?scan,
            "Chose start scan"
        );
        Ok((index, reverse, scan))
    }

    /// Attach every unapplied predicate whose variables are all bound
    fn attach_filters(
        &self,
        plan: PhysicalOperator,
        predicates: &[Expression],
        applied: &mut [bool],
    ) -> PhysicalOperator {
        if !self.options.predicate_pushdown {
            return plan;
        }
        let mut ready = Vec::new();
        for (i, predicate) in predicates.iter().enumerate() {
            if !applied[i] && self.is_bound(predicate) {
                applied[i] = true;
                ready.push(predicate.clone());
            }
        }
        match Expression::and_all(ready) {
            Some(predicate) => PhysicalOperator::Filter {
                input: Box::new(plan),
                predicate,
            },
            None => plan,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn plan_chain(
        &mut self,
        input: PhysicalOperator,
        pattern: &Pattern,
        reverse: bool,
        scan: StartScan,
        predicates: &[Expression],
        applied: &mut [bool],
        match_relationships: &mut Vec<String>,
        similarity: &mut HashMap<String, SimilarityFilter>,
    ) -> Result<PhysicalOperator> {
        // (relationship, from node, to node) in traversal order
        let mut hops: Vec<(&RelationshipPattern, &NodePattern)> = Vec::new();
        let start_node = if reverse {
            let mut previous = &pattern.start;
            let mut reversed = Vec::new();
            for (rel, node) in &pattern.steps {
                reversed.push((rel, previous));
                previous = node;
            }
            reversed.reverse();
            hops.extend(reversed);
            previous
        } else {
            hops.extend(pattern.steps.iter().map(|(r, n)| (r, n)));
            &pattern.start
        };

        let start = start_node.variable.clone().unwrap_or_default();
        let mut plan = match scan {
            StartScan::Bound => input,
            StartScan::IndexSeek {
                label,
                property,
                predicate,
            } => {
                applied[predicate] = true;
                let value = equality_on(&predicates[predicate], &start)
                    .map(|(_, value)| value.clone())
                    .ok_or_else(|| Error::Internal("index seek without equality".to_string()))?;
                PhysicalOperator::IndexSeek {
                    input: Box::new(input),
                    variable: start.clone(),
                    label,
                    property,
                    value,
                }
            }
            StartScan::Label(label) => PhysicalOperator::NodeScan {
                input: Box::new(input),
                variable: start.clone(),
                label: Some(label),
            },
            StartScan::AllNodes => PhysicalOperator::NodeScan {
                input: Box::new(input),
                variable: start.clone(),
                label: None,
            },
        };
        self.bind(&start, VarKind::Node)?;
        plan = self.attach_filters(plan, predicates, applied);

        let mut from = start.clone();
        let mut segments = Vec::new();
        for (rel, node) in hops {
            let to = node.variable.clone().unwrap_or_default();
            let relationship = rel.variable.clone().unwrap_or_default();
            let (min_hops, max_hops, variable_length) = match &rel.length {
                None => (1, 1, false),
                Some(range) => {
                    let min = range.min.unwrap_or(1);
                    let max = range.max.unwrap_or(self.options.max_var_length);
                    if min > max {
                        return Err(Error::Planning(format!(
                            "variable-length lower bound {min} exceeds the maximum expansion depth {max}"
                        )));
                    }
                    (min, max, true)
                }
            };
            let segment = pattern.variable.as_ref().map(|_| self.hidden("segment"));
            if let Some(segment) = &segment {
                segments.push(segment.clone());
            }

            let spec = ExpandSpec {
                from: from.clone(),
                relationship: relationship.clone(),
                to: to.clone(),
                types: rel.types.clone(),
                direction: if reverse {
                    rel.direction.reverse()
                } else {
                    rel.direction
                },
                min_hops,
                max_hops,
                variable_length,
                into: self.bound.contains_key(&to),
                properties: rel.properties.clone(),
                exclude: match_relationships.clone(),
                segment,
            };
            match_relationships.push(relationship.clone());

            self.bind(
                &relationship,
                if variable_length {
                    VarKind::RelationshipList
                } else {
                    VarKind::Relationship
                },
            )?;
            self.bind(&to, VarKind::Node)?;
            if let Some(segment) = &spec.segment {
                self.bind(segment, VarKind::Path)?;
            }

            plan = match similarity.remove(&to) {
                Some(filter) => PhysicalOperator::HybridExpand {
                    input: Box::new(plan),
                    spec,
                    similarity: filter,
                },
                None => PhysicalOperator::Expand {
                    input: Box::new(plan),
                    spec,
                },
            };
            plan = self.attach_filters(plan, predicates, applied);
            from = to;
        }

        if let Some(variable) = &pattern.variable {
            plan = PhysicalOperator::NamedPath {
                input: Box::new(plan),
                variable: variable.clone(),
                start,
                segments,
            };
            self.bind(variable, VarKind::Path)?;
            plan = self.attach_filters(plan, predicates, applied);
        }
        Ok(plan)
    }

    // ========== UNWIND ==========

    fn plan_unwind(&mut self, input: PhysicalOperator, clause: &UnwindClause) -> Result<PhysicalOperator> {
        self.check_expression(&clause.expression, false)?;
        if self.bound.contains_key(&clause.variable) {
            return Err(Error::Planning(format!(
                "variable `{}` is already declared",
                clause.variable
            )));
        }
        self.bound.insert(clause.variable.clone(), VarKind::Value);
        Ok(PhysicalOperator::Unwind {
            input: Box::new(input),
            expression: clause.expression.clone(),
            variable: clause.variable.clone(),
        })
    }

    // ========== WITH / RETURN ==========

    fn plan_projection(
        &mut self,
        input: PhysicalOperator,
        projection: &Projection,
        is_return: bool,
    ) -> Result<(PhysicalOperator, Vec<String>)> {
        let mut names: Vec<String> = Vec::with_capacity(projection.items.len());
        for item in &projection.items {
            let name = item.name().to_string();
            if names.contains(&name) {
                return Err(Error::Planning(format!(
                    "multiple result columns with the same name '{name}'"
                )));
            }
            self.check_expression(&item.expression, true)?;
            names.push(name);
        }

        let aggregating = projection.items.iter().any(|i| i.expression.contains_aggregate());
        let mut plan = if aggregating {
            let mut groups = Vec::new();
            let mut aggregates = Vec::new();
            let mut mixed = Vec::new();
            for item in &projection.items {
                let name = item.name().to_string();
                if !item.expression.contains_aggregate() {
                    groups.push((name, item.expression.clone()));
                } else if let Some(call) = aggregate_call(&item.expression) {
                    aggregates.push((name, call));
                } else {
                    let rewritten = self.extract_aggregates(&item.expression, &mut aggregates);
                    mixed.push((name, rewritten));
                }
            }
            let mut plan = PhysicalOperator::Aggregate {
                input: Box::new(input),
                groups,
                aggregates,
            };
            if !mixed.is_empty() {
                plan = PhysicalOperator::Projection {
                    input: Box::new(plan),
                    items: mixed,
                    keep_input: true,
                };
            }
            plan
        } else {
            PhysicalOperator::Projection {
                input: Box::new(input),
                items: projection
                    .items
                    .iter()
                    .map(|i| (i.name().to_string(), i.expression.clone()))
                    .collect(),
                keep_input: !projection.distinct,
            }
        };

        if projection.distinct {
            plan = PhysicalOperator::Distinct {
                input: Box::new(plan),
                columns: names.clone(),
            };
        }

        if !projection.order_by.is_empty() {
            let mut keys = Vec::with_capacity(projection.order_by.len());
            for sort in &projection.order_by {
                let key = rewrite_projected(&sort.expression, &projection.items);
                self.check_expression(&key, false)?;
                keys.push((key, sort.ascending));
            }
            plan = PhysicalOperator::Sort {
                input: Box::new(plan),
                keys,
            };
        }
        if let Some(count) = &projection.skip {
            self.check_expression(count, false)?;
            plan = PhysicalOperator::Skip {
                input: Box::new(plan),
                count: count.clone(),
            };
        }
        if let Some(count) = &projection.limit {
            self.check_expression(count, false)?;
            plan = PhysicalOperator::Limit {
                input: Box::new(plan),
                count: count.clone(),
            };
        }
        plan = PhysicalOperator::Select {
            input: Box::new(plan),
            columns: names.clone(),
        };

        let mut scope = BTreeMap::new();
        for item in &projection.items {
            let kind = match &item.expression {
                Expression::Variable(v) => self.bound.get(v).copied().unwrap_or(VarKind::Value),
                _ => VarKind::Value,
            };
            scope.insert(item.name().to_string(), kind);
        }
        if !is_return {
            self.bound = scope;
        }

        if let Some(predicate) = &projection.where_clause {
            self.check_expression(predicate, false)?;
            plan = PhysicalOperator::Filter {
                input: Box::new(plan),
                predicate: predicate.clone(),
            };
        }
        Ok((plan, names))
    }

    /// Replace aggregate calls with hidden columns computed by Aggregate
    fn extract_aggregates(
        &mut self,
        expr: &Expression,
        aggregates: &mut Vec<(String, AggregateCall)>,
    ) -> Expression {
        if let Some(call) = aggregate_call(expr) {
            let name = self.hidden("agg");
            aggregates.push((name.clone(), call));
            return Expression::Variable(name);
        }
        match expr {
            Expression::Property(target, key) => {
                Expression::Property(Box::new(self.extract_aggregates(target, aggregates)), key.clone())
            }
            Expression::Index(target, index) => Expression::Index(
                Box::new(self.extract_aggregates(target, aggregates)),
                Box::new(self.extract_aggregates(index, aggregates)),
            ),
            Expression::HasLabels(target, labels) => Expression::HasLabels(
                Box::new(self.extract_aggregates(target, aggregates)),
                labels.clone(),
            ),
            Expression::Binary { left, op, right } => Expression::binary(
                self.extract_aggregates(left, aggregates),
                *op,
                self.extract_aggregates(right, aggregates),
            ),
            Expression::Unary { op, operand } => Expression::Unary {
                op: *op,
                operand: Box::new(self.extract_aggregates(operand, aggregates)),
            },
            Expression::Function {
                name,
                args,
                distinct,
            } => Expression::Function {
                name: name.clone(),
                args: args
                    .iter()
                    .map(|a| self.extract_aggregates(a, aggregates))
                    .collect(),
                distinct: *distinct,
            },
            Expression::List(items) => Expression::List(
                items
                    .iter()
                    .map(|i| self.extract_aggregates(i, aggregates))
                    .collect(),
            ),
            Expression::Map(entries) => Expression::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), self.extract_aggregates(v, aggregates)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    // ========== CREATE / MERGE ==========

    fn check_creatable(&self, pattern: &Pattern, clause: &str) -> Result<()> {
        if let Some(path) = &pattern.variable {
            if self.bound.contains_key(path) {
                return Err(Error::Planning(format!("path variable `{path}` is already bound")));
            }
        }
        for node in pattern.nodes() {
            if let Some(var) = &node.variable {
                match self.bound.get(var) {
                    Some(VarKind::Node) if !node.labels.is_empty() || !node.properties.is_empty() => {
                        return Err(Error::Planning(format!(
                            "variable `{var}` is already bound; {clause} cannot add labels or properties to it"
                        )));
                    }
                    Some(VarKind::Node) | None => {}
                    Some(kind) => {
                        return Err(Error::Planning(format!(
                            "variable `{var}` is {}, not a node",
                            kind.describe()
                        )));
                    }
                }
            }
            for (_, value) in &node.properties {
                self.check_expression(value, false)?;
            }
        }
        for rel in pattern.relationships() {
            if rel.types.len() != 1 {
                return Err(Error::Planning(format!(
                    "{clause} needs exactly one relationship type"
                )));
            }
            if rel.length.is_some() {
                return Err(Error::Planning(format!(
                    "{clause} cannot use variable-length relationships"
                )));
            }
            if clause == "CREATE" && rel.direction == Direction::Both {
                return Err(Error::Planning(
                    "only directed relationships can be created".to_string(),
                ));
            }
            if let Some(var) = &rel.variable {
                if self.bound.contains_key(var) {
                    return Err(Error::Planning(format!(
                        "relationship variable `{var}` is already bound"
                    )));
                }
            }
            for (_, value) in &rel.properties {
                self.check_expression(value, false)?;
            }
        }
        Ok(())
    }

    fn bind_created(&mut self, pattern: &Pattern) -> Result<()> {
        for node in pattern.nodes() {
            if let Some(var) = &node.variable {
                self.bind(var, VarKind::Node)?;
            }
        }
        for rel in pattern.relationships() {
            if let Some(var) = &rel.variable {
                self.bind(var, VarKind::Relationship)?;
            }
        }
        if let Some(path) = &pattern.variable {
            self.bind(path, VarKind::Path)?;
        }
        Ok(())
    }

    fn plan_create(&mut self, input: PhysicalOperator, clause: &CreateClause) -> Result<PhysicalOperator> {
        let mut patterns = Vec::with_capacity(clause.patterns.len());
        for pattern in &clause.patterns {
            self.check_creatable(pattern, "CREATE")?;
            let pattern = self.name_anonymous(pattern);
            self.bind_created(&pattern)?;
            patterns.push(pattern);
        }
        Ok(PhysicalOperator::Create {
            input: Box::new(input),
            patterns,
        })
    }

    fn plan_merge(&mut self, input: PhysicalOperator, clause: &MergeClause) -> Result<PhysicalOperator> {
        self.check_creatable(&clause.pattern, "MERGE")?;
        let pattern = self.name_anonymous(&clause.pattern);
        let matcher =
            self.plan_patterns(PhysicalOperator::Argument, std::slice::from_ref(&pattern), &[], None)?;
        self.check_set_items(&clause.on_create)?;
        self.check_set_items(&clause.on_match)?;
        Ok(PhysicalOperator::Merge {
            input: Box::new(input),
            matcher: Box::new(matcher),
            pattern,
            on_create: clause.on_create.clone(),
            on_match: clause.on_match.clone(),
        })
    }
}

/// `var.prop = value` (either side), returning the property and value
fn equality_on<'e>(expr: &'e Expression, var: &str) -> Option<(&'e str, &'e Expression)> {
    let Expression::Binary {
        left,
        op: BinaryOp::Equals,
        right,
    } = expr
    else {
        return None;
    };
    let property_of = |side: &'e Expression| match side {
        Expression::Property(target, key)
            if matches!(target.as_ref(), Expression::Variable(v) if v == var) =>
        {
            Some(key.as_str())
        }
        _ => None,
    };
    if let Some(key) = property_of(left) {
        if !right.variables().contains(var) {
            return Some((key, right));
        }
    }
    if let Some(key) = property_of(right) {
        if !left.variables().contains(var) {
            return Some((key, left));
        }
    }
    None
}

/// Recognize `similarity(v.p, q) >= t`, `> t`, `t <= similarity(..)` and `t < similarity(..)`
fn similarity_threshold(expr: &Expression) -> Option<(String, SimilarityFilter)> {
    let Expression::Binary { left, op, right } = expr else {
        return None;
    };
    let (call, threshold, inclusive) = match op {
        BinaryOp::GreaterEquals => (left, right, true),
        BinaryOp::GreaterThan => (left, right, false),
        BinaryOp::LessEquals => (right, left, true),
        BinaryOp::LessThan => (right, left, false),
        _ => return None,
    };
    let Expression::Function { name, args, .. } = call.as_ref() else {
        return None;
    };
    if !name.eq_ignore_ascii_case(SIMILARITY_FUNCTION) || args.len() != 2 {
        return None;
    }
    let Expression::Property(target, property) = &args[0] else {
        return None;
    };
    let Expression::Variable(variable) = target.as_ref() else {
        return None;
    };
    Some((
        variable.clone(),
        SimilarityFilter {
            property: property.clone(),
            query: args[1].clone(),
            threshold: threshold.as_ref().clone(),
            inclusive,
        },
    ))
}

fn aggregate_call(expr: &Expression) -> Option<AggregateCall> {
    match expr {
        Expression::CountStar => Some(AggregateCall {
            function: AggregateFunction::CountStar,
            argument: None,
            distinct: false,
        }),
        Expression::Function {
            name,
            args,
            distinct,
        } => AggregateFunction::from_name(name).map(|function| AggregateCall {
            function,
            argument: args.first().cloned(),
            distinct: *distinct,
        }),
        _ => None,
    }
}

/// Replace sort expressions that repeat a projected expression with its column
fn rewrite_projected(expr: &Expression, items: &[ProjectionItem]) -> Expression {
    for item in items {
        if item.expression == *expr {
            return Expression::Variable(item.name().to_string());
        }
    }
    expr.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use nodus_graph::Index;

    fn plan_with(query: &str, schema: &Schema, options: PlannerOptions) -> Result<ExecutionPlan> {
        let functions = FunctionRegistry::standard();
        let ast = parse(query)?;
        QueryPlanner::new(schema, None, &functions, options).plan(&ast)
    }

    fn plan(query: &str) -> Result<ExecutionPlan> {
        plan_with(query, &Schema::new(), PlannerOptions::default())
    }

    fn indexed_schema() -> Schema {
        let mut schema = Schema::new();
        schema.indexes.insert(Index::new("Person", "name"));
        schema
    }

    #[test]
    fn test_label_scan_and_projection() {
        let plan = plan("MATCH (p:Person) RETURN p.name AS name").unwrap();
        assert_eq!(plan.columns, vec!["name"]);
        assert!(!plan.updating);
        assert_eq!(plan.root.count("NodeScan"), 1);
        assert!(plan.root.to_string().contains("NodeScan(p:Person)"));
    }

    #[test]
    fn test_index_seek_requires_index_and_pushdown() {
        let query = "MATCH (p:Person {name: 'Alice'}) RETURN p.age";
        let schema = indexed_schema();

        let seek = plan_with(query, &schema, PlannerOptions::default()).unwrap();
        assert_eq!(seek.root.count("IndexSeek"), 1);

        let no_index = plan_with(query, &Schema::new(), PlannerOptions::default()).unwrap();
        assert_eq!(no_index.root.count("IndexSeek"), 0);

        let options = PlannerOptions {
            predicate_pushdown: false,
            ..Default::default()
        };
        let no_pushdown = plan_with(query, &schema, options).unwrap();
        assert_eq!(no_pushdown.root.count("IndexSeek"), 0);
        assert_eq!(no_pushdown.root.count("Filter"), 1);
    }

    #[test]
    fn test_pushdown_places_filters_early() {
        let query = "MATCH (a:Person)-[:KNOWS]->(b) WHERE a.age > 30 AND b.age < 20 RETURN b";
        let pushed = plan(query).unwrap();
        assert_eq!(pushed.root.count("Filter"), 2);

        let options = PlannerOptions {
            predicate_pushdown: false,
            ..Default::default()
        };
        let single = plan_with(query, &Schema::new(), options).unwrap();
        assert_eq!(single.root.count("Filter"), 1);
    }

    #[test]
    fn test_start_from_most_selective_end() {
        let schema = indexed_schema();
        let plan = plan_with(
            "MATCH (a)-[:KNOWS]->(b:Person {name: 'Bob'}) RETURN a",
            &schema,
            PlannerOptions::default(),
        )
        .unwrap();
        let text = plan.root.to_string();
        assert!(text.contains("IndexSeek(b:Person(name))"), "{text}");
        assert!(text.contains("Expand((b)<-[KNOWS]-(a))"), "{text}");
    }

    #[test]
    fn test_var_length_is_bounded() {
        let options = PlannerOptions {
            max_var_length: 4,
            ..Default::default()
        };
        let plan = plan_with("MATCH (a)-[*]->(b) RETURN b", &Schema::new(), options).unwrap();
        assert!(plan.root.to_string().contains("*1..4"));

        let err = plan_with("MATCH (a)-[*5..]->(b) RETURN b", &Schema::new(), options).unwrap_err();
        assert!(matches!(err, Error::Planning(_)));
    }

    #[test]
    fn test_planning_errors() {
        for query in [
            "RETURN nosuchfunction(1)",
            "MATCH (n) WHERE count(n) > 1 RETURN n",
            "MATCH (n)-[r]->(m) MATCH (r) RETURN r",
            "MATCH (n) CREATE (n:Person)",
            "MATCH (n) RETURN n.a AS x, n.b AS x",
            "MATCH (n:Person) USING INDEX n:Person(name) WHERE n.name = 'x' RETURN n",
            "MATCH (n) RETURN similarity(n.v, [1.0])",
            "CREATE (a)-[:R]-(b)",
            "CREATE (a)-[:R*2]->(b)",
            "CREATE (a)-[:R|S]->(b)",
            "UNWIND [1] AS x UNWIND [2] AS x RETURN x",
        ] {
            assert!(
                matches!(plan(query), Err(Error::Planning(_))),
                "expected a planning error for {query}"
            );
        }
    }

    #[test]
    fn test_similarity_needs_scorer() {
        let query = "MATCH (a)-[:SIMILAR]->(b) WHERE similarity(b.embedding, [1.0, 0.0]) >= 0.8 RETURN b";
        assert!(matches!(plan(query), Err(Error::Planning(_))));

        let options = PlannerOptions {
            similarity_enabled: true,
            ..Default::default()
        };
        let plan = plan_with(query, &Schema::new(), options).unwrap();
        assert_eq!(plan.root.count("HybridExpand"), 1);
        assert_eq!(plan.root.count("Filter"), 0);
    }

    #[test]
    fn test_eager_before_first_update() {
        let plan = plan("MATCH (n) SET n.seen = true RETURN n").unwrap();
        assert!(plan.updating);
        assert_eq!(plan.root.count("Eager"), 1);

        let create_only = self::plan("CREATE (n) RETURN n").unwrap();
        assert_eq!(create_only.root.count("Eager"), 0);

        let discard = self::plan("CREATE (n)").unwrap();
        assert_eq!(discard.root.name(), "Discard");
        assert!(discard.columns.is_empty());
    }

    #[test]
    fn test_optional_and_merge_use_subplans() {
        let plan = plan("MATCH (a) OPTIONAL MATCH (a)-[:R]->(b) RETURN a, b").unwrap();
        assert_eq!(plan.root.count("Optional"), 1);
        assert_eq!(plan.root.count("Argument"), 2);

        let plan = plan_with(
            "MERGE (p:Person {name: 'A'}) ON CREATE SET p.new = true RETURN p",
            &Schema::new(),
            PlannerOptions::default(),
        )
        .unwrap();
        assert_eq!(plan.root.count("Merge"), 1);
    }

    #[test]
    fn test_mixed_aggregate_expressions() {
        let plan = plan("MATCH (n) RETURN n.group AS g, count(*) + 1 AS c ORDER BY c").unwrap();
        let text = plan.root.to_string();
        assert!(text.contains("Aggregate"));
        assert!(text.contains("Select(g, c)"));
        assert_eq!(plan.columns, vec!["g", "c"]);
    }
}
