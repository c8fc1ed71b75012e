//! Query Execution Engine
//!
//! Pull-based executor: every physical operator becomes an [`Operator`]
//! that yields one row per `next` call and pulls from its input on
//! demand. Rows are variable-name to value maps. Sub-plans (OPTIONAL
//! MATCH, MERGE) are driven by resetting their [`Operator`] tree with an
//! argument row.
//!
//! The executor checks the query deadline on every pull and between the
//! breadth-first layers of variable-length expansions.

use crate::ast::{Expression, NodePattern, Pattern, RemoveItem, SetItem};
use crate::eval::{evaluate, is_true};
use crate::functions::FunctionRegistry;
use crate::planner::{AggregateCall, AggregateFunction, ExpandSpec, PhysicalOperator, SimilarityFilter};
use crate::result::QueryStats;
use crate::scorer::SimilarityScorer;
use nodus_core::{
    Direction, Error, GroupKey, Label, Node, NodeId, Path, Property, Relationship, RelationshipId,
    Result, Value,
};
use nodus_graph::GraphTransaction;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;

/// A row of variable bindings
pub type Row = HashMap<String, Value>;

/// Nodes fetched per batched read during scans and expansions
const FETCH_BATCH: usize = 64;

/// Per-query execution state threaded through every operator
pub struct ExecutionContext<'a> {
    pub(crate) tx: &'a mut GraphTransaction,
    pub(crate) params: HashMap<String, Value>,
    pub(crate) functions: &'a FunctionRegistry,
    pub(crate) scorer: Option<&'a dyn SimilarityScorer>,
    pub(crate) deadline: Option<Instant>,
    pub(crate) stats: QueryStats,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(
        tx: &'a mut GraphTransaction,
        params: HashMap<String, Value>,
        functions: &'a FunctionRegistry,
    ) -> Self {
        Self {
            tx,
            params,
            functions,
            scorer: None,
            deadline: None,
            stats: QueryStats::default(),
        }
    }

    pub fn with_scorer(mut self, scorer: Option<&'a dyn SimilarityScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Fail once the query budget is exhausted
    pub fn check_deadline(&self) -> Result<()> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Error::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

/// A pull-based operator
pub trait Operator {
    /// Produce the next row, or `None` when exhausted
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<Option<Row>>;

    /// Restart with a new argument row for the leaf [`PhysicalOperator::Argument`]
    fn reset(&mut self, argument: Row);
}

/// Instantiate the operator tree of a physical plan
pub fn build(plan: &PhysicalOperator) -> Box<dyn Operator> {
    match plan {
        PhysicalOperator::Argument => Box::new(ArgumentOp {
            row: Some(Row::new()),
        }),
        PhysicalOperator::NodeScan {
            input,
            variable,
            label,
        } => Box::new(NodeScanOp {
            input: build(input),
            variable: variable.clone(),
            label: label.clone(),
            current: None,
            ids: VecDeque::new(),
            nodes: VecDeque::new(),
        }),
        PhysicalOperator::IndexSeek {
            input,
            variable,
            label,
            property,
            value,
        } => Box::new(IndexSeekOp {
            input: build(input),
            variable: variable.clone(),
            label: label.clone(),
            property: property.clone(),
            value: value.clone(),
            current: None,
            nodes: VecDeque::new(),
        }),
        PhysicalOperator::Expand { input, spec } => Box::new(ExpandOp {
            input: build(input),
            spec: spec.clone(),
            similarity: None,
            pending: VecDeque::new(),
        }),
        PhysicalOperator::HybridExpand {
            input,
            spec,
            similarity,
        } => Box::new(ExpandOp {
            input: build(input),
            spec: spec.clone(),
            similarity: Some(similarity.clone()),
            pending: VecDeque::new(),
        }),
        PhysicalOperator::Filter { input, predicate } => Box::new(FilterOp {
            input: build(input),
            predicate: predicate.clone(),
        }),
        PhysicalOperator::Projection {
            input,
            items,
            keep_input,
        } => Box::new(ProjectionOp {
            input: build(input),
            items: items.clone(),
            keep_input: *keep_input,
        }),
        PhysicalOperator::Aggregate {
            input,
            groups,
            aggregates,
        } => Box::new(AggregateOp {
            input: build(input),
            groups: groups.clone(),
            aggregates: aggregates.clone(),
            output: None,
        }),
        PhysicalOperator::Distinct { input, columns } => Box::new(DistinctOp {
            input: build(input),
            columns: columns.clone(),
            seen: HashSet::new(),
        }),
        PhysicalOperator::Sort { input, keys } => Box::new(SortOp {
            input: build(input),
            keys: keys.clone(),
            output: None,
        }),
        PhysicalOperator::Skip { input, count } => Box::new(SkipOp {
            input: build(input),
            count: count.clone(),
            skipped: false,
        }),
        PhysicalOperator::Limit { input, count } => Box::new(LimitOp {
            input: build(input),
            count: count.clone(),
            remaining: None,
        }),
        PhysicalOperator::Select { input, columns } => Box::new(SelectOp {
            input: build(input),
            columns: columns.clone(),
        }),
        PhysicalOperator::Unwind {
            input,
            expression,
            variable,
        } => Box::new(UnwindOp {
            input: build(input),
            expression: expression.clone(),
            variable: variable.clone(),
            current: None,
            items: VecDeque::new(),
        }),
        PhysicalOperator::Optional {
            input,
            subplan,
            new_variables,
        } => Box::new(OptionalOp {
            input: build(input),
            subplan: build(subplan),
            new_variables: new_variables.clone(),
            current: None,
            matched: false,
        }),
        PhysicalOperator::Merge {
            input,
            matcher,
            pattern,
            on_create,
            on_match,
        } => Box::new(MergeOp {
            input: build(input),
            matcher: build(matcher),
            pattern: pattern.clone(),
            on_create: on_create.clone(),
            on_match: on_match.clone(),
            pending: VecDeque::new(),
        }),
        PhysicalOperator::Create { input, patterns } => Box::new(CreateOp {
            input: build(input),
            patterns: patterns.clone(),
        }),
        PhysicalOperator::SetProperties { input, items } => Box::new(SetOp {
            input: build(input),
            items: items.clone(),
        }),
        PhysicalOperator::Remove { input, items } => Box::new(RemoveOp {
            input: build(input),
            items: items.clone(),
        }),
        PhysicalOperator::Delete {
            input,
            expressions,
            detach,
        } => Box::new(DeleteOp {
            input: build(input),
            expressions: expressions.clone(),
            detach: *detach,
        }),
        PhysicalOperator::NamedPath {
            input,
            variable,
            start,
            segments,
        } => Box::new(NamedPathOp {
            input: build(input),
            variable: variable.clone(),
            start: start.clone(),
            segments: segments.clone(),
        }),
        PhysicalOperator::Eager { input } => Box::new(EagerOp {
            input: build(input),
            buffer: None,
        }),
        PhysicalOperator::Discard { input } => Box::new(DiscardOp { input: build(input) }),
    }
}

// ========== Leaf And Scans ==========

struct ArgumentOp {
    row: Option<Row>,
}

impl Operator for ArgumentOp {
    fn next(&mut self, _ctx: &mut ExecutionContext<'_>) -> Result<Option<Row>> {
        Ok(self.row.take())
    }

    fn reset(&mut self, argument: Row) {
        self.row = Some(argument);
    }
}

struct NodeScanOp {
    input: Box<dyn Operator>,
    variable: String,
    label: Option<String>,
    current: Option<Row>,
    ids: VecDeque<NodeId>,
    nodes: VecDeque<Node>,
}

impl Operator for NodeScanOp {
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<Option<Row>> {
        loop {
            ctx.check_deadline()?;
            if let Some(node) = self.nodes.pop_front() {
                let mut row = self.current.clone().unwrap_or_default();
                row.insert(self.variable.clone(), Value::from(node));
                return Ok(Some(row));
            }
            if !self.ids.is_empty() {
                let take = self.ids.len().min(FETCH_BATCH);
                let batch: Vec<NodeId> = self.ids.drain(..take).collect();
                self.nodes = ctx.tx.get_nodes(&batch)?.into_iter().flatten().collect();
                continue;
            }
            let Some(row) = self.input.next(ctx)? else {
                return Ok(None);
            };
            self.ids = match &self.label {
                Some(label) => ctx.tx.label_node_ids(label)?,
                None => ctx.tx.all_node_ids()?,
            }
            .into();
            self.current = Some(row);
        }
    }

    fn reset(&mut self, argument: Row) {
        self.current = None;
        self.ids.clear();
        self.nodes.clear();
        self.input.reset(argument);
    }
}

struct IndexSeekOp {
    input: Box<dyn Operator>,
    variable: String,
    label: String,
    property: String,
    value: Expression,
    current: Option<Row>,
    nodes: VecDeque<Node>,
}

impl Operator for IndexSeekOp {
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<Option<Row>> {
        loop {
            ctx.check_deadline()?;
            if let Some(node) = self.nodes.pop_front() {
                let mut row = self.current.clone().unwrap_or_default();
                row.insert(self.variable.clone(), Value::from(node));
                return Ok(Some(row));
            }
            let Some(row) = self.input.next(ctx)? else {
                return Ok(None);
            };
            let value = evaluate(&self.value, &row, ctx)?;
            self.nodes = ctx.tx.index_seek(&self.label, &self.property, &value)?.into();
            self.current = Some(row);
        }
    }

    fn reset(&mut self, argument: Row) {
        self.current = None;
        self.nodes.clear();
        self.input.reset(argument);
    }
}

// ========== Expansion ==========

struct ExpandOp {
    input: Box<dyn Operator>,
    spec: ExpandSpec,
    similarity: Option<SimilarityFilter>,
    pending: VecDeque<Row>,
}

fn relationship_ids(value: &Value) -> Vec<RelationshipId> {
    match value {
        Value::Relationship(rel) => vec![rel.id],
        Value::List(items) => items
            .iter()
            .filter_map(|v| v.as_relationship().map(|r| r.id))
            .collect(),
        _ => Vec::new(),
    }
}

impl ExpandOp {
    /// Relationships leaving `node` that satisfy the type, property and
    /// exclusion constraints, paired with the node at their other end
    fn neighbours(
        &self,
        node: NodeId,
        properties: &[(String, Value)],
        excluded: &HashSet<RelationshipId>,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<Vec<(Relationship, Node)>> {
        let types: Vec<&str> = self.spec.types.iter().map(String::as_str).collect();
        let mut candidates = Vec::new();
        for rel in ctx.tx.relationships(node, self.spec.direction, &types)? {
            if excluded.contains(&rel.id) {
                continue;
            }
            let matches = properties.iter().all(|(key, expected)| {
                rel.get_property(key)
                    .is_some_and(|actual| actual.equals(expected) == Some(true))
            });
            if !matches {
                continue;
            }
            if let Some(other) = rel.other(node) {
                candidates.push((rel, other));
            }
        }

        let mut result = Vec::with_capacity(candidates.len());
        for chunk in candidates.chunks(FETCH_BATCH) {
            let ids: Vec<NodeId> = chunk.iter().map(|(_, id)| *id).collect();
            for ((rel, _), node) in chunk.iter().zip(ctx.tx.get_nodes(&ids)?) {
                if let Some(node) = node {
                    result.push((rel.clone(), node));
                }
            }
        }
        Ok(result)
    }

    /// All paths from the row's `from` node that satisfy the expansion
    fn paths(&self, row: &Row, ctx: &mut ExecutionContext<'_>) -> Result<Vec<Path>> {
        let spec = &self.spec;
        let from = match row.get(&spec.from) {
            Some(Value::Node(node)) => node.as_ref().clone(),
            Some(Value::Null) | None => return Ok(Vec::new()),
            Some(other) => {
                return Err(Error::QueryExecution(format!(
                    "cannot expand from {}, `{}` is not a node",
                    other.type_name(),
                    spec.from.trim()
                )));
            }
        };
        let target = if spec.into {
            match row.get(&spec.to) {
                Some(Value::Node(node)) => Some(node.id),
                _ => return Ok(Vec::new()),
            }
        } else {
            None
        };

        let mut properties = Vec::with_capacity(spec.properties.len());
        for (key, expr) in &spec.properties {
            let value = evaluate(expr, row, ctx)?;
            if value.is_null() {
                return Ok(Vec::new());
            }
            properties.push((key.clone(), value));
        }
        let excluded: HashSet<RelationshipId> = spec
            .exclude
            .iter()
            .filter_map(|v| row.get(v))
            .flat_map(relationship_ids)
            .collect();
        let reaches = |path: &Path| match target {
            Some(target) => path.end().is_some_and(|n| n.id == target),
            None => true,
        };

        let mut results = Vec::new();
        let mut frontier = vec![Path::from_node(from)];
        if spec.min_hops == 0 && reaches(&frontier[0]) {
            results.push(frontier[0].clone());
        }

        for depth in 1..=spec.max_hops {
            ctx.check_deadline()?;
            let mut next = Vec::new();
            for path in &frontier {
                let Some(end) = path.end().map(|n| n.id) else {
                    continue;
                };
                for (rel, node) in self.neighbours(end, &properties, &excluded, ctx)? {
                    // a path never traverses the same relationship twice
                    if path.relationships.iter().any(|r| r.id == rel.id) {
                        continue;
                    }
                    let mut extended = path.clone();
                    extended.extend(rel, node);
                    next.push(extended);
                }
            }
            if depth >= spec.min_hops {
                results.extend(next.iter().filter(|p| reaches(p)).cloned());
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        Ok(results)
    }

    fn passes_similarity(
        &self,
        node: &Node,
        row: &Row,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<bool> {
        let Some(filter) = &self.similarity else {
            return Ok(true);
        };
        let scorer = ctx.scorer.ok_or_else(|| {
            Error::QueryExecution("no similarity scorer is registered".to_string())
        })?;
        let Some(stored) = node.get_property(&filter.property) else {
            return Ok(false);
        };
        let query = evaluate(&filter.query, row, ctx)?;
        let threshold = match evaluate(&filter.threshold, row, ctx)? {
            Value::Null => return Ok(false),
            value => value.as_float().ok_or_else(|| {
                Error::QueryExecution(format!(
                    "similarity threshold must be a number, got {}",
                    value.type_name()
                ))
            })?,
        };
        Ok(match scorer.score(stored, &query)? {
            Some(score) if filter.inclusive => score >= threshold,
            Some(score) => score > threshold,
            None => false,
        })
    }

    fn expand(&self, row: &Row, ctx: &mut ExecutionContext<'_>) -> Result<VecDeque<Row>> {
        let spec = &self.spec;
        let mut rows = VecDeque::new();
        for path in self.paths(row, ctx)? {
            let Some(end) = path.end().cloned() else {
                continue;
            };
            if !self.passes_similarity(&end, row, ctx)? {
                continue;
            }

            let mut out = row.clone();
            let relationship = if spec.variable_length {
                Value::List(
                    path.relationships
                        .iter()
                        .cloned()
                        .map(Value::from)
                        .collect(),
                )
            } else {
                match path.relationships.first() {
                    Some(rel) => Value::from(rel.clone()),
                    None => Value::Null,
                }
            };
            out.insert(spec.relationship.clone(), relationship);
            if !spec.into {
                out.insert(spec.to.clone(), Value::from(end));
            }
            if let Some(segment) = &spec.segment {
                out.insert(segment.clone(), Value::from(path));
            }
            rows.push_back(out);
        }
        Ok(rows)
    }
}

impl Operator for ExpandOp {
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<Option<Row>> {
        loop {
            ctx.check_deadline()?;
            if let Some(row) = self.pending.pop_front() {
                return Ok(Some(row));
            }
            let Some(row) = self.input.next(ctx)? else {
                return Ok(None);
            };
            self.pending = self.expand(&row, ctx)?;
        }
    }

    fn reset(&mut self, argument: Row) {
        self.pending.clear();
        self.input.reset(argument);
    }
}

// ========== Row Transformations ==========

struct FilterOp {
    input: Box<dyn Operator>,
    predicate: Expression,
}

impl Operator for FilterOp {
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<Option<Row>> {
        loop {
            ctx.check_deadline()?;
            let Some(row) = self.input.next(ctx)? else {
                return Ok(None);
            };
            if is_true(&self.predicate, &row, ctx)? {
                return Ok(Some(row));
            }
        }
    }

    fn reset(&mut self, argument: Row) {
        self.input.reset(argument);
    }
}

struct ProjectionOp {
    input: Box<dyn Operator>,
    items: Vec<(String, Expression)>,
    keep_input: bool,
}

impl Operator for ProjectionOp {
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<Option<Row>> {
        ctx.check_deadline()?;
        let Some(row) = self.input.next(ctx)? else {
            return Ok(None);
        };
        let mut values = Vec::with_capacity(self.items.len());
        for (_, expr) in &self.items {
            values.push(evaluate(expr, &row, ctx)?);
        }
        let mut out = if self.keep_input { row } else { Row::new() };
        for ((name, _), value) in self.items.iter().zip(values) {
            out.insert(name.clone(), value);
        }
        Ok(Some(out))
    }

    fn reset(&mut self, argument: Row) {
        self.input.reset(argument);
    }
}

struct SelectOp {
    input: Box<dyn Operator>,
    columns: Vec<String>,
}

impl Operator for SelectOp {
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<Option<Row>> {
        let Some(mut row) = self.input.next(ctx)? else {
            return Ok(None);
        };
        Ok(Some(
            self.columns
                .iter()
                .map(|c| (c.clone(), row.remove(c).unwrap_or(Value::Null)))
                .collect(),
        ))
    }

    fn reset(&mut self, argument: Row) {
        self.input.reset(argument);
    }
}

struct UnwindOp {
    input: Box<dyn Operator>,
    expression: Expression,
    variable: String,
    current: Option<Row>,
    items: VecDeque<Value>,
}

impl Operator for UnwindOp {
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<Option<Row>> {
        loop {
            ctx.check_deadline()?;
            if let Some(item) = self.items.pop_front() {
                let mut row = self.current.clone().unwrap_or_default();
                row.insert(self.variable.clone(), item);
                return Ok(Some(row));
            }
            let Some(row) = self.input.next(ctx)? else {
                return Ok(None);
            };
            self.items = match evaluate(&self.expression, &row, ctx)? {
                Value::Null => VecDeque::new(),
                Value::List(items) => items.into(),
                single => VecDeque::from([single]),
            };
            self.current = Some(row);
        }
    }

    fn reset(&mut self, argument: Row) {
        self.current = None;
        self.items.clear();
        self.input.reset(argument);
    }
}

struct NamedPathOp {
    input: Box<dyn Operator>,
    variable: String,
    start: String,
    segments: Vec<String>,
}

impl Operator for NamedPathOp {
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<Option<Row>> {
        let Some(mut row) = self.input.next(ctx)? else {
            return Ok(None);
        };
        let path = match row.get(&self.start) {
            Some(Value::Node(node)) => {
                let mut path = Path::from_node(node.as_ref().clone());
                for segment in &self.segments {
                    match row.get(segment) {
                        Some(Value::Path(segment)) => path.join(segment.as_ref().clone()),
                        _ => {
                            return Err(Error::Internal(format!(
                                "path segment `{}` is not bound",
                                segment.trim()
                            )));
                        }
                    }
                }
                Value::from(path)
            }
            _ => Value::Null,
        };
        for segment in &self.segments {
            row.remove(segment);
        }
        row.insert(self.variable.clone(), path);
        Ok(Some(row))
    }

    fn reset(&mut self, argument: Row) {
        self.input.reset(argument);
    }
}

// ========== Aggregation, Ordering, Paging ==========

enum Sum {
    Integer(i64),
    Float(f64),
}

enum AggregateState {
    Count(i64),
    Sum(Sum),
    Avg { total: f64, count: u64 },
    Min(Option<Value>),
    Max(Option<Value>),
    Collect(Vec<Value>),
}

struct Aggregator {
    function: AggregateFunction,
    seen: Option<HashSet<GroupKey>>,
    state: AggregateState,
}

impl Aggregator {
    fn new(call: &AggregateCall) -> Self {
        let state = match call.function {
            AggregateFunction::Count | AggregateFunction::CountStar => AggregateState::Count(0),
            AggregateFunction::Sum => AggregateState::Sum(Sum::Integer(0)),
            AggregateFunction::Avg => AggregateState::Avg { total: 0.0, count: 0 },
            AggregateFunction::Min => AggregateState::Min(None),
            AggregateFunction::Max => AggregateState::Max(None),
            AggregateFunction::Collect => AggregateState::Collect(Vec::new()),
        };
        Self {
            function: call.function,
            seen: call.distinct.then(HashSet::new),
            state,
        }
    }

    fn update(&mut self, value: Value) -> Result<()> {
        if self.function == AggregateFunction::CountStar {
            if let AggregateState::Count(n) = &mut self.state {
                *n += 1;
            }
            return Ok(());
        }
        if value.is_null() {
            return Ok(());
        }
        if let Some(seen) = &mut self.seen {
            if !seen.insert(GroupKey(vec![value.clone()])) {
                return Ok(());
            }
        }

        let not_numeric = |name: &str, value: &Value| {
            Error::QueryExecution(format!("{name}() needs numbers, got {}", value.type_name()))
        };
        match &mut self.state {
            AggregateState::Count(n) => *n += 1,
            AggregateState::Sum(sum) => {
                *sum = match (&*sum, &value) {
                    (Sum::Integer(a), Value::Integer(b)) => Sum::Integer(
                        a.checked_add(*b)
                            .ok_or_else(|| Error::QueryExecution("integer overflow in sum()".to_string()))?,
                    ),
                    (Sum::Integer(a), Value::Float(b)) => Sum::Float(*a as f64 + b),
                    (Sum::Float(a), v) => Sum::Float(a + v.as_float().ok_or_else(|| not_numeric("sum", v))?),
                    (_, v) => return Err(not_numeric("sum", v)),
                };
            }
            AggregateState::Avg { total, count } => {
                *total += value.as_float().ok_or_else(|| not_numeric("avg", &value))?;
                *count += 1;
            }
            AggregateState::Min(best) => {
                if best.as_ref().is_none_or(|b| value.sort_cmp(b).is_lt()) {
                    *best = Some(value);
                }
            }
            AggregateState::Max(best) => {
                if best.as_ref().is_none_or(|b| value.sort_cmp(b).is_gt()) {
                    *best = Some(value);
                }
            }
            AggregateState::Collect(items) => items.push(value),
        }
        Ok(())
    }

    fn finish(self) -> Value {
        match self.state {
            AggregateState::Count(n) => Value::Integer(n),
            AggregateState::Sum(Sum::Integer(n)) => Value::Integer(n),
            AggregateState::Sum(Sum::Float(f)) => Value::Float(f),
            AggregateState::Avg { count: 0, .. } => Value::Null,
            AggregateState::Avg { total, count } => Value::Float(total / count as f64),
            AggregateState::Min(best) | AggregateState::Max(best) => best.unwrap_or(Value::Null),
            AggregateState::Collect(items) => Value::List(items),
        }
    }
}

struct AggregateOp {
    input: Box<dyn Operator>,
    groups: Vec<(String, Expression)>,
    aggregates: Vec<(String, AggregateCall)>,
    output: Option<VecDeque<Row>>,
}

impl AggregateOp {
    fn compute(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<VecDeque<Row>> {
        let mut order: Vec<GroupKey> = Vec::new();
        let mut table: HashMap<GroupKey, Vec<Aggregator>> = HashMap::new();

        while let Some(row) = self.input.next(ctx)? {
            ctx.check_deadline()?;
            let mut key = Vec::with_capacity(self.groups.len());
            for (_, expr) in &self.groups {
                key.push(evaluate(expr, &row, ctx)?);
            }
            let key = GroupKey(key);
            let mut arguments = Vec::with_capacity(self.aggregates.len());
            for (_, call) in &self.aggregates {
                arguments.push(match &call.argument {
                    Some(expr) => evaluate(expr, &row, ctx)?,
                    None => Value::Null,
                });
            }

            if !table.contains_key(&key) {
                order.push(key.clone());
                let fresh = self
                    .aggregates
                    .iter()
                    .map(|(_, call)| Aggregator::new(call))
                    .collect();
                table.insert(key.clone(), fresh);
            }
            let aggregators = table
                .get_mut(&key)
                .ok_or_else(|| Error::Internal("aggregation group vanished".to_string()))?;
            for (aggregator, value) in aggregators.iter_mut().zip(arguments) {
                aggregator.update(value)?;
            }
        }

        // Aggregating without grouping keys always yields one row
        if order.is_empty() && self.groups.is_empty() {
            let key = GroupKey(Vec::new());
            order.push(key.clone());
            table.insert(
                key,
                self.aggregates
                    .iter()
                    .map(|(_, call)| Aggregator::new(call))
                    .collect(),
            );
        }

        let mut rows = VecDeque::with_capacity(order.len());
        for key in order {
            let Some(aggregators) = table.remove(&key) else {
                continue;
            };
            let mut row = Row::new();
            for ((name, _), value) in self.groups.iter().zip(key.0) {
                row.insert(name.clone(), value);
            }
            for ((name, _), aggregator) in self.aggregates.iter().zip(aggregators) {
                row.insert(name.clone(), aggregator.finish());
            }
            rows.push_back(row);
        }
        Ok(rows)
    }
}

impl Operator for AggregateOp {
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<Option<Row>> {
        if self.output.is_none() {
            self.output = Some(self.compute(ctx)?);
        }
        Ok(self.output.as_mut().and_then(VecDeque::pop_front))
    }

    fn reset(&mut self, argument: Row) {
        self.output = None;
        self.input.reset(argument);
    }
}

struct DistinctOp {
    input: Box<dyn Operator>,
    columns: Vec<String>,
    seen: HashSet<GroupKey>,
}

impl Operator for DistinctOp {
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<Option<Row>> {
        loop {
            ctx.check_deadline()?;
            let Some(row) = self.input.next(ctx)? else {
                return Ok(None);
            };
            let key = GroupKey(
                self.columns
                    .iter()
                    .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
                    .collect(),
            );
            if self.seen.insert(key) {
                return Ok(Some(row));
            }
        }
    }

    fn reset(&mut self, argument: Row) {
        self.seen.clear();
        self.input.reset(argument);
    }
}

struct SortOp {
    input: Box<dyn Operator>,
    keys: Vec<(Expression, bool)>,
    output: Option<VecDeque<Row>>,
}

impl SortOp {
    fn sorted(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<VecDeque<Row>> {
        let mut keyed = Vec::new();
        while let Some(row) = self.input.next(ctx)? {
            ctx.check_deadline()?;
            let mut values = Vec::with_capacity(self.keys.len());
            for (expr, _) in &self.keys {
                values.push(evaluate(expr, &row, ctx)?);
            }
            keyed.push((values, row));
        }
        keyed.sort_by(|(a, _), (b, _)| {
            for ((x, y), (_, ascending)) in a.iter().zip(b).zip(&self.keys) {
                let order = x.sort_cmp(y);
                if order.is_ne() {
                    return if *ascending { order } else { order.reverse() };
                }
            }
            std::cmp::Ordering::Equal
        });
        Ok(keyed.into_iter().map(|(_, row)| row).collect())
    }
}

impl Operator for SortOp {
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<Option<Row>> {
        if self.output.is_none() {
            self.output = Some(self.sorted(ctx)?);
        }
        Ok(self.output.as_mut().and_then(VecDeque::pop_front))
    }

    fn reset(&mut self, argument: Row) {
        self.output = None;
        self.input.reset(argument);
    }
}

/// Evaluate a SKIP or LIMIT count
fn row_count(expr: &Expression, clause: &str, ctx: &mut ExecutionContext<'_>) -> Result<usize> {
    match evaluate(expr, &Row::new(), ctx)? {
        Value::Integer(n) if n >= 0 => Ok(n as usize),
        other => Err(Error::QueryExecution(format!(
            "{clause} needs a non-negative integer, got {other}"
        ))),
    }
}

struct SkipOp {
    input: Box<dyn Operator>,
    count: Expression,
    skipped: bool,
}

impl Operator for SkipOp {
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<Option<Row>> {
        if !self.skipped {
            self.skipped = true;
            for _ in 0..row_count(&self.count, "SKIP", ctx)? {
                if self.input.next(ctx)?.is_none() {
                    return Ok(None);
                }
            }
        }
        self.input.next(ctx)
    }

    fn reset(&mut self, argument: Row) {
        self.skipped = false;
        self.input.reset(argument);
    }
}

struct LimitOp {
    input: Box<dyn Operator>,
    count: Expression,
    remaining: Option<usize>,
}

impl Operator for LimitOp {
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<Option<Row>> {
        let remaining = match self.remaining {
            Some(n) => n,
            None => row_count(&self.count, "LIMIT", ctx)?,
        };
        if remaining == 0 {
            self.remaining = Some(0);
            return Ok(None);
        }
        let row = self.input.next(ctx)?;
        self.remaining = Some(if row.is_some() { remaining - 1 } else { 0 });
        Ok(row)
    }

    fn reset(&mut self, argument: Row) {
        self.remaining = None;
        self.input.reset(argument);
    }
}

// ========== Sub-plans ==========

struct OptionalOp {
    input: Box<dyn Operator>,
    subplan: Box<dyn Operator>,
    new_variables: Vec<String>,
    current: Option<Row>,
    matched: bool,
}

impl Operator for OptionalOp {
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<Option<Row>> {
        loop {
            ctx.check_deadline()?;
            if let Some(current) = self.current.take() {
                if let Some(row) = self.subplan.next(ctx)? {
                    self.matched = true;
                    self.current = Some(current);
                    return Ok(Some(row));
                }
                if !self.matched {
                    let mut row = current;
                    for name in &self.new_variables {
                        row.insert(name.clone(), Value::Null);
                    }
                    return Ok(Some(row));
                }
            }
            let Some(row) = self.input.next(ctx)? else {
                return Ok(None);
            };
            self.subplan.reset(row.clone());
            self.current = Some(row);
            self.matched = false;
        }
    }

    fn reset(&mut self, argument: Row) {
        self.current = None;
        self.input.reset(argument);
    }
}

struct MergeOp {
    input: Box<dyn Operator>,
    matcher: Box<dyn Operator>,
    pattern: Pattern,
    on_create: Vec<SetItem>,
    on_match: Vec<SetItem>,
    pending: VecDeque<Row>,
}

impl MergeOp {
    fn merge(&mut self, row: Row, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        self.matcher.reset(row.clone());
        let mut matches = Vec::new();
        while let Some(found) = self.matcher.next(ctx)? {
            matches.push(found);
        }

        if matches.is_empty() {
            for node in self.pattern.nodes() {
                reject_null_properties(&node.properties, &row, ctx)?;
            }
            for rel in self.pattern.relationships() {
                reject_null_properties(&rel.properties, &row, ctx)?;
            }
            let mut created = row;
            create_pattern(&self.pattern, &mut created, ctx)?;
            apply_set_items(&self.on_create, &mut created, ctx)?;
            self.pending.push_back(created);
        } else {
            for mut found in matches {
                apply_set_items(&self.on_match, &mut found, ctx)?;
                self.pending.push_back(found);
            }
        }
        Ok(())
    }
}

fn reject_null_properties(
    properties: &[(String, Expression)],
    row: &Row,
    ctx: &mut ExecutionContext<'_>,
) -> Result<()> {
    for (key, expr) in properties {
        if evaluate(expr, row, ctx)?.is_null() {
            return Err(Error::QueryExecution(format!(
                "cannot MERGE with a null value for property `{key}`"
            )));
        }
    }
    Ok(())
}

impl Operator for MergeOp {
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<Option<Row>> {
        loop {
            ctx.check_deadline()?;
            if let Some(row) = self.pending.pop_front() {
                return Ok(Some(row));
            }
            let Some(row) = self.input.next(ctx)? else {
                return Ok(None);
            };
            self.merge(row, ctx)?;
        }
    }

    fn reset(&mut self, argument: Row) {
        self.pending.clear();
        self.input.reset(argument);
    }
}

// ========== Updates ==========

fn evaluate_properties(
    properties: &[(String, Expression)],
    row: &Row,
    ctx: &mut ExecutionContext<'_>,
) -> Result<Property> {
    let mut result = Property::new();
    for (key, expr) in properties {
        let value = evaluate(expr, row, ctx)?;
        if !value.is_null() {
            result.set(key.clone(), value);
        }
    }
    Ok(result)
}

fn bind_or_create_node(
    pattern: &NodePattern,
    row: &mut Row,
    ctx: &mut ExecutionContext<'_>,
) -> Result<Node> {
    let variable = pattern.variable.clone().unwrap_or_default();
    match row.get(&variable) {
        Some(Value::Node(node)) => return Ok(node.as_ref().clone()),
        Some(Value::Null) => {
            return Err(Error::QueryExecution(format!(
                "cannot create a relationship to a null node `{}`",
                variable.trim()
            )));
        }
        Some(other) => {
            return Err(Error::QueryExecution(format!(
                "`{}` is {}, not a node",
                variable.trim(),
                other.type_name()
            )));
        }
        None => {}
    }

    let properties = evaluate_properties(&pattern.properties, row, ctx)?;
    let property_count = properties.len() as u64;
    let node = ctx
        .tx
        .create_node(pattern.labels.iter().map(String::as_str), properties)?;
    ctx.stats.nodes_created += 1;
    ctx.stats.labels_added += pattern.labels.len() as u64;
    ctx.stats.properties_set += property_count;
    row.insert(variable, Value::from(node.clone()));
    Ok(node)
}

/// Create the unbound parts of a pattern and bind them in the row
fn create_pattern(pattern: &Pattern, row: &mut Row, ctx: &mut ExecutionContext<'_>) -> Result<()> {
    let mut current = bind_or_create_node(&pattern.start, row, ctx)?;
    let mut path = Path::from_node(current.clone());

    for (rel, node_pattern) in &pattern.steps {
        let next = bind_or_create_node(node_pattern, row, ctx)?;
        let (source, target) = match rel.direction {
            Direction::Incoming => (next.id, current.id),
            _ => (current.id, next.id),
        };
        let rel_type = rel.types.first().cloned().ok_or_else(|| {
            Error::Internal("relationship pattern without a type reached CREATE".to_string())
        })?;
        let properties = evaluate_properties(&rel.properties, row, ctx)?;
        let property_count = properties.len() as u64;
        let created = ctx.tx.create_relationship(source, target, rel_type, properties)?;
        ctx.stats.relationships_created += 1;
        ctx.stats.properties_set += property_count;

        if let Some(variable) = &rel.variable {
            row.insert(variable.clone(), Value::from(created.clone()));
        }
        path.extend(created, next.clone());
        current = next;
    }

    if let Some(variable) = &pattern.variable {
        row.insert(variable.clone(), Value::from(path));
    }
    Ok(())
}

enum Entity {
    Node(NodeId),
    Relationship(RelationshipId),
}

fn entity(row: &Row, variable: &str, clause: &str) -> Result<Option<Entity>> {
    match row.get(variable) {
        Some(Value::Node(node)) => Ok(Some(Entity::Node(node.id))),
        Some(Value::Relationship(rel)) => Ok(Some(Entity::Relationship(rel.id))),
        Some(Value::Null) => Ok(None),
        Some(other) => Err(Error::QueryExecution(format!(
            "{clause} needs a node or relationship, `{variable}` is {}",
            other.type_name()
        ))),
        None => Err(Error::QueryExecution(format!(
            "variable `{variable}` is not bound"
        ))),
    }
}

fn load_node(id: NodeId, ctx: &mut ExecutionContext<'_>) -> Result<Node> {
    ctx.tx
        .get_node(id)?
        .ok_or_else(|| Error::NodeNotFound(id.to_string()))
}

fn load_relationship(id: RelationshipId, ctx: &mut ExecutionContext<'_>) -> Result<Relationship> {
    ctx.tx
        .get_relationship(id)?
        .ok_or_else(|| Error::RelationshipNotFound(id.to_string()))
}

/// Replace every binding of the updated entity in the row
fn refresh(row: &mut Row, updated: &Value) {
    for value in row.values_mut() {
        let same = match (&*value, updated) {
            (Value::Node(a), Value::Node(b)) => a.id == b.id,
            (Value::Relationship(a), Value::Relationship(b)) => a.id == b.id,
            _ => false,
        };
        if same {
            *value = updated.clone();
        }
    }
}

/// Properties of a map, node or relationship value used by `SET v = ...`
fn property_map(value: Value, clause: &str) -> Result<Vec<(String, Value)>> {
    match value {
        Value::Map(map) => Ok(map.into_iter().collect()),
        Value::Node(node) => Ok(node.properties.into_inner().into_iter().collect()),
        Value::Relationship(rel) => Ok(rel.properties.into_inner().into_iter().collect()),
        other => Err(Error::QueryExecution(format!(
            "{clause} needs a map, got {}",
            other.type_name()
        ))),
    }
}

/// Apply a property change to a property set, returning how many changed
fn change_properties(properties: &mut Property, item: &SetItem, value: Value) -> Result<u64> {
    match item {
        SetItem::Property { key, .. } => {
            if value.is_null() {
                Ok(u64::from(properties.remove(key).is_some()))
            } else {
                properties.set(key.clone(), value);
                Ok(1)
            }
        }
        SetItem::Replace { .. } => {
            let entries = property_map(value, "SET =")?;
            properties.clear();
            let mut changed = 0;
            for (key, value) in entries {
                if !value.is_null() {
                    properties.set(key, value);
                    changed += 1;
                }
            }
            Ok(changed)
        }
        SetItem::Merge { .. } => {
            let mut changed = 0;
            for (key, value) in property_map(value, "SET +=")? {
                if value.is_null() {
                    changed += u64::from(properties.remove(&key).is_some());
                } else {
                    properties.set(key, value);
                    changed += 1;
                }
            }
            Ok(changed)
        }
        SetItem::Labels { .. } => Ok(0),
    }
}

fn apply_set_items(items: &[SetItem], row: &mut Row, ctx: &mut ExecutionContext<'_>) -> Result<()> {
    for item in items {
        ctx.check_deadline()?;
        let (variable, value) = match item {
            SetItem::Property {
                variable, value, ..
            }
            | SetItem::Replace { variable, value }
            | SetItem::Merge { variable, value } => (variable, Some(evaluate(value, row, ctx)?)),
            SetItem::Labels { variable, .. } => (variable, None),
        };

        match (entity(row, variable, "SET")?, item) {
            (None, _) => {}
            (Some(Entity::Node(id)), SetItem::Labels { labels, .. }) => {
                let mut node = load_node(id, ctx)?;
                for label in labels {
                    if node.add_label(label.as_str()) {
                        ctx.stats.labels_added += 1;
                    }
                }
                ctx.tx.update_node(&node)?;
                refresh(row, &Value::from(node));
            }
            (Some(Entity::Relationship(_)), SetItem::Labels { .. }) => {
                return Err(Error::QueryExecution(format!(
                    "cannot set labels on relationship `{variable}`"
                )));
            }
            (Some(Entity::Node(id)), _) => {
                let mut node = load_node(id, ctx)?;
                let changed =
                    change_properties(&mut node.properties, item, value.unwrap_or(Value::Null))?;
                ctx.tx.update_node(&node)?;
                ctx.stats.properties_set += changed;
                refresh(row, &Value::from(node));
            }
            (Some(Entity::Relationship(id)), _) => {
                let mut rel = load_relationship(id, ctx)?;
                let changed =
                    change_properties(&mut rel.properties, item, value.unwrap_or(Value::Null))?;
                ctx.tx.update_relationship(&rel)?;
                ctx.stats.properties_set += changed;
                refresh(row, &Value::from(rel));
            }
        }
    }
    Ok(())
}

struct CreateOp {
    input: Box<dyn Operator>,
    patterns: Vec<Pattern>,
}

impl Operator for CreateOp {
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<Option<Row>> {
        ctx.check_deadline()?;
        let Some(mut row) = self.input.next(ctx)? else {
            return Ok(None);
        };
        for pattern in &self.patterns {
            create_pattern(pattern, &mut row, ctx)?;
        }
        Ok(Some(row))
    }

    fn reset(&mut self, argument: Row) {
        self.input.reset(argument);
    }
}

struct SetOp {
    input: Box<dyn Operator>,
    items: Vec<SetItem>,
}

impl Operator for SetOp {
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<Option<Row>> {
        let Some(mut row) = self.input.next(ctx)? else {
            return Ok(None);
        };
        apply_set_items(&self.items, &mut row, ctx)?;
        Ok(Some(row))
    }

    fn reset(&mut self, argument: Row) {
        self.input.reset(argument);
    }
}

struct RemoveOp {
    input: Box<dyn Operator>,
    items: Vec<RemoveItem>,
}

impl RemoveOp {
    fn remove(&self, row: &mut Row, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        for item in &self.items {
            match item {
                RemoveItem::Property { variable, key } => match entity(row, variable, "REMOVE")? {
                    None => {}
                    Some(Entity::Node(id)) => {
                        let mut node = load_node(id, ctx)?;
                        if node.remove_property(key).is_some() {
                            ctx.stats.properties_set += 1;
                            ctx.tx.update_node(&node)?;
                        }
                        refresh(row, &Value::from(node));
                    }
                    Some(Entity::Relationship(id)) => {
                        let mut rel = load_relationship(id, ctx)?;
                        if rel.remove_property(key).is_some() {
                            ctx.stats.properties_set += 1;
                            ctx.tx.update_relationship(&rel)?;
                        }
                        refresh(row, &Value::from(rel));
                    }
                },
                RemoveItem::Labels { variable, labels } => match entity(row, variable, "REMOVE")? {
                    None => {}
                    Some(Entity::Node(id)) => {
                        let mut node = load_node(id, ctx)?;
                        for label in labels {
                            if node.remove_label(&Label::new(label.as_str())) {
                                ctx.stats.labels_removed += 1;
                            }
                        }
                        ctx.tx.update_node(&node)?;
                        refresh(row, &Value::from(node));
                    }
                    Some(Entity::Relationship(_)) => {
                        return Err(Error::QueryExecution(format!(
                            "cannot remove labels from relationship `{variable}`"
                        )));
                    }
                },
            }
        }
        Ok(())
    }
}

impl Operator for RemoveOp {
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<Option<Row>> {
        let Some(mut row) = self.input.next(ctx)? else {
            return Ok(None);
        };
        self.remove(&mut row, ctx)?;
        Ok(Some(row))
    }

    fn reset(&mut self, argument: Row) {
        self.input.reset(argument);
    }
}

struct DeleteOp {
    input: Box<dyn Operator>,
    expressions: Vec<Expression>,
    detach: bool,
}

impl DeleteOp {
    fn delete_node(&self, id: NodeId, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        let attached = if self.detach {
            ctx.tx.relationships(id, Direction::Both, &[])?.len() as u64
        } else {
            0
        };
        if ctx.tx.delete_node(id, self.detach)? {
            ctx.stats.nodes_deleted += 1;
            ctx.stats.relationships_deleted += attached;
        }
        Ok(())
    }

    fn delete_relationship(&self, id: RelationshipId, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        if ctx.tx.delete_relationship(id)? {
            ctx.stats.relationships_deleted += 1;
        }
        Ok(())
    }

    fn delete(&self, value: Value, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        match value {
            Value::Null => Ok(()),
            Value::Node(node) => self.delete_node(node.id, ctx),
            Value::Relationship(rel) => self.delete_relationship(rel.id, ctx),
            Value::Path(path) => {
                for rel in &path.relationships {
                    self.delete_relationship(rel.id, ctx)?;
                }
                for node in &path.nodes {
                    self.delete_node(node.id, ctx)?;
                }
                Ok(())
            }
            Value::List(items) => items.into_iter().try_for_each(|item| self.delete(item, ctx)),
            other => Err(Error::QueryExecution(format!(
                "DELETE needs a node, relationship or path, got {}",
                other.type_name()
            ))),
        }
    }
}

impl Operator for DeleteOp {
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<Option<Row>> {
        ctx.check_deadline()?;
        let Some(row) = self.input.next(ctx)? else {
            return Ok(None);
        };
        for expr in &self.expressions {
            let value = evaluate(expr, &row, ctx)?;
            self.delete(value, ctx)?;
        }
        Ok(Some(row))
    }

    fn reset(&mut self, argument: Row) {
        self.input.reset(argument);
    }
}

// ========== Barriers ==========

struct EagerOp {
    input: Box<dyn Operator>,
    buffer: Option<VecDeque<Row>>,
}

impl Operator for EagerOp {
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<Option<Row>> {
        if self.buffer.is_none() {
            let mut rows = VecDeque::new();
            while let Some(row) = self.input.next(ctx)? {
                rows.push_back(row);
            }
            self.buffer = Some(rows);
        }
        Ok(self.buffer.as_mut().and_then(VecDeque::pop_front))
    }

    fn reset(&mut self, argument: Row) {
        self.buffer = None;
        self.input.reset(argument);
    }
}

struct DiscardOp {
    input: Box<dyn Operator>,
}

impl Operator for DiscardOp {
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<Option<Row>> {
        while self.input.next(ctx)?.is_some() {}
        Ok(None)
    }

    fn reset(&mut self, argument: Row) {
        self.input.reset(argument);
    }
}
