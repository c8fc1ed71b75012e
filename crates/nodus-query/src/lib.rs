//! Nodus Query Engine
//!
//! Compiles Cypher-style query text into physical operator trees and
//! executes them against a graph transaction.
//!
//! # Overview
//!
//! The query engine implements:
//! - logos-based lexer and recursive-descent parser
//! - Typed function registry
//! - Statistics-driven planning with predicate pushdown and index seeks
//! - Pull-based streaming execution with deadlines
//! - Optional similarity-scored expansion (HybridExpand)

pub mod ast;
pub mod eval;
pub mod executor;
pub mod functions;
pub mod lexer;
pub mod parser;
pub mod planner;
pub mod result;
pub mod scorer;

pub use ast::Query;
pub use executor::{ExecutionContext, Operator, Row};
pub use functions::{ArgKind, FunctionRegistry, Signature};
pub use lexer::{Token, tokenize};
pub use parser::{DEFAULT_MAX_EXPRESSION_DEPTH, parse, parse_with_depth_limit};
pub use planner::{ExecutionPlan, PhysicalOperator, PlannerOptions, QueryPlanner};
pub use result::{QueryStats, Record, ResultCursor};
pub use scorer::{CosineScorer, SimilarityScorer};

use nodus_core::{Result, Value};
use nodus_graph::{GraphTransaction, Schema, Statistics};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// A parsed and planned query
#[derive(Debug, Clone)]
pub struct PreparedQuery {
    pub query: Query,
    pub plan: ExecutionPlan,
}

impl PreparedQuery {
    pub fn columns(&self) -> &[String] {
        &self.plan.columns
    }

    pub fn is_updating(&self) -> bool {
        self.plan.updating
    }
}

/// Query front end and executor bundled with its configuration
#[derive(Clone)]
pub struct QueryEngine {
    functions: FunctionRegistry,
    options: PlannerOptions,
    scorer: Option<Arc<dyn SimilarityScorer>>,
}

impl QueryEngine {
    /// Engine with the standard function registry and default options
    pub fn new() -> Self {
        Self {
            functions: FunctionRegistry::standard(),
            options: PlannerOptions::default(),
            scorer: None,
        }
    }

    pub fn with_options(mut self, options: PlannerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_functions(mut self, functions: FunctionRegistry) -> Self {
        self.functions = functions;
        self
    }

    /// Register the scorer used by `similarity()` predicates
    pub fn with_scorer(mut self, scorer: Arc<dyn SimilarityScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn options(&self) -> PlannerOptions {
        self.options
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    /// Parse and plan a query
    ///
    /// Syntax, parse and planning errors surface here, before any storage
    /// access.
    pub fn prepare(
        &self,
        text: &str,
        schema: &Schema,
        statistics: Option<&Statistics>,
    ) -> Result<PreparedQuery> {
        let query = parse_with_depth_limit(text, self.options.max_expression_depth)?;
        let options = PlannerOptions {
            similarity_enabled: self.scorer.is_some(),
            ..self.options
        };
        let plan = QueryPlanner::new(schema, statistics, &self.functions, options).plan(&query)?;
        debug!(columns = ?plan.columns, updating = plan.updating, "Planned query\n{}", plan.root);
        Ok(PreparedQuery { query, plan })
    }

    /// Start executing a prepared query, streaming records lazily
    pub fn execute<'a>(
        &'a self,
        prepared: &PreparedQuery,
        tx: &'a mut GraphTransaction,
        params: HashMap<String, Value>,
        deadline: Option<Instant>,
    ) -> Result<ResultCursor<'a>> {
        let root = executor::build(&prepared.plan.root);
        let ctx = ExecutionContext::new(tx, params, &self.functions)
            .with_scorer(self.scorer.as_deref())
            .with_deadline(deadline);
        Ok(ResultCursor::streaming(
            prepared.plan.columns.clone(),
            root,
            ctx,
        ))
    }
}

impl Default for QueryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("options", &self.options)
            .field("scorer", &self.scorer.is_some())
            .finish()
    }
}
