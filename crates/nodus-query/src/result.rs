//! Query results: records, update counters and the result cursor

use crate::executor::{ExecutionContext, Operator};
use nodus_core::{Error, Result, Value};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// One result row, ordered by projection column
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    columns: Arc<Vec<String>>,
    values: Vec<Value>,
}

impl Record {
    pub fn new(columns: Arc<Vec<String>>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Value of a column by name
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }

    /// Value of a column by position
    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (column, value)) in self.columns.iter().zip(&self.values).enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{column}: {value}")?;
        }
        write!(f, "}}")
    }
}

/// Update and row counters of one query
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryStats {
    pub nodes_created: u64,
    pub nodes_deleted: u64,
    pub relationships_created: u64,
    pub relationships_deleted: u64,
    pub properties_set: u64,
    pub labels_added: u64,
    pub labels_removed: u64,
    pub rows: u64,
}

impl QueryStats {
    /// True if the query changed the graph
    pub fn contains_updates(&self) -> bool {
        self.nodes_created > 0
            || self.nodes_deleted > 0
            || self.relationships_created > 0
            || self.relationships_deleted > 0
            || self.properties_set > 0
            || self.labels_added > 0
            || self.labels_removed > 0
    }
}

enum CursorState<'a> {
    Buffered(VecDeque<Record>),
    Streaming {
        root: Box<dyn Operator>,
        ctx: ExecutionContext<'a>,
    },
    Exhausted,
}

/// Lazy, finite, non-restartable sequence of records
///
/// A streaming cursor pulls rows from the operator pipeline as it is
/// iterated. The first error rolls the transaction back and ends the
/// stream.
pub struct ResultCursor<'a> {
    columns: Arc<Vec<String>>,
    state: CursorState<'a>,
    stats: QueryStats,
}

impl<'a> ResultCursor<'a> {
    pub(crate) fn streaming(
        columns: Vec<String>,
        root: Box<dyn Operator>,
        ctx: ExecutionContext<'a>,
    ) -> Self {
        Self {
            columns: Arc::new(columns),
            state: CursorState::Streaming { root, ctx },
            stats: QueryStats::default(),
        }
    }

    /// A cursor over records that were already produced
    pub fn buffered(columns: Vec<String>, records: Vec<Record>, stats: QueryStats) -> Self {
        Self {
            columns: Arc::new(columns),
            state: CursorState::Buffered(records.into()),
            stats,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Counters accumulated so far; final once the cursor is exhausted
    pub fn stats(&self) -> QueryStats {
        match &self.state {
            CursorState::Streaming { ctx, .. } => ctx.stats,
            _ => self.stats,
        }
    }

    /// Pull every remaining record into a buffered cursor
    ///
    /// The returned cursor no longer borrows the transaction.
    pub fn buffer(mut self) -> Result<ResultCursor<'static>> {
        let mut records = Vec::new();
        for record in self.by_ref() {
            records.push(record?);
        }
        Ok(ResultCursor::buffered(
            self.columns.to_vec(),
            records,
            self.stats(),
        ))
    }

    /// Exactly one record, or an error
    pub fn single(mut self) -> Result<Record> {
        let first = self
            .next()
            .transpose()?
            .ok_or_else(|| Error::QueryExecution("expected one record, got none".to_string()))?;
        if self.next().transpose()?.is_some() {
            return Err(Error::QueryExecution(
                "expected one record, got more".to_string(),
            ));
        }
        Ok(first)
    }

    fn pull(&mut self) -> Result<Option<Record>> {
        let CursorState::Streaming { root, ctx } = &mut self.state else {
            return Ok(None);
        };
        match root.next(ctx) {
            Ok(Some(mut row)) => {
                ctx.stats.rows += 1;
                let values = self
                    .columns
                    .iter()
                    .map(|c| row.remove(c).unwrap_or(Value::Null))
                    .collect();
                Ok(Some(Record::new(self.columns.clone(), values)))
            }
            Ok(None) => {
                self.stats = ctx.stats;
                self.state = CursorState::Exhausted;
                Ok(None)
            }
            Err(e) => {
                if matches!(e, Error::DeadlineExceeded) {
                    warn!(tx = ctx.tx.id(), "Query deadline exceeded, rolling back");
                } else {
                    debug!(tx = ctx.tx.id(), error = %e, "Query failed, rolling back");
                }
                if ctx.tx.is_active() {
                    if let Err(rollback) = ctx.tx.rollback() {
                        warn!(tx = ctx.tx.id(), error = %rollback, "Rollback failed");
                    }
                }
                self.stats = ctx.stats;
                self.state = CursorState::Exhausted;
                Err(e)
            }
        }
    }
}

impl Iterator for ResultCursor<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.state {
            CursorState::Buffered(records) => records.pop_front().map(Ok),
            CursorState::Exhausted => None,
            CursorState::Streaming { .. } => self.pull().transpose(),
        }
    }
}

impl fmt::Debug for ResultCursor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            CursorState::Buffered(records) => format!("Buffered({})", records.len()),
            CursorState::Streaming { .. } => "Streaming".to_string(),
            CursorState::Exhausted => "Exhausted".to_string(),
        };
        f.debug_struct("ResultCursor")
            .field("columns", &self.columns)
            .field("state", &state)
            .finish()
    }
}
