//! Explicit transactions opened from a session

use crate::bookmark::Bookmark;
use crate::driver::DriverShared;
use crate::session::{SessionState, abandon, prepare};
use nodus_core::{Error, Result, Value};
use nodus_graph::{Graph, GraphTransaction};
use nodus_query::ResultCursor;
use nodus_storage::AccessMode;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tracing::debug;

/// An explicit transaction
///
/// Queries see the transaction's own uncommitted writes. Dropping a
/// transaction that was not committed rolls it back.
pub struct Transaction {
    shared: Arc<DriverShared>,
    graph: Graph,
    tx: GraphTransaction,
    mode: AccessMode,
    session: Arc<SessionState>,
    finished: bool,
}

impl Transaction {
    pub(crate) fn new(
        shared: Arc<DriverShared>,
        graph: Graph,
        tx: GraphTransaction,
        mode: AccessMode,
        session: Arc<SessionState>,
    ) -> Self {
        Self {
            shared,
            graph,
            tx,
            mode,
            session,
            finished: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.tx.id()
    }

    pub fn is_active(&self) -> bool {
        !self.finished && self.tx.is_active()
    }

    /// Run a query with the configured deadline, streaming its records
    ///
    /// An execution error rolls the whole transaction back.
    pub fn run(
        &mut self,
        query: &str,
        params: HashMap<String, Value>,
    ) -> Result<ResultCursor<'_>> {
        let timeout = self.shared.config.query_timeout();
        self.run_inner(query, params, timeout)
    }

    /// Like [`Transaction::run`] with an explicit deadline
    pub fn run_with_timeout(
        &mut self,
        query: &str,
        params: HashMap<String, Value>,
        timeout: Duration,
    ) -> Result<ResultCursor<'_>> {
        self.run_inner(query, params, Some(timeout))
    }

    fn run_inner(
        &mut self,
        query: &str,
        params: HashMap<String, Value>,
        timeout: Option<Duration>,
    ) -> Result<ResultCursor<'_>> {
        self.ensure_usable()?;
        let deadline = timeout.map(|t| Instant::now() + t);
        let schema = self.tx.schema().clone();
        let prepared = prepare(&self.shared, &self.graph, &schema, query, self.mode)?;
        self.shared
            .engine
            .execute(&prepared, &mut self.tx, params, deadline)
    }

    /// Commit and return the bookmark of the new state
    pub fn commit(mut self) -> Result<Bookmark> {
        self.ensure_usable()?;
        self.finish();
        let seq = match self.tx.commit() {
            Ok(seq) => seq,
            Err(e) => {
                abandon(&mut self.tx);
                return Err(e);
            }
        };
        let bookmark = Bookmark::new(self.graph.name(), seq);
        debug!(tx = self.tx.id(), %bookmark, "Explicit transaction committed");
        self.session.record_bookmark(bookmark.clone())?;
        Ok(bookmark)
    }

    /// Discard every change made in this transaction
    pub fn rollback(mut self) -> Result<()> {
        self.finish();
        if self.tx.is_active() {
            self.tx.rollback()?;
        }
        debug!(tx = self.tx.id(), "Explicit transaction rolled back");
        Ok(())
    }

    fn ensure_usable(&mut self) -> Result<()> {
        if self.session.closed.load(Ordering::SeqCst) {
            self.finish();
            abandon(&mut self.tx);
            return Err(Error::Transaction(
                "session was closed; the transaction has been rolled back".to_string(),
            ));
        }
        if !self.is_active() {
            return Err(Error::Transaction(
                "transaction is no longer active".to_string(),
            ));
        }
        Ok(())
    }

    /// Release the session's open-transaction slot
    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.session.open_transaction.store(false, Ordering::SeqCst);
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            debug!(tx = self.tx.id(), "Rolling back dropped transaction");
            self.finish();
        }
        abandon(&mut self.tx);
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.tx.id())
            .field("database", &self.graph.name())
            .field("mode", &self.mode)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Driver, DriverConfig};

    fn driver() -> Driver {
        Driver::open(DriverConfig::for_testing()).unwrap()
    }

    fn count_people(driver: &Driver) -> Value {
        let mut session = driver.session("t", AccessMode::Read, Vec::new()).unwrap();
        session
            .run("MATCH (p:Person) RETURN count(p) AS c", HashMap::new())
            .unwrap()
            .single()
            .unwrap()
            .get("c")
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_reads_own_writes_then_commits() {
        let driver = driver();
        let mut session = driver.session("t", AccessMode::Write, Vec::new()).unwrap();
        let mut tx = session.begin_transaction().unwrap();
        tx.run("CREATE (:Person {name: 'Alice'})", HashMap::new())
            .unwrap()
            .buffer()
            .unwrap();

        let names: Vec<Value> = tx
            .run("MATCH (p:Person) RETURN p.name AS name", HashMap::new())
            .unwrap()
            .map(|r| r.map(|r| r.values()[0].clone()))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(names, vec![Value::String("Alice".into())]);
        assert_eq!(count_people(&driver), Value::Integer(0));

        let bookmark = tx.commit().unwrap();
        assert_eq!(session.last_bookmark(), Some(bookmark));
        assert_eq!(count_people(&driver), Value::Integer(1));
    }

    #[test]
    fn test_rollback_and_drop_discard_writes() {
        let driver = driver();
        let mut session = driver.session("t", AccessMode::Write, Vec::new()).unwrap();

        let mut tx = session.begin_transaction().unwrap();
        tx.run("CREATE (:Person)", HashMap::new()).unwrap().buffer().unwrap();
        tx.rollback().unwrap();

        {
            let mut tx = session.begin_transaction().unwrap();
            tx.run("CREATE (:Person)", HashMap::new()).unwrap().buffer().unwrap();
        }

        assert_eq!(count_people(&driver), Value::Integer(0));
        assert!(session.begin_transaction().is_ok());
    }

    #[test]
    fn test_execution_error_aborts_transaction() {
        let driver = driver();
        let mut session = driver.session("t", AccessMode::Write, Vec::new()).unwrap();
        let mut tx = session.begin_transaction().unwrap();
        tx.run("CREATE (:Person)", HashMap::new()).unwrap().buffer().unwrap();
        assert!(tx.run("RETURN 1 / 0 AS x", HashMap::new()).unwrap().buffer().is_err());

        assert!(!tx.is_active());
        assert!(matches!(tx.commit(), Err(Error::Transaction(_))));
        assert_eq!(count_people(&driver), Value::Integer(0));
    }

    #[test]
    fn test_closing_session_rolls_back_open_transaction() {
        let driver = driver();
        let mut session = driver.session("t", AccessMode::Write, Vec::new()).unwrap();
        let mut tx = session.begin_transaction().unwrap();
        tx.run("CREATE (:Person)", HashMap::new()).unwrap().buffer().unwrap();

        session.close();
        assert!(matches!(tx.commit(), Err(Error::Transaction(_))));
        assert_eq!(count_people(&driver), Value::Integer(0));
    }
}
