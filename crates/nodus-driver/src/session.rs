//! Sessions: a database, an access mode and a causal chain of bookmarks

use crate::bookmark::Bookmark;
use crate::driver::DriverShared;
use crate::transaction::Transaction;
use nodus_core::{Error, Result, Value};
use nodus_graph::{Graph, GraphTransaction};
use nodus_query::{PreparedQuery, ResultCursor};
use nodus_storage::AccessMode;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// State shared between a session and its explicit transaction
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    pub(crate) closed: AtomicBool,
    pub(crate) open_transaction: AtomicBool,
    last_bookmark: Mutex<Option<Bookmark>>,
}

impl SessionState {
    pub(crate) fn record_bookmark(&self, bookmark: Bookmark) -> Result<()> {
        let mut last = self
            .last_bookmark
            .lock()
            .map_err(|_| Error::Internal("Failed to acquire bookmark lock".to_string()))?;
        *last = Some(bookmark);
        Ok(())
    }

    fn last_bookmark(&self) -> Option<Bookmark> {
        self.last_bookmark.lock().ok().and_then(|b| b.clone())
    }
}

/// A unit of work bound to one database and one access mode
///
/// At most one explicit transaction may be open at a time. Closing or
/// dropping the session rolls back a transaction that was neither committed
/// nor rolled back.
pub struct Session {
    shared: Arc<DriverShared>,
    graph: Graph,
    mode: AccessMode,
    pending_bookmarks: Vec<Bookmark>,
    state: Arc<SessionState>,
}

impl Session {
    pub(crate) fn new(
        shared: Arc<DriverShared>,
        graph: Graph,
        mode: AccessMode,
        bookmarks: Vec<Bookmark>,
    ) -> Self {
        Self {
            shared,
            graph,
            mode,
            pending_bookmarks: bookmarks,
            state: Arc::new(SessionState::default()),
        }
    }

    pub fn database(&self) -> &str {
        self.graph.name()
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Bookmark of the last transaction this session committed
    pub fn last_bookmark(&self) -> Option<Bookmark> {
        self.state.last_bookmark()
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Run a query in an implicit transaction with the configured deadline
    ///
    /// The transaction commits when every record has been produced and rolls
    /// back on any error. The returned cursor is fully buffered.
    pub fn run(
        &mut self,
        query: &str,
        params: HashMap<String, Value>,
    ) -> Result<ResultCursor<'static>> {
        let timeout = self.shared.config.query_timeout();
        self.run_inner(query, params, timeout)
    }

    /// Like [`Session::run`] with an explicit deadline
    pub fn run_with_timeout(
        &mut self,
        query: &str,
        params: HashMap<String, Value>,
        timeout: Duration,
    ) -> Result<ResultCursor<'static>> {
        self.run_inner(query, params, Some(timeout))
    }

    fn run_inner(
        &mut self,
        query: &str,
        params: HashMap<String, Value>,
        timeout: Option<Duration>,
    ) -> Result<ResultCursor<'static>> {
        self.ensure_open()?;
        if self.state.open_transaction.load(Ordering::SeqCst) {
            return Err(Error::Transaction(
                "cannot run an auto-commit query while an explicit transaction is open".to_string(),
            ));
        }
        let deadline = timeout.map(|t| Instant::now() + t);

        self.await_bookmarks()?;
        let schema = self.graph.schema()?;
        let prepared = prepare(&self.shared, &self.graph, &schema, query, self.mode)?;

        let mut tx = self.graph.begin(self.mode)?;
        let result = self
            .shared
            .engine
            .execute(&prepared, &mut tx, params, deadline)
            .and_then(|cursor| cursor.buffer());
        let cursor = match result {
            Ok(cursor) => cursor,
            Err(e) => {
                abandon(&mut tx);
                return Err(e);
            }
        };

        let seq = match tx.commit() {
            Ok(seq) => seq,
            Err(e) => {
                abandon(&mut tx);
                return Err(e);
            }
        };
        let bookmark = Bookmark::new(self.database(), seq);
        debug!(%bookmark, stats = ?cursor.stats(), "Auto-commit query committed");
        self.state.record_bookmark(bookmark)?;
        Ok(cursor)
    }

    /// Begin an explicit transaction
    ///
    /// Fails if this session already has one open.
    pub fn begin_transaction(&mut self) -> Result<Transaction> {
        self.ensure_open()?;
        if self.state.open_transaction.swap(true, Ordering::SeqCst) {
            return Err(Error::Transaction(
                "nested transactions are not supported: this session already has an open transaction"
                    .to_string(),
            ));
        }

        let tx = self.await_bookmarks().and_then(|()| self.graph.begin(self.mode));
        match tx {
            Ok(tx) => {
                debug!(database = self.database(), tx = tx.id(), "Began explicit transaction");
                Ok(Transaction::new(
                    self.shared.clone(),
                    self.graph.clone(),
                    tx,
                    self.mode,
                    self.state.clone(),
                ))
            }
            Err(e) => {
                self.state.open_transaction.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Close the session
    ///
    /// An open explicit transaction is rolled back on its next use or
    /// when it is dropped; it can no longer commit.
    pub fn close(&mut self) {
        if self.state.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.state.open_transaction.load(Ordering::SeqCst) {
            debug!(database = self.database(), "Closing session with an open transaction");
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Transaction("session is closed".to_string()));
        }
        Ok(())
    }

    /// Wait until every bookmark for this database is visible
    ///
    /// A bookmark is dropped only once it has been reached, so a timeout
    /// leaves it and every later one in place for the next attempt.
    fn await_bookmarks(&mut self) -> Result<()> {
        let timeout = self.shared.config.bookmark_timeout();
        while let Some(bookmark) = self.pending_bookmarks.first() {
            if bookmark.database() == self.graph.name() {
                self.graph.backend().wait_for_seq(bookmark.seq(), timeout)?;
            } else {
                debug!(%bookmark, database = self.graph.name(), "Ignoring bookmark for another database");
            }
            self.pending_bookmarks.remove(0);
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("database", &self.graph.name())
            .field("mode", &self.mode)
            .field("state", &self.state)
            .finish()
    }
}

/// Parse and plan against the current schema, rejecting writes in READ mode
pub(crate) fn prepare(
    shared: &DriverShared,
    graph: &Graph,
    schema: &nodus_graph::Schema,
    query: &str,
    mode: AccessMode,
) -> Result<PreparedQuery> {
    let statistics = if shared.config.statistics {
        Some(graph.statistics()?)
    } else {
        None
    };
    let prepared = shared.engine.prepare(query, schema, statistics.as_ref())?;
    if mode == AccessMode::Read && prepared.is_updating() {
        return Err(Error::Transaction(
            "updating queries are not allowed in a READ session".to_string(),
        ));
    }
    Ok(prepared)
}

/// Roll back a transaction that failed, keeping the original error
pub(crate) fn abandon(tx: &mut GraphTransaction) {
    if tx.is_active() {
        if let Err(e) = tx.rollback() {
            warn!(tx = tx.id(), error = %e, "Rollback failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Driver, DriverConfig};

    fn driver() -> Driver {
        Driver::open(DriverConfig::for_testing()).unwrap()
    }

    fn no_params() -> HashMap<String, Value> {
        HashMap::new()
    }

    #[test]
    fn test_auto_commit_records_bookmark() {
        let driver = driver();
        let mut session = driver.session("s", AccessMode::Write, Vec::new()).unwrap();
        assert!(session.last_bookmark().is_none());

        let cursor = session.run("CREATE (:Person {name: 'Alice'})", no_params()).unwrap();
        assert_eq!(cursor.stats().nodes_created, 1);

        let bookmark = session.last_bookmark().unwrap();
        assert_eq!(bookmark.database(), "s");
        assert!(bookmark.seq() > 0);
    }

    #[test]
    fn test_error_rolls_back_implicit_transaction() {
        let driver = driver();
        let mut session = driver.session("s", AccessMode::Write, Vec::new()).unwrap();
        let err = session
            .run("CREATE (:Person {name: 'Bob'}) WITH 1 AS one RETURN one / 0", no_params())
            .unwrap_err();
        assert!(matches!(err, Error::QueryExecution(_)));

        let count = session
            .run("MATCH (p:Person) RETURN count(p) AS c", no_params())
            .unwrap()
            .single()
            .unwrap();
        assert_eq!(count.get("c"), Some(&Value::Integer(0)));
    }

    #[test]
    fn test_read_session_rejects_updates() {
        let driver = driver();
        let mut session = driver.session("s", AccessMode::Read, Vec::new()).unwrap();
        assert!(matches!(
            session.run("CREATE (:Person)", no_params()),
            Err(Error::Transaction(_))
        ));
        assert!(session.run("RETURN 1 AS one", no_params()).is_ok());
    }

    #[test]
    fn test_compile_errors_surface_from_run() {
        let driver = driver();
        let mut session = driver.session("s", AccessMode::Write, Vec::new()).unwrap();
        assert!(session.run("MATCH (n RETURN n", no_params()).unwrap_err().is_compile_time());
        assert!(session.last_bookmark().is_none());
    }

    #[test]
    fn test_nested_transaction_rejected() {
        let driver = driver();
        let mut session = driver.session("s", AccessMode::Write, Vec::new()).unwrap();
        let tx = session.begin_transaction().unwrap();
        assert!(matches!(session.begin_transaction(), Err(Error::Transaction(_))));
        assert!(matches!(
            session.run("RETURN 1 AS one", no_params()),
            Err(Error::Transaction(_))
        ));
        tx.rollback().unwrap();
        assert!(session.begin_transaction().is_ok());
    }

    #[test]
    fn test_closed_session() {
        let driver = driver();
        let mut session = driver.session("s", AccessMode::Write, Vec::new()).unwrap();
        session.close();
        assert!(session.is_closed());
        assert!(matches!(
            session.run("RETURN 1 AS one", no_params()),
            Err(Error::Transaction(_))
        ));
    }

    #[test]
    fn test_unreachable_bookmark_times_out() {
        let driver = driver();
        let bookmark = Bookmark::new("s", 1_000);
        let mut session = driver.session("s", AccessMode::Read, vec![bookmark]).unwrap();
        assert!(matches!(
            session.run("RETURN 1 AS one", no_params()),
            Err(Error::Bookmark(_))
        ));
    }

    #[test]
    fn test_timed_out_bookmark_is_kept() {
        let driver = driver();
        let mut writer = driver.session("s", AccessMode::Write, Vec::new()).unwrap();
        writer.run("CREATE (:Person)", no_params()).unwrap();
        let reached = writer.last_bookmark().unwrap();

        let bookmarks = vec![reached, Bookmark::new("s", 1_000)];
        let mut session = driver.session("s", AccessMode::Read, bookmarks).unwrap();
        for _ in 0..2 {
            assert!(matches!(
                session.run("RETURN 1 AS one", no_params()),
                Err(Error::Bookmark(_))
            ));
        }
        for _ in 0..2 {
            assert!(matches!(session.begin_transaction(), Err(Error::Bookmark(_))));
        }
    }

    #[test]
    fn test_bookmarks_are_awaited_before_planning() {
        let driver = driver();
        let bookmark = Bookmark::new("s", 1_000);
        let mut session = driver.session("s", AccessMode::Read, vec![bookmark]).unwrap();
        assert!(matches!(
            session.run("MATCH (n RETURN n", no_params()),
            Err(Error::Bookmark(_))
        ));
    }

    #[test]
    fn test_bookmark_for_other_database_is_ignored() {
        let driver = driver();
        let bookmark = Bookmark::new("elsewhere", 1_000);
        let mut session = driver.session("s", AccessMode::Read, vec![bookmark]).unwrap();
        assert!(session.run("RETURN 1 AS one", no_params()).is_ok());
    }
}
