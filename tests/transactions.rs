mod common;

use common::{memory_driver, scalar, write_session};
use nodus::{AccessMode, Bookmark, Error, Value};
use std::collections::HashMap;
use std::thread;
use std::time::Duration;

#[test]
fn test_concurrent_writers_conflict() {
    let driver = memory_driver();
    let mut setup = write_session(&driver, "bank");
    setup
        .run("CREATE (:Account {id: 1, balance: 100})", HashMap::new())
        .unwrap();

    let mut first_session = write_session(&driver, "bank");
    let mut second_session = write_session(&driver, "bank");
    let mut first = first_session.begin_transaction().unwrap();
    let mut second = second_session.begin_transaction().unwrap();

    let update = "MATCH (a:Account {id: 1}) SET a.balance = a.balance + $delta";
    for (tx, delta) in [(&mut first, 10), (&mut second, -20)] {
        tx.run(update, common::params(&[("delta", Value::Integer(delta))]))
            .unwrap()
            .buffer()
            .unwrap();
    }

    first.commit().unwrap();
    let err = second.commit().unwrap_err();
    assert!(matches!(err, Error::Conflict { .. }));
    assert!(err.is_retryable());

    assert_eq!(
        scalar(&mut setup, "MATCH (a:Account {id: 1}) RETURN a.balance"),
        Value::Integer(110)
    );
}

#[test]
fn test_disjoint_writers_both_commit() {
    let driver = memory_driver();
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let driver = driver.clone();
            thread::spawn(move || {
                let mut session = write_session(&driver, "parallel");
                session
                    .run(
                        "CREATE (:Worker {id: $id})",
                        common::params(&[("id", Value::Integer(i))]),
                    )
                    .map(|cursor| cursor.stats().nodes_created)
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap().unwrap(), 1);
    }
    let mut session = write_session(&driver, "parallel");
    assert_eq!(
        scalar(&mut session, "MATCH (w:Worker) RETURN count(w)"),
        Value::Integer(4)
    );
}

#[test]
fn test_bookmarks_chain_sessions() {
    let driver = memory_driver();
    let mut writer = write_session(&driver, "causal");
    writer.run("CREATE (:Event {n: 1})", HashMap::new()).unwrap();
    let token = writer.last_bookmark().unwrap().to_string();

    let bookmark: Bookmark = token.parse().unwrap();
    let mut reader = driver
        .session("causal", AccessMode::Read, vec![bookmark])
        .unwrap();
    assert_eq!(
        scalar(&mut reader, "MATCH (e:Event) RETURN count(e)"),
        Value::Integer(1)
    );
}

#[test]
fn test_bookmark_from_the_future_times_out() {
    let driver = memory_driver();
    let mut reader = driver
        .session("causal", AccessMode::Read, vec![Bookmark::new("causal", 99)])
        .unwrap();
    assert!(matches!(
        reader.run("RETURN 1", HashMap::new()),
        Err(Error::Bookmark(_))
    ));
}

#[test]
fn test_explicit_transaction_lifecycle() {
    let driver = memory_driver();
    let mut session = write_session(&driver, "explicit");
    let mut tx = session.begin_transaction().unwrap();
    assert!(matches!(
        session.begin_transaction(),
        Err(Error::Transaction(_))
    ));

    tx.run("CREATE (:Draft)", HashMap::new())
        .unwrap()
        .buffer()
        .unwrap();
    let bookmark = tx.commit().unwrap();
    assert_eq!(bookmark.database(), "explicit");
    assert_eq!(session.last_bookmark(), Some(bookmark));

    let mut tx = session.begin_transaction().unwrap();
    tx.run("MATCH (d:Draft) DELETE d", HashMap::new())
        .unwrap()
        .buffer()
        .unwrap();
    tx.rollback().unwrap();
    assert_eq!(
        scalar(&mut session, "MATCH (d:Draft) RETURN count(d)"),
        Value::Integer(1)
    );
}

#[test]
fn test_read_session_rejects_writes() {
    let driver = memory_driver();
    let mut session = driver.session("ro", AccessMode::Read, Vec::new()).unwrap();
    assert!(matches!(
        session.run("CREATE (:Nope)", HashMap::new()),
        Err(Error::Transaction(_))
    ));

    let mut tx = session.begin_transaction().unwrap();
    assert!(matches!(
        tx.run("MERGE (:Nope)", HashMap::new()),
        Err(Error::Transaction(_))
    ));
}

#[test]
fn test_deadline_discards_writes() {
    let driver = memory_driver();
    let mut session = write_session(&driver, "slow");
    let err = session
        .run_with_timeout(
            "UNWIND [1, 2, 3] AS i CREATE (:Tick {i: i})",
            HashMap::new(),
            Duration::ZERO,
        )
        .unwrap_err();
    assert!(matches!(err, Error::DeadlineExceeded));
    assert_eq!(
        scalar(&mut session, "MATCH (t:Tick) RETURN count(t)"),
        Value::Integer(0)
    );
}

#[test]
fn test_dropping_session_discards_open_transaction() {
    let driver = memory_driver();
    {
        let mut session = write_session(&driver, "dropped");
        let mut tx = session.begin_transaction().unwrap();
        tx.run("CREATE (:Ghost)", HashMap::new())
            .unwrap()
            .buffer()
            .unwrap();
        drop(session);
        assert!(tx.commit().is_err());
    }

    let mut session = write_session(&driver, "dropped");
    assert_eq!(
        scalar(&mut session, "MATCH (g:Ghost) RETURN count(g)"),
        Value::Integer(0)
    );
}
