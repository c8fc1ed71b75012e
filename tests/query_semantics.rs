mod common;

use common::{column, memory_driver, params, scalar, write_session};
use nodus::{AccessMode, ConstraintType, Error, Value};
use std::collections::HashMap;

#[test]
fn test_create_then_match_by_property() {
    let driver = memory_driver();
    let mut session = write_session(&driver, "people");
    session
        .run("CREATE (p:Person {name: \"Alice\", age: 30})", HashMap::new())
        .unwrap();

    let age = scalar(&mut session, "MATCH (p:Person {name: \"Alice\"}) RETURN p.age");
    assert_eq!(age, Value::Integer(30));
}

#[test]
fn test_variable_length_expansion() {
    let driver = memory_driver();
    let mut session = write_session(&driver, "paths");
    session
        .run(
            "CREATE (a:P {name: 'A'})-[:KNOWS]->(b:P {name: 'B'})-[:KNOWS]->(c:P {name: 'C'})",
            HashMap::new(),
        )
        .unwrap();

    let mut names = column(
        &mut session,
        "MATCH (a:P {name: 'A'})-[:KNOWS*1..2]->(b) RETURN b.name",
    );
    names.sort_by(|x, y| x.sort_cmp(y));
    assert_eq!(names, vec![Value::from("B"), Value::from("C")]);
}

#[test]
fn test_math_functions() {
    let driver = memory_driver();
    let mut session = write_session(&driver, "math");
    let record = session
        .run("RETURN abs(-5), sqrt(16), round(3.14159, 2)", HashMap::new())
        .unwrap()
        .single()
        .unwrap();
    assert_eq!(
        record.values(),
        [Value::Integer(5), Value::Float(4.0), Value::Float(3.14)]
    );
}

#[test]
fn test_merge_is_idempotent() {
    let driver = memory_driver();
    let mut session = write_session(&driver, "merge");
    let query = "MERGE (a:City {name: 'Oslo'})-[:IN]->(c:Country {name: 'Norway'})";

    let first = session.run(query, HashMap::new()).unwrap().stats();
    assert_eq!(first.nodes_created, 2);
    assert_eq!(first.relationships_created, 1);

    let second = session.run(query, HashMap::new()).unwrap().stats();
    assert!(!second.contains_updates());
    assert_eq!(scalar(&mut session, "MATCH (n) RETURN count(*)"), Value::Integer(2));
}

#[test]
fn test_merge_on_create_and_on_match() {
    let driver = memory_driver();
    let mut session = write_session(&driver, "merge");
    let query = "MERGE (u:User {id: $id}) \
                 ON CREATE SET u.visits = 1 \
                 ON MATCH SET u.visits = u.visits + 1 \
                 RETURN u.visits";

    for expected in 1..=3 {
        let visits = session
            .run(query, params(&[("id", Value::Integer(7))]))
            .unwrap()
            .single()
            .unwrap();
        assert_eq!(visits.values(), [Value::Integer(expected)]);
    }
}

#[test]
fn test_unique_constraint_rolls_back_whole_transaction() {
    let driver = memory_driver();
    driver
        .add_constraint("users", "Person", "email", ConstraintType::Unique)
        .unwrap();
    let mut session = write_session(&driver, "users");
    session
        .run("CREATE (:Person {email: 'a@example.com'})", HashMap::new())
        .unwrap();

    let err = session
        .run(
            "CREATE (:Person {email: 'a@example.com'}), (:Audit {note: 'dup'})",
            HashMap::new(),
        )
        .unwrap_err();
    assert!(err.is_constraint_violation());
    assert_eq!(
        scalar(&mut session, "MATCH (a:Audit) RETURN count(a)"),
        Value::Integer(0)
    );
    assert_eq!(
        scalar(&mut session, "MATCH (p:Person) RETURN count(p)"),
        Value::Integer(1)
    );
}

#[test]
fn test_existence_constraint() {
    let driver = memory_driver();
    driver
        .add_constraint("users", "Person", "name", ConstraintType::Exists)
        .unwrap();
    let mut session = write_session(&driver, "users");
    assert!(matches!(
        session.run("CREATE (:Person {age: 3})", HashMap::new()),
        Err(Error::ConstraintViolation(_))
    ));
    assert!(session.run("CREATE (:Person {name: 'x'})", HashMap::new()).is_ok());
}

#[test]
fn test_optional_match_and_aggregation() {
    let driver = memory_driver();
    let mut session = write_session(&driver, "social");
    session
        .run(
            "CREATE (a:Person {name: 'Ann'})-[:FOLLOWS]->(:Person {name: 'Bo'}), \
             (a)-[:FOLLOWS]->(:Person {name: 'Cy'}), (:Person {name: 'Di'})",
            HashMap::new(),
        )
        .unwrap();

    let rows: Vec<(Value, Value)> = session
        .run(
            "MATCH (p:Person) OPTIONAL MATCH (p)-[:FOLLOWS]->(f) \
             RETURN p.name AS name, count(f) AS follows ORDER BY name",
            HashMap::new(),
        )
        .unwrap()
        .map(|r| {
            let r = r.unwrap();
            (r.get("name").cloned().unwrap(), r.get("follows").cloned().unwrap())
        })
        .collect();
    assert_eq!(
        rows,
        vec![
            (Value::from("Ann"), Value::Integer(2)),
            (Value::from("Bo"), Value::Integer(0)),
            (Value::from("Cy"), Value::Integer(0)),
            (Value::from("Di"), Value::Integer(0)),
        ]
    );
}

#[test]
fn test_index_seek_returns_same_rows_as_scan() {
    let driver = memory_driver();
    let mut session = write_session(&driver, "indexed");
    session
        .run(
            "UNWIND [11, 12, 13, 14, 15, 16] AS i CREATE (:Item {sku: i, even: i % 2 = 0})",
            HashMap::new(),
        )
        .unwrap();
    let before = column(&mut session, "MATCH (i:Item {sku: 14}) RETURN i.even");

    assert!(driver.create_index("indexed", "Item", "sku").unwrap());
    let after = column(&mut session, "MATCH (i:Item {sku: 14}) RETURN i.even");
    assert_eq!(before, after);
    assert_eq!(after, vec![Value::Boolean(true)]);
}

#[test]
fn test_delete_requires_detach() {
    let driver = memory_driver();
    let mut session = write_session(&driver, "deletes");
    session
        .run("CREATE (:Hub)-[:SPOKE]->(:Leaf)", HashMap::new())
        .unwrap();

    assert!(matches!(
        session.run("MATCH (h:Hub) DELETE h", HashMap::new()),
        Err(Error::ConstraintViolation(_))
    ));
    let stats = session
        .run("MATCH (h:Hub) DETACH DELETE h", HashMap::new())
        .unwrap()
        .stats();
    assert_eq!(stats.nodes_deleted, 1);
    assert_eq!(stats.relationships_deleted, 1);
}

#[test]
fn test_compile_errors_are_typed() {
    let driver = memory_driver();
    let mut session = driver
        .session("errors", AccessMode::Read, Vec::new())
        .unwrap();

    let syntax = session.run("MATCH (n) RETURN n.name ~ 1", HashMap::new()).unwrap_err();
    assert!(matches!(syntax, Error::Syntax { .. }));

    let planning = session.run("RETURN nosuchfn(1)", HashMap::new()).unwrap_err();
    assert!(matches!(planning, Error::Planning(_)));

    let type_error = session.run("RETURN sqrt('four')", HashMap::new()).unwrap_err();
    assert!(matches!(type_error, Error::Type { .. }));
}

#[test]
fn test_temporal_overflow_fails_the_query() {
    let driver = memory_driver();
    let mut session = write_session(&driver, "temporal");
    for query in [
        "RETURN duration({years: 9223372036854775807})",
        "RETURN datetime({year: 2020, hour: 9223372036854775807})",
        "RETURN duration('P999999999999999999Y')",
        "RETURN duration({seconds: 9223372036854775807}).milliseconds",
        "RETURN date('2020-01-01') + duration({days: 9223372036854775807})",
    ] {
        let err = session.run(query, HashMap::new()).unwrap_err();
        assert!(
            matches!(err, Error::Type { .. } | Error::QueryExecution(_)),
            "{query}: {err:?}"
        );
    }
    assert_eq!(
        scalar(&mut session, "RETURN duration({seconds: 2}).milliseconds"),
        Value::Integer(2000)
    );
}

#[test]
fn test_deeply_nested_query_is_rejected() {
    let driver = memory_driver();
    let mut session = write_session(&driver, "nesting");
    let deep = format!("RETURN {}1{} AS x", "(".repeat(10_000), ")".repeat(10_000));
    assert!(matches!(
        session.run(&deep, HashMap::new()),
        Err(Error::Parse { .. })
    ));

    let nested = format!("RETURN {}1{} AS x", "(".repeat(20), ")".repeat(20));
    assert_eq!(scalar(&mut session, &nested), Value::Integer(1));
}

#[test]
fn test_round_half_up_on_negative_ties() {
    let driver = memory_driver();
    let mut session = write_session(&driver, "math");
    assert_eq!(scalar(&mut session, "RETURN round(-2.5)"), Value::Float(-2.0));
    assert_eq!(scalar(&mut session, "RETURN round(2.5)"), Value::Float(3.0));
}
