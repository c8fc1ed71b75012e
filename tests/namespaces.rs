mod common;

use common::{memory_driver, scalar, write_session};
use nodus::{Driver, DriverConfig, Error, NamespaceArchive, Value};
use std::collections::HashMap;

#[test]
fn test_databases_are_isolated() {
    let driver = memory_driver();
    let mut a = write_session(&driver, "a");
    let mut b = write_session(&driver, "b");
    a.run("CREATE (:Secret {value: 'only in a'})", HashMap::new())
        .unwrap();

    assert_eq!(
        scalar(&mut b, "MATCH (s:Secret) RETURN count(s)"),
        Value::Integer(0)
    );
    assert_eq!(
        scalar(&mut a, "MATCH (s:Secret) RETURN count(s)"),
        Value::Integer(1)
    );
    assert_eq!(driver.statistics("b").unwrap().node_count(), 0);
    assert_eq!(driver.databases().unwrap(), ["a", "b"]);
}

#[test]
fn test_export_and_import_with_rename() {
    let source = memory_driver();
    let mut session = write_session(&source, "prod");
    session
        .run(
            "CREATE (:City {name: 'Lima'})-[:ROAD {km: 12}]->(:City {name: 'Callao'})",
            HashMap::new(),
        )
        .unwrap();
    source.create_index("prod", "City", "name").unwrap();

    let bytes = source.export_database("prod").unwrap().to_bytes().unwrap();
    let archive = NamespaceArchive::from_bytes(&bytes).unwrap();

    let target = memory_driver();
    assert_eq!(
        target.import_database(&archive, Some("staging")).unwrap(),
        "staging"
    );
    let mut staging = write_session(&target, "staging");
    assert_eq!(
        scalar(
            &mut staging,
            "MATCH (:City {name: 'Lima'})-[r:ROAD]->(c) RETURN c.name + ':' + toString(r.km)"
        ),
        Value::from("Callao:12")
    );
    assert!(target.graph("staging").unwrap().schema().unwrap().has_index("City", "name"));

    assert!(matches!(
        target.import_database(&archive, Some("staging")),
        Err(Error::Namespace(_))
    ));
}

#[cfg(feature = "rocksdb")]
#[test]
fn test_rocksdb_persists_across_reopen() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = DriverConfig::for_testing().with_rocksdb(dir.path());

    {
        let driver = Driver::open(config.clone()).unwrap();
        let mut session = write_session(&driver, "durable");
        session
            .run("CREATE (:Note {text: 'kept'})", HashMap::new())
            .unwrap();
    }

    let driver = Driver::open(config).unwrap();
    assert_eq!(driver.databases().unwrap(), ["durable"]);
    let mut session = write_session(&driver, "durable");
    assert_eq!(
        scalar(&mut session, "MATCH (n:Note) RETURN n.text"),
        Value::from("kept")
    );
}

#[test]
fn test_driver_from_json_config() {
    common::init_tracing();
    let config = DriverConfig::from_json_str(
        r#"{"default_database": "main", "predicate_pushdown": false}"#,
    )
    .unwrap();
    let driver = Driver::open(config).unwrap();
    let mut session = driver.default_session(nodus::AccessMode::Write).unwrap();
    assert_eq!(session.database(), "main");
    assert_eq!(scalar(&mut session, "RETURN 1 + 1"), Value::Integer(2));
}
