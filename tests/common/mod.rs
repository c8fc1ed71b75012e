#![allow(dead_code)]

use nodus::{AccessMode, Driver, DriverConfig, Session, Value};
use std::collections::HashMap;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn memory_driver() -> Driver {
    init_tracing();
    Driver::open(DriverConfig::for_testing()).unwrap()
}

pub fn write_session(driver: &Driver, database: &str) -> Session {
    driver.session(database, AccessMode::Write, Vec::new()).unwrap()
}

pub fn params(entries: &[(&str, Value)]) -> HashMap<String, Value> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Run a query and collect the values of its first column
pub fn column(session: &mut Session, query: &str) -> Vec<Value> {
    session
        .run(query, HashMap::new())
        .unwrap()
        .map(|record| record.unwrap().values()[0].clone())
        .collect()
}

/// Run a single-row, single-column query
pub fn scalar(session: &mut Session, query: &str) -> Value {
    let mut values = column(session, query);
    assert_eq!(values.len(), 1, "expected one row from {query}");
    values.remove(0)
}
