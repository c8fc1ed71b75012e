mod common;

use common::{params, write_session};
use nodus::{Driver, DriverConfig, Session, Value};
use proptest::prelude::*;
use std::collections::{BTreeSet, HashMap};

const NAMES: [&str; 3] = ["ann", "bob", "xena"];

#[derive(Debug, Clone)]
struct GraphSpec {
    people: Vec<(i64, usize)>,
    edges: Vec<(usize, usize)>,
}

fn graph_spec() -> impl Strategy<Value = GraphSpec> {
    (1usize..8).prop_flat_map(|n| {
        (
            prop::collection::vec((0i64..5, 0usize..NAMES.len()), n),
            prop::collection::vec((0..n, 0..n), 0..12),
        )
            .prop_map(|(people, edges)| GraphSpec { people, edges })
    })
}

fn load(driver: &Driver, spec: &GraphSpec) -> Session {
    let mut session = write_session(driver, "prop");
    for (id, (age, name)) in spec.people.iter().enumerate() {
        session
            .run(
                "CREATE (:P {id: $id, age: $age, name: $name})",
                params(&[
                    ("id", Value::Integer(id as i64)),
                    ("age", Value::Integer(*age)),
                    ("name", Value::from(NAMES[*name])),
                ]),
            )
            .unwrap();
    }
    for (a, b) in &spec.edges {
        session
            .run(
                "MATCH (a:P {id: $a}) MATCH (b:P {id: $b}) CREATE (a)-[:R]->(b)",
                params(&[
                    ("a", Value::Integer(*a as i64)),
                    ("b", Value::Integer(*b as i64)),
                ]),
            )
            .unwrap();
    }
    session
}

fn rows(session: &mut Session, query: &str, threshold: i64) -> Vec<Vec<Value>> {
    let mut rows: Vec<Vec<Value>> = session
        .run(query, params(&[("t", Value::Integer(threshold))]))
        .unwrap()
        .map(|record| record.unwrap().into_values())
        .collect();
    rows.sort_by(|x, y| {
        x.iter()
            .zip(y)
            .map(|(a, b)| a.sort_cmp(b))
            .find(|o| o.is_ne())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    rows
}

const QUERIES: [&str; 4] = [
    "MATCH (a:P)-[:R]->(b:P) WHERE a.age > $t AND b.name = 'bob' RETURN a.id, b.id",
    "MATCH (a:P) WHERE a.age <= $t OR a.name STARTS WITH 'x' RETURN a.id, a.age",
    "MATCH (a:P)-[:R*1..2]->(b) WHERE b.age = $t AND a.id <> b.id RETURN a.id, b.id",
    "MATCH (a:P {name: 'ann'}) OPTIONAL MATCH (a)-[:R]->(b) WHERE b.age >= $t RETURN a.id, b.id",
];

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_pushdown_preserves_results(spec in graph_spec(), threshold in 0i64..5) {
        common::init_tracing();
        let with = Driver::open(DriverConfig::for_testing().with_predicate_pushdown(true)).unwrap();
        let without = Driver::open(DriverConfig::for_testing().with_predicate_pushdown(false)).unwrap();
        let mut pushed = load(&with, &spec);
        let mut plain = load(&without, &spec);

        for query in QUERIES {
            prop_assert_eq!(
                rows(&mut pushed, query, threshold),
                rows(&mut plain, query, threshold),
                "{}", query
            );
        }
    }

    #[test]
    fn prop_merge_is_idempotent(tags in prop::collection::vec(0usize..NAMES.len(), 1..10)) {
        common::init_tracing();
        let driver = Driver::open(DriverConfig::for_testing()).unwrap();
        let mut session = write_session(&driver, "tags");
        let distinct: BTreeSet<usize> = tags.iter().copied().collect();

        for round in 0..2 {
            let mut created = 0;
            for tag in &tags {
                let stats = session
                    .run(
                        "MERGE (t:Tag {name: $name})",
                        params(&[("name", Value::from(NAMES[*tag]))]),
                    )
                    .unwrap()
                    .stats();
                created += stats.nodes_created;
            }
            let expected = if round == 0 { distinct.len() as u64 } else { 0 };
            prop_assert_eq!(created, expected);
        }

        let count = session
            .run("MATCH (t:Tag) RETURN count(t)", HashMap::new())
            .unwrap()
            .single()
            .unwrap();
        prop_assert_eq!(count.values(), [Value::Integer(distinct.len() as i64)]);
    }
}
