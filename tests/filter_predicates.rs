use std::sync::Arc;

use serde_json::{json, Value};

use insightdb::interface::QueryInterface;
use insightdb::record::Value as Field;
use insightdb::store::{PersistenceMode, RecordStore};

fn section(dept: &str, id: &str, avg: f64) -> Value {
    json!({
        "dept": dept,
        "id": id,
        "instructor": "smith",
        "title": "intro",
        "uuid": format!("{}-{}", dept, id),
        "avg": avg,
        "pass": 100.0,
        "fail": 5.0,
        "audit": 1.0,
        "year": 2015.0,
    })
}

fn setup(rows: Vec<Value>) -> QueryInterface {
    let store = RecordStore::new(PersistenceMode::InMemory).unwrap();
    let interface = QueryInterface::new(Arc::new(store));
    interface
        .add_dataset("sections", "sections", &Value::Array(rows))
        .unwrap();
    interface
}

fn uuids(rows: &[insightdb::record::Record]) -> Vec<String> {
    rows.iter()
        .map(|r| r.get("sections_uuid").and_then(Field::as_text).unwrap().to_owned())
        .collect()
}

#[test]
fn gt_is_strict() {
    let interface = setup(vec![
        section("cpsc", "110", 75.0),
        section("cpsc", "121", 75.1),
        section("math", "200", 74.9),
    ]);
    let rows = interface
        .run_query(&json!({
            "WHERE": { "GT": { "sections_avg": 75 } },
            "OPTIONS": { "COLUMNS": ["sections_uuid"] }
        }))
        .unwrap();
    assert_eq!(uuids(&rows), vec!["cpsc-121"], "only the strictly greater row");
}

#[test]
fn eq_is_exact() {
    let interface = setup(vec![
        section("cpsc", "110", 75.0),
        section("cpsc", "121", 75.0000001),
    ]);
    let rows = interface
        .run_query(&json!({
            "WHERE": { "EQ": { "sections_avg": 75 } },
            "OPTIONS": { "COLUMNS": ["sections_uuid"] }
        }))
        .unwrap();
    assert_eq!(uuids(&rows), vec!["cpsc-110"], "nearly equal is not equal");
}

#[test]
fn wildcard_positions() {
    let interface = setup(vec![
        section("law", "100", 60.0),
        section("flaw", "100", 60.0),
        section("lawn", "100", 60.0),
        section("claws", "100", 60.0),
        section("biol", "100", 60.0),
    ]);
    let run = |pattern: &str| {
        let rows = interface
            .run_query(&json!({
                "WHERE": { "IS": { "sections_dept": pattern } },
                "OPTIONS": { "COLUMNS": ["sections_dept"] }
            }))
            .unwrap();
        rows.iter()
            .map(|r| r.get("sections_dept").and_then(Field::as_text).unwrap().to_owned())
            .collect::<Vec<_>>()
    };
    assert_eq!(run("law"), vec!["law"], "exact match only");
    assert_eq!(run("law*"), vec!["law", "lawn"], "prefix match");
    assert_eq!(run("*law"), vec!["law", "flaw"], "suffix match");
    assert_eq!(run("*law*"), vec!["law", "flaw", "lawn", "claws"], "contains match");
}

#[test]
fn interior_wildcard_rejected() {
    let interface = setup(vec![section("cpsc", "110", 75.0)]);
    let err = interface
        .run_query(&json!({
            "WHERE": { "IS": { "sections_dept": "*la*w*" } },
            "OPTIONS": { "COLUMNS": ["sections_dept"] }
        }))
        .unwrap_err();
    assert!(err.to_string().contains("wildcard"), "interior asterisk is invalid: {}", err);
}

#[test]
fn and_intersects_or_unions() {
    let interface = setup(vec![
        section("cpsc", "110", 90.0),
        section("cpsc", "121", 60.0),
        section("math", "200", 95.0),
    ]);
    let rows = interface
        .run_query(&json!({
            "WHERE": { "AND": [
                { "IS": { "sections_dept": "cpsc" } },
                { "GT": { "sections_avg": 80 } }
            ] },
            "OPTIONS": { "COLUMNS": ["sections_uuid"] }
        }))
        .unwrap();
    assert_eq!(uuids(&rows), vec!["cpsc-110"], "intersection of both branches");

    let rows = interface
        .run_query(&json!({
            "WHERE": { "OR": [
                { "IS": { "sections_dept": "math" } },
                { "GT": { "sections_avg": 80 } }
            ] },
            "OPTIONS": { "COLUMNS": ["sections_uuid"] }
        }))
        .unwrap();
    assert_eq!(
        uuids(&rows),
        vec!["math-200", "cpsc-110"],
        "union in child concatenation order, duplicates dropped on first sight"
    );
}

#[test]
fn or_keeps_child_concatenation_order() {
    // the first child matches the later row, so an unordered OR must put
    // that row first
    let interface = setup(vec![
        section("cpsc", "110", 60.0),
        section("math", "200", 90.0),
    ]);
    let rows = interface
        .run_query(&json!({
            "WHERE": { "OR": [
                { "GT": { "sections_avg": 80 } },
                { "LT": { "sections_avg": 70 } }
            ] },
            "OPTIONS": { "COLUMNS": ["sections_uuid"] }
        }))
        .unwrap();
    assert_eq!(uuids(&rows), vec!["math-200", "cpsc-110"]);
}

#[test]
fn not_complements_within_dataset() {
    let interface = setup(vec![
        section("cpsc", "110", 90.0),
        section("cpsc", "121", 60.0),
        section("math", "200", 95.0),
    ]);
    let matched = interface
        .run_query(&json!({
            "WHERE": { "GT": { "sections_avg": 80 } },
            "OPTIONS": { "COLUMNS": ["sections_uuid"] }
        }))
        .unwrap();
    let complement = interface
        .run_query(&json!({
            "WHERE": { "NOT": { "GT": { "sections_avg": 80 } } },
            "OPTIONS": { "COLUMNS": ["sections_uuid"] }
        }))
        .unwrap();
    assert_eq!(matched.len() + complement.len(), 3, "filter and complement partition the dataset");
    assert_eq!(uuids(&complement), vec!["cpsc-121"]);
}

#[test]
fn empty_where_selects_everything() {
    let interface = setup(vec![
        section("cpsc", "110", 90.0),
        section("math", "200", 95.0),
    ]);
    let rows = interface
        .run_query(&json!({
            "WHERE": {},
            "OPTIONS": { "COLUMNS": ["sections_uuid"] }
        }))
        .unwrap();
    assert_eq!(rows.len(), 2, "no filter means the whole dataset");
}
