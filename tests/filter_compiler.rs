//! Compiled filters evaluated against a fixture dataset

mod test_utils;

use serde_json::{json, Value};

use funcbase::ddl::{CreateTableSpec, FieldSpec, TableKind};
use funcbase::filter::{FilterNode, Predicate};
use funcbase::storage::Datum;

use test_utils::Harness;

/// (id, status, priority, a, b)
const ROWS: [(&str, &str, i64, i64, i64); 6] = [
    ("t1", "open", 0, 1, 0),
    ("t2", "open", 2, 0, 2),
    ("t3", "open", 5, 0, 0),
    ("t4", "closed", 3, 1, 2),
    ("t5", "closed", 1, 0, 0),
    ("t6", "pending", 4, 2, 3),
];

fn fixture() -> Harness {
    let h = Harness::in_memory();
    h.fb.create_table(
        &CreateTableSpec::new("tickets", TableKind::Plain)
            .field(FieldSpec::new("status", "text"))
            .field(FieldSpec::new("priority", "number"))
            .field(FieldSpec::new("a", "number"))
            .field(FieldSpec::new("b", "number")),
    )
    .unwrap();

    let tx = h.engine.begin_write().unwrap();
    for (id, status, priority, a, b) in ROWS {
        tx.execute(
            "INSERT INTO tickets (id, status, priority, a, b) VALUES (?1, ?2, ?3, ?4, ?5)",
            &[
                Datum::from(id),
                Datum::from(status),
                Datum::Int(priority),
                Datum::Int(a),
                Datum::Int(b),
            ],
        )
        .unwrap();
    }
    tx.commit().unwrap();
    h
}

fn select_ids(h: &Harness, predicate: &Predicate) -> Vec<String> {
    let tx = h.engine.begin_read().unwrap();
    let sql = format!("SELECT id FROM tickets WHERE {} ORDER BY id", predicate.sql);
    tx.query(&sql, &predicate.params)
        .unwrap()
        .iter()
        .filter_map(|r| r.get("id").and_then(|d| d.as_str()).map(String::from))
        .collect()
}

fn matching(h: &Harness, filter: Value) -> Vec<String> {
    select_ids(h, &FilterNode::from_json(&filter).unwrap().compile())
}

fn expected<F>(pred: F) -> Vec<String>
where
    F: Fn(&str, i64, i64, i64) -> bool,
{
    ROWS.iter()
        .filter(|(_, status, priority, a, b)| pred(status, *priority, *a, *b))
        .map(|(id, ..)| id.to_string())
        .collect()
}

#[test]
fn test_and_matches_both_conditions() {
    let h = fixture();
    assert_eq!(
        matching(&h, json!({"and": [{"status": "open"}, {"priority>": 1}]})),
        expected(|s, p, _, _| s == "open" && p > 1)
    );
}

#[test]
fn test_or_matches_either_condition() {
    let h = fixture();
    assert_eq!(
        matching(&h, json!({"or": [{"a": 1}, {"b": 2}]})),
        expected(|_, _, a, b| a == 1 || b == 2)
    );
}

#[test]
fn test_nested_and_suffix_operators() {
    let h = fixture();
    assert_eq!(
        matching(
            &h,
            json!({"and": [
                {"or": [{"status": "open"}, {"status": "pending"}]},
                {"priority>=": 2},
                {"priority<=": 4}
            ]})
        ),
        expected(|s, p, _, _| (s == "open" || s == "pending") && (2..=4).contains(&p))
    );
    assert_eq!(
        matching(&h, json!({"status!=": "open"})),
        expected(|s, _, _, _| s != "open")
    );
}

#[test]
fn test_empty_filter_matches_everything() {
    let h = fixture();
    assert_eq!(matching(&h, json!({})).len(), ROWS.len());
    assert_eq!(matching(&h, Value::Null).len(), ROWS.len());
}

#[test]
fn test_predicates_compose() {
    let h = fixture();
    let open = FilterNode::from_json(&json!({"status": "open"}))
        .unwrap()
        .compile();
    let urgent = FilterNode::from_json(&json!({"priority>": 2}))
        .unwrap()
        .compile();
    assert_eq!(
        select_ids(&h, &open.clone().and(urgent.clone())),
        expected(|s, p, _, _| s == "open" && p > 2)
    );
    assert_eq!(
        select_ids(&h, &open.or(urgent)),
        expected(|s, p, _, _| s == "open" || p > 2)
    );
}
