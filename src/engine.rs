//! The query evaluation pipeline: filter → (optional) transformation →
//! output. Each stage is a pure function over the snapshot taken at the
//! start of the call.

use std::cmp::Ordering;
use std::collections::HashMap;

use bigdecimal::{BigDecimal, ToPrimitive};
use roaring::RoaringTreemap;
use tracing::debug;

use crate::error::{InsightError, Result};
use crate::query::{ApplyOp, ApplyRule, Direction, Filter, Order, Query, Transformation};
use crate::record::{FieldHasher, Record, Value};
use crate::store::RecordStore;

/// The most rows a query may return.
pub const MAX_RESULT_ROWS: usize = 5000;

pub struct Engine<'en> {
    store: &'en RecordStore,
}

impl<'en> Engine<'en> {
    pub fn new(store: &'en RecordStore) -> Self {
        Self { store }
    }

    /// Validates and runs one raw query against the store, returning the
    /// final projected and ordered rows.
    pub fn execute(&self, raw: &serde_json::Value) -> Result<Vec<Record>> {
        let query = Query::parse(raw, self.store)?;
        let dataset = self
            .store
            .snapshot(&query.dataset)?
            .ok_or_else(|| InsightError::Validation(format!("dataset '{}' does not exist", query.dataset)))?;
        let rows = &dataset.records;
        let universe: Vec<u64> = (0..rows.len() as u64).collect();
        let matched = evaluate(&query.filter, rows, &universe);
        debug!(dataset = %query.dataset, input = rows.len(), matched = matched.len(), "filter evaluated");
        let working = match &query.transformation {
            Some(transformation) => transform(transformation, rows, &matched),
            None => matched.iter().map(|&row| rows[row as usize].clone()).collect(),
        };
        output(working, &query.columns, query.order.as_ref())
    }
}

// ------------- Filter evaluation -------------
// Result sequences are row indexes into the one snapshot slice, so record
// identity across sibling filters is the index itself. Sequence order is
// significant: leaves and And/Not keep their input's order, Or emits child
// results in concatenation order with first-seen de-duplication.
fn evaluate(filter: &Filter, rows: &[Record], input: &[u64]) -> Vec<u64> {
    match filter {
        Filter::Empty => input.to_vec(),
        Filter::Match { key, pattern } => input
            .iter()
            .copied()
            .filter(|&row| {
                rows[row as usize]
                    .get(key)
                    .and_then(Value::as_text)
                    .is_some_and(|text| pattern.matches(text))
            })
            .collect(),
        Filter::Compare { key, op, value } => input
            .iter()
            .copied()
            .filter(|&row| {
                rows[row as usize]
                    .get(key)
                    .and_then(Value::as_number)
                    .is_some_and(|stored| op.matches(stored, *value))
            })
            .collect(),
        Filter::And(children) => {
            // every child sees the same input; keep the input rows present
            // in each child's result, in input order
            let memberships: Vec<RoaringTreemap> = children
                .iter()
                .map(|child| evaluate(child, rows, input).into_iter().collect())
                .collect();
            input
                .iter()
                .copied()
                .filter(|row| memberships.iter().all(|members| members.contains(*row)))
                .collect()
        }
        Filter::Or(children) => {
            let mut seen = RoaringTreemap::new();
            let mut matched = Vec::new();
            for child in children {
                for row in evaluate(child, rows, input) {
                    if seen.insert(row) {
                        matched.push(row);
                    }
                }
            }
            matched
        }
        Filter::Not(child) => {
            let excluded: RoaringTreemap = evaluate(child, rows, input).into_iter().collect();
            input
                .iter()
                .copied()
                .filter(|row| !excluded.contains(*row))
                .collect()
        }
    }
}

// ------------- Transformation -------------
// Groups live in an arena indexed by first-encountered order, so group
// order never depends on map iteration order.
fn transform(transformation: &Transformation, rows: &[Record], matched: &[u64]) -> Vec<Record> {
    let mut buckets: Vec<Vec<u64>> = Vec::new();
    let mut index: HashMap<Vec<Option<Value>>, usize, FieldHasher> = HashMap::default();
    for &row in matched {
        let record = &rows[row as usize];
        let key: Vec<Option<Value>> = transformation
            .group
            .iter()
            .map(|group_key| record.get(group_key).cloned())
            .collect();
        match index.get(&key) {
            Some(bucket) => buckets[*bucket].push(row),
            None => {
                index.insert(key, buckets.len());
                buckets.push(vec![row]);
            }
        }
    }
    buckets
        .iter()
        .map(|bucket| {
            // one fresh representative per group: its key values plus every
            // apply output; input records stay untouched
            let mut representative = Record::new();
            let first = &rows[bucket[0] as usize];
            for group_key in &transformation.group {
                if let Some(value) = first.get(group_key) {
                    representative.insert(group_key.clone(), value.clone());
                }
            }
            for rule in &transformation.apply {
                representative.insert(rule.name.clone(), aggregate(rule, rows, bucket));
            }
            representative
        })
        .collect()
}

fn aggregate(rule: &ApplyRule, rows: &[Record], bucket: &[u64]) -> Value {
    let value = match rule.op {
        // duplicates count individually
        ApplyOp::Count => bucket.len() as f64,
        ApplyOp::Max => source_numbers(rule, rows, bucket)
            .into_iter()
            .reduce(f64::max)
            .unwrap_or(0.0),
        ApplyOp::Min => source_numbers(rule, rows, bucket)
            .into_iter()
            .reduce(f64::min)
            .unwrap_or(0.0),
        ApplyOp::Sum => round_to_cents(source_numbers(rule, rows, bucket).into_iter().sum()),
        ApplyOp::Avg => {
            // the sum is taken in decimal so repeated binary fractions
            // cannot drift before the final division
            let numbers = source_numbers(rule, rows, bucket);
            let mut total = BigDecimal::from(0);
            for number in &numbers {
                if let Ok(decimal) = BigDecimal::try_from(*number) {
                    total += decimal;
                }
            }
            if bucket.is_empty() {
                0.0
            } else {
                round_to_cents(total.to_f64().unwrap_or(0.0) / bucket.len() as f64)
            }
        }
    };
    Value::Number(value)
}

fn source_numbers(rule: &ApplyRule, rows: &[Record], bucket: &[u64]) -> Vec<f64> {
    bucket
        .iter()
        .filter_map(|row| rows[*row as usize].get(&rule.source).and_then(Value::as_number))
        .collect()
}

// round half away from zero to 2 decimal places
fn round_to_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ------------- Output -------------
fn output(rows: Vec<Record>, columns: &[String], order: Option<&Order>) -> Result<Vec<Record>> {
    // the guard applies to the post-filter/post-transform set, before
    // projection ever runs
    if rows.len() > MAX_RESULT_ROWS {
        return Err(InsightError::TooLarge(rows.len()));
    }
    let mut projected: Vec<Record> = rows.iter().map(|row| row.project(columns)).collect();
    if let Some(order) = order {
        // stable sort: ties after the last key preserve input order
        projected.sort_by(|a, b| {
            for key in &order.keys {
                let ordering = compare_values(a.get(key), b.get(key));
                if ordering != Ordering::Equal {
                    return match order.direction {
                        Direction::Up => ordering,
                        Direction::Down => ordering.reverse(),
                    };
                }
            }
            Ordering::Equal
        });
    }
    Ok(projected)
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Text(a)), Some(Value::Text(b))) => a.cmp(b),
        (Some(Value::Number(a)), Some(Value::Number(b))) => a.total_cmp(b),
        (Some(Value::Text(_)), Some(Value::Number(_))) => Ordering::Less,
        (Some(Value::Number(_)), Some(Value::Text(_))) => Ordering::Greater,
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
    }
}
