//! The typed query form and the validator that produces it.
//!
//! A raw wire query is a JSON object with a `WHERE` filter section, an
//! `OPTIONS` section (`COLUMNS` plus optional `ORDER`) and an optional
//! `TRANSFORMATIONS` section (`GROUP` plus `APPLY`). Validation is a pure
//! function from the raw object to a well-typed [`Query`]; the first
//! violation found ends the check.

use serde_json::Value as Json;

use crate::error::{InsightError, Result};
use crate::record::{split_key, DatasetKind, FieldType};
use crate::store::RecordStore;

// ------------- Filter -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Gt,
    Eq,
}

impl CompareOp {
    /// `Lt`/`Gt` are strict; `Eq` is exact IEEE double equality, with no
    /// tolerance.
    pub fn matches(self, stored: f64, given: f64) -> bool {
        match self {
            Self::Lt => stored < given,
            Self::Gt => stored > given,
            Self::Eq => stored == given,
        }
    }
}

/// A string match pattern with at most a leading and/or trailing wildcard.
/// Interior wildcards are rejected during validation, never ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    Exact(String),
    Prefix(String),
    Suffix(String),
    Contains(String),
}

impl Pattern {
    pub fn parse(input: &str) -> Result<Self> {
        let pattern = if input.starts_with('*') && input.ends_with('*') && input.len() >= 2 {
            Self::Contains(wildcard_free(&input[1..input.len() - 1])?)
        } else if input.starts_with('*') {
            Self::Suffix(wildcard_free(&input[1..])?)
        } else if input.ends_with('*') {
            Self::Prefix(wildcard_free(&input[..input.len() - 1])?)
        } else {
            Self::Exact(wildcard_free(input)?)
        };
        Ok(pattern)
    }
    pub fn matches(&self, candidate: &str) -> bool {
        match self {
            Self::Exact(text) => candidate == text,
            Self::Prefix(text) => candidate.starts_with(text.as_str()),
            Self::Suffix(text) => candidate.ends_with(text.as_str()),
            Self::Contains(text) => candidate.contains(text.as_str()),
        }
    }
}

fn wildcard_free(text: &str) -> Result<String> {
    if text.contains('*') {
        return Err(invalid("a wildcard may only lead or trail a pattern"));
    }
    Ok(text.to_owned())
}

/// The filter predicate tree. `And`/`Or` hold at least one child by
/// construction; the empty-children case is a validation error.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Empty,
    Match { key: String, pattern: Pattern },
    Compare { key: String, op: CompareOp, value: f64 },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

// ------------- Transformation -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOp {
    Max,
    Min,
    Avg,
    Sum,
    Count,
}

impl ApplyOp {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "MAX" => Some(Self::Max),
            "MIN" => Some(Self::Min),
            "AVG" => Some(Self::Avg),
            "SUM" => Some(Self::Sum),
            "COUNT" => Some(Self::Count),
            _ => None,
        }
    }
}

/// A named aggregation over a group. `source` must be numeric for every
/// operation except `Count`, which merely tallies the group.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyRule {
    pub name: String,
    pub op: ApplyOp,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transformation {
    pub group: Vec<String>,
    pub apply: Vec<ApplyRule>,
}

// ------------- Order -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// Ordering: keys compared in listed sequence, the direction applied
/// uniformly across all of them.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub keys: Vec<String>,
    pub direction: Direction,
}

// ------------- Query -------------
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub dataset: String,
    pub kind: DatasetKind,
    pub filter: Filter,
    pub transformation: Option<Transformation>,
    pub columns: Vec<String>,
    pub order: Option<Order>,
}

impl Query {
    /// Statically checks a raw query and produces its typed form. The check
    /// is pure apart from consulting the store for dataset existence and
    /// kind; it stops at the first violation.
    pub fn parse(raw: &Json, store: &RecordStore) -> Result<Query> {
        let body = raw
            .as_object()
            .ok_or_else(|| invalid("query must be an object"))?;
        for key in body.keys() {
            if !matches!(key.as_str(), "WHERE" | "OPTIONS" | "TRANSFORMATIONS") {
                return Err(invalid(format!("unexpected query section '{}'", key)));
            }
        }
        let where_section = body
            .get("WHERE")
            .ok_or_else(|| invalid("query is missing WHERE"))?;
        let options_section = body
            .get("OPTIONS")
            .ok_or_else(|| invalid("query is missing OPTIONS"))?;

        let mut resolver = Resolver::new(store);
        let filter = parse_where(where_section, &mut resolver)?;
        let transformation = match body.get("TRANSFORMATIONS") {
            Some(section) => Some(parse_transformations(section, &mut resolver)?),
            None => None,
        };
        let (columns, order) = parse_options(options_section, transformation.as_ref(), &mut resolver)?;
        let (dataset, kind) = resolver
            .dataset
            .ok_or_else(|| invalid("query references no dataset"))?;
        Ok(Query {
            dataset,
            kind,
            filter,
            transformation,
            columns,
            order,
        })
    }
}

fn invalid(message: impl Into<String>) -> InsightError {
    InsightError::Validation(message.into())
}

// ------------- Resolver -------------
// Threads the resolved dataset id through validation explicitly, so every
// referenced key is checked against one consistent dataset and vocabulary.
struct Resolver<'a> {
    store: &'a RecordStore,
    dataset: Option<(String, DatasetKind)>,
}

impl<'a> Resolver<'a> {
    fn new(store: &'a RecordStore) -> Self {
        Self {
            store,
            dataset: None,
        }
    }
    fn resolve(&mut self, key: &str) -> Result<FieldType> {
        let (id, field) = split_key(key)
            .ok_or_else(|| invalid(format!("'{}' is not a valid key", key)))?;
        let kind = match &self.dataset {
            Some((resolved, kind)) => {
                if resolved != id {
                    return Err(invalid(format!(
                        "query references more than one dataset ('{}' and '{}')",
                        resolved, id
                    )));
                }
                *kind
            }
            None => {
                let kind = self
                    .store
                    .kind_of(id)?
                    .ok_or_else(|| invalid(format!("dataset '{}' does not exist", id)))?;
                self.dataset = Some((id.to_owned(), kind));
                kind
            }
        };
        kind.field_type(field)
            .ok_or_else(|| invalid(format!("'{}' is not a {} field", field, kind)))
    }
}

// ------------- Section parsers -------------
fn parse_where(raw: &Json, resolver: &mut Resolver) -> Result<Filter> {
    let body = raw
        .as_object()
        .ok_or_else(|| invalid("WHERE must be an object"))?;
    if body.is_empty() {
        // WHERE with no keys matches every record
        return Ok(Filter::Empty);
    }
    parse_filter(raw, resolver)
}

fn parse_filter(raw: &Json, resolver: &mut Resolver) -> Result<Filter> {
    let body = raw
        .as_object()
        .ok_or_else(|| invalid("a filter must be an object"))?;
    let (operator, operand) = match body.iter().next() {
        Some(entry) if body.len() == 1 => entry,
        Some(_) => return Err(invalid("a filter must have exactly one operator")),
        None => return Err(invalid("a filter must name an operator")),
    };
    match operator.as_str() {
        "IS" => {
            let (key, value) = single_entry(operand, "IS")?;
            if resolver.resolve(key)? != FieldType::Text {
                return Err(invalid(format!("IS requires a string field, got '{}'", key)));
            }
            let text = value
                .as_str()
                .ok_or_else(|| invalid(format!("IS on '{}' requires a string pattern", key)))?;
            Ok(Filter::Match {
                key: key.clone(),
                pattern: Pattern::parse(text)?,
            })
        }
        "LT" | "GT" | "EQ" => {
            let op = match operator.as_str() {
                "LT" => CompareOp::Lt,
                "GT" => CompareOp::Gt,
                _ => CompareOp::Eq,
            };
            let (key, value) = single_entry(operand, operator)?;
            if resolver.resolve(key)? != FieldType::Number {
                return Err(invalid(format!(
                    "{} requires a numeric field, got '{}'",
                    operator, key
                )));
            }
            let number = value
                .as_f64()
                .ok_or_else(|| invalid(format!("{} on '{}' requires a numeric value", operator, key)))?;
            Ok(Filter::Compare {
                key: key.clone(),
                op,
                value: number,
            })
        }
        "AND" | "OR" => {
            let children_raw = operand
                .as_array()
                .ok_or_else(|| invalid(format!("{} requires a list of filters", operator)))?;
            if children_raw.is_empty() {
                return Err(invalid(format!("{} requires at least one filter", operator)));
            }
            let children = children_raw
                .iter()
                .map(|child| parse_filter(child, resolver))
                .collect::<Result<Vec<_>>>()?;
            if operator == "AND" {
                Ok(Filter::And(children))
            } else {
                Ok(Filter::Or(children))
            }
        }
        "NOT" => Ok(Filter::Not(Box::new(parse_filter(operand, resolver)?))),
        other => Err(invalid(format!("'{}' is not a filter operator", other))),
    }
}

fn parse_transformations(raw: &Json, resolver: &mut Resolver) -> Result<Transformation> {
    let body = raw
        .as_object()
        .ok_or_else(|| invalid("TRANSFORMATIONS must be an object"))?;
    for key in body.keys() {
        if !matches!(key.as_str(), "GROUP" | "APPLY") {
            return Err(invalid(format!("unexpected TRANSFORMATIONS key '{}'", key)));
        }
    }
    let group_raw = body
        .get("GROUP")
        .ok_or_else(|| invalid("TRANSFORMATIONS is missing GROUP"))?
        .as_array()
        .ok_or_else(|| invalid("GROUP must be a list of keys"))?;
    if group_raw.is_empty() {
        return Err(invalid("GROUP requires at least one key"));
    }
    let mut group = Vec::with_capacity(group_raw.len());
    for key in group_raw {
        let key = key
            .as_str()
            .ok_or_else(|| invalid("GROUP keys must be strings"))?;
        resolver.resolve(key)?;
        group.push(key.to_owned());
    }
    let apply_raw = body
        .get("APPLY")
        .ok_or_else(|| invalid("TRANSFORMATIONS is missing APPLY"))?
        .as_array()
        .ok_or_else(|| invalid("APPLY must be a list of rules"))?;
    if apply_raw.is_empty() {
        return Err(invalid("APPLY requires at least one rule"));
    }
    let mut apply: Vec<ApplyRule> = Vec::with_capacity(apply_raw.len());
    for rule_raw in apply_raw {
        let (name, op_raw) = single_entry(rule_raw, "an APPLY rule")?;
        if name.is_empty() || name.contains('_') {
            return Err(invalid(format!("'{}' is not a valid apply name", name)));
        }
        if apply.iter().any(|rule| rule.name == *name) {
            return Err(invalid(format!("duplicate apply name '{}'", name)));
        }
        let (token, source_raw) = single_entry(op_raw, "an APPLY rule body")?;
        let op = ApplyOp::parse(token)
            .ok_or_else(|| invalid(format!("'{}' is not an apply token", token)))?;
        let source = source_raw
            .as_str()
            .ok_or_else(|| invalid(format!("{} requires a key to aggregate", token)))?;
        let field_type = resolver.resolve(source)?;
        if op != ApplyOp::Count && field_type != FieldType::Number {
            return Err(invalid(format!(
                "{} requires a numeric field, got '{}'",
                token, source
            )));
        }
        apply.push(ApplyRule {
            name: name.clone(),
            op,
            source: source.to_owned(),
        });
    }
    Ok(Transformation { group, apply })
}

fn parse_options(
    raw: &Json,
    transformation: Option<&Transformation>,
    resolver: &mut Resolver,
) -> Result<(Vec<String>, Option<Order>)> {
    let body = raw
        .as_object()
        .ok_or_else(|| invalid("OPTIONS must be an object"))?;
    for key in body.keys() {
        if !matches!(key.as_str(), "COLUMNS" | "ORDER") {
            return Err(invalid(format!("unexpected OPTIONS key '{}'", key)));
        }
    }
    let columns_raw = body
        .get("COLUMNS")
        .ok_or_else(|| invalid("OPTIONS is missing COLUMNS"))?
        .as_array()
        .ok_or_else(|| invalid("COLUMNS must be a list"))?;
    if columns_raw.is_empty() {
        return Err(invalid("COLUMNS must not be empty"));
    }
    let mut columns = Vec::with_capacity(columns_raw.len());
    for column in columns_raw {
        let column = column
            .as_str()
            .ok_or_else(|| invalid("COLUMNS entries must be strings"))?;
        match transformation {
            // With a transformation, columns may only name group keys or
            // apply outputs; raw fields outside the group-by are gone.
            Some(transformation) => {
                let known = transformation.group.iter().any(|key| key == column)
                    || transformation.apply.iter().any(|rule| rule.name == column);
                if !known {
                    return Err(invalid(format!(
                        "column '{}' is neither a group key nor an apply name",
                        column
                    )));
                }
            }
            None => {
                resolver.resolve(column)?;
            }
        }
        columns.push(column.to_owned());
    }
    let order = match body.get("ORDER") {
        Some(order_raw) => Some(parse_order(order_raw, &columns)?),
        None => None,
    };
    Ok((columns, order))
}

fn parse_order(raw: &Json, columns: &[String]) -> Result<Order> {
    match raw {
        Json::String(key) => {
            order_key_in_columns(key, columns)?;
            Ok(Order {
                keys: vec![key.clone()],
                direction: Direction::Up,
            })
        }
        Json::Object(body) => {
            for key in body.keys() {
                if !matches!(key.as_str(), "dir" | "keys") {
                    return Err(invalid(format!("unexpected ORDER key '{}'", key)));
                }
            }
            let direction = match body.get("dir").and_then(|dir| dir.as_str()) {
                Some("UP") => Direction::Up,
                Some("DOWN") => Direction::Down,
                _ => return Err(invalid("ORDER dir must be UP or DOWN")),
            };
            let keys_raw = body
                .get("keys")
                .and_then(|keys| keys.as_array())
                .ok_or_else(|| invalid("ORDER keys must be a list"))?;
            if keys_raw.is_empty() {
                return Err(invalid("ORDER keys must not be empty"));
            }
            let mut keys = Vec::with_capacity(keys_raw.len());
            for key in keys_raw {
                let key = key
                    .as_str()
                    .ok_or_else(|| invalid("ORDER keys must be strings"))?;
                order_key_in_columns(key, columns)?;
                keys.push(key.to_owned());
            }
            Ok(Order { keys, direction })
        }
        _ => Err(invalid("ORDER must be a key or a dir/keys object")),
    }
}

fn order_key_in_columns(key: &str, columns: &[String]) -> Result<()> {
    if columns.iter().any(|column| column == key) {
        Ok(())
    } else {
        Err(invalid(format!("ORDER key '{}' is not in COLUMNS", key)))
    }
}

fn single_entry<'j>(raw: &'j Json, what: &str) -> Result<(&'j String, &'j Json)> {
    let body = raw
        .as_object()
        .ok_or_else(|| invalid(format!("{} must be an object", what)))?;
    match body.iter().next() {
        Some(entry) if body.len() == 1 => Ok(entry),
        _ => Err(invalid(format!("{} must have exactly one key", what))),
    }
}
