// used to print out readable forms of values and kinds
use std::fmt;
// used to indicate that values need to be hashable (group keys)
use std::hash::{BuildHasherDefault, Hash, Hasher};

use std::collections::HashMap;

use seahash::SeaHasher;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// we will use a fast hashing algo for the maps that make up records and group indexes
pub type FieldHasher = BuildHasherDefault<SeaHasher>;

// ------------- DatasetKind -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    Sections,
    Rooms,
}

const SECTIONS_STRING_FIELDS: &[&str] = &["dept", "id", "instructor", "title", "uuid"];
const SECTIONS_NUMERIC_FIELDS: &[&str] = &["avg", "pass", "fail", "audit", "year"];
const ROOMS_STRING_FIELDS: &[&str] = &[
    "fullname",
    "shortname",
    "number",
    "name",
    "address",
    "type",
    "furniture",
    "href",
];
const ROOMS_NUMERIC_FIELDS: &[&str] = &["lat", "lon", "seats"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Number,
}

impl DatasetKind {
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "sections" => Some(Self::Sections),
            "rooms" => Some(Self::Rooms),
            _ => None,
        }
    }
    pub fn string_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Sections => SECTIONS_STRING_FIELDS,
            Self::Rooms => ROOMS_STRING_FIELDS,
        }
    }
    pub fn numeric_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Sections => SECTIONS_NUMERIC_FIELDS,
            Self::Rooms => ROOMS_NUMERIC_FIELDS,
        }
    }
    // The vocabulary contains no underscores, so a composite key with more
    // than one underscore-delimited segment never resolves to a field.
    pub fn field_type(&self, field: &str) -> Option<FieldType> {
        if self.string_fields().contains(&field) {
            Some(FieldType::Text)
        } else if self.numeric_fields().contains(&field) {
            Some(FieldType::Number)
        } else {
            None
        }
    }
}
impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Sections => write!(f, "sections"),
            Self::Rooms => write!(f, "rooms"),
        }
    }
}

/// Decomposes a composite key (`"<datasetId>_<field>"`) at its first underscore.
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    let (id, field) = key.split_once('_')?;
    if id.is_empty() || field.is_empty() {
        return None;
    }
    Some((id, field))
}

// ------------- Value -------------
/// A stored scalar: either text or an IEEE double. Equality and hashing on
/// numbers are bit-exact so values can serve as group bucket keys.
#[derive(Debug, Clone)]
pub enum Value {
    Text(String),
    Number(f64),
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Number(_) => None,
        }
    }
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Text(_) => None,
            Self::Number(number) => Some(*number),
        }
    }
    /// Converts a raw JSON scalar into a stored value of the expected field
    /// type. Numbers are acceptable for text fields (identifiers often arrive
    /// as bare numbers) but text never passes for a numeric field.
    pub fn from_json(raw: &serde_json::Value, field_type: FieldType) -> Option<Self> {
        match field_type {
            FieldType::Text => match raw {
                serde_json::Value::String(text) => Some(Self::Text(text.clone())),
                serde_json::Value::Number(number) => Some(Self::Text(render_number(number.as_f64()?))),
                _ => None,
            },
            FieldType::Number => raw.as_f64().map(Self::Number),
        }
    }
}

fn render_number(number: f64) -> String {
    if number.fract() == 0.0 && number.abs() < i64::MAX as f64 {
        format!("{}", number as i64)
    } else {
        format!("{}", number)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}
impl Eq for Value {}
impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Text(text) => {
                0u8.hash(state);
                text.hash(state);
            }
            Self::Number(number) => {
                1u8.hash(state);
                number.to_bits().hash(state);
            }
        }
    }
}
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Text(text) => write!(f, "{}", text),
            Self::Number(number) => write!(f, "{}", render_number(*number)),
        }
    }
}

// Whole numbers round-trip as JSON integers so stored documents and query
// results read the way the datasets were submitted.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Text(text) => serializer.serialize_str(text),
            Self::Number(number) => {
                if number.fract() == 0.0 && number.abs() < i64::MAX as f64 {
                    serializer.serialize_i64(*number as i64)
                } else {
                    serializer.serialize_f64(*number)
                }
            }
        }
    }
}
impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ValueVisitor;
        impl<'de> Visitor<'de> for ValueVisitor {
            type Value = Value;
            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a string or a number")
            }
            fn visit_str<E: de::Error>(self, text: &str) -> Result<Value, E> {
                Ok(Value::Text(text.to_owned()))
            }
            fn visit_string<E: de::Error>(self, text: String) -> Result<Value, E> {
                Ok(Value::Text(text))
            }
            fn visit_i64<E: de::Error>(self, number: i64) -> Result<Value, E> {
                Ok(Value::Number(number as f64))
            }
            fn visit_u64<E: de::Error>(self, number: u64) -> Result<Value, E> {
                Ok(Value::Number(number as f64))
            }
            fn visit_f64<E: de::Error>(self, number: f64) -> Result<Value, E> {
                Ok(Value::Number(number))
            }
        }
        deserializer.deserialize_any(ValueVisitor)
    }
}

// ------------- Record -------------
/// An immutable mapping from composite key to scalar value. All records of
/// one dataset share the same dataset id prefix and field set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: HashMap<String, Value, FieldHasher>,
}

impl Record {
    pub fn new() -> Self {
        Self {
            fields: HashMap::default(),
        }
    }
    pub fn insert(&mut self, key: String, value: Value) {
        self.fields.insert(key, value);
    }
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
    pub fn len(&self) -> usize {
        self.fields.len()
    }
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }
    /// Keeps only the requested columns. A column absent from the record is
    /// omitted from the projection rather than treated as an error.
    pub fn project(&self, columns: &[String]) -> Record {
        let mut projected = Record::new();
        for column in columns {
            if let Some(value) = self.fields.get(column) {
                projected.insert(column.clone(), value.clone());
            }
        }
        projected
    }
    /// Builds a composite-keyed record from a flat row keyed by plain field
    /// names. Returns `None` when any field of the kind's vocabulary is
    /// missing or carries a value of the wrong type; such rows are skipped
    /// during dataset addition.
    pub fn from_flat_row(
        id: &str,
        kind: DatasetKind,
        row: &serde_json::Map<String, serde_json::Value>,
    ) -> Option<Record> {
        let mut record = Record::new();
        for field in kind.string_fields() {
            let value = Value::from_json(row.get(*field)?, FieldType::Text)?;
            record.insert(format!("{}_{}", id, field), value);
        }
        for field in kind.numeric_fields() {
            let value = Value::from_json(row.get(*field)?, FieldType::Number)?;
            record.insert(format!("{}_{}", id, field), value);
        }
        Some(record)
    }
}
