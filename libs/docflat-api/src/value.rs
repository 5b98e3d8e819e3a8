use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

/// Canonical textual form of `Date` values in the store.
pub const DATE_FORMAT: &str = "%Y-%m-%d";
/// Canonical textual form of `DateTime` values in the store.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ════════════════════════════════════════════════════════════════
//  Scalar
// ════════════════════════════════════════════════════════════════

/// A single leaf value: what a store cell (or one array element) holds.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// Plain text rendering without any escaping. `Null` renders empty.
    pub fn to_text(&self) -> String {
        match self {
            Scalar::Null => String::new(),
            Scalar::Bool(b) => u8::from(*b).to_string(),
            Scalar::Int(n) => n.to_string(),
            Scalar::Float(x) => format_float(*x),
            Scalar::String(s) => s.clone(),
            Scalar::Date(d) => d.format(DATE_FORMAT).to_string(),
            Scalar::DateTime(dt) => dt.format(DATETIME_FORMAT).to_string(),
        }
    }
}

/// Float text in the store's spelling (`inf`, `-inf`, `nan`).
pub fn format_float(x: f64) -> String {
    if x.is_nan() {
        "nan".into()
    } else if x.is_infinite() {
        if x > 0.0 { "inf".into() } else { "-inf".into() }
    } else {
        x.to_string()
    }
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Scalar::Null => serializer.serialize_unit(),
            Scalar::Bool(b) => serializer.serialize_bool(*b),
            Scalar::Int(n) => serializer.serialize_i64(*n),
            Scalar::Float(x) => serializer.serialize_f64(*x),
            Scalar::String(s) => serializer.serialize_str(s),
            Scalar::Date(_) | Scalar::DateTime(_) => serializer.serialize_str(&self.to_text()),
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  Value & Document
// ════════════════════════════════════════════════════════════════

/// Document value: a scalar, an ordered sequence, or a nested document.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(Scalar),
    Array(Vec<Value>),
    Map(Document),
}

impl Value {
    pub const NULL: Value = Value::Scalar(Scalar::Null);
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Scalar(s) => s.serialize(serializer),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(doc) => doc.serialize(serializer),
        }
    }
}

macro_rules! value_from_scalar {
    ($($t:ty => |$v:ident| $e:expr),* $(,)?) => {
        $(
            impl From<$t> for Value {
                fn from($v: $t) -> Self {
                    Value::Scalar($e)
                }
            }
        )*
    };
}

value_from_scalar! {
    bool => |v| Scalar::Bool(v),
    i32 => |v| Scalar::Int(i64::from(v)),
    i64 => |v| Scalar::Int(v),
    f64 => |v| Scalar::Float(v),
    &str => |v| Scalar::String(v.to_string()),
    String => |v| Scalar::String(v),
    NaiveDate => |v| Scalar::Date(v),
    NaiveDateTime => |v| Scalar::DateTime(v),
}

impl From<Scalar> for Value {
    fn from(s: Scalar) -> Self {
        Value::Scalar(s)
    }
}

impl From<Document> for Value {
    fn from(d: Document) -> Self {
        Value::Map(d)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

// ════════════════════════════════════════════════════════════════
//  Ordered fields
// ════════════════════════════════════════════════════════════════

/// Insertion-ordered entries with a name index. Names are unique.
#[derive(Debug, Clone)]
struct Fields<V> {
    entries: Vec<(String, V)>,
    index: HashMap<String, usize>,
}

impl<V> Default for Fields<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<V: PartialEq> PartialEq for Fields<V> {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl<V> Fields<V> {
    /// An existing name keeps its position and gets the new value.
    fn insert(&mut self, name: String, value: V) -> Option<V> {
        match self.index.get(&name) {
            Some(&i) => Some(std::mem::replace(&mut self.entries[i].1, value)),
            None => {
                self.index.insert(name.clone(), self.entries.len());
                self.entries.push((name, value));
                None
            }
        }
    }

    fn get(&self, name: &str) -> Option<&V> {
        self.index.get(name).map(|&i| &self.entries[i].1)
    }

    fn remove(&mut self, name: &str) -> Option<V> {
        let i = self.index.remove(name)?;
        let (_, value) = self.entries.remove(i);
        for (n, _) in &self.entries[i..] {
            if let Some(slot) = self.index.get_mut(n) {
                *slot -= 1;
            }
        }
        Some(value)
    }

    fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Insertion-ordered mapping from field name to value. Keys are unique.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    fields: Fields<Value>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Document::insert`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert a field. An existing key keeps its position and gets the new value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.names()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.len() == 0
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Document {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut doc = Document::new();
        for (k, v) in iter {
            doc.insert(k, v);
        }
        doc
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in self.fields.iter() {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

// ════════════════════════════════════════════════════════════════
//  JSON input
// ════════════════════════════════════════════════════════════════

/// A JSON input that is not a document (top level is not an object).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidDocument(pub String);

impl std::fmt::Display for InvalidDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid document: {}", self.0)
    }
}

impl std::error::Error for InvalidDocument {}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::NULL,
            serde_json::Value::Bool(b) => Value::Scalar(Scalar::Bool(b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Scalar(Scalar::Int(i)),
                None => Value::Scalar(Scalar::Float(n.as_f64().unwrap_or(f64::NAN))),
            },
            serde_json::Value::String(s) => Value::Scalar(Scalar::String(s)),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl TryFrom<serde_json::Value> for Document {
    type Error = InvalidDocument;

    fn try_from(v: serde_json::Value) -> Result<Self, Self::Error> {
        match Value::from(v) {
            Value::Map(doc) => Ok(doc),
            Value::Scalar(_) => Err(InvalidDocument("expected object, got scalar".into())),
            Value::Array(_) => Err(InvalidDocument("expected object, got array".into())),
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  Flat row
// ════════════════════════════════════════════════════════════════

/// Value of one flat column: a scalar or a store-native array of scalars.
#[derive(Debug, Clone, PartialEq)]
pub enum FlatValue {
    Scalar(Scalar),
    Array(Vec<Scalar>),
}

impl From<Scalar> for FlatValue {
    fn from(s: Scalar) -> Self {
        FlatValue::Scalar(s)
    }
}

impl From<Vec<Scalar>> for FlatValue {
    fn from(items: Vec<Scalar>) -> Self {
        FlatValue::Array(items)
    }
}

impl Serialize for FlatValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FlatValue::Scalar(s) => s.serialize(serializer),
            FlatValue::Array(items) => items.serialize(serializer),
        }
    }
}

/// Insertion-ordered mapping from flat column name to value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatRow {
    columns: Fields<FlatValue>,
}

impl FlatRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<FlatValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert a column. An existing name keeps its position; the old value is returned.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FlatValue>) -> Option<FlatValue> {
        self.columns.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&FlatValue> {
        self.columns.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<FlatValue> {
        self.columns.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FlatValue)> {
        self.columns.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.names()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.len() == 0
    }
}

impl<K: Into<String>, V: Into<FlatValue>> FromIterator<(K, V)> for FlatRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = FlatRow::new();
        for (k, v) in iter {
            row.insert(k, v);
        }
        row
    }
}

impl IntoIterator for FlatRow {
    type Item = (String, FlatValue);
    type IntoIter = std::vec::IntoIter<(String, FlatValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.entries.into_iter()
    }
}
