use serde::{Deserialize, Serialize};

// ════════════════════════════════════════════════════════════════
//  Scalar Kind
// ════════════════════════════════════════════════════════════════

/// Element types a store column can hold.
///
/// Closed vocabulary: every column the adapter creates, widens or encodes
/// is one of these, optionally wrapped in [`ColumnType::Array`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScalarKind {
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    Date,
    DateTime,
}

impl ScalarKind {
    pub const ALL: [ScalarKind; 9] = [
        ScalarKind::Int8,
        ScalarKind::Int16,
        ScalarKind::Int32,
        ScalarKind::Int64,
        ScalarKind::Float32,
        ScalarKind::Float64,
        ScalarKind::String,
        ScalarKind::Date,
        ScalarKind::DateTime,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ScalarKind::Int8 => "Int8",
            ScalarKind::Int16 => "Int16",
            ScalarKind::Int32 => "Int32",
            ScalarKind::Int64 => "Int64",
            ScalarKind::Float32 => "Float32",
            ScalarKind::Float64 => "Float64",
            ScalarKind::String => "String",
            ScalarKind::Date => "Date",
            ScalarKind::DateTime => "DateTime",
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            ScalarKind::Int8 | ScalarKind::Int16 | ScalarKind::Int32 | ScalarKind::Int64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, ScalarKind::Float32 | ScalarKind::Float64)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float()
    }

    fn parse(s: &str) -> Option<Self> {
        ScalarKind::ALL.into_iter().find(|k| k.name() == s)
    }
}

impl std::fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ════════════════════════════════════════════════════════════════
//  Column Type
// ════════════════════════════════════════════════════════════════

/// Column type: a scalar or a one-dimensional array of scalars.
///
/// Spelled the way the store spells it: `Int64`, `Array(String)`.
/// Nested arrays are not representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ColumnType {
    Scalar(ScalarKind),
    Array(ScalarKind),
}

impl ColumnType {
    pub fn is_array(self) -> bool {
        matches!(self, ColumnType::Array(_))
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnType::Scalar(k) => write!(f, "{k}"),
            ColumnType::Array(k) => write!(f, "Array({k})"),
        }
    }
}

/// Type name outside the closed vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTypeError(pub String);

impl std::fmt::Display for ParseTypeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unsupported column type '{}'", self.0)
    }
}

impl std::error::Error for ParseTypeError {}

impl std::str::FromStr for ColumnType {
    type Err = ParseTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parsed = match s.strip_prefix("Array(").and_then(|r| r.strip_suffix(')')) {
            Some(inner) => ScalarKind::parse(inner.trim()).map(ColumnType::Array),
            None => ScalarKind::parse(s).map(ColumnType::Scalar),
        };
        parsed.ok_or_else(|| ParseTypeError(s.to_string()))
    }
}

impl From<ColumnType> for String {
    fn from(t: ColumnType) -> Self {
        t.to_string()
    }
}

impl TryFrom<String> for ColumnType {
    type Error = ParseTypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

// ════════════════════════════════════════════════════════════════
//  Column
// ════════════════════════════════════════════════════════════════

/// One column of a table snapshot or of an insert header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}
