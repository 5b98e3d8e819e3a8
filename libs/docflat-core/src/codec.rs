//! Tab-separated wire rows.
//!
//! One row per line, fields separated by raw tabs. Inside a field,
//! backslash, tab, newline, carriage return, NUL, backspace and form feed
//! are backslash-escaped, so a raw tab is always a separator. Arrays are
//! written as `[e1,e2,...]`; `String`, `Date` and `DateTime` elements are
//! single-quoted and additionally escape `'` and `,`. A top-level `Null`
//! is `\N`.
//!
//! Decoding is best-effort for field contents: a malformed array literal or
//! an unparsable scalar becomes the type's zero value and a
//! [`DecodeWarning`] on the row. Only a wrong field count is an error.

use chrono::{NaiveDate, NaiveDateTime};
use docflat_api::value::{DATE_FORMAT, DATETIME_FORMAT, format_float};
use docflat_api::{Column, ColumnType, FlatRow, FlatValue, Scalar, ScalarKind};

use crate::error::IngestError;
use crate::infer::{infer_type, untyped_default};

const NULL_FIELD: &str = "\\N";

// ════════════════════════════════════════════════════════════════
//  Decode results
// ════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    /// Array literal with empty, unterminated or unparsable elements,
    /// or without brackets.
    MalformedArrayLiteral,
    /// Scalar field that does not parse as its column type.
    MalformedScalar,
}

/// Non-fatal decode condition. The affected value was replaced by the
/// column type's zero value.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeWarning {
    pub column: String,
    pub kind: WarningKind,
    /// Raw field text as received.
    pub raw: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedRow {
    pub row: FlatRow,
    pub warnings: Vec<DecodeWarning>,
}

impl DecodedRow {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// A `TabSeparatedWithNamesAndTypes` body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedBatch {
    pub columns: Vec<Column>,
    pub rows: Vec<DecodedRow>,
}

impl DecodedBatch {
    pub fn warning_count(&self) -> usize {
        self.rows.iter().map(|r| r.warnings.len()).sum()
    }
}

// ════════════════════════════════════════════════════════════════
//  Escaping
// ════════════════════════════════════════════════════════════════

fn push_escaped(out: &mut String, text: &str, in_array: bool) {
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            '\'' if in_array => out.push_str("\\'"),
            ',' if in_array => out.push_str("\\,"),
            c => out.push(c),
        }
    }
}

/// Escape a top-level field.
pub fn escape_field(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    push_escaped(&mut out, text, false);
    out
}

/// Reverse of both field and array-element escaping. Unknown escapes
/// yield the escaped character; a trailing lone backslash is kept.
pub fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

// ════════════════════════════════════════════════════════════════
//  Encode
// ════════════════════════════════════════════════════════════════

/// Encode typed fields into one wire row (no trailing newline).
pub fn encode<'a, I>(fields: I) -> Result<String, IngestError>
where
    I: IntoIterator<Item = (ColumnType, &'a FlatValue)>,
{
    let mut line = String::new();
    for (i, (column_type, value)) in fields.into_iter().enumerate() {
        if i > 0 {
            line.push('\t');
        }
        encode_field(&mut line, column_type, value)?;
    }
    Ok(line)
}

/// Encode `row` laid out as `columns`. Columns missing from the row are `\N`.
pub fn encode_row(columns: &[Column], row: &FlatRow) -> Result<String, IngestError> {
    static MISSING: FlatValue = FlatValue::Scalar(Scalar::Null);
    encode(
        columns
            .iter()
            .map(|c| (c.column_type, row.get(&c.name).unwrap_or(&MISSING))),
    )
}

/// Names and types lines of a `TabSeparatedWithNamesAndTypes` body.
pub fn encode_header(columns: &[Column]) -> String {
    let names: Vec<String> = columns.iter().map(|c| escape_field(&c.name)).collect();
    let types: Vec<String> = columns.iter().map(|c| c.column_type.to_string()).collect();
    format!("{}\n{}\n", names.join("\t"), types.join("\t"))
}

fn encode_field(out: &mut String, column_type: ColumnType, value: &FlatValue) -> Result<(), IngestError> {
    match (column_type, value) {
        (_, FlatValue::Scalar(Scalar::Null)) => out.push_str(NULL_FIELD),
        (ColumnType::Scalar(kind), FlatValue::Scalar(s)) => {
            let text = render_scalar(kind, s, column_type)?;
            push_escaped(out, &text, false);
        }
        (ColumnType::Array(kind), FlatValue::Array(items)) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let item = if item.is_null() { zero_value(kind) } else { item.clone() };
                let text = render_scalar(kind, &item, column_type)?;
                if is_quoted(kind) {
                    out.push('\'');
                    push_escaped(out, &text, true);
                    out.push('\'');
                } else {
                    out.push_str(&text);
                }
            }
            out.push(']');
        }
        (_, value) => {
            return Err(IngestError::TypeMismatch {
                left: column_type,
                right: infer_type(value).unwrap_or_else(|| untyped_default(value)),
            });
        }
    }
    Ok(())
}

fn is_quoted(kind: ScalarKind) -> bool {
    matches!(kind, ScalarKind::String | ScalarKind::Date | ScalarKind::DateTime)
}

/// Unescaped text of `s` stored as `kind`.
fn render_scalar(kind: ScalarKind, s: &Scalar, column_type: ColumnType) -> Result<String, IngestError> {
    let text = match (kind, s) {
        (ScalarKind::String, s) => s.to_text(),
        (k, Scalar::Int(_) | Scalar::Bool(_)) if k.is_numeric() => s.to_text(),
        (k, Scalar::Float(x)) if k.is_float() => format_float(*x),
        (ScalarKind::Date, Scalar::Date(d)) => d.format(DATE_FORMAT).to_string(),
        (ScalarKind::DateTime, Scalar::DateTime(dt)) => dt.format(DATETIME_FORMAT).to_string(),
        (ScalarKind::DateTime, Scalar::Date(d)) => format!("{} 00:00:00", d.format(DATE_FORMAT)),
        _ => {
            let observed = crate::infer::scalar_kind(s).unwrap_or(ScalarKind::String);
            let right = match column_type {
                ColumnType::Scalar(_) => ColumnType::Scalar(observed),
                ColumnType::Array(_) => ColumnType::Array(observed),
            };
            return Err(IngestError::TypeMismatch { left: column_type, right });
        }
    };
    Ok(text)
}

/// Default value the store uses for `kind`.
pub fn zero_value(kind: ScalarKind) -> Scalar {
    match kind {
        ScalarKind::Int8 | ScalarKind::Int16 | ScalarKind::Int32 | ScalarKind::Int64 => Scalar::Int(0),
        ScalarKind::Float32 | ScalarKind::Float64 => Scalar::Float(0.0),
        ScalarKind::String => Scalar::String(String::new()),
        ScalarKind::Date => Scalar::Date(NaiveDate::default()),
        ScalarKind::DateTime => Scalar::DateTime(NaiveDateTime::default()),
    }
}

// ════════════════════════════════════════════════════════════════
//  Decode
// ════════════════════════════════════════════════════════════════

/// Decode one wire row laid out as `columns`.
pub fn decode(line: &str, columns: &[Column]) -> Result<DecodedRow, IngestError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut decoded = DecodedRow::default();
    if columns.is_empty() && line.is_empty() {
        return Ok(decoded);
    }

    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != columns.len() {
        return Err(IngestError::MalformedRow {
            expected: columns.len(),
            found: fields.len(),
        });
    }

    for (column, raw) in columns.iter().zip(fields) {
        let value = decode_field(raw, column, &mut decoded.warnings);
        decoded.row.insert(column.name.clone(), value);
    }
    Ok(decoded)
}

/// Decode a `TabSeparatedWithNamesAndTypes` body: a names line, a types
/// line, then rows.
pub fn decode_body(body: &str) -> Result<DecodedBatch, IngestError> {
    decode_body_with(body, |t| t.parse::<ColumnType>().map_err(|e| e.to_string()))
}

/// [`decode_body`] with a caller-supplied type-name parser, for stores
/// whose type names are wider than the column vocabulary.
pub fn decode_body_with<F>(body: &str, parse_type: F) -> Result<DecodedBatch, IngestError>
where
    F: Fn(&str) -> Result<ColumnType, String>,
{
    let body = body.strip_suffix('\n').unwrap_or(body);
    let mut lines = body.split('\n');

    let names = lines
        .next()
        .filter(|l| !l.is_empty())
        .ok_or_else(|| IngestError::MalformedHeader("missing names line".into()))?;
    let types = lines
        .next()
        .ok_or_else(|| IngestError::MalformedHeader("missing types line".into()))?;

    let names: Vec<String> = names.split('\t').map(unescape).collect();
    let types: Vec<&str> = types.split('\t').collect();
    if names.len() != types.len() {
        return Err(IngestError::MalformedHeader(format!(
            "{} names but {} types",
            names.len(),
            types.len()
        )));
    }

    let mut columns = Vec::with_capacity(names.len());
    for (name, type_name) in names.into_iter().zip(types) {
        let column_type = parse_type(&unescape(type_name))
            .map_err(|e| IngestError::MalformedHeader(format!("column '{name}': {e}")))?;
        columns.push(Column::new(name, column_type));
    }

    let mut rows = Vec::new();
    for line in lines {
        rows.push(decode(line, &columns)?);
    }
    Ok(DecodedBatch { columns, rows })
}

fn decode_field(raw: &str, column: &Column, warnings: &mut Vec<DecodeWarning>) -> FlatValue {
    if raw == NULL_FIELD {
        return FlatValue::Scalar(Scalar::Null);
    }
    match column.column_type {
        ColumnType::Scalar(kind) => match parse_scalar(kind, &unescape(raw)) {
            Some(s) => FlatValue::Scalar(s),
            None => {
                warnings.push(warning(column, WarningKind::MalformedScalar, raw));
                FlatValue::Scalar(zero_value(kind))
            }
        },
        ColumnType::Array(kind) => {
            let (items, clean) = parse_array(raw, kind);
            if !clean {
                warnings.push(warning(column, WarningKind::MalformedArrayLiteral, raw));
            }
            FlatValue::Array(items)
        }
    }
}

fn warning(column: &Column, kind: WarningKind, raw: &str) -> DecodeWarning {
    tracing::warn!(column = %column.name, ?kind, raw = %raw, "decode warning");
    DecodeWarning {
        column: column.name.clone(),
        kind,
        raw: raw.to_string(),
    }
}

fn parse_scalar(kind: ScalarKind, text: &str) -> Option<Scalar> {
    match kind {
        ScalarKind::Int8 => text.parse::<i8>().ok().map(|n| Scalar::Int(n.into())),
        ScalarKind::Int16 => text.parse::<i16>().ok().map(|n| Scalar::Int(n.into())),
        ScalarKind::Int32 => text.parse::<i32>().ok().map(|n| Scalar::Int(n.into())),
        ScalarKind::Int64 => text.parse::<i64>().ok().map(Scalar::Int),
        ScalarKind::Float32 | ScalarKind::Float64 => text.parse::<f64>().ok().map(Scalar::Float),
        ScalarKind::String => Some(Scalar::String(text.to_string())),
        ScalarKind::Date => NaiveDate::parse_from_str(text, DATE_FORMAT).ok().map(Scalar::Date),
        ScalarKind::DateTime => NaiveDateTime::parse_from_str(text, DATETIME_FORMAT)
            .ok()
            .map(Scalar::DateTime),
    }
}

/// Parse an array literal. The flag is `false` when anything had to be
/// substituted.
fn parse_array(raw: &str, kind: ScalarKind) -> (Vec<Scalar>, bool) {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix('[').and_then(|r| r.strip_suffix(']')) else {
        return (Vec::new(), false);
    };
    if inner.trim().is_empty() {
        return (Vec::new(), true);
    }

    let mut clean = true;
    let mut items = Vec::new();
    for element in split_elements(inner) {
        let (text, ok) = element_text(element.trim());
        clean &= ok;
        let parsed = match text {
            None => Some(Scalar::Null),
            Some(t) if t.is_empty() && kind != ScalarKind::String => None,
            Some(t) => parse_scalar(kind, &t),
        };
        let empty_unquoted = element.trim().is_empty();
        match parsed {
            Some(s) if !empty_unquoted => items.push(s),
            _ => {
                clean = false;
                items.push(zero_value(kind));
            }
        }
    }
    (items, clean)
}

/// Split array content on top-level commas. Commas inside quotes or after a
/// backslash do not split.
fn split_elements(inner: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quote = false;
    let mut escaped = false;
    let mut start = 0;
    for (i, ch) in inner.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '\'' => in_quote = !in_quote,
            ',' if !in_quote => {
                parts.push(&inner[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&inner[start..]);
    parts
}

/// Unescaped element text; `None` for an unquoted `NULL`. The flag is
/// `false` for an unterminated quote or a bare quote inside the element.
fn element_text(element: &str) -> (Option<String>, bool) {
    if element == "NULL" {
        return (None, true);
    }
    match element.strip_prefix('\'') {
        Some(rest) => match rest.strip_suffix('\'') {
            Some(body) if quoted_body_is_clean(body) => (Some(unescape(body)), true),
            Some(body) => (Some(unescape(body)), false),
            None => (Some(unescape(rest)), false),
        },
        None => (Some(unescape(element)), true),
    }
}

/// Every quote is escaped and no backslash is left dangling at the end.
fn quoted_body_is_clean(body: &str) -> bool {
    let mut escaped = false;
    for ch in body.chars() {
        match ch {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '\'' => return false,
            _ => {}
        }
    }
    !escaped
}
