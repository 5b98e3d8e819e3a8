//! Nested documents → flat rows.
//!
//! Rules, applied recursively with the path joined by `_`:
//! - scalars pass through under their own name
//! - nested documents are flattened and prefixed with `<field>_`
//! - sequences of scalars pass through as array columns
//! - sequences of documents are transposed: one array column per key,
//!   `Null` where an element lacks the key
//!
//! A sequence that cannot be expressed as flat arrays (a sequence inside a
//! sequence of documents, or mixed element kinds) is stored whole as JSON
//! text under `<field>_json`.

use std::collections::HashSet;

use docflat_api::{Document, FlatRow, FlatValue, Scalar, Value};
use serde::Deserialize;

/// Naming knobs for flat column names.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FlattenOptions {
    /// Joins a parent field name with a child key.
    pub separator: String,
    /// Appended (after `separator`) to the name of a JSON fallback column.
    pub json_suffix: String,
}

impl Default for FlattenOptions {
    fn default() -> Self {
        Self {
            separator: "_".to_string(),
            json_suffix: "json".to_string(),
        }
    }
}

impl FlattenOptions {
    fn join(&self, prefix: &str, key: &str) -> String {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}{}{key}", self.separator)
        }
    }

    /// Name of the JSON fallback column for `name`.
    pub fn json_column(&self, name: &str) -> String {
        format!("{name}{}{}", self.separator, self.json_suffix)
    }
}

/// Flatten `doc` with the default options.
pub fn flatten(doc: &Document) -> FlatRow {
    flatten_with(doc, &FlattenOptions::default())
}

pub fn flatten_with(doc: &Document, opts: &FlattenOptions) -> FlatRow {
    let mut out = FlatRow::new();
    flatten_into(doc, "", opts, &mut out);
    out
}

fn flatten_into(doc: &Document, prefix: &str, opts: &FlattenOptions, out: &mut FlatRow) {
    for (key, value) in doc.iter() {
        let name = opts.join(prefix, key);
        match value {
            Value::Scalar(s) => put(out, name, FlatValue::Scalar(s.clone())),
            Value::Map(sub) => flatten_into(sub, &name, opts, out),
            Value::Array(items) => flatten_sequence(name, items, opts, out),
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  Sequences
// ════════════════════════════════════════════════════════════════

enum Sequence<'a> {
    Scalars(Vec<Scalar>),
    /// `None` stands for a `Null` element.
    Documents(Vec<Option<&'a Document>>),
    Unrepresentable,
}

fn classify(items: &[Value]) -> Sequence<'_> {
    let has_docs = items.iter().any(|v| matches!(v, Value::Map(_)));
    if !has_docs {
        let mut scalars = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::Scalar(s) => scalars.push(s.clone()),
                _ => return Sequence::Unrepresentable,
            }
        }
        return Sequence::Scalars(scalars);
    }

    let mut docs = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Map(d) => docs.push(Some(d)),
            Value::Scalar(Scalar::Null) => docs.push(None),
            _ => return Sequence::Unrepresentable,
        }
    }
    Sequence::Documents(docs)
}

/// Marker: the sequence needs the JSON fallback.
struct Unrepresentable;

fn flatten_sequence(name: String, items: &[Value], opts: &FlattenOptions, out: &mut FlatRow) {
    match classify(items) {
        Sequence::Scalars(scalars) => put(out, name, FlatValue::Array(scalars)),
        Sequence::Documents(docs) => {
            let mut columns = FlatRow::new();
            match transpose(&docs, &name, opts, &mut columns) {
                Ok(()) => {
                    for (col, value) in columns {
                        put(out, col, value);
                    }
                }
                Err(Unrepresentable) => put_json(out, &name, items, opts),
            }
        }
        Sequence::Unrepresentable => put_json(out, &name, items, opts),
    }
}

/// One array column per key in the union of the elements' keys, in the
/// order keys are first seen.
fn transpose(
    elements: &[Option<&Document>],
    prefix: &str,
    opts: &FlattenOptions,
    out: &mut FlatRow,
) -> Result<(), Unrepresentable> {
    let mut keys: Vec<&str> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    for doc in elements.iter().flatten() {
        for key in doc.keys() {
            if seen.insert(key) {
                keys.push(key);
            }
        }
    }

    for key in keys {
        let name = opts.join(prefix, key);
        let cells: Vec<Option<&Value>> = elements
            .iter()
            .map(|e| e.and_then(|d| d.get(key)))
            .collect();

        if cells.iter().flatten().any(|v| matches!(v, Value::Array(_))) {
            return Err(Unrepresentable);
        }

        if cells.iter().flatten().any(|v| matches!(v, Value::Map(_))) {
            let mut nested = Vec::with_capacity(cells.len());
            for cell in &cells {
                match cell {
                    Some(Value::Map(d)) => nested.push(Some(d)),
                    None | Some(Value::Scalar(Scalar::Null)) => nested.push(None),
                    Some(_) => return Err(Unrepresentable),
                }
            }
            transpose(&nested, &name, opts, out)?;
            continue;
        }

        let column = cells
            .into_iter()
            .map(|c| match c {
                Some(Value::Scalar(s)) => s.clone(),
                _ => Scalar::Null,
            })
            .collect();
        out.insert(name, FlatValue::Array(column));
    }
    Ok(())
}

fn put_json(out: &mut FlatRow, name: &str, items: &[Value], opts: &FlattenOptions) {
    let text = match serde_json::to_string(items) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(column = %name, error = %e, "JSON fallback serialization failed");
            "[]".to_string()
        }
    };
    put(out, opts.json_column(name), FlatValue::Scalar(Scalar::String(text)));
}

fn put(out: &mut FlatRow, name: String, value: FlatValue) {
    if out.get(&name).is_some() {
        tracing::warn!(column = %name, "flat column name collision, later value kept");
    }
    out.insert(name, value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn s(v: &str) -> Scalar {
        Scalar::String(v.to_string())
    }

    #[test]
    fn test_scalar_document_is_identity() {
        let doc = Document::new().with("id", 3);
        assert_eq!(flatten(&doc), FlatRow::new().with("id", Scalar::Int(3)));
    }

    #[test]
    fn test_nested_document_is_prefixed() {
        let doc = Document::new()
            .with("id", 3)
            .with("sub", Document::new().with("dict", true));
        let expected = FlatRow::new()
            .with("id", Scalar::Int(3))
            .with("sub_dict", Scalar::Bool(true));
        assert_eq!(flatten(&doc), expected);
    }

    #[test]
    fn test_scalar_array_passes_through() {
        let doc = Document::new().with("id", 3).with("sub", vec!["array", "abc"]);
        let expected = FlatRow::new()
            .with("id", Scalar::Int(3))
            .with("sub", vec![s("array"), s("abc")]);
        assert_eq!(flatten(&doc), expected);
    }

    #[test]
    fn test_array_of_documents_is_transposed() {
        let doc = Document::new().with("id", 3).with(
            "sub",
            vec![
                Document::new().with("dict", "in_array"),
                Document::new().with("dict", "in_array_also").with("otherkey", true),
            ],
        );
        let expected = FlatRow::new()
            .with("id", Scalar::Int(3))
            .with("sub_dict", vec![s("in_array"), s("in_array_also")])
            .with("sub_otherkey", vec![Scalar::Null, Scalar::Bool(true)]);
        assert_eq!(flatten(&doc), expected);
    }

    #[test]
    fn test_array_inside_document() {
        let doc = Document::new()
            .with("id", 3)
            .with("sub", Document::new().with("array", vec!["in_dict", "second"]));
        let expected = FlatRow::new()
            .with("id", Scalar::Int(3))
            .with("sub_array", vec![s("in_dict"), s("second")]);
        assert_eq!(flatten(&doc), expected);
    }

    #[test]
    fn test_nested_array_in_array_of_documents_falls_back_to_json() {
        let doc = Document::new().with("id", 3).with(
            "sub",
            vec![Document::new()
                .with("dict", "in_array")
                .with("needs", vec!["json", "too_much_nesting"])],
        );
        let expected = FlatRow::new().with("id", Scalar::Int(3)).with(
            "sub_json",
            s(r#"[{"dict":"in_array","needs":["json","too_much_nesting"]}]"#),
        );
        assert_eq!(flatten(&doc), expected);
    }

    #[test]
    fn test_fallback_replaces_all_per_key_columns() {
        let doc = Document::new().with("id", 3).with(
            "Images",
            vec![
                Document::new()
                    .with("file", "a")
                    .with("size", 400)
                    .with("tags", vec!["cool", "Nikon"]),
                Document::new().with("file", "b").with("size", 500),
            ],
        );
        let row = flatten(&doc);
        assert_eq!(row.names().collect::<Vec<_>>(), vec!["id", "Images_json"]);
        assert_eq!(
            row.get("Images_json"),
            Some(&FlatValue::Scalar(s(
                r#"[{"file":"a","size":400,"tags":["cool","Nikon"]},{"file":"b","size":500}]"#
            )))
        );
    }

    #[test]
    fn test_store_document_shape() {
        let day = NaiveDate::from_ymd_opt(2019, 6, 7).unwrap();
        let doc = Document::new()
            .with("id", 3)
            .with("historydate", day)
            .with("Offer", Document::new().with("price", 5).with("count", 1))
            .with(
                "Images",
                vec![
                    Document::new().with("file", "a").with("size", 400),
                    Document::new().with("file", "b").with("size", 500),
                ],
            );
        let expected = FlatRow::new()
            .with("id", Scalar::Int(3))
            .with("historydate", Scalar::Date(day))
            .with("Offer_price", Scalar::Int(5))
            .with("Offer_count", Scalar::Int(1))
            .with("Images_file", vec![s("a"), s("b")])
            .with("Images_size", vec![Scalar::Int(400), Scalar::Int(500)]);
        assert_eq!(flatten(&doc), expected);
    }

    #[test]
    fn test_documents_inside_array_of_documents_recurse() {
        let doc = Document::new().with(
            "items",
            vec![
                Document::new().with("meta", Document::new().with("w", 1).with("h", 2)),
                Document::new().with("meta", Document::new().with("w", 3)),
                Document::new(),
            ],
        );
        let expected = FlatRow::new()
            .with("items_meta_w", vec![Scalar::Int(1), Scalar::Int(3), Scalar::Null])
            .with("items_meta_h", vec![Scalar::Int(2), Scalar::Null, Scalar::Null]);
        assert_eq!(flatten(&doc), expected);
    }

    #[test]
    fn test_null_elements_count_as_empty_documents() {
        let doc = Document::new().with(
            "sub",
            Value::Array(vec![Value::NULL, Document::new().with("k", 1).into()]),
        );
        let expected = FlatRow::new().with("sub_k", vec![Scalar::Null, Scalar::Int(1)]);
        assert_eq!(flatten(&doc), expected);
    }

    #[test]
    fn test_mixed_sequences_fall_back_to_json() {
        let doc = Document::new().with(
            "mixed",
            Value::Array(vec![Value::from(1), Document::new().with("k", 2).into()]),
        );
        assert_eq!(
            flatten(&doc),
            FlatRow::new().with("mixed_json", s(r#"[1,{"k":2}]"#))
        );

        let doc = Document::new().with("grid", vec![vec![1, 2], vec![3]]);
        assert_eq!(flatten(&doc), FlatRow::new().with("grid_json", s("[[1,2],[3]]")));
    }

    #[test]
    fn test_key_mixing_document_and_scalar_falls_back_to_json() {
        let doc = Document::new().with(
            "sub",
            vec![
                Document::new().with("k", Document::new().with("x", 1)),
                Document::new().with("k", "flat"),
            ],
        );
        assert_eq!(
            flatten(&doc),
            FlatRow::new().with("sub_json", s(r#"[{"k":{"x":1}},{"k":"flat"}]"#))
        );
    }

    #[test]
    fn test_empty_array_passes_through() {
        let doc = Document::new().with("tags", Value::Array(vec![]));
        assert_eq!(flatten(&doc), FlatRow::new().with("tags", Vec::<Scalar>::new()));
    }

    #[test]
    fn test_deep_nesting_and_sibling_order() {
        let doc = Document::new()
            .with("z", 1)
            .with("a", Document::new().with("b", Document::new().with("c", Document::new().with("d", 2))))
            .with("m", 3);
        let row = flatten(&doc);
        assert_eq!(row.names().collect::<Vec<_>>(), vec!["z", "a_b_c_d", "m"]);
    }

    #[test]
    fn test_custom_separator() {
        let opts = FlattenOptions {
            separator: ".".to_string(),
            ..FlattenOptions::default()
        };
        let doc = Document::new()
            .with("a", Document::new().with("b", 1))
            .with("l", vec![Document::new().with("x", vec![1])]);
        let row = flatten_with(&doc, &opts);
        assert_eq!(row.names().collect::<Vec<_>>(), vec!["a.b", "l.json"]);
    }

    #[test]
    fn test_name_collision_keeps_first_position_and_last_value() {
        let doc = Document::new()
            .with("a_b", 1)
            .with("a", Document::new().with("b", 2));
        assert_eq!(flatten(&doc), FlatRow::new().with("a_b", Scalar::Int(2)));
    }

    #[test]
    fn test_json_input_keeps_declaration_order() {
        let doc = Document::try_from(serde_json::json!({
            "zeta": 1,
            "alpha": 2,
            "sub": [{"needs": ["x"], "dict": "y"}],
        }))
        .unwrap();
        let row = flatten(&doc);
        assert_eq!(row.names().collect::<Vec<_>>(), vec!["zeta", "alpha", "sub_json"]);
        assert_eq!(
            row.get("sub_json"),
            Some(&FlatValue::Scalar(s(r#"[{"needs":["x"],"dict":"y"}]"#)))
        );
    }

    #[test]
    fn test_wide_array_of_documents() {
        let elements: Vec<Document> = (0..200)
            .map(|i| Document::new().with(format!("k{i}"), i))
            .collect();
        let row = flatten(&Document::new().with("w", elements));
        assert_eq!(row.len(), 200);
        assert_eq!(row.names().next(), Some("w_k0"));
        let Some(FlatValue::Array(cells)) = row.get("w_k199") else {
            panic!("w_k199 is not an array");
        };
        assert_eq!(cells.len(), 200);
        assert_eq!(cells[199], Scalar::Int(199));
        assert!(cells[..199].iter().all(Scalar::is_null));
    }
}
