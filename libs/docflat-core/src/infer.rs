//! Column type of a single observed value.

use docflat_api::{ColumnType, FlatValue, Scalar, ScalarKind};

use crate::types::unify_kind;

/// Narrowest element kind for `scalar`. `None` for `Null`.
///
/// Integers take the narrowest `Int*` that holds them, booleans are `Int8`
/// (stored as 0/1) and every float is `Float64`.
pub fn scalar_kind(scalar: &Scalar) -> Option<ScalarKind> {
    let kind = match scalar {
        Scalar::Null => return None,
        Scalar::Bool(_) => ScalarKind::Int8,
        Scalar::Int(n) => int_kind(*n),
        Scalar::Float(_) => ScalarKind::Float64,
        Scalar::String(_) => ScalarKind::String,
        Scalar::Date(_) => ScalarKind::Date,
        Scalar::DateTime(_) => ScalarKind::DateTime,
    };
    Some(kind)
}

fn int_kind(n: i64) -> ScalarKind {
    if i8::try_from(n).is_ok() {
        ScalarKind::Int8
    } else if i16::try_from(n).is_ok() {
        ScalarKind::Int16
    } else if i32::try_from(n).is_ok() {
        ScalarKind::Int32
    } else {
        ScalarKind::Int64
    }
}

/// Column type for a flat value. `None` when it carries no type
/// information (`Null`, an empty array, an array of nulls).
pub fn infer_type(value: &FlatValue) -> Option<ColumnType> {
    match value {
        FlatValue::Scalar(s) => scalar_kind(s).map(ColumnType::Scalar),
        FlatValue::Array(items) => items
            .iter()
            .filter_map(scalar_kind)
            .reduce(unify_kind)
            .map(ColumnType::Array),
    }
}

/// Fallback type for a column observed only through untyped values.
pub fn untyped_default(value: &FlatValue) -> ColumnType {
    match value {
        FlatValue::Scalar(_) => ColumnType::Scalar(ScalarKind::String),
        FlatValue::Array(_) => ColumnType::Array(ScalarKind::String),
    }
}

/// Whether `value` has the same shape (array or not) as `column_type`.
pub fn same_shape(value: &FlatValue, column_type: ColumnType) -> bool {
    matches!(value, FlatValue::Array(_)) == column_type.is_array()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn scalar(kind: ScalarKind) -> Option<ColumnType> {
        Some(ColumnType::Scalar(kind))
    }

    #[test]
    fn test_integer_widths() {
        let cases = [
            (0, ScalarKind::Int8),
            (-128, ScalarKind::Int8),
            (127, ScalarKind::Int8),
            (128, ScalarKind::Int16),
            (-32_769, ScalarKind::Int32),
            (40_000, ScalarKind::Int32),
            (3_000_000_000, ScalarKind::Int64),
            (i64::MIN, ScalarKind::Int64),
        ];
        for (n, expected) in cases {
            assert_eq!(infer_type(&FlatValue::Scalar(Scalar::Int(n))), scalar(expected), "{n}");
        }
    }

    #[test]
    fn test_other_scalars() {
        let day = NaiveDate::from_ymd_opt(2019, 6, 7).unwrap();
        assert_eq!(infer_type(&Scalar::Bool(true).into()), scalar(ScalarKind::Int8));
        assert_eq!(infer_type(&Scalar::Float(0.5).into()), scalar(ScalarKind::Float64));
        assert_eq!(infer_type(&Scalar::String("x".into()).into()), scalar(ScalarKind::String));
        assert_eq!(infer_type(&Scalar::Date(day).into()), scalar(ScalarKind::Date));
        assert_eq!(
            infer_type(&Scalar::DateTime(day.and_hms_opt(1, 2, 3).unwrap()).into()),
            scalar(ScalarKind::DateTime)
        );
        assert_eq!(infer_type(&Scalar::Null.into()), None);
    }

    #[test]
    fn test_arrays_unify_their_elements() {
        let v = FlatValue::Array(vec![Scalar::Null, Scalar::Int(400), Scalar::Int(5)]);
        assert_eq!(infer_type(&v), Some(ColumnType::Array(ScalarKind::Int16)));

        let v = FlatValue::Array(vec![Scalar::Int(1), Scalar::Float(1.5)]);
        assert_eq!(infer_type(&v), Some(ColumnType::Array(ScalarKind::Float64)));

        assert_eq!(infer_type(&FlatValue::Array(vec![])), None);
        assert_eq!(infer_type(&FlatValue::Array(vec![Scalar::Null])), None);
    }

    #[test]
    fn test_shape_check() {
        let arr = FlatValue::Array(vec![Scalar::Int(1)]);
        assert!(same_shape(&arr, ColumnType::Array(ScalarKind::Int64)));
        assert!(!same_shape(&arr, ColumnType::Scalar(ScalarKind::Int64)));
        assert!(same_shape(&Scalar::Null.into(), ColumnType::Scalar(ScalarKind::String)));
    }
}
