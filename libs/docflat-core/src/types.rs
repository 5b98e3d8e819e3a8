//! Column type unification.
//!
//! [`unify`] returns the least general column type able to hold values of
//! both inputs. It is a fixed lookup policy, not numeric promotion: any
//! integer paired with a float becomes that float (`Float32 ⊕ Int64 =
//! Float32`), and anything mixed with `String`, or temporal with numeric,
//! becomes `String`. The table is a join-semilattice, so reducing a batch
//! pairwise gives the same answer in any order.

use docflat_api::{ColumnType, ScalarKind};

use crate::error::IngestError;

use docflat_api::ScalarKind::{
    Date as D, DateTime as Dt, Float32 as F32, Float64 as F64, Int8 as I8, Int16 as I16,
    Int32 as I32, Int64 as I64, String as S,
};

/// `UNIFY[a][b]`, indexed by [`ScalarKind`] declaration order.
const UNIFY: [[ScalarKind; 9]; 9] = [
    //        I8   I16  I32  I64  F32  F64  S  D   Dt
    /* I8  */ [I8, I16, I32, I64, F32, F64, S, S, S],
    /* I16 */ [I16, I16, I32, I64, F32, F64, S, S, S],
    /* I32 */ [I32, I32, I32, I64, F32, F64, S, S, S],
    /* I64 */ [I64, I64, I64, I64, F32, F64, S, S, S],
    /* F32 */ [F32, F32, F32, F32, F32, F64, S, S, S],
    /* F64 */ [F64, F64, F64, F64, F64, F64, S, S, S],
    /* S   */ [S, S, S, S, S, S, S, S, S],
    /* D   */ [S, S, S, S, S, S, S, D, Dt],
    /* Dt  */ [S, S, S, S, S, S, S, Dt, Dt],
];

fn index(kind: ScalarKind) -> usize {
    match kind {
        I8 => 0,
        I16 => 1,
        I32 => 2,
        I64 => 3,
        F32 => 4,
        F64 => 5,
        S => 6,
        D => 7,
        Dt => 8,
    }
}

/// Least general element kind covering both `a` and `b`.
pub fn unify_kind(a: ScalarKind, b: ScalarKind) -> ScalarKind {
    UNIFY[index(a)][index(b)]
}

/// Least general column type covering both `a` and `b`.
///
/// Arrays unify element-wise. Pairing an array with a scalar is a
/// [`IngestError::TypeMismatch`].
pub fn unify(a: ColumnType, b: ColumnType) -> Result<ColumnType, IngestError> {
    match (a, b) {
        (ColumnType::Scalar(x), ColumnType::Scalar(y)) => Ok(ColumnType::Scalar(unify_kind(x, y))),
        (ColumnType::Array(x), ColumnType::Array(y)) => Ok(ColumnType::Array(unify_kind(x, y))),
        _ => Err(IngestError::TypeMismatch { left: a, right: b }),
    }
}

/// Fold [`unify`] over `types`. `None` for an empty input.
pub fn unify_all<I>(types: I) -> Result<Option<ColumnType>, IngestError>
where
    I: IntoIterator<Item = ColumnType>,
{
    let mut acc: Option<ColumnType> = None;
    for t in types {
        acc = Some(match acc {
            Some(prev) => unify(prev, t)?,
            None => t,
        });
    }
    Ok(acc)
}
