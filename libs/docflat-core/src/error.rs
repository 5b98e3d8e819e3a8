use docflat_api::{ColumnType, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("type mismatch: cannot unify {left} with {right}")]
    TypeMismatch { left: ColumnType, right: ColumnType },

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("malformed row: expected {expected} fields, found {found}")]
    MalformedRow { expected: usize, found: usize },

    #[error("malformed header: {0}")]
    MalformedHeader(String),

    #[error("schema fetch ({table}): {source}")]
    SchemaFetch { table: String, source: StoreError },

    #[error("schema evolution ({table}.{column} -> {column_type}): {source}")]
    SchemaEvolution {
        table: String,
        column: String,
        column_type: ColumnType,
        source: StoreError,
    },

    #[error("transport ({table}): {source}")]
    Transport { table: String, source: StoreError },

    #[error("config: {0}")]
    Config(String),
}

impl From<docflat_api::InvalidDocument> for IngestError {
    fn from(e: docflat_api::InvalidDocument) -> Self {
        IngestError::InvalidDocument(e.0)
    }
}
