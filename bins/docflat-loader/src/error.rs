use docflat_api::StoreError;
use docflat_core::IngestError;

#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("input: {0}")]
    Input(#[from] std::io::Error),

    #[error("line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Ingest(#[from] IngestError),
}
