//! Document-to-row pipeline for a flat, columnar store.
//!
//! - [`types`]: least general common column type of two observed types
//! - [`codec`]: tab-separated wire row encoder/decoder
//! - [`flatten`]: nested documents → flat rows
//! - [`infer`]: column type of a single observed value
//! - [`driver`]: batch ingestion against a schema catalog and a transport

pub mod clock;
pub mod codec;
pub mod config;
pub mod driver;
pub mod error;
pub mod flatten;
pub mod infer;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{DecodeWarning, DecodedBatch, DecodedRow, WarningKind};
pub use config::DriverConfig;
pub use driver::{BatchReport, IngestionDriver};
pub use error::IngestError;
pub use flatten::{FlattenOptions, flatten, flatten_with};
pub use types::unify;
