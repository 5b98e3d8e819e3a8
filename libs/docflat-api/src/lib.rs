pub mod error;
pub mod schema;
pub mod store;
pub mod value;

pub use error::{ErrorKind, StoreError};
pub use schema::{Column, ColumnType, ParseTypeError, ScalarKind};
pub use store::{RowTransport, SchemaCatalog, StoreFuture};
pub use value::{Document, FlatRow, FlatValue, InvalidDocument, Scalar, Value};
