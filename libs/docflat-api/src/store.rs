use std::future::Future;
use std::pin::Pin;

use crate::error::StoreError;
use crate::schema::{Column, ColumnType};

/// Boxed future returned by collaborator methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Schema introspection and evolution for the target store.
///
/// The ingestion driver never issues DDL text itself. It decides which
/// name/type pairs are required and asks the catalog to make them so.
pub trait SchemaCatalog: Send + Sync {
    /// Current columns of `table`, in table order.
    fn columns(&self, table: &str) -> StoreFuture<'_, Vec<Column>>;

    /// Add `name` with `column_type`, or change an existing column to it.
    fn add_or_widen_column(
        &self,
        table: &str,
        name: &str,
        column_type: ColumnType,
    ) -> StoreFuture<'_, ()>;
}

/// Row delivery to the target store.
pub trait RowTransport: Send + Sync {
    /// Insert tab-separated `rows` laid out as `columns`.
    ///
    /// Each row is one encoded line without the trailing newline.
    fn insert(&self, table: &str, columns: &[Column], rows: Vec<String>) -> StoreFuture<'_, ()>;
}
