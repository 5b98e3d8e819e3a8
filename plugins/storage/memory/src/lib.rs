use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::RwLock;

use docflat_api::{Column, ColumnType, RowTransport, SchemaCatalog, StoreError, StoreFuture};

// ═══════════════════════════════════════════════════════════════
//  MemoryTable
// ═══════════════════════════════════════════════════════════════

/// One `insert` call as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertBatch {
    pub columns: Vec<Column>,
    pub rows: Vec<String>,
}

#[derive(Debug, Default)]
struct MemoryTable {
    columns: Vec<Column>,
    inserts: Vec<InsertBatch>,
    /// Columns whose type change is refused (existing data cannot be converted).
    frozen: HashSet<String>,
}

// ═══════════════════════════════════════════════════════════════
//  MemoryStore
// ═══════════════════════════════════════════════════════════════

/// In-process store: schema catalog and row transport in one.
///
/// Rows are kept as received (encoded wire lines), per insert call.
/// Tables must be created up front, as with a real store.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, MemoryTable>>,
    column_fetches: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create_table(&self, table: &str, columns: Vec<Column>) {
        let mut tables = self.tables.write().await;
        tables.insert(
            table.to_string(),
            MemoryTable {
                columns,
                ..MemoryTable::default()
            },
        );
    }

    /// Refuse any later type change of `column`.
    pub async fn freeze_column(&self, table: &str, column: &str) {
        if let Some(t) = self.tables.write().await.get_mut(table) {
            t.frozen.insert(column.to_string());
        }
    }

    /// Current columns without counting a fetch.
    pub async fn table_columns(&self, table: &str) -> Option<Vec<Column>> {
        self.tables.read().await.get(table).map(|t| t.columns.clone())
    }

    pub async fn inserts(&self, table: &str) -> Vec<InsertBatch> {
        self.tables
            .read()
            .await
            .get(table)
            .map(|t| t.inserts.clone())
            .unwrap_or_default()
    }

    /// Number of [`SchemaCatalog::columns`] calls so far.
    pub fn column_fetches(&self) -> usize {
        self.column_fetches.load(Ordering::Relaxed)
    }
}

fn unknown_table(table: &str) -> StoreError {
    StoreError::schema(format!("table '{table}' does not exist"))
}

impl SchemaCatalog for MemoryStore {
    fn columns(&self, table: &str) -> StoreFuture<'_, Vec<Column>> {
        let table = table.to_string();
        Box::pin(async move {
            self.column_fetches.fetch_add(1, Ordering::Relaxed);
            let tables = self.tables.read().await;
            tables
                .get(&table)
                .map(|t| t.columns.clone())
                .ok_or_else(|| unknown_table(&table))
        })
    }

    fn add_or_widen_column(
        &self,
        table: &str,
        name: &str,
        column_type: ColumnType,
    ) -> StoreFuture<'_, ()> {
        let table = table.to_string();
        let name = name.to_string();
        Box::pin(async move {
            let mut tables = self.tables.write().await;
            let t = tables.get_mut(&table).ok_or_else(|| unknown_table(&table))?;
            match t.columns.iter().position(|c| c.name == name) {
                Some(_) if t.frozen.contains(&name) => Err(StoreError::schema(format!(
                    "cannot convert column '{name}' to {column_type}"
                ))),
                Some(i) => {
                    let col = &mut t.columns[i];
                    tracing::debug!(table = %table, column = %name, from = %col.column_type, to = %column_type, "modify column");
                    col.column_type = column_type;
                    Ok(())
                }
                None => {
                    tracing::debug!(table = %table, column = %name, to = %column_type, "add column");
                    t.columns.push(Column::new(name, column_type));
                    Ok(())
                }
            }
        })
    }
}

impl RowTransport for MemoryStore {
    fn insert(&self, table: &str, columns: &[Column], rows: Vec<String>) -> StoreFuture<'_, ()> {
        let table = table.to_string();
        let columns = columns.to_vec();
        Box::pin(async move {
            let mut tables = self.tables.write().await;
            let t = tables.get_mut(&table).ok_or_else(|| unknown_table(&table))?;
            for col in &columns {
                match t.columns.iter().find(|c| c.name == col.name) {
                    Some(existing) if existing.column_type == col.column_type => {}
                    Some(existing) => {
                        return Err(StoreError::schema(format!(
                            "column '{}' is {}, insert declares {}",
                            col.name, existing.column_type, col.column_type
                        )));
                    }
                    None => {
                        return Err(StoreError::schema(format!("no such column '{}'", col.name)));
                    }
                }
            }
            for row in &rows {
                let fields = row.split('\t').count();
                if fields != columns.len() {
                    return Err(StoreError::format(format!(
                        "row has {fields} fields, header has {}",
                        columns.len()
                    )));
                }
            }
            t.inserts.push(InsertBatch { columns, rows });
            Ok(())
        })
    }
}
