//! Batch ingestion: flatten → type → evolve schema → encode → insert.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use docflat_api::{
    Column, ColumnType, Document, FlatRow, FlatValue, RowTransport, Scalar, SchemaCatalog,
};

use crate::clock::Clock;
use crate::codec;
use crate::config::DriverConfig;
use crate::error::IngestError;
use crate::flatten::flatten_with;
use crate::infer::{infer_type, same_shape, untyped_default};
use crate::types::{unify, unify_all};

// ════════════════════════════════════════════════════════════════
//  Report
// ════════════════════════════════════════════════════════════════

/// A column added or widened for a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnChange {
    pub name: String,
    /// `None` for a newly added column.
    pub from: Option<ColumnType>,
    pub to: ColumnType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Rows handed to the transport.
    pub rows: usize,
    /// Insert layout.
    pub columns: Vec<Column>,
    pub changes: Vec<ColumnChange>,
    /// Columns whose values were re-routed to `<column>_json` text.
    pub json_fallbacks: Vec<String>,
    /// Whether the schema snapshot was fetched for this batch.
    pub schema_refreshed: bool,
}

// ════════════════════════════════════════════════════════════════
//  Schema cache
// ════════════════════════════════════════════════════════════════

struct CachedSchema {
    columns: Vec<Column>,
    fetched_at: Instant,
}

// ════════════════════════════════════════════════════════════════
//  IngestionDriver
// ════════════════════════════════════════════════════════════════

/// Stores schema-free documents into flat tables.
///
/// Owns a per-table schema snapshot cache. A snapshot is reused for
/// `schema_update_time` seconds; `0` re-fetches before every batch. The
/// cache lock is never held across an `.await`, so one driver can serve
/// many tables concurrently behind an `Arc`.
pub struct IngestionDriver {
    catalog: Arc<dyn SchemaCatalog>,
    transport: Arc<dyn RowTransport>,
    clock: Arc<dyn Clock>,
    config: DriverConfig,
    cache: Mutex<HashMap<String, CachedSchema>>,
}

impl IngestionDriver {
    pub fn new(
        catalog: Arc<dyn SchemaCatalog>,
        transport: Arc<dyn RowTransport>,
        clock: Arc<dyn Clock>,
        config: DriverConfig,
    ) -> Result<Self, IngestError> {
        config.validate()?;
        Ok(Self {
            catalog,
            transport,
            clock,
            config,
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Drop the cached snapshot of `table`; the next batch re-fetches it.
    pub fn invalidate(&self, table: &str) {
        self.lock_cache().remove(table);
    }

    /// Cached snapshot of `table`, regardless of age.
    pub fn cached_columns(&self, table: &str) -> Option<Vec<Column>> {
        self.lock_cache().get(table).map(|c| c.columns.clone())
    }

    /// Validate JSON inputs as documents, then store them.
    pub async fn store_json(
        &self,
        table: &str,
        values: Vec<serde_json::Value>,
    ) -> Result<BatchReport, IngestError> {
        let docs = values
            .into_iter()
            .map(Document::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        self.store_documents(table, &docs).await
    }

    /// Store one batch of documents into `table`.
    ///
    /// Adds or widens whatever columns the batch needs before inserting.
    /// A failed schema change fails the whole batch; nothing is inserted.
    pub async fn store_documents(
        &self,
        table: &str,
        docs: &[Document],
    ) -> Result<BatchReport, IngestError> {
        let mut report = BatchReport::default();
        if docs.is_empty() {
            return Ok(report);
        }

        let mut rows: Vec<FlatRow> = docs
            .iter()
            .map(|d| flatten_with(d, &self.config.flatten))
            .collect();

        let (snapshot, refreshed) = self.snapshot(table).await?;
        report.schema_refreshed = refreshed;

        let plan = loop {
            let observed = observe(&rows);
            let (plan, conflicts) = reconcile(&observed, &snapshot);
            if conflicts.is_empty() {
                break plan;
            }
            for name in conflicts {
                let target = self.config.flatten.json_column(&name);
                tracing::warn!(
                    table = %table,
                    column = %name,
                    target = %target,
                    "incompatible column shapes, storing values as JSON text"
                );
                reroute_to_json(&mut rows, &name, &target);
                report.json_fallbacks.push(name);
            }
        };

        for change in &plan.changes {
            self.apply_change(table, change).await?;
        }
        report.changes = plan.changes;

        let mut encoded = Vec::with_capacity(rows.len());
        for row in &rows {
            encoded.push(codec::encode_row(&plan.columns, row)?);
        }

        report.rows = encoded.len();
        for chunk in encoded.chunks(self.config.insert_batch_size) {
            self.transport
                .insert(table, &plan.columns, chunk.to_vec())
                .await
                .map_err(|source| IngestError::Transport {
                    table: table.to_string(),
                    source,
                })?;
        }
        report.columns = plan.columns;

        tracing::info!(
            table = %table,
            rows = report.rows,
            columns = report.columns.len(),
            changes = report.changes.len(),
            json_fallbacks = report.json_fallbacks.len(),
            "stored batch"
        );
        Ok(report)
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, HashMap<String, CachedSchema>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current snapshot of `table`, fetched when missing or older than the TTL.
    async fn snapshot(&self, table: &str) -> Result<(Vec<Column>, bool), IngestError> {
        let ttl = self.config.schema_ttl();
        if !ttl.is_zero() {
            let now = self.clock.now();
            let cache = self.lock_cache();
            if let Some(cached) = cache.get(table) {
                if now.saturating_duration_since(cached.fetched_at) < ttl {
                    tracing::debug!(table = %table, "schema cache hit");
                    return Ok((cached.columns.clone(), false));
                }
            }
        }

        tracing::debug!(table = %table, "fetching table schema");
        let columns = self
            .catalog
            .columns(table)
            .await
            .map_err(|source| IngestError::SchemaFetch {
                table: table.to_string(),
                source,
            })?;
        self.lock_cache().insert(
            table.to_string(),
            CachedSchema {
                columns: columns.clone(),
                fetched_at: self.clock.now(),
            },
        );
        Ok((columns, true))
    }

    async fn apply_change(&self, table: &str, change: &ColumnChange) -> Result<(), IngestError> {
        match change.from {
            Some(from) => tracing::info!(
                table = %table, column = %change.name, from = %from, to = %change.to,
                "widening column"
            ),
            None => tracing::info!(
                table = %table, column = %change.name, to = %change.to,
                "adding column"
            ),
        }

        if let Err(source) = self
            .catalog
            .add_or_widen_column(table, &change.name, change.to)
            .await
        {
            // The table may be half-evolved; re-read it next time.
            self.invalidate(table);
            return Err(IngestError::SchemaEvolution {
                table: table.to_string(),
                column: change.name.clone(),
                column_type: change.to,
                source,
            });
        }

        let mut cache = self.lock_cache();
        if let Some(cached) = cache.get_mut(table) {
            match cached.columns.iter_mut().find(|c| c.name == change.name) {
                Some(col) => col.column_type = change.to,
                None => cached.columns.push(Column::new(change.name.clone(), change.to)),
            }
        }
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════
//  Column planning
// ════════════════════════════════════════════════════════════════

/// What a batch says about one column.
struct Observed {
    name: String,
    /// Unified type of all typed values.
    inferred: Option<ColumnType>,
    /// First non-null value, for shape checks and the untyped default.
    sample: Option<FlatValue>,
    /// Values disagree on array vs scalar.
    conflict: bool,
}

/// Columns in first-seen order.
fn observe(rows: &[FlatRow]) -> Vec<Observed> {
    let mut columns: Vec<(Observed, Vec<ColumnType>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for row in rows {
        for (name, value) in row.iter() {
            let i = *index.entry(name.to_string()).or_insert_with(|| {
                let col = Observed {
                    name: name.to_string(),
                    inferred: None,
                    sample: None,
                    conflict: false,
                };
                columns.push((col, Vec::new()));
                columns.len() - 1
            });
            let (col, types) = &mut columns[i];

            if matches!(value, FlatValue::Scalar(Scalar::Null)) {
                continue;
            }
            let is_array = matches!(value, FlatValue::Array(_));
            match col.sample.as_ref().map(|s| matches!(s, FlatValue::Array(_))) {
                Some(sample_is_array) if sample_is_array != is_array => col.conflict = true,
                Some(_) => {}
                None => col.sample = Some(value.clone()),
            }
            types.extend(infer_type(value));
        }
    }

    columns
        .into_iter()
        .map(|(mut col, types)| {
            match unify_all(types) {
                Ok(inferred) => col.inferred = inferred,
                Err(_) => col.conflict = true,
            }
            col
        })
        .collect()
}

struct Plan {
    columns: Vec<Column>,
    changes: Vec<ColumnChange>,
}

/// Required type per column against `snapshot`. Returns the plan and the
/// names of columns that cannot be stored under any single type.
fn reconcile(observed: &[Observed], snapshot: &[Column]) -> (Plan, Vec<String>) {
    let mut plan = Plan {
        columns: Vec::with_capacity(observed.len()),
        changes: Vec::new(),
    };
    let mut conflicts = Vec::new();

    for col in observed {
        if col.conflict {
            conflicts.push(col.name.clone());
            continue;
        }
        let current = snapshot
            .iter()
            .find(|c| c.name == col.name)
            .map(|c| c.column_type);

        let required = match (current, col.inferred) {
            (None, Some(t)) => t,
            (None, None) => col
                .sample
                .as_ref()
                .map(untyped_default)
                .unwrap_or(ColumnType::Scalar(docflat_api::ScalarKind::String)),
            (Some(c), None) => c,
            (Some(c), Some(t)) => match unify(c, t) {
                Ok(u) => u,
                Err(_) => {
                    conflicts.push(col.name.clone());
                    continue;
                }
            },
        };

        if let Some(sample) = &col.sample {
            if !same_shape(sample, required) {
                conflicts.push(col.name.clone());
                continue;
            }
        }

        if current != Some(required) {
            plan.changes.push(ColumnChange {
                name: col.name.clone(),
                from: current,
                to: required,
            });
        }
        plan.columns.push(Column::new(col.name.clone(), required));
    }
    (plan, conflicts)
}

/// Replace `name` in every row with the JSON text of its value under `target`.
/// Returns the number of rows where `target` already held a value, which the
/// JSON text replaces.
fn reroute_to_json(rows: &mut [FlatRow], name: &str, target: &str) -> usize {
    let mut collisions = 0;
    for row in rows {
        let Some(value) = row.remove(name) else {
            continue;
        };
        let text = match value {
            FlatValue::Scalar(Scalar::Null) => Scalar::Null,
            other => match serde_json::to_string(&other) {
                Ok(text) => Scalar::String(text),
                Err(e) => {
                    tracing::warn!(column = %name, error = %e, "JSON text rendering failed");
                    Scalar::Null
                }
            },
        };
        if row.insert(target, FlatValue::Scalar(text)).is_some() {
            collisions += 1;
        }
    }
    if collisions > 0 {
        tracing::warn!(
            column = %name,
            target = %target,
            rows = collisions,
            "flat column name collision, JSON text kept"
        );
    }
    collisions
}
