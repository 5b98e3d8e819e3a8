use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use docflat_api::{RowTransport, SchemaCatalog};
use docflat_core::{BatchReport, IngestionDriver, SystemClock, codec};
use store_clickhouse::ClickHouseStore;
use store_memory::{InsertBatch, MemoryStore};

use crate::config::{LoadArgs, LoaderConfig};
use crate::error::LoaderError;

pub async fn run(config_path: &str, args: LoadArgs) -> Result<(), LoaderError> {
    let config = if args.dry_run && !std::path::Path::new(config_path).exists() {
        LoaderConfig::default()
    } else {
        LoaderConfig::load(config_path)?
    };
    tracing::info!(config = %config_path, table = %args.table, dry_run = args.dry_run, "docflat-loader starting");

    let input = open_input(args.input.as_deref()).await?;

    if args.dry_run {
        let store = Arc::new(MemoryStore::new());
        store.create_table(&args.table, Vec::new()).await;
        let driver = build_driver(store.clone(), store.clone(), config)?;
        let total = load(&driver, &args.table, input).await?;

        print!("{}", render_inserts(&store.inserts(&args.table).await));
        tracing::info!(table = %args.table, rows = total, "dry run complete");
        return Ok(());
    }

    let store = Arc::new(ClickHouseStore::from_config(&config.clickhouse)?);
    let driver = build_driver(store.clone(), store, config)?;
    let total = load(&driver, &args.table, input).await?;
    tracing::info!(table = %args.table, rows = total, "load complete");
    Ok(())
}

/// Each insert as `TabSeparatedWithNamesAndTypes`: its own names and types
/// lines, then its rows.
fn render_inserts(batches: &[InsertBatch]) -> String {
    let mut out = String::new();
    for batch in batches {
        out.push_str(&codec::encode_header(&batch.columns));
        for row in &batch.rows {
            out.push_str(row);
            out.push('\n');
        }
    }
    out
}

fn build_driver(
    catalog: Arc<dyn SchemaCatalog>,
    transport: Arc<dyn RowTransport>,
    config: LoaderConfig,
) -> Result<IngestionDriver, LoaderError> {
    Ok(IngestionDriver::new(
        catalog,
        transport,
        Arc::new(SystemClock),
        config.driver,
    )?)
}

async fn open_input(path: Option<&str>) -> Result<Box<dyn AsyncBufRead + Unpin + Send>, LoaderError> {
    match path {
        Some(path) => {
            let file = tokio::fs::File::open(path).await?;
            Ok(Box::new(BufReader::new(file)))
        }
        None => Ok(Box::new(BufReader::new(tokio::io::stdin()))),
    }
}

/// Read NDJSON from `input` and store it in batches of `insert_batch_size`
/// documents. Blank lines are skipped. Returns the number of rows stored.
async fn load(
    driver: &IngestionDriver,
    table: &str,
    input: Box<dyn AsyncBufRead + Unpin + Send>,
) -> Result<usize, LoaderError> {
    let batch_size = driver.config().insert_batch_size;
    let mut lines = input.lines();
    let mut batch = Vec::with_capacity(batch_size);
    let mut line_no = 0;
    let mut total = 0;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let value = serde_json::from_str(&line).map_err(|source| LoaderError::Parse {
            line: line_no,
            source,
        })?;
        batch.push(value);
        if batch.len() == batch_size {
            total += flush(driver, table, &mut batch).await?.rows;
        }
    }
    if !batch.is_empty() {
        total += flush(driver, table, &mut batch).await?.rows;
    }
    Ok(total)
}

async fn flush(
    driver: &IngestionDriver,
    table: &str,
    batch: &mut Vec<serde_json::Value>,
) -> Result<BatchReport, LoaderError> {
    let report = driver.store_json(table, std::mem::take(batch)).await?;
    for change in &report.changes {
        tracing::debug!(table = %table, column = %change.name, to = %change.to, "column changed");
    }
    Ok(report)
}
