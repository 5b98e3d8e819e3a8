use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use docflat_api::{
    Column, ColumnType, RowTransport, ScalarKind, SchemaCatalog, StoreError, StoreFuture,
};
use docflat_core::codec::{self, DecodedBatch};

// ════════════════════════════════════════════════════════════════
//  Identifiers
// ════════════════════════════════════════════════════════════════

/// Validate a ClickHouse table identifier.
/// Allowed: `^[a-zA-Z_][a-zA-Z0-9_.]*$`.
fn validate_identifier(name: &str, context: &str) -> Result<(), StoreError> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(StoreError::config(format!("{context}: identifier is empty")));
    };
    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(StoreError::config(format!(
            "{context}: invalid identifier '{name}', must start with a letter or underscore"
        )));
    }
    for ch in chars {
        if !ch.is_ascii_alphanumeric() && ch != '_' && ch != '.' {
            return Err(StoreError::config(format!(
                "{context}: invalid character '{ch}' in identifier '{name}'"
            )));
        }
    }
    Ok(())
}

/// Backquote a column name. Document keys are arbitrary text.
fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('\\', "\\\\").replace('`', "\\`"))
}

// ════════════════════════════════════════════════════════════════
//  Type mapping
// ════════════════════════════════════════════════════════════════

fn strip_wrapper<'a>(s: &'a str, wrapper: &str) -> Option<&'a str> {
    s.strip_prefix(wrapper)?.strip_prefix('(')?.strip_suffix(')')
}

/// A ClickHouse column type: its mapping onto the adapter's vocabulary plus
/// the parts of the native declaration the mapping drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChType {
    pub column_type: ColumnType,
    /// Element declared `Nullable(..)`.
    pub nullable: bool,
    /// Element declared `LowCardinality(..)`.
    pub low_cardinality: bool,
    /// Declared `UInt*`. `column_type` is the signed type the column is
    /// converted to before rows are written to it.
    pub unsigned: bool,
}

impl ChType {
    fn plain(column_type: ColumnType) -> Self {
        Self {
            column_type,
            nullable: false,
            low_cardinality: false,
            unsigned: false,
        }
    }

    /// ClickHouse spelling of `column_type` with this column's wrappers.
    /// `LowCardinality` is kept only over `String`.
    pub fn render(&self, column_type: ColumnType) -> String {
        let (kind, array) = match column_type {
            ColumnType::Scalar(kind) => (kind, false),
            ColumnType::Array(kind) => (kind, true),
        };
        let mut element = kind.to_string();
        if self.nullable {
            element = format!("Nullable({element})");
        }
        if self.low_cardinality && kind == ScalarKind::String {
            element = format!("LowCardinality({element})");
        }
        if array { format!("Array({element})") } else { element }
    }

    /// The declaration after the column is modified to `column_type`.
    fn retyped(self, column_type: ColumnType) -> Self {
        let element = match column_type {
            ColumnType::Scalar(kind) | ColumnType::Array(kind) => kind,
        };
        Self {
            column_type,
            low_cardinality: self.low_cardinality && element == ScalarKind::String,
            unsigned: false,
            ..self
        }
    }
}

/// Map a ClickHouse column type onto the adapter's vocabulary.
///
/// `Nullable` and `LowCardinality` are unwrapped and recorded; unsigned
/// integers map to the next signed width that holds them (`UInt64` to
/// `Int64`); string-like types map to `String`.
pub fn parse_ch_type(s: &str) -> Result<ChType, StoreError> {
    let s = s.trim();
    if let Some(inner) = strip_wrapper(s, "Array") {
        let element = parse_element(inner)?;
        return match element.column_type {
            ColumnType::Scalar(kind) => Ok(ChType {
                column_type: ColumnType::Array(kind),
                ..element
            }),
            ColumnType::Array(_) => Err(StoreError::schema(format!("nested array type '{s}'"))),
        };
    }
    parse_element(s)
}

fn parse_element(s: &str) -> Result<ChType, StoreError> {
    let s = s.trim();
    if let Some(inner) = strip_wrapper(s, "LowCardinality") {
        return Ok(ChType {
            low_cardinality: true,
            ..parse_element(inner)?
        });
    }
    if let Some(inner) = strip_wrapper(s, "Nullable") {
        return Ok(ChType {
            nullable: true,
            ..parse_element(inner)?
        });
    }
    if strip_wrapper(s, "Array").is_some() {
        return Err(StoreError::schema(format!("nested array type '{s}'")));
    }
    if let Ok(column_type) = s.parse::<ColumnType>() {
        return Ok(ChType::plain(column_type));
    }
    let (kind, unsigned) = match s {
        "UInt8" => (ScalarKind::Int16, true),
        "UInt16" => (ScalarKind::Int32, true),
        "UInt32" | "UInt64" => (ScalarKind::Int64, true),
        "Date32" => (ScalarKind::Date, false),
        "UUID" => (ScalarKind::String, false),
        s if s.starts_with("DateTime64(") || s.starts_with("DateTime(") => (ScalarKind::DateTime, false),
        s if s.starts_with("FixedString(") || s.starts_with("Enum8(") || s.starts_with("Enum16(") => {
            (ScalarKind::String, false)
        }
        other => {
            return Err(StoreError::schema(format!("unsupported column type '{other}'")));
        }
    };
    Ok(ChType {
        unsigned,
        ..ChType::plain(ColumnType::Scalar(kind))
    })
}

// ════════════════════════════════════════════════════════════════
//  SQL builders
// ════════════════════════════════════════════════════════════════

fn describe_sql(table: &str) -> String {
    format!("DESCRIBE TABLE {table} FORMAT TabSeparated")
}

fn add_column_sql(table: &str, name: &str, type_sql: &str) -> String {
    format!(
        "ALTER TABLE {table} ADD COLUMN IF NOT EXISTS {} {type_sql}",
        quote_identifier(name)
    )
}

fn modify_column_sql(table: &str, name: &str, type_sql: &str) -> String {
    format!(
        "ALTER TABLE {table} MODIFY COLUMN {} {type_sql}",
        quote_identifier(name)
    )
}

/// `MODIFY COLUMN` statements converting the unsigned columns among
/// `columns` to the signed types they were reported as.
fn unsigned_conversions(
    table: &str,
    columns: &[Column],
    natives: &HashMap<String, ChType>,
) -> Vec<(String, String)> {
    columns
        .iter()
        .filter_map(|c| {
            let native = natives.get(&c.name).filter(|n| n.unsigned)?;
            let sql = modify_column_sql(table, &c.name, &native.render(native.column_type));
            Some((c.name.clone(), sql))
        })
        .collect()
}

fn insert_sql(table: &str, columns: &[Column]) -> String {
    let names: Vec<String> = columns.iter().map(|c| quote_identifier(&c.name)).collect();
    format!(
        "INSERT INTO {table} ({}) FORMAT TabSeparated",
        names.join(", ")
    )
}

/// Parse `DESCRIBE TABLE … FORMAT TabSeparated` output: name and type are
/// the first two fields of each line.
fn parse_describe(body: &str) -> Result<Vec<(String, ChType)>, StoreError> {
    let mut columns = Vec::new();
    for line in body.lines() {
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split('\t');
        let (Some(name), Some(type_name)) = (fields.next(), fields.next()) else {
            return Err(StoreError::format(format!("DESCRIBE: malformed line '{line}'")));
        };
        let native = parse_ch_type(&codec::unescape(type_name))
            .map_err(|e| e.with_context(format!("column '{name}'")))?;
        columns.push((codec::unescape(name), native));
    }
    Ok(columns)
}

// ════════════════════════════════════════════════════════════════
//  ClickHouseStore
// ════════════════════════════════════════════════════════════════

/// ClickHouse over HTTP as schema catalog and row transport.
///
/// Schema: `DESCRIBE TABLE`, `ALTER TABLE … ADD COLUMN` / `MODIFY COLUMN`.
/// Rows: `INSERT … FORMAT TabSeparated` with the encoded lines as body.
///
/// The native declaration of every described column is remembered so a
/// `MODIFY COLUMN` keeps its wrappers and unsigned columns are converted to
/// their signed mapping before they are written.
pub struct ClickHouseStore {
    http: reqwest::Client,
    base_url: String,
    user: String,
    password: String,
    database: String,
    /// table → column → native declaration
    natives: Mutex<HashMap<String, HashMap<String, ChType>>>,
}

impl ClickHouseStore {
    pub fn from_config(cfg: &ClickHouseConfig) -> Result<Self, StoreError> {
        validate_identifier(&cfg.database, "database")?;
        let scheme = if cfg.tls { "https" } else { "http" };
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(cfg.accept_invalid_certs)
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .map_err(|e| StoreError::config(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: format!("{scheme}://{}:{}", cfg.host, cfg.port),
            user: cfg.user.clone(),
            password: cfg.password.clone(),
            database: cfg.database.clone(),
            natives: Mutex::new(HashMap::new()),
        })
    }

    fn natives(&self) -> MutexGuard<'_, HashMap<String, HashMap<String, ChType>>> {
        self.natives.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn native(&self, table: &str, name: &str) -> Option<ChType> {
        self.natives().get(table)?.get(name).copied()
    }

    fn set_native(&self, table: &str, name: &str, native: ChType) {
        self.natives()
            .entry(table.to_string())
            .or_default()
            .insert(name.to_string(), native);
    }

    /// Execute a SQL statement (DDL / SELECT). Body = SQL text.
    async fn exec(&self, sql: &str) -> Result<String, StoreError> {
        tracing::debug!(sql = %sql, "CH exec");
        let resp = self
            .http
            .post(&self.base_url)
            .query(&[
                ("user", self.user.as_str()),
                ("password", self.password.as_str()),
                ("database", self.database.as_str()),
            ])
            .body(sql.to_owned())
            .send()
            .await
            .map_err(|e| StoreError::io(format!("CH request: {e}")))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| StoreError::io(format!("CH read: {e}")))?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(StoreError::io(body))
        }
    }

    /// Execute an INSERT. The statement goes in the `query` URL parameter;
    /// the rows go as the POST body.
    async fn exec_insert(&self, insert_sql: &str, body: String) -> Result<(), StoreError> {
        let resp = self
            .http
            .post(&self.base_url)
            .query(&[
                ("user", self.user.as_str()),
                ("password", self.password.as_str()),
                ("database", self.database.as_str()),
                ("query", insert_sql),
            ])
            .body(body)
            .send()
            .await
            .map_err(|e| StoreError::io(format!("CH insert: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = resp.text().await.map_err(|e| StoreError::io(format!("CH read: {e}")))?;
            Err(StoreError::io(body))
        }
    }

    /// Run a SELECT and decode its rows. Decode warnings stay on the rows.
    pub async fn query_rows(&self, select: &str) -> Result<DecodedBatch, StoreError> {
        let sql = format!("{select} FORMAT TabSeparatedWithNamesAndTypes");
        let body = self.exec(&sql).await?;
        let ch_type = |t: &str| parse_ch_type(t).map(|n| n.column_type).map_err(|e| e.message);
        codec::decode_body_with(&body, ch_type).map_err(|e| StoreError::format(e.to_string()))
    }
}

impl SchemaCatalog for ClickHouseStore {
    fn columns(&self, table: &str) -> StoreFuture<'_, Vec<Column>> {
        let table = table.to_string();
        Box::pin(async move {
            validate_identifier(&table, "table")?;
            let body = self.exec(&describe_sql(&table)).await?;
            let described = parse_describe(&body)?;
            let columns = described
                .iter()
                .map(|(name, native)| Column::new(name.clone(), native.column_type))
                .collect();
            self.natives().insert(table, described.into_iter().collect());
            Ok(columns)
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
            validate_identifier(&table, "table")?;
            let native = match self.native(&table, &name) {
                Some(native) => {
                    let sql = modify_column_sql(&table, &name, &native.render(column_type));
                    self.exec(&sql).await?;
                    native.retyped(column_type)
                }
                None => {
                    // ADD is a no-op for an existing column; MODIFY then settles the type.
                    let type_sql = column_type.to_string();
                    self.exec(&add_column_sql(&table, &name, &type_sql)).await?;
                    self.exec(&modify_column_sql(&table, &name, &type_sql)).await?;
                    ChType::plain(column_type)
                }
            };
            self.set_native(&table, &name, native);
            Ok(())
        })
    }
}

impl RowTransport for ClickHouseStore {
    fn insert(&self, table: &str, columns: &[Column], rows: Vec<String>) -> StoreFuture<'_, ()> {
        let table = table.to_string();
        let sql = insert_sql(&table, columns);
        let conversions = match self.natives().get(&table) {
            Some(natives) => unsigned_conversions(&table, columns, natives),
            None => Vec::new(),
        };
        Box::pin(async move {
            validate_identifier(&table, "table")?;
            if rows.is_empty() {
                return Ok(());
            }
            for (name, modify) in conversions {
                tracing::info!(table = %table, column = %name, "converting unsigned column");
                self.exec(&modify).await?;
                if let Some(native) = self.native(&table, &name) {
                    self.set_native(&table, &name, native.retyped(native.column_type));
                }
            }
            let mut body = rows.join("\n");
            body.push('\n');
            self.exec_insert(&sql, body).await
        })
    }
}

// ════════════════════════════════════════════════════════════════
//  Config
// ════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ClickHouseConfig {
    // ── Connection ──
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default)]
    pub tls: bool,
    #[serde(default)]
    pub accept_invalid_certs: bool,

    // ── Timeouts ──
    /// HTTP request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: default_user(),
            password: String::new(),
            database: default_database(),
            tls: false,
            accept_invalid_certs: false,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_host() -> String { "localhost".into() }
fn default_port() -> u16 { 8123 }
fn default_user() -> String { "default".into() }
fn default_database() -> String { "default".into() }
fn default_request_timeout_secs() -> u64 { 30 }
