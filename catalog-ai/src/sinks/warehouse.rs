//! Warehouse persistence
//!
//! Flattened prediction rows are written to a SQLite file standing in for the
//! analytics warehouse. `dataset` and `table` map to one SQLite table named
//! `<dataset>__<table>`; the schema is derived from the first row on first
//! write. Each call is one transaction.

use super::SinkError;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use tokio::sync::OnceCell;

/// One flattened warehouse row (column → scalar value)
pub type WarehouseRow = serde_json::Map<String, Value>;

/// Writes batches of rows into a named table
#[async_trait]
pub trait WarehouseSink: Send + Sync {
    async fn write_table(&self, dataset: &str, table: &str, rows: &[WarehouseRow]) -> Result<(), SinkError>;
}

/// SQLite-backed warehouse sink
///
/// The database file (and its parent directory) is created on first write.
pub struct SqliteWarehouseSink {
    db_path: PathBuf,
    pool: OnceCell<SqlitePool>,
}

impl SqliteWarehouseSink {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            pool: OnceCell::new(),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Connection pool, opened on first use
    pub async fn pool(&self) -> Result<&SqlitePool, SinkError> {
        self.pool
            .get_or_try_init(|| async {
                if let Some(parent) = self.db_path.parent() {
                    if !parent.as_os_str().is_empty() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                }
                let db_url = format!("sqlite://{}?mode=rwc", self.db_path.display());
                let pool = SqlitePoolOptions::new()
                    .max_connections(4)
                    .connect(&db_url)
                    .await?;
                sqlx::query("PRAGMA busy_timeout = 5000")
                    .execute(&pool)
                    .await?;
                tracing::info!("Opened warehouse database: {}", self.db_path.display());
                Ok::<SqlitePool, SinkError>(pool)
            })
            .await
    }
}

#[async_trait]
impl WarehouseSink for SqliteWarehouseSink {
    async fn write_table(&self, dataset: &str, table: &str, rows: &[WarehouseRow]) -> Result<(), SinkError> {
        let Some(first) = rows.first() else {
            return Ok(());
        };

        let table_name = table_name(dataset, table)?;
        let columns: Vec<&str> = first.keys().map(String::as_str).collect();
        for column in &columns {
            check_identifier(column)?;
        }

        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;

        let definition = columns
            .iter()
            .map(|column| format!("\"{}\" {}", column, column_type(column, first.get(*column))))
            .collect::<Vec<_>>()
            .join(", ");
        sqlx::query(&format!("CREATE TABLE IF NOT EXISTS \"{}\" ({})", table_name, definition))
            .execute(&mut *tx)
            .await?;

        let column_list = columns
            .iter()
            .map(|column| format!("\"{}\"", column))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; columns.len()].join(", ");
        let insert_sql = format!(
            "INSERT INTO \"{}\" ({}) VALUES ({})",
            table_name, column_list, placeholders
        );

        for row in rows {
            let mut query = sqlx::query(&insert_sql);
            for column in &columns {
                query = match row.get(*column) {
                    None | Some(Value::Null) => query.bind(None::<String>),
                    Some(Value::Number(number)) => query.bind(number.as_f64()),
                    Some(Value::Bool(flag)) => query.bind(*flag),
                    Some(Value::String(text)) => query.bind(text.clone()),
                    Some(other) => query.bind(other.to_string()),
                };
            }
            query.execute(&mut *tx).await?;
        }

        tx.commit().await?;
        tracing::debug!(table = %table_name, rows = rows.len(), "Wrote warehouse rows");
        Ok(())
    }
}

/// `<dataset>__<table>` with `-` and `.` folded to `_`
pub fn table_name(dataset: &str, table: &str) -> Result<String, SinkError> {
    let fold = |s: &str| s.replace(['-', '.'], "_");
    let name = format!("{}__{}", fold(dataset), fold(table));
    check_identifier(&name)?;
    Ok(name)
}

fn check_identifier(name: &str) -> Result<(), SinkError> {
    let valid = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SinkError::InvalidName(name.to_string()))
    }
}

fn column_type(column: &str, sample: Option<&Value>) -> &'static str {
    if column.ends_with("_confidence") {
        return "REAL";
    }
    match sample {
        Some(Value::Number(_)) => "REAL",
        Some(Value::Bool(_)) => "INTEGER",
        _ => "TEXT",
    }
}
