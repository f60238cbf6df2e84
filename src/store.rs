//! Relational-store seam and the bundled SQLite implementation
//!
//! [`RelationalStore`] is what the orchestrator's load phase talks to. The
//! bundled [`SqliteStore`] persists into a local SQLite file (or memory, for
//! tests); production deployments can implement the trait over any other
//! engine.

use crate::error::{Error, LoadError, Result};
use crate::transform::TargetSchema;
use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// Operations the load phase needs from a relational store
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Execute a statement that returns no rows
    async fn execute(&self, sql: &str) -> Result<()>;

    /// Create `staging_table` with the schema of `base_table` unless it exists
    async fn ensure_staging_table(&self, staging_table: &str, base_table: &str) -> Result<()>;

    /// Column names of a table, in table order
    async fn get_columns(&self, table: &str) -> Result<TargetSchema>;

    /// Load a processed CSV file (header row first) into a staging table
    ///
    /// The whole file loads in one transaction; a malformed row aborts the
    /// load without leaving partial rows behind.
    async fn bulk_load(&self, csv_path: &Path, table: &str) -> Result<u64>;
}

/// SQLite-backed [`RelationalStore`]
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) a SQLite database file
    pub async fn connect(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(Error::Sqlx)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options).await?;
        debug!(path = %path.display(), "connected to sqlite store");
        Ok(Self { pool })
    }

    /// In-memory store, primarily for tests
    ///
    /// Pinned to a single pooled connection: every connection to
    /// `sqlite::memory:` would otherwise open its own empty database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(Error::Sqlx)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Row count of a table
    pub async fn row_count(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }
}

#[async_trait]
impl RelationalStore for SqliteStore {
    async fn execute(&self, sql: &str) -> Result<()> {
        sqlx::query(sql)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Load(LoadError::Statement(e.to_string())))?;
        Ok(())
    }

    async fn ensure_staging_table(&self, staging_table: &str, base_table: &str) -> Result<()> {
        // WHERE 0 copies the column layout without copying rows.
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} AS SELECT * FROM {} WHERE 0",
            quote_ident(staging_table),
            quote_ident(base_table),
        );
        self.execute(&sql).await?;
        debug!(staging_table, base_table, "ensured staging table");
        Ok(())
    }

    async fn get_columns(&self, table: &str) -> Result<TargetSchema> {
        let sql = format!("PRAGMA table_info({})", quote_ident(table));
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        let columns = rows
            .iter()
            .map(|row| row.try_get::<String, _>("name"))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(TargetSchema { columns })
    }

    async fn bulk_load(&self, csv_path: &Path, table: &str) -> Result<u64> {
        let content = tokio::fs::read_to_string(csv_path).await?;
        let mut lines = content.lines().filter(|line| !line.trim().is_empty());

        let header = lines
            .next()
            .ok_or_else(|| LoadError::EmptySource(csv_path.to_path_buf()))?;
        let columns = split_csv_line(header);
        if columns.is_empty() {
            return Err(LoadError::EmptySource(csv_path.to_path_buf()).into());
        }

        let column_list = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; columns.len()].join(", ");
        let insert_sql = format!(
            "INSERT INTO {} ({column_list}) VALUES ({placeholders})",
            quote_ident(table),
        );

        let mut tx = self.pool.begin().await?;
        let mut inserted: u64 = 0;
        for (line_no, line) in lines.enumerate() {
            let fields = split_csv_line(line);
            if fields.len() != columns.len() {
                return Err(Error::Load(LoadError::BulkLoad {
                    path: csv_path.to_path_buf(),
                    table: table.to_string(),
                    reason: format!(
                        "row {} has {} fields, header has {}",
                        line_no + 2,
                        fields.len(),
                        columns.len()
                    ),
                }));
            }
            let mut query = sqlx::query(&insert_sql);
            for field in &fields {
                query = query.bind(field);
            }
            query.execute(&mut *tx).await.map_err(|e| {
                Error::Load(LoadError::BulkLoad {
                    path: csv_path.to_path_buf(),
                    table: table.to_string(),
                    reason: e.to_string(),
                })
            })?;
            inserted += 1;
        }
        tx.commit().await?;

        info!(
            path = %csv_path.display(),
            table,
            rows = inserted,
            "bulk load complete"
        );
        Ok(inserted)
    }
}

/// Double-quote an identifier, escaping embedded quotes
fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Split one CSV line honoring double-quoted fields and doubled-quote escapes
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut field));
            }
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
}
