//! SQLite implementation of the catalog traits.
//!
//! Mirrors the three production tables (`datasets`, `production_status`,
//! `run`) closely enough for local operation and integration tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prodflow_protocol::{CatalogFileRecord, FileStatus, ProductionState, RunInfo, StatusRecord};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{CatalogError, Result};
use crate::query::{FileQuery, RunFilter, SegmentFilter, StatusQuery, StatusUpdate};
use crate::traits::{Catalog, FileCatalog, RunCatalog, StatusCatalog};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed file, status and run catalog.
#[derive(Clone)]
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    /// Open (creating if missing) the catalog database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| {
                CatalogError::unavailable(format!("cannot open {}: {}", path.display(), e))
            })?;

        let catalog = Self { pool };
        catalog.initialize_tables().await?;
        info!(path = %path.display(), "Opened SQLite catalog");
        Ok(catalog)
    }

    /// Private in-memory database; one connection so every query sees the
    /// same data.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| CatalogError::unavailable(e.to_string()))?;
        let catalog = Self { pool };
        catalog.initialize_tables().await?;
        Ok(catalog)
    }

    /// Close the pool; later calls fail with a connection-level error.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn initialize_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS datasets (
                filename TEXT PRIMARY KEY,
                dsttype TEXT NOT NULL DEFAULT '',
                runnumber INTEGER NOT NULL,
                segment INTEGER NOT NULL,
                daqhost TEXT,
                tag TEXT,
                status INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_datasets_run ON datasets(runnumber, segment)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS production_status (
                filename TEXT PRIMARY KEY,
                dsttype TEXT NOT NULL,
                run INTEGER NOT NULL,
                segment INTEGER NOT NULL,
                status TEXT NOT NULL,
                submitted TEXT,
                ended TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS run (
                runnumber INTEGER PRIMARY KEY,
                runtype TEXT NOT NULL,
                events INTEGER NOT NULL DEFAULT 0,
                duration_secs INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Add or replace one row of the `run` table.
    pub async fn insert_run(&self, run: &RunInfo) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO run (runnumber, runtype, events, duration_secs) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(i64::from(run.run))
        .bind(&run.run_type)
        .bind(to_i64(run.events)?)
        .bind(to_i64(run.duration_secs)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Add or replace one raw or untagged row of the `datasets` table.
    pub async fn insert_file(&self, record: &CatalogFileRecord, tag: Option<&str>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO datasets (filename, dsttype, runnumber, segment, daqhost, tag, status)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&record.filename)
        .bind(&record.dataset_type)
        .bind(i64::from(record.run))
        .bind(i64::from(record.segment))
        .bind(record.detector_host.as_deref())
        .bind(tag)
        .bind(record.status.code())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| CatalogError::query(format!("{value} exceeds i64")))
}

fn to_u32(value: i64, column: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| CatalogError::query(format!("{column} value {value} is out of range")))
}

fn push_run_filter(builder: &mut QueryBuilder<'_, Sqlite>, column: &str, runs: &RunFilter) {
    match runs {
        RunFilter::All => {}
        RunFilter::Single(run) => {
            builder.push(format!(" AND {column} = "));
            builder.push_bind(i64::from(*run));
        }
        RunFilter::Range { first, last } => {
            builder.push(format!(" AND {column} BETWEEN "));
            builder.push_bind(i64::from(*first));
            builder.push(" AND ");
            builder.push_bind(i64::from(*last));
        }
        RunFilter::List(list) if list.is_empty() => {
            builder.push(" AND 0");
        }
        RunFilter::List(list) => {
            builder.push(format!(" AND {column} IN ("));
            let mut separated = builder.separated(", ");
            for run in list {
                separated.push_bind(i64::from(*run));
            }
            separated.push_unseparated(")");
        }
    }
}

fn push_in_list<'a>(builder: &mut QueryBuilder<'a, Sqlite>, column: &str, values: &'a [String]) {
    builder.push(format!("{column} IN ("));
    let mut separated = builder.separated(", ");
    for value in values {
        separated.push_bind(value.as_str());
    }
    separated.push_unseparated(")");
}

fn push_file_filter<'a>(builder: &mut QueryBuilder<'a, Sqlite>, query: &'a FileQuery) {
    builder.push(" WHERE (0");
    if !query.dataset_types.is_empty() {
        builder.push(" OR (");
        push_in_list(builder, "dsttype", &query.dataset_types);
        if let Some(tag) = &query.tag {
            builder.push(" AND tag = ");
            builder.push_bind(tag.as_str());
        }
        builder.push(")");
    }
    if !query.host_tokens.is_empty() {
        builder.push(" OR ");
        push_in_list(builder, "daqhost", &query.host_tokens);
    }
    builder.push(")");

    push_run_filter(builder, "runnumber", &query.runs);
    if let SegmentFilter::Only(segment) = query.segments {
        builder.push(" AND segment = ");
        builder.push_bind(i64::from(segment));
    }
}

fn file_from_row(row: &SqliteRow) -> Result<CatalogFileRecord> {
    Ok(CatalogFileRecord {
        filename: row.try_get("filename")?,
        dataset_type: row.try_get("dsttype")?,
        run: to_u32(row.try_get("runnumber")?, "runnumber")?,
        segment: to_u32(row.try_get("segment")?, "segment")?,
        detector_host: row.try_get("daqhost")?,
        status: FileStatus::from_code(row.try_get("status")?),
    })
}

fn status_from_row(row: &SqliteRow) -> Result<StatusRecord> {
    let state: String = row.try_get("status")?;
    Ok(StatusRecord {
        filename: row.try_get("filename")?,
        run: to_u32(row.try_get("run")?, "run")?,
        segment: to_u32(row.try_get("segment")?, "segment")?,
        state: ProductionState::from_str(&state).map_err(CatalogError::Query)?,
        submitted: row.try_get::<Option<DateTime<Utc>>, _>("submitted")?,
        ended: row.try_get::<Option<DateTime<Utc>>, _>("ended")?,
    })
}

#[async_trait]
impl Catalog for SqliteCatalog {
    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| CatalogError::unavailable(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl FileCatalog for SqliteCatalog {
    async fn query_files(&self, query: &FileQuery) -> Result<Vec<CatalogFileRecord>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder = QueryBuilder::new(
            "SELECT filename, dsttype, runnumber, segment, daqhost, status FROM datasets",
        );
        push_file_filter(&mut builder, query);

        let rows = builder.build().fetch_all(&self.pool).await?;
        let records = rows.iter().map(file_from_row).collect::<Result<Vec<_>>>()?;
        debug!(rows = records.len(), runs = ?query.runs, "query_files");
        Ok(records)
    }

    async fn list_runs(&self, query: &FileQuery) -> Result<Vec<u32>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder = QueryBuilder::new("SELECT DISTINCT runnumber FROM datasets");
        push_file_filter(&mut builder, query);
        builder.push(" ORDER BY runnumber");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| to_u32(row.try_get("runnumber")?, "runnumber"))
            .collect()
    }

    async fn register_files(&self, tag: &str, records: &[CatalogFileRecord]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;
        for record in records {
            let result = sqlx::query(
                r#"
                INSERT OR REPLACE INTO datasets (filename, dsttype, runnumber, segment, daqhost, tag, status)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(&record.filename)
            .bind(&record.dataset_type)
            .bind(i64::from(record.run))
            .bind(i64::from(record.segment))
            .bind(record.detector_host.as_deref())
            .bind(tag)
            .bind(record.status.code())
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected();
        }
        tx.commit().await?;
        Ok(written)
    }
}

#[async_trait]
impl StatusCatalog for SqliteCatalog {
    async fn query_status(&self, query: &StatusQuery) -> Result<Vec<StatusRecord>> {
        let mut builder = QueryBuilder::new(
            "SELECT filename, run, segment, status, submitted, ended FROM production_status WHERE substr(filename, 1, ",
        );
        builder.push_bind(query.filename_prefix.len() as i64);
        builder.push(") = ");
        builder.push_bind(query.filename_prefix.as_str());
        push_run_filter(&mut builder, "run", &query.runs);

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(status_from_row).collect()
    }

    async fn upsert_status(&self, update: &StatusUpdate) -> Result<()> {
        let (submitted, ended) = match update.state {
            ProductionState::Submitting | ProductionState::Submitted => {
                (Some(update.timestamp), None)
            }
            ProductionState::Finished | ProductionState::Failed | ProductionState::Evicted => {
                (None, Some(update.timestamp))
            }
            _ => (None, None),
        };

        sqlx::query(
            r#"
            INSERT INTO production_status (filename, dsttype, run, segment, status, submitted, ended)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(filename) DO UPDATE SET
                status = excluded.status,
                submitted = COALESCE(excluded.submitted, production_status.submitted),
                ended = excluded.ended
            "#,
        )
        .bind(&update.filename)
        .bind(&update.dsttype)
        .bind(i64::from(update.run))
        .bind(i64::from(update.segment))
        .bind(update.state.as_str())
        .bind(submitted)
        .bind(ended)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_status(&self, filenames: &[String]) -> Result<u64> {
        if filenames.is_empty() {
            return Ok(0);
        }
        let mut builder = QueryBuilder::new("DELETE FROM production_status WHERE ");
        push_in_list(&mut builder, "filename", filenames);
        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RunCatalog for SqliteCatalog {
    async fn query_runs(&self, runs: &RunFilter) -> Result<Vec<RunInfo>> {
        let mut builder = QueryBuilder::new(
            "SELECT runnumber, runtype, events, duration_secs FROM run WHERE 1",
        );
        push_run_filter(&mut builder, "runnumber", runs);
        builder.push(" ORDER BY runnumber");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                let events: i64 = row.try_get("events")?;
                let duration: i64 = row.try_get("duration_secs")?;
                Ok(RunInfo {
                    run: to_u32(row.try_get("runnumber")?, "runnumber")?,
                    run_type: row.try_get("runtype")?,
                    events: u64::try_from(events).unwrap_or(0),
                    duration_secs: u64::try_from(duration).unwrap_or(0),
                })
            })
            .collect()
    }
}
