//! End-to-end pipeline tests with the bundled SQLite store
//!
//! A scripted portal driver writes exports straight into the download
//! directory; everything downstream (watch, transform, load, relocate) runs
//! for real against an in-memory SQLite database.
//!
//! These tests run on the real clock: sqlite connections are established off
//! the tokio timer, and a paused clock would auto-advance past the pool's
//! acquire timeout before the connection lands. The scripted driver exports
//! synchronously, so only the watcher's stabilization delay is actually
//! waited out.

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use chrono::NaiveDate;
use portal_etl::{
    Config, EntityId, Error, EtlOrchestrator, ExportFormat, Phase, PortalDriver,
    RecordTransformer, RelationalStore, ReportType, Result, RunMode, SqliteStore, TargetSchema,
};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Driver that immediately "exports" a canned CSV for the selected report
struct ScriptedDriver {
    download_dir: PathBuf,
    current: Mutex<Option<String>>,
}

#[async_trait]
impl PortalDriver for ScriptedDriver {
    async fn open(&self) -> Result<()> {
        Ok(())
    }

    async fn authenticate(&self) -> Result<()> {
        Ok(())
    }

    async fn navigate(&self, _section: &str) -> Result<()> {
        Ok(())
    }

    async fn select_report(&self, token: &str) -> Result<()> {
        *self.current.lock().unwrap() = Some(token.to_string());
        Ok(())
    }

    async fn set_date_range(&self, _from: NaiveDate, _to: NaiveDate) -> Result<()> {
        Ok(())
    }

    async fn set_month_range(&self, _from: NaiveDate, _to: NaiveDate) -> Result<()> {
        Ok(())
    }

    async fn run_report(&self) -> Result<()> {
        Ok(())
    }

    async fn export(&self, _format: ExportFormat) -> Result<()> {
        let token = self.current.lock().unwrap().clone().unwrap();
        fs::write(
            self.download_dir.join(format!("{token}_export.csv")),
            "Visit Date,Clinic,Count\n2025-01-06,Main,4\n2025-01-07,\"East, Annex\",7\n",
        )?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Transformer that rewrites the raw header to the target schema's columns
struct HeaderRewriter;

#[async_trait]
impl RecordTransformer for HeaderRewriter {
    async fn transform(&self, raw: &Path, processed: &Path, schema: &TargetSchema) -> Result<()> {
        let body = fs::read_to_string(raw)?;
        let rows: Vec<&str> = body.lines().skip(1).collect();
        fs::write(
            processed,
            format!("{}\n{}\n", schema.header_line(), rows.join("\n")),
        )?;
        Ok(())
    }
}

struct Pipeline {
    _dir: TempDir,
    download_dir: PathBuf,
    archive_dir: PathBuf,
    store: Arc<SqliteStore>,
    orchestrator: EtlOrchestrator,
}

async fn pipeline(max_retries: u32) -> Pipeline {
    let dir = TempDir::new().unwrap();
    let download_dir = dir.path().join("downloads");
    let archive_dir = dir.path().join("archive");

    let mut config = Config::default();
    config.portal.url = "https://portal.example.com".to_string();
    config.download.download_dir = download_dir.clone();
    config.download.archive_dir = archive_dir.clone();
    config.watch.timeout = Duration::from_secs(10);
    config.queue.max_retries = max_retries;

    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    store
        .execute("CREATE TABLE \"CNT_27_Staging_Base\" (VisitDate TEXT, Clinic TEXT, Count TEXT)")
        .await
        .unwrap();

    let driver = Arc::new(ScriptedDriver {
        download_dir: download_dir.clone(),
        current: Mutex::new(None),
    });
    let orchestrator = EtlOrchestrator::new(
        EntityId(42),
        config,
        driver,
        Arc::new(HeaderRewriter),
        store.clone(),
    )
    .unwrap();

    Pipeline {
        _dir: dir,
        download_dir,
        archive_dir,
        store,
        orchestrator,
    }
}

#[tokio::test]
async fn export_flows_into_staging_table_and_archive() {
    let p = pipeline(3).await;

    let mode = RunMode::Include(vec![ReportType::from("CNT_27")]);
    let summary = p.orchestrator.run(&mode, &HashMap::new()).await.unwrap();
    assert!(summary.is_success(), "{summary:?}");

    // Both data rows landed in the per-entity staging table
    assert_eq!(p.store.row_count("CNT_27_Staging_42").await.unwrap(), 2);

    // The raw export was relocated and a processed file sits next to it
    assert!(!p.download_dir.join("CNT_27_export.csv").exists());
    assert!(p.archive_dir.join("CNT_27_export.csv").exists());
    let processed: Vec<_> = fs::read_dir(&p.archive_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("CNT_27_Processed_42_"))
        .collect();
    assert_eq!(processed.len(), 1, "expected exactly one processed file");
}

#[tokio::test]
async fn repeated_runs_append_to_the_same_staging_table() {
    let p = pipeline(3).await;
    let mode = RunMode::Include(vec![ReportType::from("CNT_27")]);

    p.orchestrator.run(&mode, &HashMap::new()).await.unwrap();
    p.orchestrator.run(&mode, &HashMap::new()).await.unwrap();

    assert_eq!(p.store.row_count("CNT_27_Staging_42").await.unwrap(), 4);
}

#[tokio::test]
async fn missing_base_table_fails_only_that_report() {
    // CNT_19 has no base table, so its load phase cannot create a staging
    // table; CNT_27 must still complete.
    let p = pipeline(1).await;

    let mode = RunMode::Include(vec![ReportType::from("CNT_27"), ReportType::from("CNT_19")]);
    let summary = p.orchestrator.run(&mode, &HashMap::new()).await.unwrap();

    assert!(!summary.is_success());
    assert!(summary.outcome(&ReportType::from("CNT_27")).unwrap().is_success());

    let failed = summary.outcome(&ReportType::from("CNT_19")).unwrap();
    assert!(matches!(
        failed.failed_phase,
        Some(Phase::Transform) | Some(Phase::Load)
    ));
    assert_eq!(p.store.row_count("CNT_27_Staging_42").await.unwrap(), 2);
}

#[tokio::test]
async fn sqlite_store_errors_are_load_errors() {
    let store = SqliteStore::in_memory().await.unwrap();
    let err = store.execute("NOT VALID SQL").await.unwrap_err();
    assert!(matches!(err, Error::Load(_)), "{err}");
}
