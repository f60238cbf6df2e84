//! # portal-etl
//!
//! Execution-coordination core for portal-driven report ETL.
//!
//! The reporting portal allows exactly one live session, so report
//! acquisition is strictly serial; everything after the export lands
//! (transform, load, relocate) is deferred onto a single-worker FIFO queue
//! with bounded retry, overlapping with the next report's acquisition.
//!
//! ## Design Philosophy
//!
//! portal-etl is designed to be:
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Driver-agnostic** - The portal, transformer, and store are traits;
//!   bring your own browser automation or HTTP client
//! - **Failure-isolating** - A failed report records its failed phase in the
//!   run summary and never aborts the rest of the run
//!
//! ## Quick Start
//!
//! ```no_run
//! use portal_etl::{Config, EntityId, EtlOrchestrator, RunMode, SqliteStore};
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! # use portal_etl::{PortalDriver, RecordTransformer};
//! # fn my_driver() -> Arc<dyn PortalDriver> { unimplemented!() }
//! # fn my_transformer() -> Arc<dyn RecordTransformer> { unimplemented!() }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.portal.url = "https://portal.example.com".to_string();
//!
//!     let store = Arc::new(SqliteStore::connect(&config.database.database_path).await?);
//!     let orchestrator = EtlOrchestrator::new(
//!         EntityId(3681),
//!         config,
//!         my_driver(),
//!         my_transformer(),
//!         store,
//!     )?;
//!
//!     let summary = orchestrator.run(&RunMode::All, &HashMap::new()).await?;
//!     for failure in summary.failures() {
//!         eprintln!("{}: failed during {:?}", failure.report_type, failure.failed_phase);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Filesystem helpers for bootstrap and relocation
pub mod fs_utils;
/// Run sequencing and the per-run summary
pub mod orchestrator;
/// Portal session abstraction
pub mod portal;
/// Per-entity report catalog
pub mod registry;
/// Bounded per-task retry on top of the task queue
pub mod retry;
/// Relational-store seam and the bundled SQLite implementation
pub mod store;
/// Single-worker FIFO task queue with completion barrier
pub mod task_queue;
/// Raw-export transformation seam
pub mod transform;
/// Core types
pub mod types;
/// Polling-based download-completion watcher
pub mod watcher;

// Re-export commonly used types
pub use config::{Config, DownloadConfig, ExportFormat, PortalConfig, QueueConfig, WatchConfig};
pub use error::{Error, LoadError, Result, TransformError, WatchTimeout};
pub use orchestrator::EtlOrchestrator;
pub use portal::PortalDriver;
pub use registry::{DateParams, DateShape, ReportDescriptor, ReportRegistry};
pub use retry::RetryQueue;
pub use store::{RelationalStore, SqliteStore};
pub use task_queue::{Task, TaskOp, TaskQueue};
pub use transform::{RecordTransformer, TargetSchema};
pub use types::{EntityId, Phase, ReportOutcome, ReportType, RunMode, RunSummary, TaskId};
pub use watcher::{DownloadWatch, STABILIZATION_DELAY};
