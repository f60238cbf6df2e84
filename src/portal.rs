//! Portal session abstraction
//!
//! [`PortalDriver`] is the seam between the orchestrator and whatever actually
//! drives the reporting portal (a headless browser, an HTTP client, a mock in
//! tests). The orchestrator owns sequencing; a driver implements the
//! individual steps and stays oblivious to ordering, retries, and watching.
//!
//! All methods take `&self`: a driver wraps one live session and the
//! orchestrator never calls it from two tasks at once, so interior mutability
//! is the driver's own business.

use crate::config::ExportFormat;
use crate::error::Result;
use crate::registry::DateParams;
use async_trait::async_trait;
use chrono::NaiveDate;

/// Steps of a portal acquisition, in the order the orchestrator calls them
///
/// Every method returns `Err(Error::Acquisition { .. })` on failure (drivers
/// may use [`Error::acquisition`](crate::Error::acquisition) to build these).
/// A failed step aborts the current report's acquisition; the session itself
/// stays open for the next report unless `close` is called.
#[async_trait]
pub trait PortalDriver: Send + Sync {
    /// Open the portal session (navigate to the base URL)
    async fn open(&self) -> Result<()>;

    /// Authenticate the open session
    async fn authenticate(&self) -> Result<()>;

    /// Navigate to a named portal section (e.g. "Reports")
    async fn navigate(&self, section: &str) -> Result<()>;

    /// Select a report page by its report-type token
    async fn select_report(&self, token: &str) -> Result<()>;

    /// Fill in a day-granularity date range on the current report page
    async fn set_date_range(&self, from: NaiveDate, to: NaiveDate) -> Result<()>;

    /// Fill in a month-granularity range on the current report page
    async fn set_month_range(&self, from: NaiveDate, to: NaiveDate) -> Result<()>;

    /// Run the currently configured report
    async fn run_report(&self) -> Result<()>;

    /// Trigger the export download in the requested format
    ///
    /// Returns once the portal has *started* the download; completion is
    /// observed separately by the download watcher.
    async fn export(&self, format: ExportFormat) -> Result<()>;

    /// Close the session, releasing portal-side resources
    ///
    /// Called once per run, after the last report. Failures here are logged
    /// and never fail the run.
    async fn close(&self) -> Result<()>;
}

/// Apply resolved date parameters using the shape-appropriate driver method
pub(crate) async fn apply_date_params(
    driver: &dyn PortalDriver,
    params: &DateParams,
) -> Result<()> {
    match params {
        DateParams::Range { from, to } => driver.set_date_range(*from, *to).await,
        DateParams::Months { from, to } => driver.set_month_range(*from, *to).await,
    }
}
