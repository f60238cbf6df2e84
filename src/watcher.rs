//! Polling-based download-completion watcher
//!
//! Detects completion of an asynchronous, externally triggered file export
//! using only directory polling, since the portal gives no completion signal. A
//! watch walks a small state machine:
//!
//! ```text
//! WaitingForStart -> Downloading -> Stable -> Done
//! ```
//!
//! with terminal timeout outcomes [`WatchTimeout::NotStarted`],
//! [`WatchTimeout::Stuck`], and [`WatchTimeout::NotFound`]. Each call is
//! independent and restartable; no state persists across calls except the
//! observed filesystem.
//!
//! Polling is the contract here: the export lands via an external browser
//! profile, and partial-marker extensions (`.crdownload`, `.part`, ...) are
//! the only progress signal available.

use crate::error::{Error, Result, WatchTimeout};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info};

/// Settle time after the last partial marker disappears, absorbing filesystem
/// buffering races before the final re-check.
pub const STABILIZATION_DELAY: Duration = Duration::from_secs(2);

/// Watch progress states
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WatchState {
    /// No entry matching the prefix has appeared yet
    WaitingForStart,
    /// A matching entry exists but partial markers are present
    Downloading,
    /// Partial markers cleared; waiting out the stabilization delay
    Stable,
}

/// A stateless per-call watch descriptor
///
/// Describes what to look for and how long to wait; `wait` may be called any
/// number of times, each call observing the directory fresh.
#[derive(Clone, Debug)]
pub struct DownloadWatch {
    /// Expected filename prefix of the export (e.g. "CNT_27")
    pub prefix: String,
    /// Directory the portal exports into
    pub directory: PathBuf,
    /// Maximum total wait, measured from watch start
    pub timeout: Duration,
    /// Interval between directory polls
    pub poll_interval: Duration,
    /// Extensions accepted as completed exports (with leading dot)
    pub final_extensions: Vec<String>,
    /// Extensions marking an in-progress download (with leading dot)
    pub partial_extensions: Vec<String>,
}

impl DownloadWatch {
    /// Poll until a completed export matching the prefix is present
    ///
    /// Returns the resolved path of the completed file. Never succeeds while
    /// any partial-marker file is present in the directory.
    ///
    /// # Errors
    ///
    /// - [`WatchTimeout::NotStarted`] if no matching entry appears in time
    /// - [`WatchTimeout::Stuck`] if partial markers persist past the timeout
    /// - [`WatchTimeout::NotFound`] if no final file materializes in time
    /// - `Error::Io` if the directory cannot be listed
    pub async fn wait(&self) -> Result<PathBuf> {
        let started = Instant::now();
        let timeout_secs = self.timeout.as_secs();
        let mut state = WatchState::WaitingForStart;

        info!(
            prefix = %self.prefix,
            directory = %self.directory.display(),
            timeout_secs,
            "waiting for export"
        );

        loop {
            let entries = list_file_names(&self.directory).await?;
            let timed_out = started.elapsed() > self.timeout;

            match state {
                WatchState::WaitingForStart => {
                    if entries.iter().any(|name| name.starts_with(&self.prefix)) {
                        debug!(prefix = %self.prefix, "export started");
                        state = WatchState::Downloading;
                        continue;
                    }
                    if timed_out {
                        return Err(Error::Watch(WatchTimeout::NotStarted {
                            prefix: self.prefix.clone(),
                            timeout_secs,
                        }));
                    }
                }
                WatchState::Downloading => {
                    if !entries.iter().any(|name| self.is_partial(name)) {
                        debug!(prefix = %self.prefix, "partial markers cleared, stabilizing");
                        state = WatchState::Stable;
                        sleep(STABILIZATION_DELAY).await;
                        continue;
                    }
                    if timed_out {
                        return Err(Error::Watch(WatchTimeout::Stuck {
                            prefix: self.prefix.clone(),
                            timeout_secs,
                        }));
                    }
                }
                WatchState::Stable => {
                    // A new partial marker may have appeared during the settle
                    // window (multi-part exports); fall back to Downloading.
                    if entries.iter().any(|name| self.is_partial(name)) {
                        debug!(prefix = %self.prefix, "partial marker reappeared");
                        state = WatchState::Downloading;
                        continue;
                    }
                    if let Some(name) = entries
                        .iter()
                        .find(|name| name.starts_with(&self.prefix) && self.is_final(name))
                    {
                        let path = self.directory.join(name);
                        info!(
                            prefix = %self.prefix,
                            path = %path.display(),
                            elapsed_secs = started.elapsed().as_secs(),
                            "export completed"
                        );
                        return Ok(path);
                    }
                    if timed_out {
                        return Err(Error::Watch(WatchTimeout::NotFound {
                            prefix: self.prefix.clone(),
                            timeout_secs,
                        }));
                    }
                }
            }

            sleep(self.poll_interval).await;
        }
    }

    fn is_partial(&self, name: &str) -> bool {
        let lower = name.to_ascii_lowercase();
        self.partial_extensions
            .iter()
            .any(|ext| lower.ends_with(&ext.to_ascii_lowercase()))
    }

    fn is_final(&self, name: &str) -> bool {
        let lower = name.to_ascii_lowercase();
        self.final_extensions
            .iter()
            .any(|ext| lower.ends_with(&ext.to_ascii_lowercase()))
    }
}

/// List plain-file names in a directory
async fn list_file_names(directory: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(directory).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    Ok(names)
}
