//! Core types for portal-etl

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for the external account/client whose reports are processed
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EntityId(pub i64);

impl EntityId {
    /// Create a new EntityId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for EntityId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Report-type token as the portal names it (e.g. "CNT_27")
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportType(pub String);

impl ReportType {
    /// Create a report type from any string-like token
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The token as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ReportType {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable identity of a deferred task, assigned monotonically at enqueue time
///
/// Retry bookkeeping is keyed by this id rather than by argument equality,
/// so distinct logical tasks sharing arguments can never collide.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pipeline phase a report passes through
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Portal-driven steps producing the raw export
    Acquisition,
    /// Polling for the exported file to appear and stabilize
    Watch,
    /// Normalizing the raw export into the target schema
    Transform,
    /// Bulk-loading the processed file into the staging table
    Load,
    /// Moving the raw export into the archive directory
    Relocate,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Acquisition => "acquisition",
            Phase::Watch => "watch",
            Phase::Transform => "transform",
            Phase::Load => "load",
            Phase::Relocate => "relocate",
        };
        f.write_str(name)
    }
}

/// Which reports a run executes
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Run every report in the registry
    All,
    /// Run only the named report types
    Include(Vec<ReportType>),
    /// Run everything except the named report types
    Exclude(Vec<ReportType>),
}

impl RunMode {
    /// Whether a report type passes this mode's filter
    pub fn selects(&self, report: &ReportType) -> bool {
        match self {
            RunMode::All => true,
            RunMode::Include(list) => list.contains(report),
            RunMode::Exclude(list) => !list.contains(report),
        }
    }
}

/// Per-report outcome of a run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportOutcome {
    /// The report this outcome describes
    pub report_type: ReportType,
    /// The phase that failed, if any
    pub failed_phase: Option<Phase>,
    /// Error text for the failed phase
    pub error: Option<String>,
}

impl ReportOutcome {
    /// New outcome with no recorded failure
    pub fn success(report_type: ReportType) -> Self {
        Self {
            report_type,
            failed_phase: None,
            error: None,
        }
    }

    /// Whether every phase of this report completed
    pub fn is_success(&self) -> bool {
        self.failed_phase.is_none()
    }
}

/// Run-level summary: per report type, which phase failed, if any
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// The entity this run processed
    pub entity: Option<EntityId>,
    /// Outcomes in registry order
    pub outcomes: Vec<ReportOutcome>,
}

impl RunSummary {
    /// Whether every report completed every phase
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(ReportOutcome::is_success)
    }

    /// Outcomes that recorded a failed phase
    pub fn failures(&self) -> impl Iterator<Item = &ReportOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    /// Outcome for a specific report type, if it was selected in this run
    pub fn outcome(&self, report: &ReportType) -> Option<&ReportOutcome> {
        self.outcomes.iter().find(|o| &o.report_type == report)
    }
}
