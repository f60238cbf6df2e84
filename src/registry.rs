//! Per-entity report catalog
//!
//! Maps report-type tokens to naming and table metadata. A registry is built
//! once per (entity, run) and is immutable afterwards; run modes
//! (`include`/`exclude`/`all`) are filters over it rather than dynamic
//! dispatch by method name.

use crate::config::ExportFormat;
use crate::types::{EntityId, ReportType, RunMode};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Which date-parameter shape a report accepts
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateShape {
    /// Explicit from/to calendar dates
    DayRange,
    /// From/to months (dates normalized to the first of the month)
    MonthRange,
}

/// Resolved date parameters for one report acquisition
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateParams {
    /// Day-granularity range, inclusive
    Range {
        /// First day of the range
        from: NaiveDate,
        /// Last day of the range
        to: NaiveDate,
    },
    /// Month-granularity range; both dates are the first of their month
    Months {
        /// First month of the range
        from: NaiveDate,
        /// Last month of the range
        to: NaiveDate,
    },
}

impl DateParams {
    /// First date of the range regardless of shape
    pub fn from(&self) -> NaiveDate {
        match self {
            DateParams::Range { from, .. } | DateParams::Months { from, .. } => *from,
        }
    }

    /// Last date of the range regardless of shape
    pub fn to(&self) -> NaiveDate {
        match self {
            DateParams::Range { to, .. } | DateParams::Months { to, .. } => *to,
        }
    }
}

impl fmt::Display for DateParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateParams::Range { from, to } => write!(f, "{from}..{to}"),
            DateParams::Months { from, to } => {
                write!(f, "{}..{}", from.format("%Y-%m"), to.format("%Y-%m"))
            }
        }
    }
}

/// Immutable per-(entity, report-type) configuration
///
/// Constructed once at run start and discarded at run end. Table names embed
/// the entity id so concurrent entity runs never share a staging table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportDescriptor {
    /// Entity this descriptor was built for
    pub entity: EntityId,
    /// Report-type token as the portal names it
    pub report_type: ReportType,
    /// Filename stem the portal writes on export (e.g. "CNT_27_LogBookVisits")
    pub export_name: String,
    /// Date-parameter shape this report accepts
    pub date_shape: DateShape,
    /// Per-entity staging table the processed file loads into
    pub staging_table: String,
    /// Base table defining the target schema
    pub base_table: String,
}

impl ReportDescriptor {
    fn new(
        entity: EntityId,
        token: &str,
        export_name: &str,
        date_shape: DateShape,
    ) -> Self {
        Self {
            entity,
            report_type: ReportType::from(token),
            export_name: export_name.to_string(),
            date_shape,
            staging_table: format!("{token}_Staging_{entity}"),
            base_table: format!("{token}_Staging_Base"),
        }
    }

    /// Prefix the download watcher should look for
    pub fn watch_prefix(&self) -> &str {
        self.report_type.as_str()
    }

    /// Filename the portal writes for this report's raw export
    pub fn raw_file_name(&self, format: ExportFormat) -> String {
        format!("{}.{}", self.export_name, format.extension())
    }

    /// Deterministic processed-file name embedding entity, range, and timestamp
    ///
    /// The timestamp disambiguates repeated runs on the same day; the entity
    /// id guarantees no collision across concurrent entity runs.
    pub fn processed_file_name(&self, params: &DateParams, now: NaiveDateTime) -> String {
        format!(
            "{}_Processed_{}_{}_{}_{}.csv",
            self.report_type,
            self.entity,
            params.from().format("%Y-%m-%d"),
            params.to().format("%Y-%m-%d"),
            now.format("%H-%M-%S"),
        )
    }

    /// Default date parameters when the call site supplies none
    ///
    /// Day-range reports default to month-to-date; month-range reports to the
    /// previous calendar month.
    pub fn default_params(&self, today: NaiveDate) -> DateParams {
        match self.date_shape {
            DateShape::DayRange => DateParams::Range {
                from: first_of_month(today),
                to: today,
            },
            DateShape::MonthRange => {
                let prev = previous_month(today);
                DateParams::Months { from: prev, to: prev }
            }
        }
    }
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date)
}

fn previous_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 1 {
        (date.year() - 1, 12)
    } else {
        (date.year(), date.month() - 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(date)
}

/// Ordered, immutable catalog of report descriptors for one entity
#[derive(Clone, Debug)]
pub struct ReportRegistry {
    entity: EntityId,
    reports: Vec<ReportDescriptor>,
}

impl ReportRegistry {
    /// Build the built-in catalog for an entity
    pub fn for_entity(entity: EntityId) -> Self {
        let reports = vec![
            ReportDescriptor::new(entity, "CNT_27", "CNT_27_LogBookVisits", DateShape::DayRange),
            ReportDescriptor::new(
                entity,
                "CNT_19",
                "CNT_19_VisitCountByCategory",
                DateShape::DayRange,
            ),
            ReportDescriptor::new(
                entity,
                "FIN_25",
                "FIN_25_RealTimeChargesReview",
                DateShape::DayRange,
            ),
            ReportDescriptor::new(
                entity,
                "ADJ_11",
                "ADJ_11_AdjustmentReport",
                DateShape::DayRange,
            ),
            ReportDescriptor::new(entity, "PAY_41", "PAY_41_PaymentDetail", DateShape::DayRange),
            ReportDescriptor::new(
                entity,
                "REV_19",
                "REV_19_MonthlyRevenueSummary",
                DateShape::MonthRange,
            ),
            ReportDescriptor::new(
                entity,
                "ADJ_4",
                "ADJ_4_MonthlyAdjustmentSummary",
                DateShape::MonthRange,
            ),
        ];
        Self { entity, reports }
    }

    /// Entity this registry was built for
    pub fn entity(&self) -> EntityId {
        self.entity
    }

    /// Descriptor for a report type, if present
    pub fn get(&self, report: &ReportType) -> Option<&ReportDescriptor> {
        self.reports.iter().find(|d| &d.report_type == report)
    }

    /// All descriptors in catalog order
    pub fn iter(&self) -> impl Iterator<Item = &ReportDescriptor> {
        self.reports.iter()
    }

    /// Number of reports in the catalog
    pub fn len(&self) -> usize {
        self.reports.len()
    }

    /// Whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    /// Descriptors passing the run mode's filter, in catalog order
    ///
    /// Tokens named by the mode but absent from the catalog are logged and
    /// ignored.
    pub fn select(&self, mode: &RunMode) -> Vec<&ReportDescriptor> {
        if let RunMode::Include(list) | RunMode::Exclude(list) = mode {
            for token in list {
                if self.get(token).is_none() {
                    warn!(entity = %self.entity, report = %token, "unknown report type in run mode, ignoring");
                }
            }
        }
        self.reports
            .iter()
            .filter(|d| mode.selects(&d.report_type))
            .collect()
    }
}
