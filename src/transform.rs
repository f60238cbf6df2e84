//! Raw-export transformation seam
//!
//! A [`RecordTransformer`] turns the portal's raw export into a processed CSV
//! conforming to a [`TargetSchema`]. The orchestrator never inspects file
//! contents itself; it hands the transformer the raw path, the processed
//! destination, and the schema derived from the report's base table.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Column layout of a report's staging table
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSchema {
    /// Column names in table order
    pub columns: Vec<String>,
}

impl TargetSchema {
    /// Schema from any iterable of column names
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    /// CSV header line for this schema
    pub fn header_line(&self) -> String {
        self.columns.join(",")
    }
}

/// Converts one raw export into one processed CSV
///
/// Implementations are report-format specific; failures surface as
/// [`TransformError`](crate::error::TransformError) variants.
#[async_trait]
pub trait RecordTransformer: Send + Sync {
    /// Read `raw`, normalize it to `schema`, and write the result to `processed`
    async fn transform(&self, raw: &Path, processed: &Path, schema: &TargetSchema) -> Result<()>;
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_line_joins_columns_in_order() {
        let schema = TargetSchema::new(["VisitDate", "Clinic", "Count"]);
        assert_eq!(schema.header_line(), "VisitDate,Clinic,Count");
    }
}
