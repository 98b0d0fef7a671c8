use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Bookkeeping row for a generated report.
///
/// `sequence` counts per report type and feeds the artifact file name.
/// Product reports fill `as_of` and `line_count`; sale and income
/// reports fill the period bounds plus `invoice_count` and
/// `total_price`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "report_artifacts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub report_type: String,
    pub sequence: i32,
    pub file_name: String,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    pub as_of: Option<DateTime<Utc>>,
    pub invoice_count: Option<i32>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_price: Option<rust_decimal::Decimal>,
    pub line_count: Option<i32>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Report families the aggregator can produce.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ReportType {
    /// Per-product stock snapshot at a point in time.
    Product,
    /// Sale invoice totals over a period.
    Sale,
    /// Income invoice totals over a period.
    Income,
}

impl ReportType {
    /// CamelCase stem used when composing artifact file names.
    pub fn file_stem(&self) -> &'static str {
        match self {
            ReportType::Product => "Product",
            ReportType::Sale => "Sale",
            ReportType::Income => "Income",
        }
    }
}
