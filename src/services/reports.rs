use crate::{
    db::DbPool,
    entities::{
        invoice::{self, Entity as Invoice, InvoiceKind, InvoiceStatus},
        invoice_item::{self, Entity as InvoiceItem},
        product::{self, Entity as Product},
        report_artifact::{self, Entity as ReportArtifact, ReportType},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, IntCounterVec};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, JoinType, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, RelationTrait, Set, TransactionTrait,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

lazy_static! {
    static ref REPORTS_GENERATED: IntCounterVec = register_int_counter_vec!(
        "reports_generated_total",
        "Total number of generated reports",
        &["report_type"]
    )
    .expect("metric can be created");
}

/// One product's position in a point-in-time snapshot, reconstructed by
/// replaying committed invoices rather than trusting the live counters.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotRow {
    pub product_id: Uuid,
    pub name: String,
    pub cost_price: Decimal,
    pub quantity: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceSummary {
    pub kind: InvoiceKind,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub invoice_count: u64,
    pub total_price: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ReportPayload {
    Product {
        as_of: DateTime<Utc>,
        rows: Vec<SnapshotRow>,
    },
    Summary(InvoiceSummary),
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedReport {
    pub artifact: report_artifact::Model,
    pub payload: ReportPayload,
}

fn summary_file_name(
    report_type: ReportType,
    sequence: i32,
    start: &DateTime<Utc>,
    end: &DateTime<Utc>,
) -> String {
    format!(
        "{}Report{}_{}_{}.pdf",
        report_type.file_stem(),
        sequence,
        start.format("%Y-%m-%d"),
        end.format("%Y-%m-%d")
    )
}

fn snapshot_file_name(report_type: ReportType, sequence: i32, as_of: &DateTime<Utc>) -> String {
    format!(
        "{}Report{}_{}.pdf",
        report_type.file_stem(),
        sequence,
        as_of.format("%Y-%m-%d")
    )
}

/// Read-side reporting over the committed invoice history.
pub struct ReportService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl ReportService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Stock per product as it stood at `as_of`, derived purely from
    /// committed invoices. Voided invoices never count; a history that
    /// would drive a product negative is clamped to zero.
    #[instrument(skip(self))]
    pub async fn product_snapshot(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<SnapshotRow>, ServiceError> {
        let db = self.db_pool.as_ref();

        let products = Product::find()
            .order_by_asc(product::Column::Name)
            .all(db);
        let received = self.committed_items(InvoiceKind::Income, as_of).all(db);
        let sold = self.committed_items(InvoiceKind::Sale, as_of).all(db);
        let (products, received, sold) =
            futures::try_join!(products, received, sold).map_err(ServiceError::db_error)?;

        let mut flows: HashMap<Uuid, (i64, i64)> = HashMap::new();
        for item in received {
            flows.entry(item.product_id).or_default().0 += i64::from(item.quantity);
        }
        for item in sold {
            flows.entry(item.product_id).or_default().1 += i64::from(item.quantity);
        }

        Ok(products
            .into_iter()
            .map(|p| {
                let (received, sold) = flows.get(&p.id).copied().unwrap_or((0, 0));
                SnapshotRow {
                    product_id: p.id,
                    name: p.name,
                    cost_price: p.cost_price,
                    quantity: (received - sold).max(0),
                }
            })
            .collect())
    }

    /// Count and value of committed invoices of one kind over a closed
    /// period.
    #[instrument(skip(self))]
    pub async fn invoice_summary(
        &self,
        kind: InvoiceKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<InvoiceSummary, ServiceError> {
        if start > end {
            return Err(ServiceError::validation(format!(
                "invalid time range: start {start} is after end {end}"
            )));
        }

        let invoices = Invoice::find()
            .filter(invoice::Column::Kind.eq(kind.to_string()))
            .filter(invoice::Column::Status.eq(InvoiceStatus::Committed.to_string()))
            .filter(invoice::Column::Date.gte(start))
            .filter(invoice::Column::Date.lte(end))
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?;

        let total_price: Decimal = invoices.iter().map(|i| i.total_price).sum();
        Ok(InvoiceSummary {
            kind,
            start,
            end,
            invoice_count: invoices.len() as u64,
            total_price,
        })
    }

    /// Builds the requested report and records it as a numbered
    /// artifact. Sale and income reports need a period; product
    /// snapshots default to now.
    #[instrument(skip(self))]
    pub async fn generate(
        &self,
        report_type: ReportType,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<GeneratedReport, ServiceError> {
        let report = match report_type {
            ReportType::Product => {
                let as_of = as_of.unwrap_or_else(Utc::now);
                let rows = self.product_snapshot(as_of).await?;
                let line_count = rows.len() as i32;
                let artifact = self
                    .record_artifact(report_type, move |sequence| NewArtifact {
                        file_name: snapshot_file_name(report_type, sequence, &as_of),
                        period_start: None,
                        period_end: None,
                        as_of: Some(as_of),
                        invoice_count: None,
                        total_price: None,
                        line_count: Some(line_count),
                    })
                    .await?;
                GeneratedReport {
                    artifact,
                    payload: ReportPayload::Product { as_of, rows },
                }
            }
            ReportType::Sale | ReportType::Income => {
                let start = start.ok_or_else(|| {
                    ServiceError::validation(format!("start is required for {report_type} reports"))
                })?;
                let end = end.ok_or_else(|| {
                    ServiceError::validation(format!("end is required for {report_type} reports"))
                })?;

                let kind = match report_type {
                    ReportType::Sale => InvoiceKind::Sale,
                    _ => InvoiceKind::Income,
                };
                let summary = self.invoice_summary(kind, start, end).await?;
                let invoice_count = summary.invoice_count as i32;
                let total_price = summary.total_price;
                let artifact = self
                    .record_artifact(report_type, move |sequence| NewArtifact {
                        file_name: summary_file_name(report_type, sequence, &start, &end),
                        period_start: Some(start),
                        period_end: Some(end),
                        as_of: None,
                        invoice_count: Some(invoice_count),
                        total_price: Some(total_price),
                        line_count: None,
                    })
                    .await?;
                GeneratedReport {
                    artifact,
                    payload: ReportPayload::Summary(summary),
                }
            }
        };

        REPORTS_GENERATED
            .with_label_values(&[&report_type.to_string()])
            .inc();
        info!(
            artifact_id = %report.artifact.id,
            report_type = %report_type,
            file_name = %report.artifact.file_name,
            "Generated report"
        );

        if let Err(e) = self
            .event_sender
            .send(Event::ReportGenerated {
                artifact_id: report.artifact.id,
                report_type: report_type.to_string(),
                file_name: report.artifact.file_name.clone(),
            })
            .await
        {
            warn!("Failed to send report generated event: {}", e);
        }

        Ok(report)
    }

    pub async fn list_reports(
        &self,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<report_artifact::Model>, u64), ServiceError> {
        let db = self.db_pool.as_ref();
        let paginator = ReportArtifact::find()
            .order_by_desc(report_artifact::Column::GeneratedAt)
            .paginate(db, limit.max(1));

        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let artifacts = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::db_error)?;

        Ok((artifacts, total))
    }

    fn committed_items(
        &self,
        kind: InvoiceKind,
        as_of: DateTime<Utc>,
    ) -> sea_orm::Select<InvoiceItem> {
        InvoiceItem::find()
            .join(JoinType::InnerJoin, invoice_item::Relation::Invoice.def())
            .filter(invoice::Column::Kind.eq(kind.to_string()))
            .filter(invoice::Column::Status.eq(InvoiceStatus::Committed.to_string()))
            .filter(invoice::Column::Date.lte(as_of))
    }

    /// Numbers and persists the artifact row. Sequences count up per
    /// report type.
    async fn record_artifact<F>(
        &self,
        report_type: ReportType,
        build: F,
    ) -> Result<report_artifact::Model, ServiceError>
    where
        F: FnOnce(i32) -> NewArtifact + Send + 'static,
    {
        let db = self.db_pool.as_ref();
        db.transaction::<_, report_artifact::Model, ServiceError>(move |txn| {
            Box::pin(async move {
                let latest = ReportArtifact::find()
                    .filter(report_artifact::Column::ReportType.eq(report_type.to_string()))
                    .order_by_desc(report_artifact::Column::Sequence)
                    .one(txn)
                    .await
                    .map_err(ServiceError::db_error)?;
                let sequence = latest.map(|a| a.sequence + 1).unwrap_or(1);

                let fields = build(sequence);
                report_artifact::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    report_type: Set(report_type.to_string()),
                    sequence: Set(sequence),
                    file_name: Set(fields.file_name),
                    period_start: Set(fields.period_start),
                    period_end: Set(fields.period_end),
                    as_of: Set(fields.as_of),
                    invoice_count: Set(fields.invoice_count),
                    total_price: Set(fields.total_price),
                    line_count: Set(fields.line_count),
                    generated_at: Set(Utc::now()),
                }
                .insert(txn)
                .await
                .map_err(ServiceError::db_error)
            })
        })
        .await
        .map_err(ServiceError::from)
    }
}

struct NewArtifact {
    file_name: String,
    period_start: Option<DateTime<Utc>>,
    period_end: Option<DateTime<Utc>>,
    as_of: Option<DateTime<Utc>>,
    invoice_count: Option<i32>,
    total_price: Option<Decimal>,
    line_count: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn summary_file_names_carry_the_period() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 31, 23, 59, 59).unwrap();
        assert_eq!(
            summary_file_name(ReportType::Sale, 3, &start, &end),
            "SaleReport3_2024-01-01_2024-01-31.pdf"
        );
        assert_eq!(
            summary_file_name(ReportType::Income, 1, &start, &end),
            "IncomeReport1_2024-01-01_2024-01-31.pdf"
        );
    }

    #[test]
    fn snapshot_file_names_carry_the_cutoff() {
        let as_of = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();
        assert_eq!(
            snapshot_file_name(ReportType::Product, 7, &as_of),
            "ProductReport7_2024-06-15.pdf"
        );
    }
}
