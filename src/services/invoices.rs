use crate::{
    db::DbPool,
    entities::{
        allocation::{self, Entity as Allocation},
        invoice::{self, Entity as Invoice, InvoiceKind, InvoiceStatus},
        invoice_item::{self, Entity as InvoiceItem},
        product::{self, Entity as Product},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    product_lock::ProductSerializer,
    services::{
        allocation::{apply_reverse, AllocationRecord, AllocationService, ConsignmentDraw},
        income::{apply_unreceive, IncomeService},
    },
};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, IntCounterVec};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

lazy_static! {
    static ref INVOICES_COMMITTED: IntCounterVec = register_int_counter_vec!(
        "invoices_committed_total",
        "Total number of committed invoices",
        &["kind"]
    )
    .expect("metric can be created");
    static ref INVOICES_VOIDED: IntCounterVec = register_int_counter_vec!(
        "invoices_voided_total",
        "Total number of voided invoices",
        &["kind"]
    )
    .expect("metric can be created");
    static ref INVOICE_FAILURES: IntCounterVec = register_int_counter_vec!(
        "invoice_failures_total",
        "Total number of failed invoice operations",
        &["error_type"]
    )
    .expect("metric can be created");
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewInvoiceItem {
    pub product_id: Uuid,
    pub quantity: i32,
    pub total_price: Decimal,
    /// Income items only. Defaults to the invoice date when omitted.
    pub arrival_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewInvoice {
    pub kind: InvoiceKind,
    pub date: Option<DateTime<Utc>>,
    pub items: Vec<NewInvoiceItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllocationLine {
    pub consignment_id: Uuid,
    pub units: i32,
}

/// Per-kind detail attached to an invoice line.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ItemDetail {
    Income {
        arrival_date: Option<DateTime<Utc>>,
        consignment_id: Option<Uuid>,
    },
    Sale {
        allocations: Vec<AllocationLine>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceItemView {
    pub id: Uuid,
    pub line_number: i32,
    pub product_id: Uuid,
    pub quantity: i32,
    pub total_price: Decimal,
    #[serde(flatten)]
    pub detail: ItemDetail,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceView {
    pub id: Uuid,
    pub kind: InvoiceKind,
    pub status: InvoiceStatus,
    pub date: DateTime<Utc>,
    pub total_price: Decimal,
    pub voided_at: Option<DateTime<Utc>>,
    pub items: Vec<InvoiceItemView>,
}

/// Checks an invoice request before any stock is touched.
pub fn validate_new_invoice(new_invoice: &NewInvoice) -> Result<(), ServiceError> {
    if new_invoice.items.is_empty() {
        return Err(ServiceError::validation(
            "invoice must contain at least one item",
        ));
    }

    for (idx, item) in new_invoice.items.iter().enumerate() {
        let line = idx + 1;
        if item.quantity <= 0 {
            return Err(ServiceError::validation(format!(
                "item {line}: quantity must be positive"
            )));
        }
        if item.total_price.is_sign_negative() {
            return Err(ServiceError::validation(format!(
                "item {line}: total price cannot be negative"
            )));
        }
        if new_invoice.kind == InvoiceKind::Sale && item.arrival_date.is_some() {
            return Err(ServiceError::validation(format!(
                "item {line}: arrival_date is only valid on income invoice items"
            )));
        }
    }

    Ok(())
}

/// One successfully applied invoice line, kept so a failed create can
/// roll back everything applied before it.
enum AppliedStep {
    Sale(AllocationRecord),
    Income { consignment_id: Uuid },
}

struct PersistLine {
    line_number: i32,
    product_id: Uuid,
    quantity: i32,
    total_price: Decimal,
    arrival_date: Option<DateTime<Utc>>,
    consignment_id: Option<Uuid>,
    draws: Vec<ConsignmentDraw>,
}

fn quarantine_product(locks: &dyn ProductSerializer, product_id: Uuid, err: &ServiceError) {
    locks.quarantine(product_id, &err.to_string());
    error!(
        product_id = %product_id,
        "Ledger integrity fault, quarantining product: {}", err
    );
}

/// Invoice lifecycle: committed on create, voided on delete.
///
/// Create applies items one at a time through the stock engine, each in
/// its own transaction, and compensates the applied prefix when a later
/// item fails. Void runs as a single transaction under every involved
/// product's permit so a refused removal leaves the whole invoice and
/// ledger untouched.
pub struct InvoiceService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    allocation: Arc<AllocationService>,
    income: Arc<IncomeService>,
    locks: Arc<dyn ProductSerializer>,
}

impl InvoiceService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        allocation: Arc<AllocationService>,
        income: Arc<IncomeService>,
        locks: Arc<dyn ProductSerializer>,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            allocation,
            income,
            locks,
        }
    }

    #[instrument(skip(self, new_invoice), fields(kind = %new_invoice.kind, items = new_invoice.items.len()))]
    pub async fn create_invoice(&self, new_invoice: NewInvoice) -> Result<InvoiceView, ServiceError> {
        if let Err(e) = validate_new_invoice(&new_invoice) {
            INVOICE_FAILURES.with_label_values(&[e.label()]).inc();
            return Err(e);
        }
        if let Err(e) = self.check_products_exist(&new_invoice.items).await {
            INVOICE_FAILURES.with_label_values(&[e.label()]).inc();
            return Err(e);
        }

        let kind = new_invoice.kind;
        let invoice_date = new_invoice.date.unwrap_or_else(Utc::now);

        // Apply each line through the public engine operations so every
        // step is serialized and durable on its own. A failure part way
        // through rolls back the applied prefix in reverse order.
        let mut applied: Vec<AppliedStep> = Vec::with_capacity(new_invoice.items.len());
        let mut lines: Vec<PersistLine> = Vec::with_capacity(new_invoice.items.len());

        for (idx, item) in new_invoice.items.iter().enumerate() {
            let line_number = (idx + 1) as i32;
            let step = match kind {
                InvoiceKind::Sale => self
                    .allocation
                    .allocate(item.product_id, item.quantity)
                    .await
                    .map(|outcome| {
                        lines.push(PersistLine {
                            line_number,
                            product_id: item.product_id,
                            quantity: item.quantity,
                            total_price: item.total_price,
                            arrival_date: None,
                            consignment_id: None,
                            draws: outcome.record.draws.clone(),
                        });
                        AppliedStep::Sale(outcome.record)
                    }),
                InvoiceKind::Income => {
                    let arrival = item.arrival_date.unwrap_or(invoice_date);
                    self.income
                        .receive(item.product_id, item.quantity, arrival, item.total_price)
                        .await
                        .map(|outcome| {
                            lines.push(PersistLine {
                                line_number,
                                product_id: item.product_id,
                                quantity: item.quantity,
                                total_price: item.total_price,
                                arrival_date: Some(arrival),
                                consignment_id: Some(outcome.consignment.id),
                                draws: Vec::new(),
                            });
                            AppliedStep::Income {
                                consignment_id: outcome.consignment.id,
                            }
                        })
                }
            };

            match step {
                Ok(step) => applied.push(step),
                Err(e) => {
                    warn!(
                        line = line_number,
                        product_id = %item.product_id,
                        "Invoice item failed, rolling back applied items: {}", e
                    );
                    self.compensate(&applied).await;
                    INVOICE_FAILURES.with_label_values(&[e.label()]).inc();
                    return Err(e);
                }
            }
        }

        let total_price: Decimal = new_invoice.items.iter().map(|i| i.total_price).sum();
        let invoice_id = Uuid::new_v4();

        let db = self.db_pool.as_ref();
        let persisted = db
            .transaction::<_, (invoice::Model, Vec<(invoice_item::Model, Vec<allocation::Model>)>), ServiceError>(
                move |txn| {
                    Box::pin(async move {
                        let now = Utc::now();
                        let header = invoice::ActiveModel {
                            id: Set(invoice_id),
                            kind: Set(kind.to_string()),
                            status: Set(InvoiceStatus::Committed.to_string()),
                            date: Set(invoice_date),
                            total_price: Set(total_price),
                            created_at: Set(now),
                            updated_at: Set(now),
                            voided_at: Set(None),
                        }
                        .insert(txn)
                        .await
                        .map_err(ServiceError::db_error)?;

                        let mut items = Vec::with_capacity(lines.len());
                        for line in lines {
                            let item = invoice_item::ActiveModel {
                                id: Set(Uuid::new_v4()),
                                invoice_id: Set(invoice_id),
                                line_number: Set(line.line_number),
                                product_id: Set(line.product_id),
                                quantity: Set(line.quantity),
                                total_price: Set(line.total_price),
                                arrival_date: Set(line.arrival_date),
                                consignment_id: Set(line.consignment_id),
                                created_at: Set(now),
                            }
                            .insert(txn)
                            .await
                            .map_err(ServiceError::db_error)?;

                            let mut item_allocations = Vec::with_capacity(line.draws.len());
                            for draw in &line.draws {
                                let row = allocation::ActiveModel {
                                    id: Set(Uuid::new_v4()),
                                    invoice_item_id: Set(item.id),
                                    consignment_id: Set(draw.consignment_id),
                                    units: Set(draw.units),
                                    created_at: Set(now),
                                }
                                .insert(txn)
                                .await
                                .map_err(ServiceError::db_error)?;
                                item_allocations.push(row);
                            }

                            items.push((item, item_allocations));
                        }

                        Ok((header, items))
                    })
                },
            )
            .await
            .map_err(ServiceError::from);

        let (header, items) = match persisted {
            Ok(persisted) => persisted,
            Err(e) => {
                error!(
                    invoice_id = %invoice_id,
                    "Failed to persist invoice, rolling back applied items: {}", e
                );
                self.compensate(&applied).await;
                INVOICE_FAILURES.with_label_values(&[e.label()]).inc();
                return Err(e);
            }
        };

        INVOICES_COMMITTED
            .with_label_values(&[&kind.to_string()])
            .inc();
        info!(
            invoice_id = %invoice_id,
            kind = %kind,
            items = items.len(),
            %total_price,
            "Committed invoice"
        );

        if let Err(e) = self
            .event_sender
            .send(Event::InvoiceCommitted {
                invoice_id,
                kind: kind.to_string(),
                total_price,
            })
            .await
        {
            warn!("Failed to send invoice committed event: {}", e);
        }

        assemble_view(header, items)
    }

    pub async fn get_invoice(&self, invoice_id: Uuid) -> Result<InvoiceView, ServiceError> {
        let db = self.db_pool.as_ref();
        let header = Invoice::find_by_id(invoice_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::validation(format!("unknown invoice {invoice_id}")))?;

        let items = InvoiceItem::find()
            .filter(invoice_item::Column::InvoiceId.eq(invoice_id))
            .order_by_asc(invoice_item::Column::LineNumber)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let item_ids: Vec<Uuid> = items.iter().map(|i| i.id).collect();
        let mut allocations_by_item: HashMap<Uuid, Vec<allocation::Model>> = HashMap::new();
        if !item_ids.is_empty() {
            let rows = Allocation::find()
                .filter(allocation::Column::InvoiceItemId.is_in(item_ids))
                .all(db)
                .await
                .map_err(ServiceError::db_error)?;
            for row in rows {
                allocations_by_item
                    .entry(row.invoice_item_id)
                    .or_default()
                    .push(row);
            }
        }

        let items = items
            .into_iter()
            .map(|item| {
                let allocations = allocations_by_item.remove(&item.id).unwrap_or_default();
                (item, allocations)
            })
            .collect();

        assemble_view(header, items)
    }

    pub async fn list_invoices(
        &self,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<invoice::Model>, u64), ServiceError> {
        let db = self.db_pool.as_ref();
        let paginator = Invoice::find()
            .order_by_desc(invoice::Column::Date)
            .paginate(db, limit.max(1));

        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let invoices = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::db_error)?;

        Ok((invoices, total))
    }

    /// Voids a committed invoice by undoing its items last line first,
    /// all inside one transaction. Sales get their units put back;
    /// income lines are only removable while their consignment is
    /// untouched, and a refusal rolls the entire void back.
    #[instrument(skip(self))]
    pub async fn delete_invoice(&self, invoice_id: Uuid) -> Result<(), ServiceError> {
        let db = self.db_pool.as_ref();
        let header = Invoice::find_by_id(invoice_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::validation(format!("unknown invoice {invoice_id}")))?;

        let kind = header.kind().map_err(|_| {
            ServiceError::InternalError(format!(
                "invoice {} has unrecognized kind {:?}",
                invoice_id, header.kind
            ))
        })?;
        let status = header.status().map_err(|_| {
            ServiceError::InternalError(format!(
                "invoice {} has unrecognized status {:?}",
                invoice_id, header.status
            ))
        })?;
        if status == InvoiceStatus::Voided {
            let e = ServiceError::AlreadyVoided(format!("invoice {invoice_id} is already voided"));
            INVOICE_FAILURES.with_label_values(&[e.label()]).inc();
            return Err(e);
        }

        let mut items = InvoiceItem::find()
            .filter(invoice_item::Column::InvoiceId.eq(invoice_id))
            .order_by_asc(invoice_item::Column::LineNumber)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;
        // Undo last line first so repeated-product invoices unwind in
        // the opposite order to how they were applied.
        items.sort_by(|a, b| b.line_number.cmp(&a.line_number));

        let mut product_ids: Vec<Uuid> = items.iter().map(|i| i.product_id).collect();
        product_ids.sort();
        product_ids.dedup();

        // Permits are taken in ascending product id order; every
        // multi-product caller does the same, which rules out deadlock.
        let mut permits = Vec::with_capacity(product_ids.len());
        for pid in &product_ids {
            match self.locks.acquire(*pid).await {
                Ok(permit) => permits.push(permit),
                Err(e) => {
                    INVOICE_FAILURES.with_label_values(&[e.label()]).inc();
                    return Err(e);
                }
            }
        }

        let locks = Arc::clone(&self.locks);
        let result = db
            .transaction::<_, (invoice::Model, Vec<Event>), ServiceError>(move |txn| {
                Box::pin(async move {
                    // Re-read under the permits; a concurrent void may
                    // have won the race before ours were granted.
                    let header = Invoice::find_by_id(invoice_id)
                        .one(txn)
                        .await
                        .map_err(ServiceError::db_error)?
                        .ok_or_else(|| {
                            ServiceError::InternalError(format!(
                                "invoice {invoice_id} disappeared during void"
                            ))
                        })?;
                    if header.is_voided() {
                        return Err(ServiceError::AlreadyVoided(format!(
                            "invoice {invoice_id} is already voided"
                        )));
                    }

                    let mut events = Vec::with_capacity(items.len());
                    for item in &items {
                        match kind {
                            InvoiceKind::Sale => {
                                let draws = Allocation::find()
                                    .filter(allocation::Column::InvoiceItemId.eq(item.id))
                                    .all(txn)
                                    .await
                                    .map_err(ServiceError::db_error)?;
                                if draws.is_empty() {
                                    let e = ServiceError::IntegrityFault(format!(
                                        "sale item {} has no recorded allocations",
                                        item.id
                                    ));
                                    quarantine_product(locks.as_ref(), item.product_id, &e);
                                    return Err(e);
                                }

                                let record = AllocationRecord {
                                    product_id: item.product_id,
                                    requested: item.quantity,
                                    draws: draws
                                        .into_iter()
                                        .map(|d| ConsignmentDraw {
                                            consignment_id: d.consignment_id,
                                            units: d.units,
                                        })
                                        .collect(),
                                };

                                match apply_reverse(txn, &record).await {
                                    Ok(product_quantity) => events.push(Event::AllocationReversed {
                                        product_id: item.product_id,
                                        quantity: record.total_units(),
                                        product_quantity,
                                    }),
                                    Err(e) => {
                                        if e.is_fatal() {
                                            quarantine_product(locks.as_ref(), item.product_id, &e);
                                        }
                                        return Err(e);
                                    }
                                }
                            }
                            InvoiceKind::Income => {
                                let consignment_id = match item.consignment_id {
                                    Some(id) => id,
                                    None => {
                                        let e = ServiceError::IntegrityFault(format!(
                                            "income item {} has no consignment recorded",
                                            item.id
                                        ));
                                        quarantine_product(locks.as_ref(), item.product_id, &e);
                                        return Err(e);
                                    }
                                };

                                match apply_unreceive(txn, consignment_id).await {
                                    Ok((removed, _)) => events.push(Event::ConsignmentRemoved {
                                        product_id: item.product_id,
                                        consignment_id: removed.id,
                                        quantity: removed.quantity,
                                    }),
                                    Err(ServiceError::ValidationError(_)) => {
                                        // The consignment this invoice
                                        // booked is gone. That cannot
                                        // happen through the public
                                        // operations.
                                        let e = ServiceError::IntegrityFault(format!(
                                            "income item {} names missing consignment {}",
                                            item.id, consignment_id
                                        ));
                                        quarantine_product(locks.as_ref(), item.product_id, &e);
                                        return Err(e);
                                    }
                                    Err(e) => {
                                        if e.is_fatal() {
                                            quarantine_product(locks.as_ref(), item.product_id, &e);
                                        }
                                        return Err(e);
                                    }
                                }
                            }
                        }
                    }

                    let now = Utc::now();
                    let mut voided: invoice::ActiveModel = header.into();
                    voided.status = Set(InvoiceStatus::Voided.to_string());
                    voided.voided_at = Set(Some(now));
                    voided.updated_at = Set(now);
                    let voided = voided.update(txn).await.map_err(ServiceError::db_error)?;

                    Ok((voided, events))
                })
            })
            .await
            .map_err(ServiceError::from);

        match result {
            Ok((voided, events)) => {
                INVOICES_VOIDED
                    .with_label_values(&[&kind.to_string()])
                    .inc();
                info!(invoice_id = %voided.id, kind = %kind, "Voided invoice");

                for event in events {
                    if let Err(e) = self.event_sender.send(event).await {
                        warn!("Failed to send stock event: {}", e);
                    }
                }
                if let Err(e) = self
                    .event_sender
                    .send(Event::InvoiceVoided {
                        invoice_id,
                        kind: kind.to_string(),
                    })
                    .await
                {
                    warn!("Failed to send invoice voided event: {}", e);
                }

                Ok(())
            }
            Err(e) => {
                INVOICE_FAILURES.with_label_values(&[e.label()]).inc();
                if e.is_fatal() {
                    for pid in &product_ids {
                        if self.locks.is_quarantined(*pid) {
                            if let Err(send_err) = self
                                .event_sender
                                .send(Event::ProductQuarantined {
                                    product_id: *pid,
                                    reason: e.to_string(),
                                })
                                .await
                            {
                                warn!("Failed to send product quarantined event: {}", send_err);
                            }
                        }
                    }
                }
                Err(e)
            }
        }
    }

    async fn check_products_exist(&self, items: &[NewInvoiceItem]) -> Result<(), ServiceError> {
        let mut unique: Vec<Uuid> = items.iter().map(|i| i.product_id).collect();
        unique.sort();
        unique.dedup();

        let found: Vec<Uuid> = Product::find()
            .filter(product::Column::Id.is_in(unique.clone()))
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .map(|p| p.id)
            .collect();

        for item in items {
            if !found.contains(&item.product_id) {
                return Err(ServiceError::validation(format!(
                    "unknown product {}",
                    item.product_id
                )));
            }
        }
        Ok(())
    }

    /// Rolls back applied invoice lines, newest first. Failures are
    /// logged and the remaining lines are still attempted.
    async fn compensate(&self, applied: &[AppliedStep]) {
        for step in applied.iter().rev() {
            match step {
                AppliedStep::Sale(record) => {
                    if let Err(e) = self.allocation.reverse(record).await {
                        error!(
                            product_id = %record.product_id,
                            "Failed to roll back allocation: {}", e
                        );
                    }
                }
                AppliedStep::Income { consignment_id } => {
                    if let Err(e) = self.income.unreceive(*consignment_id).await {
                        error!(
                            consignment_id = %consignment_id,
                            "Failed to roll back consignment: {}", e
                        );
                    }
                }
            }
        }
    }
}

fn assemble_view(
    header: invoice::Model,
    items: Vec<(invoice_item::Model, Vec<allocation::Model>)>,
) -> Result<InvoiceView, ServiceError> {
    let kind = header.kind().map_err(|_| {
        ServiceError::InternalError(format!(
            "invoice {} has unrecognized kind {:?}",
            header.id, header.kind
        ))
    })?;
    let status = header.status().map_err(|_| {
        ServiceError::InternalError(format!(
            "invoice {} has unrecognized status {:?}",
            header.id, header.status
        ))
    })?;

    let mut items: Vec<InvoiceItemView> = items
        .into_iter()
        .map(|(item, allocations)| {
            let detail = match kind {
                InvoiceKind::Income => ItemDetail::Income {
                    arrival_date: item.arrival_date,
                    consignment_id: item.consignment_id,
                },
                InvoiceKind::Sale => ItemDetail::Sale {
                    allocations: allocations
                        .into_iter()
                        .map(|a| AllocationLine {
                            consignment_id: a.consignment_id,
                            units: a.units,
                        })
                        .collect(),
                },
            };
            InvoiceItemView {
                id: item.id,
                line_number: item.line_number,
                product_id: item.product_id,
                quantity: item.quantity,
                total_price: item.total_price,
                detail,
            }
        })
        .collect();
    items.sort_by_key(|i| i.line_number);

    Ok(InvoiceView {
        id: header.id,
        kind,
        status,
        date: header.date,
        total_price: header.total_price,
        voided_at: header.voided_at,
        items,
    })
}
