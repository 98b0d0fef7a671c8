use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

// The events the engine can emit. Events describe committed state
// changes; none of the engine's semantics depend on their delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Catalog events
    ProductCreated(Uuid),

    // Ledger events
    ConsignmentReceived {
        product_id: Uuid,
        consignment_id: Uuid,
        consignment_number: i32,
        quantity: i32,
    },
    ConsignmentRemoved {
        product_id: Uuid,
        consignment_id: Uuid,
        quantity: i32,
    },
    StockAllocated {
        product_id: Uuid,
        quantity: i32,
        consignments_drawn: usize,
        product_quantity: i32,
    },
    AllocationReversed {
        product_id: Uuid,
        quantity: i32,
        product_quantity: i32,
    },
    ProductQuarantined {
        product_id: Uuid,
        reason: String,
    },

    // Invoice events
    InvoiceCommitted {
        invoice_id: Uuid,
        kind: String,
        total_price: Decimal,
    },
    InvoiceVoided {
        invoice_id: Uuid,
        kind: String,
    },

    // Report events
    ReportGenerated {
        artifact_id: Uuid,
        report_type: String,
        file_name: String,
    },
}

// Function to process incoming events and distribute them to handlers.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        info!("Received event: {:?}", event);

        match event {
            Event::StockAllocated {
                product_id,
                quantity,
                product_quantity,
                ..
            } => {
                if let Err(e) =
                    handle_stock_allocated(product_id, quantity, product_quantity).await
                {
                    error!(
                        "Failed to handle stock allocated event: product_id={}, error={}",
                        product_id, e
                    );
                }
            }
            Event::ConsignmentReceived {
                product_id,
                consignment_id,
                consignment_number,
                quantity,
            } => {
                if let Err(e) = handle_consignment_received(
                    product_id,
                    consignment_id,
                    consignment_number,
                    quantity,
                )
                .await
                {
                    error!(
                        "Failed to handle consignment received event: consignment_id={}, error={}",
                        consignment_id, e
                    );
                }
            }
            Event::ProductQuarantined { product_id, reason } => {
                if let Err(e) = handle_product_quarantined(product_id, &reason).await {
                    error!(
                        "Failed to handle product quarantined event: product_id={}, error={}",
                        product_id, e
                    );
                }
            }
            Event::InvoiceCommitted {
                invoice_id,
                kind,
                total_price,
            } => {
                if let Err(e) = handle_invoice_committed(invoice_id, &kind, total_price).await {
                    error!(
                        "Failed to handle invoice committed event: invoice_id={}, error={}",
                        invoice_id, e
                    );
                }
            }
            Event::InvoiceVoided { invoice_id, kind } => {
                if let Err(e) = handle_invoice_voided(invoice_id, &kind).await {
                    error!(
                        "Failed to handle invoice voided event: invoice_id={}, error={}",
                        invoice_id, e
                    );
                }
            }
            _ => {
                info!("No specific handler for event: {:?}", event);
            }
        }
    }

    warn!("Event processing loop has ended");
}

// Handler functions for specific events
async fn handle_stock_allocated(
    product_id: Uuid,
    quantity: i32,
    product_quantity: i32,
) -> Result<(), String> {
    info!(
        "Processing stock allocation of {} for product {}, {} remaining",
        quantity, product_id, product_quantity
    );

    if product_quantity < 10 {
        warn!(
            "Low stock alert: product {} has only {} units remaining",
            product_id, product_quantity
        );
        // Could trigger a reorder workflow once one exists
    }

    Ok(())
}

async fn handle_consignment_received(
    product_id: Uuid,
    consignment_id: Uuid,
    consignment_number: i32,
    quantity: i32,
) -> Result<(), String> {
    info!(
        "Processing consignment receipt: consignment {} (#{}) of {} units for product {}",
        consignment_id, consignment_number, quantity, product_id
    );

    Ok(())
}

async fn handle_product_quarantined(product_id: Uuid, reason: &str) -> Result<(), String> {
    // Quarantine means the ledger and its records disagree. Nothing
    // automated can fix that; get it in front of an operator.
    error!(
        "Product {} quarantined, operator intervention required: {}",
        product_id, reason
    );

    Ok(())
}

async fn handle_invoice_committed(
    invoice_id: Uuid,
    kind: &str,
    total_price: Decimal,
) -> Result<(), String> {
    info!(
        "Processing {} invoice commit: invoice {} totalling {}",
        kind, invoice_id, total_price
    );

    Ok(())
}

async fn handle_invoice_voided(invoice_id: Uuid, kind: &str) -> Result<(), String> {
    info!(
        "Processing {} invoice void: invoice {}",
        kind, invoice_id
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_succeeds_while_receiver_is_alive() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);

        sender
            .send(Event::ProductCreated(Uuid::new_v4()))
            .await
            .expect("send should succeed");

        assert!(matches!(rx.recv().await, Some(Event::ProductCreated(_))));
    }

    #[tokio::test]
    async fn send_reports_closed_channel() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let sender = EventSender::new(tx);

        let result = sender.send(Event::ProductCreated(Uuid::new_v4())).await;
        assert!(result.is_err());
    }
}
