use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Invoice header. Deleting an invoice voids it rather than removing
/// the row, so committed history stays replayable for reporting.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "invoices")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub kind: String,
    pub status: String,
    pub date: DateTime<Utc>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_price: rust_decimal::Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub voided_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::invoice_item::Entity")]
    InvoiceItems,
}

impl Related<super::invoice_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::InvoiceItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Which direction the invoice moves stock.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum InvoiceKind {
    /// Receives consignments into the ledger.
    Income,
    /// Draws stock out of consignments.
    Sale,
}

/// Lifecycle states. `Draft` exists only while an invoice is being
/// assembled; rows reach storage as `Committed` and may later become
/// `Voided`, which is terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum InvoiceStatus {
    Draft,
    Committed,
    Voided,
}

impl Model {
    pub fn kind(&self) -> Result<InvoiceKind, strum::ParseError> {
        self.kind.parse()
    }

    pub fn status(&self) -> Result<InvoiceStatus, strum::ParseError> {
        self.status.parse()
    }

    pub fn is_voided(&self) -> bool {
        matches!(self.status(), Ok(InvoiceStatus::Voided))
    }
}
