use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Record of a sale line drawing `units` from one consignment.
///
/// A sale line that spans several consignments produces one row per
/// batch touched. Voiding the invoice replays these rows to put the
/// units back; `units` bounds how much a reversal may restore.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "allocations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub invoice_item_id: Uuid,
    pub consignment_id: Uuid,
    pub units: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::invoice_item::Entity",
        from = "Column::InvoiceItemId",
        to = "super::invoice_item::Column::Id"
    )]
    InvoiceItem,
    #[sea_orm(
        belongs_to = "super::consignment::Entity",
        from = "Column::ConsignmentId",
        to = "super::consignment::Column::Id"
    )]
    Consignment,
}

impl Related<super::invoice_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::InvoiceItem.def()
    }
}

impl Related<super::consignment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Consignment.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
