use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Catalog entry. `quantity` is derived state: the sum of
/// `current_quantity` across the product's consignments, recomputed
/// inside the same transaction as every consignment mutation.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    pub quantity: i32,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub cost_price: rust_decimal::Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::consignment::Entity")]
    Consignments,
    #[sea_orm(has_many = "super::invoice_item::Entity")]
    InvoiceItems,
}

impl Related<super::consignment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Consignments.def()
    }
}

impl Related<super::invoice_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::InvoiceItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
