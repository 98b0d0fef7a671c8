use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One received batch of stock for a product.
///
/// `quantity` is the original batch size and never changes after
/// receipt. `current_quantity` is what remains, drawn down by sales and
/// restored by reversals, always within `0..=quantity`. `depreciated`
/// mirrors `current_quantity == 0` so depleted batches can be skipped
/// without arithmetic.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "consignments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Per-product receipt counter, assigned on receive and monotone for
    /// the product's lifetime. Breaks arrival-date ties when drawing
    /// down stock.
    pub consignment_number: i32,
    pub arrival_date: DateTime<Utc>,
    pub product_id: Uuid,
    pub quantity: i32,
    pub current_quantity: i32,
    pub depreciated: bool,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_price: rust_decimal::Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
    #[sea_orm(has_many = "super::allocation::Entity")]
    Allocations,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl Related<super::allocation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Allocations.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// True while no sale has ever drawn from this batch.
    pub fn is_untouched(&self) -> bool {
        self.current_quantity == self.quantity
    }
}
