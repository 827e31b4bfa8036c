use super::enums::{DeliveryMethod, OrderSource, OrderStatus, PaymentMethod, PriceLevel};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, Validate)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    /// Reserved from the `orders` sequence before insert
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i32,

    #[validate(length(
        min = 1,
        max = 50,
        message = "Order number must be between 1 and 50 characters"
    ))]
    #[sea_orm(unique)]
    pub order_number: String,

    pub client_id: Uuid,
    pub responsible_id: Option<i32>,
    pub status: OrderStatus,
    pub source: OrderSource,
    pub payment_method: PaymentMethod,
    pub delivery_method: DeliveryMethod,
    pub price_level: PriceLevel,
    pub is_promo: bool,
    pub sale_number: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,
    pub total_amount: Decimal,
    pub created_by: Option<i32>,
    pub updated_by: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// Calendar date the order counts towards in plans and reports
    pub fn order_date(&self) -> NaiveDate {
        self.created_at.date_naive()
    }
}

/// Zero-padded display number for an order identity
pub fn format_order_number(id: i32) -> String {
    format!("{:06}", id)
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItem,
    #[sea_orm(
        belongs_to = "super::client::Entity",
        from = "Column::ClientId",
        to = "super::client::Column::Id",
        on_delete = "Restrict"
    )]
    Client,
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::ResponsibleId",
        to = "super::user::Column::Id",
        on_delete = "SetNull"
    )]
    Responsible,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItem.def()
    }
}

impl Related<super::client::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Client.def()
    }
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Responsible.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_numbers_are_zero_padded_to_six() {
        assert_eq!(format_order_number(7), "000007");
        assert_eq!(format_order_number(123456), "123456");
        assert_eq!(format_order_number(1234567), "1234567");
    }
}
